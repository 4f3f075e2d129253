//! `twin sessions`: Saved-session management outside a chat.

use chrono::Local;
use twin_agent::migrate;
use twin_config::AppConfig;
use twin_core::memory::{SnapshotInfo, SnapshotStore};
use twin_memory::FileSnapshotStore;

fn store() -> Result<FileSnapshotStore, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(FileSnapshotStore::new(&config.paths.sessions_dir))
}

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let sessions = store()?.list().await?;
    if sessions.is_empty() {
        println!("No saved sessions");
        return Ok(());
    }
    for info in &sessions {
        println!("{}", list_line(info));
    }
    Ok(())
}

fn list_line(info: &SnapshotInfo) -> String {
    format!(
        "{}  {}  {}  {}  {} messages",
        info.session_id,
        info.saved_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        info.model,
        info.agent,
        info.messages
    )
}

pub async fn show(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = migrate(store()?.load(id).await?)?;
    let state = &snapshot.state;

    println!("Session {}", state.session_id);
    println!("  Saved:   {}", snapshot.saved_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
    println!("  Mode:    {}", state.mode);
    println!("  Agent:   {}", state.agent);
    println!("  Model:   {}", state.model);
    println!("  Queries: {}", state.metrics.query_count);

    let data = &state.session_data;
    for (title, items) in [
        ("Decisions", &data.decisions),
        ("Next steps", &data.next_steps),
        ("Files discussed", &data.files_discussed),
    ] {
        if !items.is_empty() {
            println!("\n{title}:");
            for item in items {
                println!("  - {item}");
            }
        }
    }

    if !snapshot.buffer.running_summary().is_empty() {
        println!("\nSummary:\n{}", snapshot.buffer.running_summary());
    }
    println!();
    for message in snapshot.buffer.dynamic() {
        println!("[{}] {}", message.role.as_str(), message.content);
    }
    Ok(())
}

pub async fn delete(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    store()?.delete(id).await?;
    println!("Deleted session {id}");
    Ok(())
}
