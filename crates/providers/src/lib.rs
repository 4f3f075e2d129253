//! Language-model backends for twin.
//!
//! All providers implement the `twin_core::Provider` trait.
//! The router builds the one selected by configuration.

pub mod ollama;
pub mod ollama_cli;
pub mod router;

pub use ollama::OllamaProvider;
pub use ollama_cli::OllamaCliProvider;
pub use router::build_from_config;
