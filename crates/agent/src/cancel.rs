//! Operator interrupts.
//!
//! A single [`KeyListener`] watches Ctrl-C for the whole process. While a
//! backend call is armed, an interrupt cancels that call's token. Otherwise
//! it is forwarded as an idle interrupt, which the front end treats as a
//! request to save and leave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What an interrupt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// An in-flight call was cancelled
    Cancelled,
    /// Nothing was running; forwarded to the idle channel
    Idle,
}

pub struct KeyListener {
    armed: Mutex<Option<(u64, CancellationToken)>>,
    next_id: AtomicU64,
    idle_tx: mpsc::UnboundedSender<()>,
}

impl KeyListener {
    /// A listener not yet attached to any signal source.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let listener = Arc::new(Self {
            armed: Mutex::new(None),
            next_id: AtomicU64::new(0),
            idle_tx,
        });
        (listener, idle_rx)
    }

    /// A listener fed by Ctrl-C on a background task.
    pub fn spawn() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (listener, idle_rx) = Self::channel();
        let task_listener = Arc::clone(&listener);
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Cannot listen for Ctrl-C; interrupts disabled");
                    break;
                }
                task_listener.interrupt();
            }
        });
        (listener, idle_rx)
    }

    fn slot(&self) -> MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm a fresh token for one call. Disarmed when the guard drops.
    pub fn arm(self: &Arc<Self>) -> ArmedCall {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *self.slot() = Some((id, token.clone()));
        ArmedCall {
            id,
            token,
            listener: Arc::clone(self),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot().is_some()
    }

    /// Deliver one interrupt.
    pub fn interrupt(&self) -> Interrupt {
        if let Some((_, token)) = self.slot().take() {
            info!("Interrupt: cancelling in-flight call");
            token.cancel();
            return Interrupt::Cancelled;
        }
        if self.idle_tx.send(()).is_err() {
            debug!("Idle interrupt dropped; nobody is listening");
        }
        Interrupt::Idle
    }
}

/// A call that an interrupt may cancel.
pub struct ArmedCall {
    id: u64,
    token: CancellationToken,
    listener: Arc<KeyListener>,
}

impl ArmedCall {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ArmedCall {
    fn drop(&mut self) {
        let mut slot = self.listener.slot();
        if slot.as_ref().is_some_and(|(id, _)| *id == self.id) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armed_interrupt_cancels_the_call() {
        let (listener, mut idle) = KeyListener::channel();
        let call = listener.arm();
        assert!(listener.is_armed());

        assert_eq!(listener.interrupt(), Interrupt::Cancelled);
        assert!(call.token().is_cancelled());
        assert!(idle.try_recv().is_err());
        assert!(!listener.is_armed());
    }

    #[test]
    fn idle_interrupt_is_forwarded() {
        let (listener, mut idle) = KeyListener::channel();
        {
            let _call = listener.arm();
        }
        assert!(!listener.is_armed());
        assert_eq!(listener.interrupt(), Interrupt::Idle);
        assert!(idle.try_recv().is_ok());
    }

    #[test]
    fn stale_guard_does_not_disarm_newer_call() {
        let (listener, _idle) = KeyListener::channel();
        let first = listener.arm();
        let second = listener.arm();
        drop(first);
        assert!(listener.is_armed());

        assert_eq!(listener.interrupt(), Interrupt::Cancelled);
        assert!(second.token().is_cancelled());
    }
}
