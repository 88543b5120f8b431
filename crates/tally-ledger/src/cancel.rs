use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag.
///
/// Clones observe the same flag. The replay engine checks it only between
/// transactions, so a cancelled run always stops on a transaction boundary.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_from_another_thread() {
        let token = CancellationToken::new();
        let handle = token.clone();
        std::thread::spawn(move || handle.cancel()).join().unwrap();
        assert!(token.is_cancelled());
    }
}
