use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative shutdown flag shared between the signal handler and engines.
///
/// The engine checks it before each chart group and before each chart of a
/// sequenced group; charts already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Route Ctrl-C to this flag. A second Ctrl-C exits immediately.
    pub fn install_signal_handler(&self) {
        let requested = Arc::clone(&self.requested);
        let _ = ctrlc::set_handler(move || {
            if requested.load(Ordering::SeqCst) {
                std::process::exit(130);
            }
            requested.store(true, Ordering::SeqCst);
            eprintln!("\nshutdown requested, finishing charts in flight...");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();
        assert!(!other.is_requested());
        shutdown.request();
        assert!(other.is_requested());
    }
}
