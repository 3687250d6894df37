use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug)]
struct Inner {
    connected: AtomicBool,
    generation: AtomicU64,
}

/// Simulated connectivity shared by a client and its synchronizer.
///
/// Every transition from disconnected to connected bumps the reconnect
/// generation, which the synchronizer uses to notice that its streams
/// were interrupted.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl NetworkMonitor {
    pub fn new(connected: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                connected: AtomicBool::new(connected),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.inner.connected.swap(connected, Ordering::SeqCst);
        if connected && !was {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Number of reconnects so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_bumps_generation() {
        let network = NetworkMonitor::default();
        assert!(network.is_connected());
        assert_eq!(network.generation(), 0);

        network.set_connected(true);
        assert_eq!(network.generation(), 0);

        let shared = network.clone();
        shared.set_connected(false);
        assert!(!network.is_connected());
        network.set_connected(true);
        assert_eq!(shared.generation(), 1);
    }
}
