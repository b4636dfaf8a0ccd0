use tokio::sync::watch;

/// Connectivity of presence feeds (gateway bridges).
pub struct FeedMonitor {
    connected: watch::Sender<usize>,
    lost: watch::Sender<bool>,
}

impl FeedMonitor {
    /// No feed connected, not lost.
    pub fn new() -> Self {
        let (connected, _rx) = watch::channel(0);
        let (lost, _rx) = watch::channel(false);
        Self { connected, lost }
    }

    /// Number of feeds currently connected.
    pub fn connected(&self) -> usize {
        *self.connected.borrow()
    }

    /// Record a newly connected feed.
    pub fn attach(&self) {
        self.connected.send_modify(|count| *count += 1);
    }

    /// Record a disconnected feed.
    pub fn detach(&self) {
        self.connected.send_modify(|count| *count = count.saturating_sub(1));
    }

    /// Subscribe to changes of the connected-feed count.
    pub fn watcher(&self) -> watch::Receiver<usize> {
        self.connected.subscribe()
    }

    /// Flag the feed as lost for good; observed by the shutdown trigger.
    pub fn mark_lost(&self) {
        self.lost.send_replace(true);
    }

    /// Subscribe to the lost flag.
    pub fn lost_watcher(&self) -> watch::Receiver<bool> {
        self.lost.subscribe()
    }
}

impl Default for FeedMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_never_underflows() {
        let monitor = FeedMonitor::new();
        monitor.attach();
        monitor.attach();
        monitor.detach();
        assert_eq!(monitor.connected(), 1);
        monitor.detach();
        monitor.detach();
        assert_eq!(monitor.connected(), 0);
    }

    #[test]
    fn lost_flag_reaches_watchers() {
        let monitor = FeedMonitor::new();
        let watcher = monitor.lost_watcher();
        assert!(!*watcher.borrow());
        monitor.mark_lost();
        assert!(*watcher.borrow());
    }
}
