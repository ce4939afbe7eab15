//! Counter sink for backend connection events.
//!
//! The connection only ever increments counters and never reads them back,
//! so the sink is a fire-and-forget trait object. [`BackendStats`] keeps the
//! counts in process with relaxed atomics; a deployment that ships metrics
//! elsewhere implements [`Metrics`] itself.

use std::sync::atomic::{AtomicU64, Ordering};

/// Events a backend connection reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// A session reached the ready state
    Connect,
    /// An open session was torn down
    Disconnect,
    /// Dialing the backend failed
    DialFailure,
    /// The backend rejected or garbled an `AUTH`
    AuthFailure,
    /// The backend rejected or garbled a `select`
    SelectFailure,
    /// A `PING` health check failed
    PingFailure,
}

impl Counter {
    /// Metric name, as the counter would be reported upstream.
    pub fn name(self) -> &'static str {
        match self {
            Counter::Connect => "connect",
            Counter::Disconnect => "disconnect",
            Counter::DialFailure => "dial_failure",
            Counter::AuthFailure => "auth_failure",
            Counter::SelectFailure => "select_failure",
            Counter::PingFailure => "ping_failure",
        }
    }
}

/// Destination for connection counters.
pub trait Metrics: Send + Sync {
    fn increment(&self, counter: Counter);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment(&self, _counter: Counter) {}
}

/// Statistics for backend connections
#[derive(Debug, Default)]
pub struct BackendStats {
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
    pub dial_failures: AtomicU64,
    pub auth_failures: AtomicU64,
    pub select_failures: AtomicU64,
    pub ping_failures: AtomicU64,
}

impl BackendStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Connect => &self.connects,
            Counter::Disconnect => &self.disconnects,
            Counter::DialFailure => &self.dial_failures,
            Counter::AuthFailure => &self.auth_failures,
            Counter::SelectFailure => &self.select_failures,
            Counter::PingFailure => &self.ping_failures,
        }
    }

    /// Current value of `counter`.
    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }
}

impl Metrics for BackendStats {
    fn increment(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_backend_stats_counts_each_event() {
        let stats = BackendStats::new();
        stats.increment(Counter::Connect);
        stats.increment(Counter::Disconnect);
        stats.increment(Counter::Disconnect);

        assert_eq!(stats.get(Counter::Connect), 1);
        assert_eq!(stats.get(Counter::Disconnect), 2);
        assert_eq!(stats.get(Counter::PingFailure), 0);
    }

    #[test]
    fn test_shared_sink() {
        let stats = Arc::new(BackendStats::new());
        let sink: Arc<dyn Metrics> = stats.clone();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        sink.increment(Counter::AuthFailure);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.get(Counter::AuthFailure), 400);
    }

    #[test]
    fn test_counter_names() {
        assert_eq!(Counter::Disconnect.name(), "disconnect");
        assert_eq!(Counter::DialFailure.name(), "dial_failure");
    }
}
