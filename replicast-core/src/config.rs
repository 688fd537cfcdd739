use serde::{Deserialize, Serialize};

/// Queue configuration
///
/// Both thresholds only emit warnings; the queue never rejects work on their
/// account. Retention is bounded by the slowest unacknowledged consumer by
/// design, so these are the operator's early signal that a link has stalled,
/// ahead of polling `status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retained-entry count that triggers a backlog growth warning (0 disables)
    pub warn_retained_depth: usize,

    /// Per-consumer unsent backlog that triggers a slow-consumer warning (0 disables)
    pub slow_consumer_threshold: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            warn_retained_depth: 100_000,   // ~100K retained items
            slow_consumer_threshold: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.warn_retained_depth, 100_000);
        assert_eq!(config.slow_consumer_threshold, 10_000);
    }

    #[test]
    fn test_config_deserializes() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"warn_retained_depth":50,"slow_consumer_threshold":0}"#)
                .unwrap();
        assert_eq!(config.warn_retained_depth, 50);
        assert_eq!(config.slow_consumer_threshold, 0);
    }
}
