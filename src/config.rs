//! Typed, environment-driven configuration, in the style of `common-kafka`'s
//! `KafkaConfig`/`ConsumerConfig`.

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct ProducerStateConfig {
    /// Idle producers with no in-flight transaction are expired after this many
    /// milliseconds without an append. Defaults to Kafka's conventional 15 minutes.
    #[envconfig(default = "900000")]
    pub max_producer_id_expiration_ms: u32,

    /// Maximum number of log entries buffered in memory during recovery replay
    /// before the manager commits them and requests more.
    #[envconfig(default = "100")]
    pub cache_queue_size: usize,

    /// Number of transient cursor read failures tolerated during recovery before
    /// the manager gives up and transitions to `RECOVER_ERROR`.
    #[envconfig(default = "10")]
    pub max_error_count: u32,
}

impl Default for ProducerStateConfig {
    fn default() -> Self {
        Self {
            max_producer_id_expiration_ms: 900_000,
            cache_queue_size: 100,
            max_error_count: 10,
        }
    }
}
