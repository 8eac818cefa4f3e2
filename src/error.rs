//! Error types for sprinklerd.

/// Top-level error type for the daemon and worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),
}

/// Configuration-related errors. Raised by `Config::from_env` when a
/// variable is present but unparseable; absent variables fall back to
/// defaults instead.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Broker connection and channel errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Consumer stream for queue {queue} ended")]
    StreamEnded { queue: String },

    #[error("Publish to queue {queue} failed: {reason}")]
    PublishFailed { queue: String, reason: String },
}

/// Process-registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Entry for schedule {id} already exists")]
    AlreadyExists { id: String },

    #[error("Invalid schedule id for registry use: {id:?}")]
    InvalidId { id: String },

    #[error("Entry for schedule {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recurring-schedule store errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Schedule {id} not found")]
    NotFound { id: String },

    #[error("Invalid schedule definition for {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Hardware actuator errors.
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("No pin mapped for zone {zone}")]
    UnknownZone { zone: String },

    #[error("GPIO write failed for zone {zone}: {reason}")]
    WriteFailed { zone: String, reason: String },
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, Error>;
