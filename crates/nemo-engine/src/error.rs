use thiserror::Error;

/// Failure taxonomy of the engine.
///
/// Control failures abort only the invoked control; poll failures are
/// collected by the aggregator and surface once on the next read.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Device answered NACK to a SET command.
    #[error("device {host} rejected {command} {value}")]
    CommandFailed {
        host: String,
        command: &'static str,
        value: String,
    },

    /// Control property name the engine does not know.
    #[error("unknown control property: {0}")]
    UnknownProperty(String),

    /// Value parsed but falls outside the property's range.  Rejected
    /// before anything is sent to the device.
    #[error("value {value} for {property} out of range {min}..={max}")]
    ValueOutOfRange {
        property: &'static str,
        value: String,
        min: u8,
        max: u8,
    },

    /// Control value that does not parse as a number at all.
    #[error("invalid control value: {0:?}")]
    InvalidValue(String),

    /// Combined per-channel failures from the previous poll cycle.
    #[error("channel poll failures:\n{0}")]
    PollFailures(String),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}
