use thiserror::Error;

/// Domain errors raised by the core model.
#[derive(Debug, Error)]
pub enum NatError {
    #[error("invalid CIDR '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),

    #[error("failed to parse settings from {path}: {source}")]
    Settings {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("natbridge must be run as root (effective uid {euid})")]
    NotRoot { euid: u32 },
}
