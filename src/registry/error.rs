//! Registry error types

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No channel matches the name, in any casing
    ChannelNotFound(String),
    /// Codec parameters did not become usable within the readiness budget
    CodecNotReady(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::ChannelNotFound(name) => write!(f, "Channel not found: {}", name),
            RegistryError::CodecNotReady(name) => write!(f, "Codec not ready: {}", name),
        }
    }
}

impl std::error::Error for RegistryError {}
