//! Status and statistics

pub mod metrics;

pub use metrics::{ChannelStatus, ServerStats, StatusReport};
