//! RTSP session tracking

pub mod state;
pub mod table;

pub use state::{RtspSession, SessionPhase};
pub use table::{expire_idle, SessionTable};
