//! Channel registry
//!
//! The registry is the only broadly shared mutable state. It holds channel
//! definitions, live ingest status, codec descriptors and viewer sets, and
//! fans access units out to viewer queues.
//!
//! # Architecture
//!
//! ```text
//!                            Arc<Registry>
//!                     ┌──────────────────────────┐
//!                     │ RwLock<ChannelMap {      │
//!                     │   entries: uuid → entry, │
//!                     │   by_lower: lc → uuid,   │
//!                     │ }>                       │
//!                     └────────────┬─────────────┘
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         │                        │                        │
//!         ▼                        ▼                        ▼
//!   [Ingest worker]          [RTSP viewer]           [WebRTC viewer]
//!   broadcast(unit)          queue.recv()            queue.recv()
//!         │                        │                        │
//!         └──► DropOldestQueue ────┴──► interleaved RTP     └──► SRTP
//! ```
//!
//! Payloads are `bytes::Bytes`, so every viewer shares one allocation per
//! access unit.

pub mod config;
pub mod entry;
pub mod error;
pub mod frame;
pub mod readiness;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{ChannelEntry, ChannelSettings, ChannelSnapshot};
pub use error::RegistryError;
pub use frame::{is_audio_only, AccessUnit, CodecDescriptor, CodecType, MediaKind};
pub use store::Registry;
