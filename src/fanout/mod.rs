//! Fan-out of access units to viewers
//!
//! Every viewer owns a [`DropOldestQueue`]. The ingest path pushes into all
//! of them through [`crate::registry::Registry::broadcast`] without ever
//! waiting on a slow consumer.

pub mod queue;
pub mod viewer;

pub use queue::DropOldestQueue;
pub use viewer::{random_id, Viewer, ViewerQueue};
