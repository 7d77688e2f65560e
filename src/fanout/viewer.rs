//! Viewer registration

use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use rand::RngCore;

use super::queue::DropOldestQueue;
use crate::registry::frame::AccessUnit;

/// Queue type every consumer reads from
pub type ViewerQueue = DropOldestQueue<AccessUnit>;

/// A consumer attached to one channel
#[derive(Clone)]
pub struct Viewer {
    pub id: String,
    pub queue: Arc<ViewerQueue>,
    pub created_at: Instant,
}

impl Viewer {
    pub fn new(capacity: usize) -> Self {
        Self {
            id: random_id(),
            queue: Arc::new(DropOldestQueue::new(capacity)),
            created_at: Instant::now(),
        }
    }
}

/// Random opaque id formatted as five upper-case hex groups (8-4-4-4-12)
pub fn random_id() -> String {
    let mut b = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut b);

    let mut out = String::with_capacity(36);
    for (i, range) in [0..4, 4..6, 6..8, 8..10, 10..16].into_iter().enumerate() {
        if i > 0 {
            out.push('-');
        }
        for byte in &b[range] {
            let _ = write!(out, "{:02X}", byte);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_shape() {
        let id = random_id();
        let groups: Vec<&str> = id.split('-').collect();
        assert_eq!(groups.len(), 5);
        assert_eq!(
            groups.iter().map(|g| g.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        assert!(id
            .chars()
            .all(|c| c == '-' || c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_viewer_ids_are_unique() {
        let a = Viewer::new(4);
        let b = Viewer::new(4);
        assert_ne!(a.id, b.id);
        assert_eq!(a.queue.capacity(), 4);
    }
}
