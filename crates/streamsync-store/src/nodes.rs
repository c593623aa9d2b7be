//! Stream placement and sticky-peer rotation.

use parking_lot::Mutex;
use streamsync_core::{NodeAddress, StreamId};

/// The nodes a stream is replicated on, as seen from the local node.
///
/// Remote candidates are tried in a rotating order starting at the
/// "sticky peer". The starting index is derived from the stream id and the
/// local address, so different nodes spread load across replicas while one
/// node stays deterministic.
#[derive(Debug)]
pub struct StreamNodes {
    local: NodeAddress,
    inner: Mutex<Placement>,
}

#[derive(Debug)]
struct Placement {
    is_local: bool,
    remotes: Vec<NodeAddress>,
    sticky: usize,
}

impl StreamNodes {
    pub fn new(stream_id: StreamId, local: NodeAddress, nodes: Vec<NodeAddress>) -> Self {
        let mut placement = Placement {
            is_local: false,
            remotes: Vec::new(),
            sticky: 0,
        };
        placement.reset(stream_id, local, nodes);
        Self {
            local,
            inner: Mutex::new(placement),
        }
    }

    /// Replace the placement, e.g. after the stream was moved.
    pub fn reset(&self, stream_id: StreamId, nodes: Vec<NodeAddress>) {
        self.inner.lock().reset(stream_id, self.local, nodes);
    }

    pub fn is_local(&self) -> bool {
        self.inner.lock().is_local
    }

    pub fn remotes(&self) -> Vec<NodeAddress> {
        self.inner.lock().remotes.clone()
    }

    pub fn remotes_and_is_local(&self) -> (Vec<NodeAddress>, bool) {
        let inner = self.inner.lock();
        (inner.remotes.clone(), inner.is_local)
    }

    /// The preferred remote node, if there are any remotes.
    pub fn sticky_peer(&self) -> Option<NodeAddress> {
        let inner = self.inner.lock();
        inner.remotes.get(inner.sticky).copied()
    }

    /// Move past `current` if it is still the sticky peer and return the
    /// new sticky peer. Concurrent callers that saw the same failure only
    /// advance once.
    pub fn advance_sticky_peer(&self, current: NodeAddress) -> Option<NodeAddress> {
        let mut inner = self.inner.lock();
        if inner.remotes.is_empty() {
            return None;
        }
        if inner.remotes[inner.sticky] == current {
            inner.sticky = (inner.sticky + 1) % inner.remotes.len();
        }
        inner.remotes.get(inner.sticky).copied()
    }
}

impl Placement {
    fn reset(&mut self, stream_id: StreamId, local: NodeAddress, nodes: Vec<NodeAddress>) {
        self.is_local = nodes.contains(&local);
        self.remotes = nodes.into_iter().filter(|n| *n != local).collect();
        self.sticky = sticky_seed(stream_id, local, self.remotes.len());
    }
}

fn sticky_seed(stream_id: StreamId, local: NodeAddress, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(local.as_bytes());
    let hash = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % len as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> NodeAddress {
        NodeAddress::from_bytes([b; 20])
    }

    #[test]
    fn test_local_is_split_from_remotes() {
        let nodes = StreamNodes::new(StreamId::derive("s"), addr(1), vec![addr(1), addr(2), addr(3)]);
        let (remotes, is_local) = nodes.remotes_and_is_local();
        assert!(is_local);
        assert_eq!(remotes.len(), 2);
        assert!(!remotes.contains(&addr(1)));
    }

    #[test]
    fn test_sticky_peer_is_deterministic() {
        let a = StreamNodes::new(StreamId::derive("s"), addr(1), vec![addr(2), addr(3), addr(4)]);
        let b = StreamNodes::new(StreamId::derive("s"), addr(1), vec![addr(2), addr(3), addr(4)]);
        assert_eq!(a.sticky_peer(), b.sticky_peer());
    }

    #[test]
    fn test_advance_rotates_through_all_remotes() {
        let nodes = StreamNodes::new(StreamId::derive("s"), addr(1), vec![addr(2), addr(3), addr(4)]);
        let mut seen = Vec::new();
        let mut current = nodes.sticky_peer().unwrap();
        for _ in 0..3 {
            seen.push(current);
            current = nodes.advance_sticky_peer(current).unwrap();
        }
        seen.sort();
        assert_eq!(seen, vec![addr(2), addr(3), addr(4)]);
    }

    #[test]
    fn test_stale_advance_is_ignored() {
        let nodes = StreamNodes::new(StreamId::derive("s"), addr(1), vec![addr(2), addr(3)]);
        let first = nodes.sticky_peer().unwrap();
        let second = nodes.advance_sticky_peer(first).unwrap();
        assert_ne!(first, second);
        // A second report of the old peer does not move the sticky index again.
        assert_eq!(nodes.advance_sticky_peer(first), Some(second));
    }

    #[test]
    fn test_no_remotes() {
        let nodes = StreamNodes::new(StreamId::derive("s"), addr(1), vec![addr(1)]);
        assert_eq!(nodes.sticky_peer(), None);
        assert_eq!(nodes.advance_sticky_peer(addr(2)), None);
    }
}
