//! Proptest generators for property-based testing.

use bytes::Bytes;
use proptest::prelude::*;

use streamsync_core::{ModifySyncRequest, NodeAddress, StreamId, SyncCookie};

/// Generate a random StreamId.
pub fn stream_id() -> impl Strategy<Value = StreamId> {
    any::<[u8; 32]>().prop_map(StreamId::from_bytes)
}

/// Generate a random, non-zero NodeAddress.
pub fn node_address() -> impl Strategy<Value = NodeAddress> {
    any::<[u8; 20]>()
        .prop_filter("zero address", |b| b.iter().any(|x| *x != 0))
        .prop_map(NodeAddress::from_bytes)
}

/// Generate a sync id in the server's format.
pub fn sync_id() -> impl Strategy<Value = String> {
    "[0-9a-f]{32}".prop_map(String::from)
}

/// Generate a stream name.
pub fn stream_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,31}".prop_map(String::from)
}

/// Generate event payload bytes of at most `max_len` bytes.
pub fn event(max_len: usize) -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..=max_len).prop_map(Bytes::from)
}

/// Generate a cookie, with or without a node hint and position.
pub fn sync_cookie() -> impl Strategy<Value = SyncCookie> {
    (
        stream_id(),
        proptest::option::of(node_address()),
        proptest::option::of((0i64..1_000, any::<[u8; 32]>())),
    )
        .prop_map(|(stream_id, node, position)| {
            let mut cookie = SyncCookie::new(stream_id);
            if let Some(node) = node {
                cookie = cookie.with_node(node);
            }
            if let Some((generation, hash)) = position {
                cookie = cookie.at_position(generation, Bytes::copy_from_slice(&hash));
            }
            cookie
        })
}

/// Parameters for a structurally valid modify request.
///
/// No stream appears twice, within a list or across lists.
#[derive(Debug, Clone)]
pub struct ModifyParams {
    pub sync_id: String,
    pub adds: Vec<SyncCookie>,
    pub removes: Vec<StreamId>,
    pub backfill: Option<(String, Vec<SyncCookie>)>,
}

impl Arbitrary for ModifyParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            sync_id(),
            prop::collection::vec(sync_cookie(), 0..6),
            prop::collection::vec(stream_id(), 0..6),
            proptest::option::of((sync_id(), prop::collection::vec(sync_cookie(), 1..4))),
        )
            .prop_map(|(sync_id, adds, removes, backfill)| {
                let adds = dedup_by_stream(adds);
                let mut removes = dedup(removes);
                removes.retain(|id| !adds.iter().any(|c| c.stream_id == *id));
                let backfill = backfill.and_then(|(target, cookies)| {
                    let mut cookies = dedup_by_stream(cookies);
                    cookies.retain(|c| {
                        !adds.iter().any(|a| a.stream_id == c.stream_id)
                            && !removes.contains(&c.stream_id)
                    });
                    (!cookies.is_empty()).then_some((target, cookies))
                });
                ModifyParams {
                    sync_id,
                    adds,
                    removes,
                    backfill,
                }
            })
            .prop_filter("empty request", |p| {
                !p.adds.is_empty() || !p.removes.is_empty() || p.backfill.is_some()
            })
            .boxed()
    }
}

impl ModifyParams {
    pub fn to_request(&self) -> ModifySyncRequest {
        let mut request = ModifySyncRequest::new(self.sync_id.clone());
        for cookie in &self.adds {
            request = request.add(cookie.clone());
        }
        for stream_id in &self.removes {
            request = request.remove(*stream_id);
        }
        if let Some((target, cookies)) = &self.backfill {
            request = request.backfill(target.clone(), cookies.clone());
        }
        request
    }
}

fn dedup(ids: Vec<StreamId>) -> Vec<StreamId> {
    let mut out: Vec<StreamId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn dedup_by_stream(cookies: Vec<SyncCookie>) -> Vec<SyncCookie> {
    let mut out: Vec<SyncCookie> = Vec::with_capacity(cookies.len());
    for cookie in cookies {
        if !out.iter().any(|c| c.stream_id == cookie.stream_id) {
            out.push(cookie);
        }
    }
    out
}
