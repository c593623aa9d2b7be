//! # streamsync testkit
//!
//! Testing utilities for streamsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: single nodes and in-process clusters wired over the
//!   loopback transport, plus a recording session receiver
//! - **Generators**: Proptest strategies for identifiers, cookies and
//!   modify requests
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use streamsync_testkit::fixtures::{TestCluster, TestSession};
//!
//! # async fn example() {
//! let cluster = TestCluster::new(2);
//! let stream = cluster.create_stream("general", &[1]);
//!
//! let session = TestSession::open(cluster.node(0), "sync-1").await;
//! assert!(session.add(stream).await.is_ok());
//!
//! cluster.append(1, &stream, "hello");
//! let update = session.next_update(&stream).await;
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use streamsync_testkit::generators::ModifyParams;
//!
//! proptest! {
//!     #[test]
//!     fn generated_requests_validate(params: ModifyParams) {
//!         prop_assert!(params.to_request().validate().is_ok());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    eventually, init_tracing, node_address, RecordingReceiver, TestCluster, TestNode,
    TestSession,
};
pub use generators::ModifyParams;
