//! Routing core of a Chord DHT peer.
//!
//! A [ChordNode](chord_node::ChordNode) keeps its position on a 32-bit
//! identifier ring, answers "who owns id X" through [router], and repairs its
//! view of the ring with the periodic procedures in [stabilizer]. Peers talk
//! through the [Transport](rpc::Transport) trait: HTTP/JSON in production
//! ([endpoints]), an in-process network in tests (`testkit`, behind the
//! `testkit` feature).

#[macro_use]
extern crate rocket;

pub mod gval;
pub mod error;
pub mod chord_util;
pub mod node_info;
pub mod rpc;
pub mod chord_node;
pub mod router;
pub mod stabilizer;
pub mod endpoints;
pub mod config;
pub mod logging;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use chord_node::ChordNode;
pub use error::{ChordError, Result};
pub use node_info::PeerRef;
