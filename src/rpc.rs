//! The remote-call contract between the routing core and whatever moves
//! bytes between peers.
//!
//! The core never opens connections itself. It hands a [RpcRequest] and a
//! target [PeerRef] to a [Transport] and gets back either a [RpcReply] or a
//! [ChordError::Unreachable] once the peer fails to answer in time.

use serde::{Deserialize, Serialize};

use crate::chord_util::Identifier;
use crate::error::{ChordError, Result};
use crate::node_info::PeerRef;

/// One variant per method of the peer RPC surface.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RpcRequest {
    GetInfo,
    Create,
    Join(PeerRef),
    FindSuccessor(Identifier),
    ClosestPrecedingNode(Identifier),
    Notify(PeerRef),
    GetPredecessor,
    GetSuccessorList,
}

impl RpcRequest {
    /// Wire name of the method.
    pub fn method(&self) -> &'static str {
        match self {
            RpcRequest::GetInfo => "get_info",
            RpcRequest::Create => "create",
            RpcRequest::Join(_) => "join",
            RpcRequest::FindSuccessor(_) => "find_successor",
            RpcRequest::ClosestPrecedingNode(_) => "closest_preceding_node",
            RpcRequest::Notify(_) => "notify",
            RpcRequest::GetPredecessor => "get_predecessor",
            RpcRequest::GetSuccessorList => "get_successor_list",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RpcReply {
    Peer(PeerRef),
    MaybePeer(Option<PeerRef>),
    Peers(Vec<PeerRef>),
    Done,
}

/// `call(peer, method, args) -> result | failure`.
///
/// Implementations must bound every call in time and report a peer that
/// does not answer as [ChordError::Unreachable].
pub trait Transport: Send + Sync {
    fn call(&self, peer: &PeerRef, request: RpcRequest) -> Result<RpcReply>;
}

/// Typed view of one remote peer.
pub struct Remote<'a> {
    transport: &'a dyn Transport,
    peer: &'a PeerRef,
}

impl<'a> Remote<'a> {
    pub fn new(transport: &'a dyn Transport, peer: &'a PeerRef) -> Self {
        Remote { transport, peer }
    }

    /// Liveness probe.
    pub fn get_info(&self) -> Result<PeerRef> {
        expect_peer(self.transport.call(self.peer, RpcRequest::GetInfo)?, "get_info")
    }

    pub fn create(&self) -> Result<()> {
        expect_done(self.transport.call(self.peer, RpcRequest::Create)?, "create")
    }

    pub fn join(&self, bootstrap: &PeerRef) -> Result<()> {
        let reply = self.transport.call(self.peer, RpcRequest::Join(bootstrap.clone()))?;
        expect_done(reply, "join")
    }

    pub fn find_successor(&self, id: Identifier) -> Result<PeerRef> {
        let reply = self.transport.call(self.peer, RpcRequest::FindSuccessor(id))?;
        expect_peer(reply, "find_successor")
    }

    pub fn closest_preceding_node(&self, id: Identifier) -> Result<PeerRef> {
        let reply = self.transport.call(self.peer, RpcRequest::ClosestPrecedingNode(id))?;
        expect_peer(reply, "closest_preceding_node")
    }

    pub fn notify(&self, candidate: &PeerRef) -> Result<()> {
        let reply = self.transport.call(self.peer, RpcRequest::Notify(candidate.clone()))?;
        expect_done(reply, "notify")
    }

    pub fn get_predecessor(&self) -> Result<Option<PeerRef>> {
        match self.transport.call(self.peer, RpcRequest::GetPredecessor)? {
            RpcReply::MaybePeer(pred) => Ok(pred),
            _ => Err(ChordError::UnexpectedReply { method: "get_predecessor" }),
        }
    }

    pub fn get_successor_list(&self) -> Result<Vec<PeerRef>> {
        match self.transport.call(self.peer, RpcRequest::GetSuccessorList)? {
            RpcReply::Peers(list) => Ok(list),
            _ => Err(ChordError::UnexpectedReply { method: "get_successor_list" }),
        }
    }
}

fn expect_peer(reply: RpcReply, method: &'static str) -> Result<PeerRef> {
    match reply {
        RpcReply::Peer(peer) => Ok(peer),
        _ => Err(ChordError::UnexpectedReply { method }),
    }
}

fn expect_done(reply: RpcReply, method: &'static str) -> Result<()> {
    match reply {
        RpcReply::Done => Ok(()),
        _ => Err(ChordError::UnexpectedReply { method }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers every call with the same canned reply.
    struct Canned(RpcReply);

    impl Transport for Canned {
        fn call(&self, _peer: &PeerRef, _request: RpcRequest) -> Result<RpcReply> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_typed_calls_decode_matching_replies() -> Result<()> {
        let target = PeerRef::new("10.0.0.1", 7000, 1);
        let other = PeerRef::new("10.0.0.2", 7000, 2);

        let t = Canned(RpcReply::Peer(other.clone()));
        assert_eq!(Remote::new(&t, &target).find_successor(5)?, other);

        let t = Canned(RpcReply::MaybePeer(None));
        assert_eq!(Remote::new(&t, &target).get_predecessor()?, None);

        let t = Canned(RpcReply::Peers(vec![other.clone()]));
        assert_eq!(Remote::new(&t, &target).get_successor_list()?, vec![other]);

        let t = Canned(RpcReply::Done);
        Remote::new(&t, &target).notify(&target)?;
        Ok(())
    }

    #[test]
    fn test_mismatched_reply_is_rejected() {
        let target = PeerRef::new("10.0.0.1", 7000, 1);
        let t = Canned(RpcReply::Done);
        let err = Remote::new(&t, &target).get_info().unwrap_err();
        assert!(matches!(err, ChordError::UnexpectedReply { method: "get_info" }));
        assert!(!err.is_unreachable());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(RpcRequest::FindSuccessor(3).method(), "find_successor");
        assert_eq!(RpcRequest::GetSuccessorList.method(), "get_successor_list");
    }
}
