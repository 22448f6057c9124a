//! A running chord peer: its identity, its lock-protected ring view and the
//! transport it uses to reach everybody else.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::error::{ChordError, Result};
use crate::node_info::{PeerRef, RingState, TopoInfo};
use crate::router;
use crate::rpc::{Remote, RpcReply, RpcRequest, Transport};
use crate::stabilizer;

pub struct ChordNode {
    info: PeerRef,
    state: Mutex<RingState>,
    transport: Arc<dyn Transport>,
}

impl ChordNode {
    /// A node that has not created or joined a ring yet.
    pub fn new(info: PeerRef, transport: Arc<dyn Transport>) -> Self {
        ChordNode {
            state: Mutex::new(RingState::new(info.clone())),
            info,
            transport,
        }
    }

    pub fn info(&self) -> &PeerRef {
        &self.info
    }

    pub fn remote<'a>(&'a self, peer: &'a PeerRef) -> Remote<'a> {
        Remote::new(self.transport.as_ref(), peer)
    }

    /// Every read-modify-write of the ring view happens under this guard.
    /// Never keep it across a remote call.
    pub fn lock_state(&self) -> Result<MutexGuard<'_, RingState>> {
        self.state.lock().map_err(|_| ChordError::LockPoisoned)
    }

    /// Consistent copy of the ring view.
    pub fn snapshot(&self) -> Result<RingState> {
        Ok(self.lock_state()?.clone())
    }

    pub fn is_joined(&self) -> Result<bool> {
        Ok(self.lock_state()?.joined)
    }

    pub fn get_predecessor(&self) -> Result<Option<PeerRef>> {
        Ok(self.lock_state()?.predecessor.clone())
    }

    pub fn get_successor_list(&self) -> Result<Vec<PeerRef>> {
        Ok(self.lock_state()?.successors.to_vec())
    }

    pub fn topology(&self) -> Result<TopoInfo> {
        Ok(self.lock_state()?.to_topo_info())
    }

    /// Start a new ring containing only this node. Resets an already joined node.
    pub fn create(&self) -> Result<()> {
        self.lock_state()?.reset_as_sole_node();
        info!("created ring, self: {}", self.info);
        Ok(())
    }

    /// Enter the ring that `bootstrap` belongs to.
    ///
    /// Remote failures are not retried here; they reach the caller, who
    /// decides whether to run the whole join again.
    pub fn join(&self, bootstrap: &PeerRef) -> Result<()> {
        info!("joining via {}, self: {}", bootstrap, self.info);
        self.lock_state()?.predecessor = None;

        let new_succ = self.remote(bootstrap).find_successor(self.info.id)?;
        let fetched = if new_succ.id == self.info.id {
            // we already own our own id; keep the successor list as it is
            debug!("join: bootstrap answered with self, successor list untouched");
            None
        } else {
            let target = if new_succ.id == bootstrap.id {
                bootstrap
            } else {
                &new_succ
            };
            let remote = self.remote(target);
            let list = remote.get_successor_list()?;
            remote.notify(&self.info)?;
            Some(list)
        };

        let mut state = self.lock_state()?;
        if let Some(list) = fetched {
            state.adopt_successor(new_succ.clone(), &list);
        }
        state.reset_fingers();
        state.joined = true;
        drop(state);

        info!("joined, self: {}, successor: {}", self.info, new_succ);
        Ok(())
    }

    /// Serve one inbound RPC.
    pub fn handle(&self, request: RpcRequest) -> Result<RpcReply> {
        let reply = match request {
            RpcRequest::GetInfo => RpcReply::Peer(self.info.clone()),
            RpcRequest::Create => {
                self.create()?;
                RpcReply::Done
            }
            RpcRequest::Join(bootstrap) => {
                self.join(&bootstrap)?;
                RpcReply::Done
            }
            RpcRequest::FindSuccessor(id) => RpcReply::Peer(router::find_successor(self, id)?),
            RpcRequest::ClosestPrecedingNode(id) => {
                RpcReply::Peer(router::closest_preceding_node(self, id)?)
            }
            RpcRequest::Notify(candidate) => {
                stabilizer::notify(self, &candidate)?;
                RpcReply::Done
            }
            RpcRequest::GetPredecessor => RpcReply::MaybePeer(self.get_predecessor()?),
            RpcRequest::GetSuccessorList => RpcReply::Peers(self.get_successor_list()?),
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gval;
    use crate::testkit::SimNetwork;

    #[test]
    fn test_create_makes_sole_node_ring() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(1000);
        a.create()?;
        let state = a.snapshot()?;
        assert!(state.joined);
        assert!(state.predecessor.is_none());
        assert_eq!(state.finger_cursor, 0);
        assert!(state.successors.iter().all(|p| p == a.info()));
        assert!(state.fingers.iter().all(|p| p == a.info()));
        Ok(())
    }

    #[test]
    fn test_create_resets_a_joined_node() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(1000);
        let b = net.spawn_node(2000);
        a.create()?;
        b.join(a.info())?;
        assert_eq!(b.get_successor_list()?[0], *a.info());

        b.create()?;
        assert!(b.get_successor_list()?.iter().all(|p| p == b.info()));
        assert!(b.get_predecessor()?.is_none());
        Ok(())
    }

    #[test]
    fn test_join_sole_bootstrap_adopts_it_and_notifies() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(1000);
        let b = net.spawn_node(5000);
        a.create()?;
        b.join(a.info())?;

        let state = b.snapshot()?;
        assert!(state.joined);
        assert_eq!(state.successors, [a.info().clone(), a.info().clone(), a.info().clone()]);
        assert!(state.fingers.iter().all(|p| p == b.info()));
        assert_eq!(a.get_predecessor()?, Some(b.info().clone()));
        Ok(())
    }

    #[test]
    fn test_join_adopts_found_successor_other_than_bootstrap() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(1000);
        let c = net.spawn_node(3000);
        a.create()?;
        c.join(a.info())?;
        for _ in 0..3 {
            for n in [&a, &c] {
                stabilizer::stabilize(n)?;
            }
        }
        assert_eq!(a.get_successor_list()?[0], *c.info());

        // 2000 lies between a and c, so its successor is c, not the bootstrap a
        let b = net.spawn_node(2000);
        b.join(a.info())?;
        let succs = b.get_successor_list()?;
        assert_eq!(succs[0], *c.info());
        assert_eq!(succs.len(), gval::SUCCESSOR_LIST_LEN);
        assert_eq!(c.get_predecessor()?, Some(b.info().clone()));
        Ok(())
    }

    #[test]
    fn test_join_keeps_successor_list_when_own_id_is_taken() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(100);
        let b = net.spawn_node(100);
        let c = net.spawn_node(300);
        a.create()?;
        let before = {
            let mut state = b.lock_state()?;
            state.successors = [a.info().clone(), c.info().clone(), b.info().clone()];
            state.predecessor = Some(c.info().clone());
            state.fingers[3] = c.info().clone();
            state.finger_cursor = 5;
            state.successors.clone()
        };

        // a answers with itself, whose id equals b's
        b.join(a.info())?;

        let state = b.snapshot()?;
        assert_eq!(state.successors, before);
        assert!(state.joined);
        assert!(state.predecessor.is_none());
        assert_eq!(state.finger_cursor, 0);
        assert!(state.fingers.iter().all(|p| p == b.info()));
        // no notify went out
        assert!(a.get_predecessor()?.is_none());
        Ok(())
    }

    #[test]
    fn test_join_failure_reaches_caller() {
        let net = SimNetwork::new();
        let a = net.spawn_node(1000);
        let b = net.spawn_node(2000);
        a.create().unwrap();
        net.kill(a.info());

        let err = b.join(a.info()).unwrap_err();
        assert!(err.is_unreachable());
        assert!(!b.is_joined().unwrap());
    }

    #[test]
    fn test_handle_dispatches_queries() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(1000);
        a.create()?;
        assert_eq!(a.handle(RpcRequest::GetInfo)?, RpcReply::Peer(a.info().clone()));
        assert_eq!(a.handle(RpcRequest::GetPredecessor)?, RpcReply::MaybePeer(None));
        assert_eq!(
            a.handle(RpcRequest::FindSuccessor(42))?,
            RpcReply::Peer(a.info().clone())
        );
        assert_eq!(
            a.handle(RpcRequest::GetSuccessorList)?,
            RpcReply::Peers(vec![a.info().clone(); gval::SUCCESSOR_LIST_LEN])
        );
        Ok(())
    }
}
