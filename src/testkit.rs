//! In-process network of chord nodes for tests.
//!
//! Every node gets a [SimTransport] that dispatches straight into the target
//! node's [ChordNode::handle]. Peers can be killed, revived, set to die after
//! a number of calls, and the whole network can drop calls at random.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use rand::Rng;
use tracing::trace;

use crate::chord_node::ChordNode;
use crate::chord_util::{self, Identifier};
use crate::error::{ChordError, Result};
use crate::node_info::PeerRef;
use crate::rpc::{RpcReply, RpcRequest, Transport};
use crate::stabilizer;

const SIM_ADDRESS: &str = "sim";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Alive,
    Dead,
    /// Answers this many more calls, then is dead.
    DiesAfter(usize),
}

struct SimPeer {
    node: Arc<ChordNode>,
    liveness: Liveness,
}

#[derive(Default)]
struct SimInner {
    peers: Mutex<HashMap<String, SimPeer>>,
    next_port: Mutex<u16>,
    drop_prob: Mutex<f64>,
}

impl SimInner {
    fn peers(&self) -> MutexGuard<'_, HashMap<String, SimPeer>> {
        // a test thread that panicked while holding the map already failed
        match self.peers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn drop_prob(&self) -> f64 {
        self.drop_prob.lock().map(|p| *p).unwrap_or(0.0)
    }

    fn route(&self, peer: &PeerRef, request: RpcRequest) -> Result<RpcReply> {
        let method = request.method();
        let node = {
            let mut peers = self.peers();
            let entry = peers
                .get_mut(&peer.endpoint())
                .ok_or_else(|| ChordError::unreachable(peer, "no such peer"))?;
            match entry.liveness {
                Liveness::Alive => {}
                Liveness::Dead | Liveness::DiesAfter(0) => {
                    entry.liveness = Liveness::Dead;
                    return Err(ChordError::unreachable(peer, "peer is down"));
                }
                Liveness::DiesAfter(n) => entry.liveness = Liveness::DiesAfter(n - 1),
            }
            entry.node.clone()
        };

        let drop_prob = self.drop_prob();
        if drop_prob > 0.0 && rand::thread_rng().gen_bool(drop_prob.min(1.0)) {
            trace!("sim: dropped {} to {}", method, peer);
            return Err(ChordError::unreachable(peer, "call dropped"));
        }

        trace!("sim: {} -> {}", method, peer);
        // a failing handler looks like a failed call, same as over HTTP
        node.handle(request)
            .map_err(|err| ChordError::unreachable(peer, err))
    }
}

/// Transport handed to every simulated node.
pub struct SimTransport {
    net: Weak<SimInner>,
}

impl Transport for SimTransport {
    fn call(&self, peer: &PeerRef, request: RpcRequest) -> Result<RpcReply> {
        match self.net.upgrade() {
            Some(net) => net.route(peer, request),
            None => Err(ChordError::unreachable(peer, "network is gone")),
        }
    }
}

#[derive(Clone, Default)]
pub struct SimNetwork {
    inner: Arc<SimInner>,
}

impl SimNetwork {
    pub fn new() -> Self {
        SimNetwork::default()
    }

    /// Every call that reaches a live peer is lost with probability `prob`.
    pub fn set_drop_prob(&self, prob: f64) {
        if let Ok(mut p) = self.inner.drop_prob.lock() {
            *p = prob.clamp(0.0, 1.0);
        }
    }

    /// Register a fresh, not yet joined node at ring position `id`.
    pub fn spawn_node(&self, id: Identifier) -> Arc<ChordNode> {
        let port = {
            let mut next = match self.inner.next_port.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *next += 1;
            *next
        };
        let info = PeerRef::new(SIM_ADDRESS, port, id);
        let transport = Arc::new(SimTransport {
            net: Arc::downgrade(&self.inner),
        });
        let node = Arc::new(ChordNode::new(info.clone(), transport));
        self.inner.peers().insert(
            info.endpoint(),
            SimPeer {
                node: node.clone(),
                liveness: Liveness::Alive,
            },
        );
        node
    }

    fn set_liveness(&self, peer: &PeerRef, liveness: Liveness) {
        if let Some(entry) = self.inner.peers().get_mut(&peer.endpoint()) {
            entry.liveness = liveness;
        }
    }

    /// Crash a peer: every later call to it fails.
    pub fn kill(&self, peer: &PeerRef) {
        self.set_liveness(peer, Liveness::Dead);
    }

    pub fn revive(&self, peer: &PeerRef) {
        self.set_liveness(peer, Liveness::Alive);
    }

    /// Let `peer` answer `calls` more calls before it crashes.
    pub fn kill_after_calls(&self, peer: &PeerRef, calls: usize) {
        self.set_liveness(peer, Liveness::DiesAfter(calls));
    }

    pub fn is_alive(&self, peer: &PeerRef) -> bool {
        self.inner
            .peers()
            .get(&peer.endpoint())
            .map_or(false, |entry| entry.liveness != Liveness::Dead)
    }

    /// Live nodes, ordered by ring id.
    pub fn live_nodes(&self) -> Vec<Arc<ChordNode>> {
        let mut nodes: Vec<Arc<ChordNode>> = self
            .inner
            .peers()
            .values()
            .filter(|entry| entry.liveness != Liveness::Dead)
            .map(|entry| entry.node.clone())
            .collect();
        nodes.sort_by_key(|node| node.info().id);
        nodes
    }

    /// One pass of every maintenance task on every live joined node:
    /// stabilize, a full sweep of fix_fingers, then check_predecessor.
    pub fn run_maintenance_round(&self) -> Result<()> {
        for node in self.live_nodes() {
            if !node.is_joined()? {
                continue;
            }
            stabilizer::stabilize(&node)?;
            for _ in 0..crate::gval::FINGER_TABLE_LEN {
                stabilizer::fix_fingers(&node)?;
            }
            stabilizer::check_predecessor(&node)?;
        }
        Ok(())
    }

    /// The live node that should own `id`, computed from global knowledge.
    pub fn expected_owner(&self, id: Identifier) -> Option<PeerRef> {
        let ids: Vec<PeerRef> = self.live_nodes().iter().map(|n| n.info().clone()).collect();
        owner_by_scan(&ids, id)
    }
}

/// First peer at or after `id` going clockwise, given peers sorted by id.
pub fn owner_by_scan(sorted: &[PeerRef], id: Identifier) -> Option<PeerRef> {
    sorted
        .iter()
        .min_by_key(|peer| chord_util::clockwise_distance(id, peer.id))
        .cloned()
}
