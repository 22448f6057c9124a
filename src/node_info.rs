//! Peer references and the local view of ring topology.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chord_util::{self, Identifier};
use crate::gval;

/// How to reach a peer and where it sits on the ring.
///
/// A plain value: cloned freely, never shared. "Unknown peer" is expressed
/// as `Option<PeerRef>::None` rather than a sentinel address.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerRef {
    pub address: String,
    pub port: u16,
    pub id: Identifier,
}

impl PeerRef {
    pub fn new(address: impl Into<String>, port: u16, id: Identifier) -> Self {
        PeerRef {
            address: address.into(),
            port,
            id,
        }
    }

    /// A peer whose id is derived from its endpoint string.
    pub fn from_endpoint(address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        let id = chord_util::hash_str_to_id(&format!("{}:{}", address, port));
        PeerRef { address, port, id }
    }

    /// `address:port`, the key a transport uses to reach the peer.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}({}%)@{}:{}",
            self.id,
            chord_util::conv_id_to_ratio_str(self.id),
            self.address,
            self.port
        )
    }
}

/// One node's view of the ring. Owned by [ChordNode](crate::chord_node::ChordNode)
/// behind a single mutex; nothing else holds a reference to it.
#[derive(Debug, Clone)]
pub struct RingState {
    me: PeerRef,
    pub predecessor: Option<PeerRef>,
    /// `successors[0]` is the immediate successor, the rest are fallbacks in ring order.
    pub successors: [PeerRef; gval::SUCCESSOR_LIST_LEN],
    /// `fingers[i]` approximates the successor of `finger_start(me.id, i)`.
    pub fingers: [PeerRef; gval::FINGER_TABLE_LEN],
    /// Next finger slot to refresh.
    pub finger_cursor: usize,
    /// Set by create/join. Maintenance is inert before that.
    pub joined: bool,
}

impl RingState {
    pub fn new(me: PeerRef) -> Self {
        RingState {
            predecessor: None,
            successors: std::array::from_fn(|_| me.clone()),
            fingers: std::array::from_fn(|_| me.clone()),
            finger_cursor: 0,
            joined: false,
            me,
        }
    }

    pub fn me(&self) -> &PeerRef {
        &self.me
    }

    pub fn successor(&self) -> &PeerRef {
        &self.successors[0]
    }

    /// State of a brand-new one-node ring.
    pub fn reset_as_sole_node(&mut self) {
        self.predecessor = None;
        self.successors = std::array::from_fn(|_| self.me.clone());
        self.reset_fingers();
        self.joined = true;
    }

    /// Point every finger back at self and restart the refresh cursor.
    pub fn reset_fingers(&mut self) {
        self.fingers = std::array::from_fn(|_| self.me.clone());
        self.finger_cursor = 0;
    }

    /// `successors = [head] ++ fetched[..R-1]`, where `fetched` is the
    /// successor list reported by `head` (or whatever list we are shifting).
    ///
    /// A short `fetched` list is padded with its last entry, or with `head`
    /// when it is empty, so the local list always keeps length R.
    pub fn adopt_successor(&mut self, head: PeerRef, fetched: &[PeerRef]) {
        let filler = fetched.last().cloned().unwrap_or_else(|| head.clone());
        for idx in 1..gval::SUCCESSOR_LIST_LEN {
            self.successors[idx] = fetched.get(idx - 1).cloned().unwrap_or_else(|| filler.clone());
        }
        self.successors[0] = head;
    }

    /// The predecessor-claim rule: an unknown predecessor accepts anyone,
    /// otherwise only a candidate strictly between the current predecessor
    /// and self wins. Returns whether the candidate was accepted.
    pub fn offer_predecessor(&mut self, candidate: &PeerRef) -> bool {
        let accept = match &self.predecessor {
            None => true,
            Some(pred) => chord_util::is_between(candidate.id, pred.id, self.me.id, false),
        };
        if accept {
            self.predecessor = Some(candidate.clone());
        }
        accept
    }

    /// Store a refreshed finger (if any) at `idx` and move the cursor past it.
    pub fn store_finger(&mut self, idx: usize, found: Option<PeerRef>) {
        if let Some(peer) = found {
            self.fingers[idx] = peer;
        }
        self.finger_cursor = (idx + 1) % gval::FINGER_TABLE_LEN;
    }

    /// Clear the predecessor, but only if it is still `probed`.
    /// Returns whether it was cleared.
    pub fn drop_predecessor_if(&mut self, probed: &PeerRef) -> bool {
        if self.predecessor.as_ref() == Some(probed) {
            self.predecessor = None;
            true
        } else {
            false
        }
    }

    pub fn to_topo_info(&self) -> TopoInfo {
        TopoInfo {
            me: self.me.clone(),
            predecessor: self.predecessor.clone(),
            successors: self.successors.to_vec(),
            fingers: self.fingers.to_vec(),
            joined: self.joined,
        }
    }
}

/// Serializable copy of a [RingState], served for debugging.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TopoInfo {
    pub me: PeerRef,
    pub predecessor: Option<PeerRef>,
    pub successors: Vec<PeerRef>,
    pub fingers: Vec<PeerRef>,
    pub joined: bool,
}
