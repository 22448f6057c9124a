//! Key lookup: who owns id X.

use tracing::debug;

use crate::chord_node::ChordNode;
use crate::chord_util::{self, Identifier};
use crate::error::{ChordError, Result};
use crate::node_info::PeerRef;

/// Resolve the node responsible for `id`.
///
/// Walks the successor list: a successor other than self is probed first
/// and skipped when dead, so a crashed `successors[0]` falls through to the
/// next entry. For the first live entry:
///
/// 1. `id` in `(self, succ]`: the answer is `succ`.
/// 2. `id` in `(predecessor, self]`: the answer is self.
/// 3. otherwise hand the lookup to [closest_preceding_node]; if that is self
///    there is no better hop and `succ` is the best known answer.
///
/// Failures of the delegated remote lookup are returned as they are; retry
/// policy belongs to whoever issued the lookup.
pub fn find_successor(node: &ChordNode, id: Identifier) -> Result<PeerRef> {
    let (me, successors, predecessor) = {
        let state = node.lock_state()?;
        (state.me().clone(), state.successors.clone(), state.predecessor.clone())
    };

    debug!("find_successor,{},{}", me, chord_util::gen_debug_str_of_data(id));

    for succ in successors.iter() {
        if succ.id != me.id {
            if let Err(err) = node.remote(succ).get_info() {
                debug!("find_successor: successor {} is dead, trying next: {}", succ, err);
                continue;
            }
        }

        if chord_util::is_between(id, me.id, succ.id, true) {
            return Ok(succ.clone());
        }
        if let Some(pred) = &predecessor {
            if chord_util::is_between(id, pred.id, me.id, true) {
                return Ok(me);
            }
        }

        let next_node = closest_preceding_node(node, id)?;
        if next_node.id == me.id {
            return Ok(succ.clone());
        }
        debug!("find_successor: forwarding {:08X} to {}", id, next_node);
        return node.remote(&next_node).find_successor(id);
    }

    Err(ChordError::NoLiveSuccessor { id })
}

/// The live peer we know of that most closely precedes `id`, or self.
///
/// Fingers are scanned from the farthest slot down; the first one strictly
/// between self and `id` that answers a probe wins. Dead fingers are just
/// skipped, fix_fingers replaces them later. The reduced finger table has
/// nothing below offset `2^(M-K)`, so the successor list (farthest first)
/// is tried under the same rule before giving up and returning self.
pub fn closest_preceding_node(node: &ChordNode, id: Identifier) -> Result<PeerRef> {
    let (me, fingers, successors) = {
        let state = node.lock_state()?;
        (state.me().clone(), state.fingers.clone(), state.successors.clone())
    };

    let candidates = fingers.iter().rev().chain(successors.iter().rev());
    for candidate in candidates {
        if candidate.id == me.id || !chord_util::is_between(candidate.id, me.id, id, false) {
            continue;
        }
        match node.remote(candidate).get_info() {
            Ok(_) => return Ok(candidate.clone()),
            Err(err) => {
                debug!("closest_preceding_node: skipping dead {}: {}", candidate, err);
            }
        }
    }

    Ok(me)
}
