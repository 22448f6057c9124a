//! Self-healing of the ring: predecessor claims, successor-list repair,
//! finger refresh and predecessor failure detection, plus the threads that
//! drive them periodically.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::chord_node::ChordNode;
use crate::chord_util;
use crate::config::Config;
use crate::error::Result;
use crate::node_info::PeerRef;
use crate::router;

/// `candidate` believes it might be our predecessor.
///
/// Accepted when no predecessor is known, or when it lies strictly between
/// the current predecessor and self. Repeating the same claim is a no-op.
pub fn notify(node: &ChordNode, candidate: &PeerRef) -> Result<()> {
    let mut state = node.lock_state()?;
    let old = state.predecessor.clone();
    if state.offer_predecessor(candidate) && old.as_ref() != Some(candidate) {
        info!("notify: predecessor of {} is now {}", node.info(), candidate);
    }
    Ok(())
}

/// One stabilization round.
///
/// Takes the first reachable successor-list entry, adopts it as the head of
/// the list together with its own successor list, announces self to it, and
/// switches to that entry's predecessor when it sits between us. Dead entries
/// are skipped, which is how a crashed successor gets replaced.
pub fn stabilize(node: &ChordNode) -> Result<()> {
    let snapshot = node.snapshot()?;
    if !snapshot.joined {
        return Ok(());
    }

    for (idx, succ) in snapshot.successors.iter().enumerate() {
        match stabilize_with(node, succ, &snapshot.successors, &snapshot.predecessor) {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!("stabilize: successors[{}] {} failed: {}", idx, succ, err);
            }
        }
    }

    warn!("stabilize: no reachable entry in successor list of {}", node.info());
    Ok(())
}

fn stabilize_with(
    node: &ChordNode,
    succ: &PeerRef,
    successors: &[PeerRef],
    predecessor: &Option<PeerRef>,
) -> Result<()> {
    let me = node.info();
    let (x, fetched) = if succ.id == me.id {
        (predecessor.clone(), successors.to_vec())
    } else {
        let remote = node.remote(succ);
        let x = remote.get_predecessor()?;
        let list = remote.get_successor_list()?;
        remote.notify(me)?;
        (x, list)
    };

    {
        let mut state = node.lock_state()?;
        // a create or join that landed during the calls above wins
        if !state.joined || state.successors[..] != *successors {
            debug!("stabilize: ring view of {} changed mid-tick, dropping this round", me);
            return Ok(());
        }
        if state.successor() != succ {
            info!("stabilize: successor of {} is now {}", me, succ);
        }
        state.adopt_successor(succ.clone(), &fetched);
    }

    if let Some(x) = x {
        if chord_util::is_between(x.id, me.id, succ.id, false) {
            // the coarser update above stands if x cannot be reached
            if let Err(err) = adopt_closer_successor(node, succ, &x) {
                debug!("stabilize: closer successor {} unreachable: {}", x, err);
            }
        }
    }
    Ok(())
}

fn adopt_closer_successor(node: &ChordNode, head: &PeerRef, x: &PeerRef) -> Result<()> {
    let remote = node.remote(x);
    let list = remote.get_successor_list()?;
    {
        let mut state = node.lock_state()?;
        if !state.joined || state.successor() != head {
            debug!("stabilize: successor of {} moved on, not switching to {}", node.info(), x);
            return Ok(());
        }
        state.adopt_successor(x.clone(), &list);
    }
    info!("stabilize: successor of {} is now {}", node.info(), x);
    remote.notify(node.info())
}

/// Refresh the finger slot under the cursor and advance the cursor.
///
/// Before the node has joined the slot just mirrors `successors[0]`. A
/// failed lookup leaves the slot stale until the cursor comes around again.
pub fn fix_fingers(node: &ChordNode) -> Result<()> {
    let (joined, idx, succ) = {
        let state = node.lock_state()?;
        (state.joined, state.finger_cursor, state.successor().clone())
    };

    let found = if !joined {
        Some(succ)
    } else {
        let target = chord_util::finger_start(node.info().id, idx);
        match router::find_successor(node, target) {
            Ok(peer) => Some(peer),
            Err(err) => {
                debug!("fix_fingers: slot {} target {:08X} left stale: {}", idx, target, err);
                None
            }
        }
    };

    node.lock_state()?.store_finger(idx, found);
    Ok(())
}

/// Probe the predecessor and forget it when it does not answer.
///
/// A reply carrying a different id means another node now lives at that
/// address, which is treated the same as no reply.
pub fn check_predecessor(node: &ChordNode) -> Result<()> {
    let pred = match node.get_predecessor()? {
        Some(pred) => pred,
        None => return Ok(()),
    };

    let alive = match node.remote(&pred).get_info() {
        Ok(answered) => answered.id == pred.id,
        Err(err) => {
            debug!("check_predecessor: {} failed probe: {}", pred, err);
            false
        }
    };

    if !alive && node.lock_state()?.drop_predecessor_if(&pred) {
        warn!("check_predecessor: dropped dead predecessor {} of {}", pred, node.info());
    }
    Ok(())
}

/// Run `task` every `interval` on its own named thread, forever.
pub fn spawn_periodic<F>(name: &str, interval: Duration, task: F) -> Result<JoinHandle<()>>
where
    F: Fn() -> Result<()> + Send + 'static,
{
    let label = name.to_string();
    let handle = thread::Builder::new().name(label.clone()).spawn(move || loop {
        if let Err(err) = task() {
            warn!("{} tick failed: {}", label, err);
        }
        thread::sleep(interval);
    })?;
    Ok(handle)
}

/// Start the stabilize, fix_fingers and check_predecessor threads for `node`.
pub fn spawn_maintenance(node: Arc<ChordNode>, config: &Config) -> Result<Vec<JoinHandle<()>>> {
    let stabilize_node = Arc::clone(&node);
    let fix_node = Arc::clone(&node);
    let check_node = node;

    Ok(vec![
        spawn_periodic("stabilize", config.stabilize_interval(), move || {
            stabilize(&stabilize_node)
        })?,
        spawn_periodic("fix_fingers", config.fix_fingers_interval(), move || {
            fix_fingers(&fix_node)
        })?,
        spawn_periodic("check_predecessor", config.check_predecessor_interval(), move || {
            check_predecessor(&check_node)
        })?,
    ])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, Weak};

    use super::*;
    use crate::gval;
    use crate::rpc::{RpcReply, RpcRequest, Transport};
    use crate::testkit::SimNetwork;

    /// Answers stabilize's calls with fixed data and makes the calling node
    /// create a fresh ring while it is being notified.
    struct RecreateOnNotify {
        caller: Mutex<Weak<ChordNode>>,
        successor_list: Vec<PeerRef>,
    }

    impl Transport for RecreateOnNotify {
        fn call(&self, peer: &PeerRef, request: RpcRequest) -> Result<RpcReply> {
            match request {
                RpcRequest::GetPredecessor => Ok(RpcReply::MaybePeer(None)),
                RpcRequest::GetSuccessorList => Ok(RpcReply::Peers(self.successor_list.clone())),
                RpcRequest::Notify(_) => {
                    if let Some(node) = self.caller.lock().unwrap().upgrade() {
                        node.create()?;
                    }
                    Ok(RpcReply::Done)
                }
                _ => Ok(RpcReply::Peer(peer.clone())),
            }
        }
    }

    #[test]
    fn test_notify_is_idempotent() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(100);
        let x = net.spawn_node(50);
        a.create()?;
        notify(&a, x.info())?;
        assert_eq!(a.get_predecessor()?, Some(x.info().clone()));
        notify(&a, x.info())?;
        assert_eq!(a.get_predecessor()?, Some(x.info().clone()));
        Ok(())
    }

    #[test]
    fn test_notify_only_accepts_closer_claims() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(100);
        let far = net.spawn_node(10);
        let near = net.spawn_node(90);
        a.create()?;
        notify(&a, far.info())?;
        notify(&a, near.info())?;
        notify(&a, far.info())?;
        assert_eq!(a.get_predecessor()?, Some(near.info().clone()));
        Ok(())
    }

    #[test]
    fn test_stabilize_is_inert_before_join() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(100);
        let x = net.spawn_node(50);
        notify(&a, x.info())?;
        stabilize(&a)?;
        assert!(a.get_successor_list()?.iter().all(|p| p == a.info()));
        Ok(())
    }

    #[test]
    fn test_two_node_ring_converges() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(0x1000_0000);
        let b = net.spawn_node(0x9000_0000);
        a.create()?;
        b.join(a.info())?;
        for _ in 0..3 {
            stabilize(&a)?;
            stabilize(&b)?;
        }
        assert_eq!(a.get_successor_list()?[0], *b.info());
        assert_eq!(b.get_successor_list()?[0], *a.info());
        assert_eq!(a.get_predecessor()?, Some(b.info().clone()));
        assert_eq!(b.get_predecessor()?, Some(a.info().clone()));
        Ok(())
    }

    #[test]
    fn test_stabilize_skips_dead_successor() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(0);
        let b = net.spawn_node(0x1000);
        let c = net.spawn_node(0x2000);
        {
            let mut state = a.lock_state()?;
            state.joined = true;
            state.successors = [b.info().clone(), c.info().clone(), a.info().clone()];
        }
        {
            let mut state = c.lock_state()?;
            state.joined = true;
            state.successors = [a.info().clone(), c.info().clone(), c.info().clone()];
        }
        net.kill(b.info());

        stabilize(&a)?;
        let succs = a.get_successor_list()?;
        assert_eq!(succs[0], *c.info());
        assert!(!succs.contains(b.info()));
        assert_eq!(c.get_predecessor()?, Some(a.info().clone()));
        Ok(())
    }

    #[test]
    fn test_stabilize_keeps_coarse_update_when_closer_node_is_dead() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(0);
        let x = net.spawn_node(0x1000);
        let c = net.spawn_node(0x2000);
        {
            let mut state = a.lock_state()?;
            state.joined = true;
            state.successors = [c.info().clone(), c.info().clone(), c.info().clone()];
        }
        {
            let mut state = c.lock_state()?;
            state.joined = true;
            state.predecessor = Some(x.info().clone());
            state.successors = [a.info().clone(), a.info().clone(), a.info().clone()];
        }
        net.kill(x.info());

        stabilize(&a)?;
        assert_eq!(a.get_successor_list()?, vec![c.info().clone(), a.info().clone(), a.info().clone()]);
        Ok(())
    }

    #[test]
    fn test_fix_fingers_before_join_mirrors_successor() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(0);
        let b = net.spawn_node(0x1000);
        a.lock_state()?.successors[0] = b.info().clone();
        fix_fingers(&a)?;
        let state = a.snapshot()?;
        assert_eq!(state.fingers[0], *b.info());
        assert_eq!(state.finger_cursor, 1);
        Ok(())
    }

    #[test]
    fn test_fix_fingers_cycles_all_slots() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(0);
        let b = net.spawn_node(0x8000_0000);
        a.create()?;
        b.join(a.info())?;
        for _ in 0..3 {
            stabilize(&a)?;
            stabilize(&b)?;
        }
        for _ in 0..gval::FINGER_TABLE_LEN {
            fix_fingers(&a)?;
        }
        let state = a.snapshot()?;
        assert_eq!(state.finger_cursor, 0);
        // every target of a lies in (a, b], so b owns all of them
        assert!(state.fingers.iter().all(|f| f == b.info()));
        Ok(())
    }

    #[test]
    fn test_fix_fingers_leaves_slot_stale_on_failure() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(0);
        let b = net.spawn_node(0x1000);
        {
            let mut state = a.lock_state()?;
            state.joined = true;
            state.successors = [b.info().clone(), b.info().clone(), b.info().clone()];
            state.fingers[0] = b.info().clone();
        }
        net.kill(b.info());
        fix_fingers(&a)?;
        let state = a.snapshot()?;
        assert_eq!(state.fingers[0], *b.info());
        assert_eq!(state.finger_cursor, 1);
        Ok(())
    }

    #[test]
    fn test_check_predecessor_clears_dead_predecessor() -> Result<()> {
        let net = SimNetwork::new();
        let a = net.spawn_node(100);
        let p = net.spawn_node(50);
        a.create()?;
        notify(&a, p.info())?;

        check_predecessor(&a)?;
        assert_eq!(a.get_predecessor()?, Some(p.info().clone()));

        net.kill(p.info());
        check_predecessor(&a)?;
        assert_eq!(a.get_predecessor()?, None);

        // nothing to probe
        check_predecessor(&a)?;
        assert_eq!(a.get_predecessor()?, None);
        Ok(())
    }

    #[test]
    fn test_spawn_periodic_runs_repeatedly() -> Result<()> {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let _handle = spawn_periodic("tick", Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        for _ in 0..500 {
            if ticks.load(Ordering::SeqCst) >= 3 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        Ok(())
    }

    #[test]
    fn test_stabilize_keeps_create_issued_mid_tick() -> Result<()> {
        let b = PeerRef::new("sim", 2, 200);
        let c = PeerRef::new("sim", 3, 300);
        let transport = Arc::new(RecreateOnNotify {
            caller: Mutex::new(Weak::new()),
            successor_list: vec![c.clone(); gval::SUCCESSOR_LIST_LEN],
        });
        let a = Arc::new(ChordNode::new(PeerRef::new("sim", 1, 100), transport.clone()));
        *transport.caller.lock().unwrap() = Arc::downgrade(&a);
        {
            let mut state = a.lock_state()?;
            state.joined = true;
            state.successors = [b.clone(), b.clone(), b.clone()];
        }

        stabilize(&a)?;

        // the fresh one-node ring survives, not the stale [b, c, c] shift
        let state = a.snapshot()?;
        assert!(state.joined);
        assert!(state.successors.iter().all(|p| p == a.info()));
        Ok(())
    }
}
