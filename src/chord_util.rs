//! Ring arithmetic over the circular identifier space.
//!
//! Ids are `u32` and M is 32, so modular arithmetic on the ring is plain
//! wrapping arithmetic. Never compare ring positions with `<` directly;
//! go through [is_between] or [clockwise_distance].

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use crate::gval;

/// Position on the ring, in `[0, 2^M)`.
pub type Identifier = u32;

/// Distance walked clockwise (towards larger ids, wrapping at 2^M) from
/// `from` to `to`. Zero when they are the same id.
pub fn clockwise_distance(from: Identifier, to: Identifier) -> Identifier {
    to.wrapping_sub(from)
}

/// True iff `target` lies in the circular interval `(lo, hi)`, or `(lo, hi]`
/// when `right_inclusive` is set, walking clockwise from `lo`.
///
/// `lo == hi` describes a ring that cannot yet tell positions apart
/// (a single-node ring), so every target is inside.
pub fn is_between(target: Identifier, lo: Identifier, hi: Identifier, right_inclusive: bool) -> bool {
    if lo == hi {
        return true;
    }
    let span = clockwise_distance(lo, hi);
    let offset = clockwise_distance(lo, target);
    if right_inclusive {
        offset > 0 && offset <= span
    } else {
        offset > 0 && offset < span
    }
}

/// Target id of finger slot `idx`: `(id + 2^(M - K + idx)) mod 2^M`.
pub fn finger_start(id: Identifier, idx: usize) -> Identifier {
    debug_assert!(idx < gval::FINGER_TABLE_LEN);
    let exponent = gval::ID_SPACE_BITS as usize - gval::FINGER_TABLE_LEN + idx;
    id.wrapping_add(1u32 << exponent)
}

/// Hash an arbitrary string (a key, or `address:port` of a node) onto the ring.
/// Takes the lower 32 bits of the 64 bit DefaultHasher digest.
pub fn hash_str_to_id(input_str: &str) -> Identifier {
    let mut hasher = DefaultHasher::new();
    for elem in input_str.as_bytes() {
        hasher.write_u8(*elem);
    }
    hasher.finish() as Identifier
}

/// Where `id` sits on the ring as a percentage of the id space, for logs.
pub fn conv_id_to_ratio_str(id: Identifier) -> String {
    let ratio = (id as f64 / gval::ID_MAX as f64) * 100.0;
    format!("{:.4}", ratio)
}

pub fn gen_debug_str_of_data(data_id: Identifier) -> String {
    format!("{:X},{}", data_id, conv_id_to_ratio_str(data_id))
}
