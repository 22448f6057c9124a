//! Errors of the chord routing core.

/// A wrap `Result` contains [ChordError].
pub type Result<T> = std::result::Result<T, ChordError>;

/// Everything that can go wrong while routing or maintaining the ring.
///
/// Only [ChordError::Unreachable] carries protocol meaning: it is the single
/// signal of peer death. An unknown predecessor is not an error, it is
/// `None` in [RingState](crate::node_info::RingState).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ChordError {
    #[error("peer {peer} is unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("unexpected reply to {method}")]
    UnexpectedReply { method: &'static str },

    #[error("no live entry in successor list while looking up {id:#010x}")]
    NoLiveSuccessor { id: u32 },

    #[error("node has not created or joined a ring yet")]
    NotJoined,

    #[error("ring state lock is poisoned")]
    LockPoisoned,

    #[error("RPC endpoint failed: {0}")]
    Endpoint(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("YAML error")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),
}

impl ChordError {
    pub fn unreachable(peer: impl ToString, reason: impl ToString) -> Self {
        ChordError::Unreachable {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True when the error means the peer did not answer.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ChordError::Unreachable { .. })
    }
}
