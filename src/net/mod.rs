//! Per-peer consensus networking layer

pub mod agent;
pub mod backend;
pub mod inventory;
pub mod message;
pub mod peer;
pub mod queue;
pub mod serde_safe;
pub mod synchronizer;
pub mod timers;
pub mod types;

// Re-exports
pub use agent::{ConsensusAgent, PendingRequest};
pub use backend::ConsensusBackend;
pub use inventory::{InvRequestManager, InvRequestTracker, LimitHashSet};
pub use message::{InvVectors, Message, ProofAddresses, ProofHashes, Receipts};
pub use peer::{Peer, PeerChannel};
pub use queue::{ThrottledQueue, UniqueItem, UniqueQueue};
pub use serde_safe::{from_bytes, to_bytes, BoundedVec};
pub use synchronizer::MultiSynchronizer;
pub use timers::TimerRegistry;
pub use types::*;
