pub mod crypto;
pub mod net;
pub mod proofs;
pub mod types;

pub use crypto::{merkle_root, sha3};
pub use net::{
    ConsensusAgent, ConsensusBackend, InvRequestManager, InvRequestTracker, Message, Peer,
    PeerChannel, Subscription,
};
pub use proofs::{BlockProof, MerkleProof, TransactionsProof};
pub use types::*;
