// Collective - Peer-to-Peer Eventually-Consistent Document Mesh

pub mod collective;
pub mod error;
pub mod network;
pub mod protocol;
pub mod store;

pub use collective::Collective;
pub use error::CollectiveError;
pub use protocol::{Command, Operation, PeerAddress, PeerId};
pub use store::DocumentStore;
