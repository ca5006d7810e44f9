pub mod connection;
pub mod discovery;
pub mod table;

pub use connection::{dial, read_loop};
pub use discovery::{DiscoveryBeacon, PeerEvent};
pub use table::{ConnectionTable, PeerHandle};
