//! collab-cluster: membership, gossip, and distributed dispatch.
//!
//! Every node keeps a persisted `Case` (its view of the cluster), gossips
//! digests with a few peers on a fixed interval, and spreads task batches
//! over the view with a deterministic placement rule.
//!
//! # Architecture
//!
//! ```text
//! Collaborator
//!   ├── Case (digest + local card + coordinator, one mutex, JSON file)
//!   │   └── exchange(): SYNC → ACK → ACK2 → ACK3
//!   ├── catchup()  every syn interval, fan-out capped by gossip_num
//!   ├── clean()    every expiry interval, reaps not-alive peers
//!   └── sync_distribute()
//!       ├── Executor::place(idx % peers)
//!       ├── Local  → Scheduler::done
//!       ├── Remote → Transport::distribute, local fallback on failure
//!       └── Dummy  → task returned as is
//!
//! Transport
//!   ├── HttpTransport     (hyper HTTP/1 client → server::peer_router)
//!   └── LoopbackTransport (in-process, switchable reachability)
//! ```

pub mod case;
pub mod collaborator;
pub mod error;
pub mod executor;
pub mod message;
pub mod server;
pub mod transport;

pub use case::Case;
pub use collaborator::{CatchupReport, Collaborator, CollaboratorConfig};
pub use error::{ClusterError, ClusterResult};
pub use executor::{Executor, run_local};
pub use message::{CardMessage, MessageType, Status, StatusCode};
pub use server::peer_router;
pub use transport::{DEFAULT_DIAL_TIMEOUT, HttpTransport, LoopbackTransport, Transport};
