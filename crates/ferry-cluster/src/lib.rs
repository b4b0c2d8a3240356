// Cluster-facing plumbing: the shared key-value/pub-sub seam, the presence
// and routing registry built on it, and the per-node cross-node message bus.
//
// Everything here is best-effort by contract: the registry is an
// optimization, and a lost bus message degrades to offline storage. Callers
// log failures and fall through; they never crash the node.

pub mod bus;
pub mod memory;
pub mod redis_store;
pub mod registry;
pub mod store;

mod error;

pub use bus::MessageBus;
pub use error::ClusterError;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use registry::{Registry, RouteEntry};
pub use store::KvStore;

pub type Result<T> = std::result::Result<T, ClusterError>;
