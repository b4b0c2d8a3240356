// Persistence for the delivery plane. The delivery core consumes the three
// store traits; the SQLite implementation backs a single-node deployment and
// the test suite. A clustered deployment can substitute a service-backed
// implementation without touching the router.

pub mod database;
pub mod history;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use history::{FriendStore, GroupStore, HistoryStore, SqliteStore};

pub type Result<T> = std::result::Result<T, StoreError>;
