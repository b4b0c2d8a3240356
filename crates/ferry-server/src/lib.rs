// The delivery-plane node. `main.rs` wires these modules together; they are
// exposed as a library so the integration tests can drive the router and
// session table directly.

pub mod auth;
pub mod config;
pub mod error;
pub mod offline;
pub mod router;
pub mod session;
pub mod state;
pub mod table;
pub mod tcp;
pub mod ws;

pub use error::{RouteError, ServerError, SessionError};
pub use router::Router;
pub use session::{MessageRouter, SessionHandle};
pub use state::NodeContext;
pub use table::SessionTable;
