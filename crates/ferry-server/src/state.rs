//! Per-node context: the one struct holding every shared component,
//! initialized in `main` and passed explicitly to each surface. There is
//! no ambient/global state anywhere in the node.

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::FerryConfig;
use crate::router::Router;

#[derive(Clone)]
pub struct NodeContext {
    pub config: Arc<FerryConfig>,
    pub router: Arc<Router>,
    pub verifier: TokenVerifier,
}

impl NodeContext {
    pub fn new(config: FerryConfig, router: Arc<Router>) -> Self {
        let verifier = TokenVerifier::new(&config.auth.secret);
        Self {
            config: Arc::new(config),
            router,
            verifier,
        }
    }
}
