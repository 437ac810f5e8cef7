//! Live delivery: presence registry, delivery router, and the
//! per-connection conversation session.

pub mod admission;
pub mod connection;
pub mod presence;
pub mod router;

use std::sync::Arc;

use cove_store::Store;

use crate::presence::PresenceRegistry;
use crate::router::DeliveryRouter;

/// Shared state handed to every WebSocket connection.
#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<Store>,
    pub presence: Arc<PresenceRegistry>,
    pub router: DeliveryRouter,
    pub jwt_secret: String,
    pub geo_strict: bool,
}

impl GatewayState {
    pub fn new(store: Arc<Store>, jwt_secret: String, geo_strict: bool) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let router = DeliveryRouter::new(store.clone(), presence.clone());
        Self {
            store,
            presence,
            router,
            jwt_secret,
            geo_strict,
        }
    }
}
