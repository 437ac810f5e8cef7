//! HTTP boundary: auth, profiles, contacts, groups, and the paginated
//! history / fallback send paths.

pub mod auth;
pub mod contacts;
pub mod error;
pub mod groups;
pub mod messages;
pub mod middleware;
pub mod users;

use std::sync::Arc;

use cove_gateway::router::DeliveryRouter;
use cove_store::Store;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<Store>,
    pub jwt_secret: String,
    pub router: DeliveryRouter,
    pub geo_strict: bool,
}
