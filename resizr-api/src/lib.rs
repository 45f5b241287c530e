//! The HTTP surface of resizr: binds the engine in `resizr-model` to a raw
//! `hyper` server. See `server.rs` for the bootstrap and routing table.

pub mod error;
pub mod helpers;
pub mod middleware;
pub mod routes;
pub mod server;

use std::sync::Arc;

use resizr_model::auth::AuthGate;
use resizr_model::health::HealthProbe;
use resizr_model::rate_limit::RateGate;
use resizr_model::service::ImageService;
use resizr_util::config::Config;

/// Shared, cloneable handle to every component a request handler needs.
/// Built once at startup and cloned (as an `Arc`) into each connection.
pub struct AppState {
    pub image_service: Arc<ImageService>,
    pub auth_gate: Arc<AuthGate>,
    pub rate_gate: Arc<RateGate>,
    pub health_probe: Arc<HealthProbe>,
    pub config: Arc<Config>,
}
