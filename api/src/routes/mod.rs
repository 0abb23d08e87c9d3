use axum::Router;

use crate::middleware::rate_limit;
use crate::state::AppState;

pub mod health;
pub mod pairing;
pub mod patches;
pub mod profiles;
pub mod providers;
pub mod runs;
pub mod sandbox;
pub mod sessions;

/// All HTTP routes. Per-IP limits need the peer address, so they are only
/// layered on when the server is started with connect info.
pub fn router(rate_limits: bool) -> Router<AppState> {
    let mut pairing = pairing::router();
    let mut runs = runs::router();
    if rate_limits {
        pairing = pairing.layer(rate_limit::pairing_layer());
        runs = runs.layer(rate_limit::runs_layer());
    }

    Router::new()
        .merge(health::router())
        .merge(sessions::router())
        .merge(runs::read_router())
        .merge(runs)
        .merge(pairing)
        .merge(patches::router())
        .merge(sandbox::router())
        .merge(providers::router())
        .merge(profiles::router())
}
