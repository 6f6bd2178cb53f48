use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    routing::{get, post, MethodRouter},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use tgapi_core::service::AccountService;

use crate::{
    auth::{require_bearer, Access},
    error::ApiError,
    handlers::{account, login, stories},
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AccountService>,
    pub api_token: Arc<str>,
}

pub struct Endpoint {
    pub path: &'static str,
    pub access: Access,
    route: MethodRouter<AppState>,
}

impl Endpoint {
    fn open(path: &'static str, route: MethodRouter<AppState>) -> Self {
        Self {
            path,
            access: Access::Open,
            route,
        }
    }

    fn bearer(path: &'static str, route: MethodRouter<AppState>) -> Self {
        Self {
            path,
            access: Access::Bearer,
            route,
        }
    }
}

/// Every route the façade serves, with its access attribute.
pub fn endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::open("/health", get(login::health)),
        Endpoint::open("/auth/qr/start", post(login::start)),
        Endpoint::open("/auth/qr/status", get(login::status)),
        Endpoint::open("/auth/qr/png", get(login::png)),
        Endpoint::open("/auth/qr/wizard", get(login::wizard)),
        Endpoint::bearer("/me", get(account::me)),
        Endpoint::bearer("/dialogs", get(account::dialogs)),
        Endpoint::bearer("/channels", get(account::channels)),
        Endpoint::bearer("/messages", get(account::messages)),
        Endpoint::bearer("/get-messages", get(account::messages)),
        Endpoint::bearer("/forward", post(account::forward)),
        Endpoint::bearer("/send", post(account::send)),
        Endpoint::bearer("/send/media", post(account::send_media)),
        Endpoint::bearer("/download", get(account::download)),
        Endpoint::bearer("/stories", get(stories::all)),
        Endpoint::bearer("/stories/of", get(stories::of_peer)),
        Endpoint::bearer("/stories/read", post(stories::read)),
    ]
}

/// Build the application router (shared between production startup and tests).
pub fn build_app(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut open = Router::new();
    let mut protected = Router::new();
    for ep in endpoints() {
        match ep.access {
            Access::Open => open = open.route(ep.path, ep.route),
            Access::Bearer => protected = protected.route(ep.path, ep.route),
        }
    }
    let protected =
        protected.route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    open.merge(protected)
        .fallback(not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found")
}
