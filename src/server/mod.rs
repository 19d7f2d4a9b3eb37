pub mod handlers;
pub(crate) mod streaming;

use std::sync::Arc;

use axum::Router;

use crate::capability::CapabilityRegistry;
use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::upstream::{UpstreamApi, UpstreamClient};

pub struct AppState {
    pub config: Settings,
    pub registry: CapabilityRegistry,
    pub upstream: Arc<dyn UpstreamApi>,
}

pub fn create_app(config: Settings) -> AppResult<Router> {
    let upstream: Arc<dyn UpstreamApi> = Arc::new(UpstreamClient::new(config.upstream.clone())?);
    Ok(create_app_with_upstream(config, upstream))
}

/// 上游客户端可注入，供测试与演示替换。
pub fn create_app_with_upstream(config: Settings, upstream: Arc<dyn UpstreamApi>) -> Router {
    let registry = CapabilityRegistry::from_settings(&config);
    let app_state = AppState {
        config,
        registry,
        upstream,
    };

    let mut app = handlers::routes().with_state(Arc::new(app_state));

    // CORS（便于浏览器端演示客户端直连；生产应收敛来源）
    use axum::http::{Method, header};
    use tower_http::cors::{AllowOrigin, CorsLayer};
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(AllowOrigin::mirror_request());
    app = app.layer(cors);

    app
}
