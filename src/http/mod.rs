//! HTTP API.
//!
//! Every handler follows the same sequence: parse the address from the path,
//! check authorization for the required role at the address's scope, then
//! call the rule engine. Failures at any step become a [`ServiceError`] and
//! are rendered by [`response::error_response`].
//!
//! Addresses are the rest of the path, so `/blacklist/10.0.0.0/8` works.

pub mod response;

use crate::auth::roles::{
    BLACKLISTER, HISTORY_READER, READER, UNBLACKLISTER, UNWHITELISTER, WHITELISTER,
};
use crate::auth::{Authorizer, Credentials};
use crate::config::{AuthorizationConfig, BlacklistConfig};
use crate::error::{ErrorKind, ServiceError};
use crate::metrics;
use crate::net::NetworkPrefix;
use crate::rules::duration::DurationSpec;
use crate::rules::engine::{Actor, RuleEngine};
use crate::rules::model::RuleType;
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use response::{error_response, rules_json};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

/// Shared state for all handlers.
pub struct AppState {
    pub engine: RuleEngine,
    pub authorizer: Authorizer,
    pub authorization: AuthorizationConfig,
    pub blacklist: BlacklistConfig,
}

/// Who is asking and for what, for authorization and logging.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub peer: Option<SocketAddr>,
    pub credentials: Option<Credentials>,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            peer: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
            credentials: basic_credentials(&parts.headers),
        })
    }
}

impl RequestMeta {
    fn peer_display(&self) -> String {
        self.peer
            .map(|p| p.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Decode `Authorization: Basic ...`. Anything unreadable counts as absent.
pub fn basic_credentials(headers: &axum::http::HeaderMap) -> Option<Credentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, secret) = decoded.split_once(':')?;
    Some(Credentials::new(user, secret))
}

/// Form parameters merged over query parameters.
#[derive(Debug, Default)]
struct Params(HashMap<String, String>);

impl Params {
    fn merge(query: HashMap<String, String>, form: Option<Form<HashMap<String, String>>>) -> Self {
        let mut params = query;
        if let Some(Form(form)) = form {
            params.extend(form);
        }
        Self(params)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn comment(&self) -> &str {
        self.get("comment").unwrap_or_default()
    }
}

fn parse_address(raw: &str) -> Result<NetworkPrefix, ServiceError> {
    Ok(NetworkPrefix::parse_strict(raw)?)
}

impl AppState {
    /// Authorize `role`, at network scope when `address` spans more than
    /// one address. Returns the user name.
    async fn authorize(
        &self,
        meta: &RequestMeta,
        role: &str,
        address: Option<&NetworkPrefix>,
    ) -> Result<String, ServiceError> {
        let network_scope = address.is_some_and(|a| !a.is_single_address());
        self.authorizer
            .check_authorization(meta.credentials.as_ref(), role, network_scope)
            .await
    }

    /// Render a handler outcome, logging failures by kind.
    fn respond<T: IntoResponse>(&self, meta: &RequestMeta, result: Result<T, ServiceError>) -> Response {
        match result {
            Ok(body) => body.into_response(),
            Err(err) => {
                metrics::record_request_error(&err);
                let correlation_id = match err.kind() {
                    ErrorKind::Environment | ErrorKind::Unexpected => {
                        let id = Uuid::new_v4();
                        error!(
                            correlation_id = %id,
                            method = %meta.method,
                            path = %meta.path,
                            peer = %meta.peer_display(),
                            error = ?err,
                            "{}", err
                        );
                        Some(id)
                    }
                    _ => {
                        info!(
                            code = err.error_code(),
                            method = %meta.method,
                            path = %meta.path,
                            peer = %meta.peer_display(),
                            "{}", err
                        );
                        None
                    }
                };
                error_response(&err, &self.authorization, correlation_id)
            }
        }
    }
}

type SharedState = State<Arc<AppState>>;

fn list_key(rule_type: RuleType) -> &'static str {
    match rule_type {
        RuleType::Blacklist => "blacklist",
        RuleType::Whitelist => "whitelist",
    }
}

async fn list_active(state: &AppState, meta: &RequestMeta, rule_type: RuleType) -> Response {
    let result = async {
        state.authorize(meta, READER, None).await?;
        let entries = state.engine.list_active(rule_type).await?;
        Ok::<_, ServiceError>(Json(json!({
            format!("{}_entries", list_key(rule_type)): rules_json(&entries, false),
        })))
    }
    .await;
    state.respond(meta, result)
}

async fn list_overlapping(
    state: &AppState,
    meta: &RequestMeta,
    rule_type: RuleType,
    raw_address: &str,
) -> Response {
    let result = async {
        let address = parse_address(raw_address)?;
        state.authorize(meta, READER, Some(&address)).await?;
        let entries = state
            .engine
            .list_overlapping(rule_type, address, None)
            .await?;
        Ok::<_, ServiceError>(Json(json!({
            format!("{}_entries", list_key(rule_type)): rules_json(&entries, false),
        })))
    }
    .await;
    state.respond(meta, result)
}

async fn cancel(
    state: &AppState,
    meta: &RequestMeta,
    rule_type: RuleType,
    raw_address: &str,
    params: &Params,
) -> Response {
    let role = match rule_type {
        RuleType::Blacklist => UNBLACKLISTER,
        RuleType::Whitelist => UNWHITELISTER,
    };
    let result = async {
        let address = parse_address(raw_address)?;
        let user = state.authorize(meta, role, Some(&address)).await?;
        let actor = Actor::new(&user, params.comment());
        let cancellation = match rule_type {
            RuleType::Blacklist => state.engine.cancel_blacklist_entry(address, actor).await?,
            RuleType::Whitelist => state.engine.cancel_whitelist_entry(address, actor).await?,
        };

        let list = list_key(rule_type);
        let but = if cancellation.overlapping.is_empty() {
            String::new()
        } else {
            format!(", but the overlapping {list} entries listed below are still in effect")
        };
        Ok::<_, ServiceError>(Json(json!({
            "message": format!("The IP address {address} has been removed from the {list}{but}."),
            format!("removed_{list}_entries"): rules_json(&cancellation.canceled, false),
            format!("overlapping_{list}_entries"): rules_json(&cancellation.overlapping, false),
        })))
    }
    .await;
    state.respond(meta, result)
}

// ----------------------------------------------------------------------------
// /blacklist
// ----------------------------------------------------------------------------

async fn get_blacklist(State(state): SharedState, meta: RequestMeta) -> Response {
    list_active(&state, &meta, RuleType::Blacklist).await
}

async fn get_blacklist_for_address(
    State(state): SharedState,
    Path(address): Path<String>,
    meta: RequestMeta,
) -> Response {
    list_overlapping(&state, &meta, RuleType::Blacklist, &address).await
}

async fn add_blacklist_entry(
    State(state): SharedState,
    Path(raw_address): Path<String>,
    meta: RequestMeta,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> Response {
    let params = Params::merge(query, form);
    let result = async {
        let address = parse_address(&raw_address)?;
        let user = state.authorize(&meta, BLACKLISTER, Some(&address)).await?;
        let duration = DurationSpec::from_parameters(
            params.get("for"),
            params.get("until"),
            &state.blacklist.default_duration,
        )?;
        let addition = state
            .engine
            .add_blacklist_entry(address, &duration, Actor::new(&user, params.comment()))
            .await?;

        Ok::<_, ServiceError>((
            StatusCode::CREATED,
            Json(json!({
                "message": format!("The IP address {address} has been added to the blacklist."),
                "new_blacklist_entry": response::rule_json(&addition.new_entry, false),
                "superseded_blacklist_entries": rules_json(&addition.superseded, false),
                "overlapping_blacklist_entries": rules_json(&addition.overlapping, false),
            })),
        ))
    }
    .await;
    state.respond(&meta, result)
}

async fn remove_blacklist_entry(
    State(state): SharedState,
    Path(address): Path<String>,
    meta: RequestMeta,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> Response {
    let params = Params::merge(query, form);
    cancel(&state, &meta, RuleType::Blacklist, &address, &params).await
}

// ----------------------------------------------------------------------------
// /whitelist
// ----------------------------------------------------------------------------

async fn get_whitelist(State(state): SharedState, meta: RequestMeta) -> Response {
    list_active(&state, &meta, RuleType::Whitelist).await
}

async fn get_whitelist_for_address(
    State(state): SharedState,
    Path(address): Path<String>,
    meta: RequestMeta,
) -> Response {
    list_overlapping(&state, &meta, RuleType::Whitelist, &address).await
}

async fn add_whitelist_entry(
    State(state): SharedState,
    Path(raw_address): Path<String>,
    meta: RequestMeta,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> Response {
    let params = Params::merge(query, form);
    let result = async {
        let address = parse_address(&raw_address)?;
        let user = state.authorize(&meta, WHITELISTER, Some(&address)).await?;
        let addition = state
            .engine
            .add_whitelist_entry(address, Actor::new(&user, params.comment()))
            .await?;

        Ok::<_, ServiceError>((
            StatusCode::CREATED,
            Json(json!({
                "message": format!("The IP address {address} has been added to the whitelist."),
                "new_whitelist_entry": response::rule_json(&addition.new_entry, false),
                "overlapping_whitelist_entries": rules_json(&addition.overlapping, false),
            })),
        ))
    }
    .await;
    state.respond(&meta, result)
}

async fn remove_whitelist_entry(
    State(state): SharedState,
    Path(address): Path<String>,
    meta: RequestMeta,
    Query(query): Query<HashMap<String, String>>,
    form: Option<Form<HashMap<String, String>>>,
) -> Response {
    let params = Params::merge(query, form);
    cancel(&state, &meta, RuleType::Whitelist, &address, &params).await
}

// ----------------------------------------------------------------------------
// /history
// ----------------------------------------------------------------------------

async fn get_history(
    State(state): SharedState,
    Path(raw_address): Path<String>,
    meta: RequestMeta,
) -> Response {
    let result = async {
        let address = parse_address(&raw_address)?;
        state.authorize(&meta, HISTORY_READER, Some(&address)).await?;
        let history = state.engine.history(address).await?;
        Ok::<_, ServiceError>(Json(json!({ "history": rules_json(&history, true) })))
    }
    .await;
    state.respond(&meta, result)
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/blacklist", get(get_blacklist))
        .route(
            "/blacklist/*address",
            get(get_blacklist_for_address)
                .post(add_blacklist_entry)
                .delete(remove_blacklist_entry),
        )
        .route("/whitelist", get(get_whitelist))
        .route(
            "/whitelist/*address",
            get(get_whitelist_for_address)
                .post(add_whitelist_entry)
                .delete(remove_whitelist_entry),
        )
        .route("/history/*address", get(get_history))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "API listening");
    }
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

/// Run the HTTP server for Prometheus metrics.
///
/// Binds to `0.0.0.0:port` and serves the `/metrics` endpoint.
/// This is a long-running task that should be spawned in the background.
pub async fn run_metrics_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "Prometheus HTTP server listening");

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Metrics server error");
    }
}
