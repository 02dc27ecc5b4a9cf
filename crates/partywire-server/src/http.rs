//! HTTP endpoint router.
//!
//! Endpoints declare optional body, query and header schemas. Per request the
//! router builds `{ body?, query?, header? }` from what the request carries,
//! asserts it against `partial({ body, query, header })`, and only then calls
//! the handler with the validated params attached.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use partywire_core::schema::{Field, Issues, Schema, SharedValidator, Validator};
use partywire_core::FetchError;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::errors::RouteError;
use crate::lobby::Lobby;
use crate::metrics::{HTTP_HANDLER_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

/// Status used when the default for invalid params is not overridden.
pub const DEFAULT_INVALID_PARAMS_STATUS: u16 = 400;

// ── Request / response ──────────────────────────────────────────────

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Parse a method name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-independent HTTP request.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Request method.
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Decoded query-string pairs.
    pub query: BTreeMap<String, String>,
    /// Headers with lower-case names.
    pub headers: BTreeMap<String, String>,
    /// JSON body, or the raw text when it is not JSON. `None` when empty.
    pub body: Option<Value>,
    /// Values captured by `:name` path segments.
    pub path_params: HashMap<String, String>,
    /// Validated `{ body?, query?, header? }`; `Null` until validated.
    pub params: Value,
}

impl FetchRequest {
    /// Request with no query, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            path_params: HashMap::new(),
            params: Value::Null,
        }
    }

    /// Add a query pair.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.query.insert(key.into(), value.into());
        self
    }

    /// Add a header; the name is lower-cased.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the body from raw bytes (see [`body_from_bytes`]).
    #[must_use]
    pub fn with_raw_body(mut self, raw: &[u8]) -> Self {
        self.body = body_from_bytes(raw);
        self
    }

    /// Set a JSON body.
    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// `{ body?, query?, header? }` with absent or empty parts left out.
    fn param_input(&self) -> Value {
        let mut input = Map::new();
        if let Some(body) = &self.body {
            let _ = input.insert("body".into(), body.clone());
        }
        if !self.query.is_empty() {
            let _ = input.insert("query".into(), string_map(&self.query));
        }
        if !self.headers.is_empty() {
            let _ = input.insert("header".into(), string_map(&self.headers));
        }
        Value::Object(input)
    }
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// JSON when parseable, otherwise UTF-8 text, `None` when empty.
pub fn body_from_bytes(raw: &[u8]) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_slice(raw) {
        return Some(value);
    }
    Some(Value::String(String::from_utf8_lossy(raw).into_owned()))
}

/// Response body.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchBody {
    /// Serialized as JSON.
    Json(Value),
    /// Sent as `text/plain`.
    Text(String),
}

/// Transport-independent HTTP response.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,
    /// Body.
    pub body: FetchBody,
}

impl FetchResponse {
    /// JSON response.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: FetchBody::Json(body),
        }
    }

    /// Plain-text response.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: FetchBody::Text(body.into()),
        }
    }

    /// `404 {"error":"Not found"}`
    pub fn not_found() -> Self {
        Self::json(404, serde_json::json!({"error": "Not found"}))
    }

    /// `500 Internal server error`
    pub fn internal_error() -> Self {
        Self::text(500, "Internal server error")
    }
}

// ── Execution context ───────────────────────────────────────────────

/// Lets handlers run work past the response.
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
    tracker: TaskTracker,
}

impl ExecutionContext {
    /// Context spawning onto `tracker`.
    pub fn new(tracker: TaskTracker) -> Self {
        Self { tracker }
    }

    /// Run `fut` in the background. Graceful shutdown waits for it.
    pub fn wait_until<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.tracker.spawn(fut);
    }

    /// The tracker background work is spawned on.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }
}

// ── Endpoints ───────────────────────────────────────────────────────

/// Handler for one endpoint.
#[async_trait]
pub trait FetchHandler<C>: Send + Sync {
    /// Produce the JSON success body.
    async fn handle(
        &self,
        request: FetchRequest,
        lobby: &Arc<Lobby<C>>,
        execution: &ExecutionContext,
        ctx: &Arc<C>,
    ) -> anyhow::Result<Value>;
}

struct FnFetchHandler<F>(F);

#[async_trait]
impl<C, F, Fut, R> FetchHandler<C> for FnFetchHandler<F>
where
    C: Send + Sync + 'static,
    F: Fn(FetchRequest, Arc<Lobby<C>>, ExecutionContext, Arc<C>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Serialize,
{
    async fn handle(
        &self,
        request: FetchRequest,
        lobby: &Arc<Lobby<C>>,
        execution: &ExecutionContext,
        ctx: &Arc<C>,
    ) -> anyhow::Result<Value> {
        let out = (self.0)(request, Arc::clone(lobby), execution.clone(), Arc::clone(ctx)).await?;
        Ok(serde_json::to_value(out)?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

fn parse_path(path: &str) -> Result<Vec<Segment>, RouteError> {
    let invalid = |reason| RouteError::InvalidPath {
        path: path.to_owned(),
        reason,
    };
    if !path.starts_with('/') {
        return Err(invalid("must start with `/`"));
    }
    if path.contains(['?', '#']) {
        return Err(invalid("must not contain a query or fragment"));
    }
    let mut names = Vec::new();
    let mut segments = Vec::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if let Some(name) = part.strip_prefix(':') {
            if name.is_empty() {
                return Err(invalid("parameter name must not be empty"));
            }
            if names.contains(&name) {
                return Err(invalid("duplicate parameter name"));
            }
            names.push(name);
            segments.push(Segment::Param(name.to_owned()));
        } else {
            segments.push(Segment::Static(part.to_owned()));
        }
    }
    Ok(segments)
}

/// One HTTP endpoint.
pub struct Endpoint<C> {
    method: Method,
    path: String,
    body: Option<SharedValidator>,
    query: Option<SharedValidator>,
    header: Option<SharedValidator>,
    response: Option<SharedValidator>,
    handler: Arc<dyn FetchHandler<C>>,
}

impl<C: Send + Sync + 'static> Endpoint<C> {
    /// Endpoint handled by an async closure returning any serializable value.
    pub fn new<F, Fut, R>(method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(FetchRequest, Arc<Lobby<C>>, ExecutionContext, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize + 'static,
    {
        Self::with_handler(method, path, FnFetchHandler(handler))
    }

    /// Endpoint with a [`FetchHandler`] implementation.
    pub fn with_handler(
        method: Method,
        path: impl Into<String>,
        handler: impl FetchHandler<C> + 'static,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: None,
            header: None,
            response: None,
            handler: Arc::new(handler),
        }
    }

    /// `GET` endpoint.
    pub fn get<F, Fut, R>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(FetchRequest, Arc<Lobby<C>>, ExecutionContext, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize + 'static,
    {
        Self::new(Method::Get, path, handler)
    }

    /// `POST` endpoint.
    pub fn post<F, Fut, R>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(FetchRequest, Arc<Lobby<C>>, ExecutionContext, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize + 'static,
    {
        Self::new(Method::Post, path, handler)
    }

    /// Schema for the request body.
    #[must_use]
    pub fn body(mut self, schema: impl Validator + 'static) -> Self {
        self.body = Some(Arc::new(schema));
        self
    }

    /// Schema for the query-string map.
    #[must_use]
    pub fn query(mut self, schema: impl Validator + 'static) -> Self {
        self.query = Some(Arc::new(schema));
        self
    }

    /// Schema for the header map (lower-case names).
    #[must_use]
    pub fn header(mut self, schema: impl Validator + 'static) -> Self {
        self.header = Some(Arc::new(schema));
        self
    }

    /// Schema the success body is expected to match.
    #[must_use]
    pub fn response(mut self, schema: impl Validator + 'static) -> Self {
        self.response = Some(Arc::new(schema));
        self
    }

    /// Method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Path pattern as declared.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// An endpoint after registration: parsed path plus synthesized input schema.
pub struct Route<C> {
    endpoint: Endpoint<C>,
    segments: Vec<Segment>,
    input: Schema,
}

impl<C: Send + Sync + 'static> Route<C> {
    fn compile(endpoint: Endpoint<C>) -> Result<Self, RouteError> {
        let segments = parse_path(&endpoint.path)?;
        let declared = [
            ("body", &endpoint.body),
            ("query", &endpoint.query),
            ("header", &endpoint.header),
        ];
        let input = Schema::object(declared.into_iter().filter_map(|(name, schema)| {
            schema
                .as_ref()
                .map(|s| Field::required(name, Schema::custom(Arc::clone(s))))
        }))
        .partial();
        Ok(Self {
            endpoint,
            segments,
            input,
        })
    }

    /// The declared endpoint.
    pub fn endpoint(&self) -> &Endpoint<C> {
        &self.endpoint
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut captured = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Static(s) if s == part => {}
                Segment::Static(_) => return None,
                Segment::Param(name) => {
                    let value = percent_decode_str(part).decode_utf8_lossy().into_owned();
                    let _ = captured.insert(name.clone(), value);
                }
            }
        }
        Some(captured)
    }

    fn same_shape(&self, other: &[Segment]) -> bool {
        self.segments.len() == other.len()
            && self.segments.iter().zip(other).all(|(a, b)| match (a, b) {
                (Segment::Static(x), Segment::Static(y)) => x == y,
                (Segment::Param(_), Segment::Param(_)) => true,
                _ => false,
            })
    }
}

/// Method-indexed endpoint table.
pub struct EndpointRouter<C> {
    endpoints_map: HashMap<Method, Vec<Route<C>>>,
    invalid_params_status: u16,
}

impl<C: Send + Sync + 'static> EndpointRouter<C> {
    /// Build the table. Duplicate method + path shapes and malformed paths are
    /// rejected.
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint<C>>) -> Result<Self, RouteError> {
        let mut endpoints_map: HashMap<Method, Vec<Route<C>>> = HashMap::new();
        for endpoint in endpoints {
            let route = Route::compile(endpoint)?;
            let routes = endpoints_map.entry(route.endpoint.method).or_default();
            if routes.iter().any(|r| r.same_shape(&route.segments)) {
                return Err(RouteError::DuplicateEndpoint {
                    method: route.endpoint.method.to_string(),
                    path: route.endpoint.path,
                });
            }
            routes.push(route);
        }
        Ok(Self {
            endpoints_map,
            invalid_params_status: DEFAULT_INVALID_PARAMS_STATUS,
        })
    }

    /// Router with no endpoints; every request is a 404.
    pub fn empty() -> Self {
        Self {
            endpoints_map: HashMap::new(),
            invalid_params_status: DEFAULT_INVALID_PARAMS_STATUS,
        }
    }

    /// Status code sent with `fetch.error` bodies.
    #[must_use]
    pub fn with_invalid_params_status(mut self, status: u16) -> Self {
        self.invalid_params_status = status;
        self
    }

    /// Routes per method, in declaration order.
    pub fn endpoints_map(&self) -> &HashMap<Method, Vec<Route<C>>> {
        &self.endpoints_map
    }

    /// First route for `method` whose pattern matches `path`, with captures.
    pub fn find(&self, method: Method, path: &str) -> Option<(&Route<C>, HashMap<String, String>)> {
        self.endpoints_map
            .get(&method)?
            .iter()
            .find_map(|route| route.matches(path).map(|captured| (route, captured)))
    }

    /// Handle one request.
    pub async fn on_fetch(
        &self,
        request: FetchRequest,
        lobby: &Arc<Lobby<C>>,
        execution: &ExecutionContext,
        ctx: &Arc<C>,
    ) -> FetchResponse {
        let method = request.method;
        let response = self.dispatch(request, lobby, execution, ctx).await;
        counter!(
            HTTP_REQUESTS_TOTAL,
            "method" => method.as_str(),
            "status" => response.status.to_string()
        )
        .increment(1);
        response
    }

    async fn dispatch(
        &self,
        mut request: FetchRequest,
        lobby: &Arc<Lobby<C>>,
        execution: &ExecutionContext,
        ctx: &Arc<C>,
    ) -> FetchResponse {
        let Some((route, path_params)) = self.find(request.method, &request.path) else {
            debug!(method = %request.method, path = %request.path, "no endpoint");
            return FetchResponse::not_found();
        };
        request.path_params = path_params;

        let input = request.param_input();
        if let Err(issues) = route.input.validate(&input) {
            debug!(path = %request.path, issues = issues.len(), "invalid params");
            let body = FetchError::invalid_params(Issues::new(issues));
            return match serde_json::to_value(&body) {
                Ok(body) => FetchResponse::json(self.invalid_params_status, body),
                Err(_) => FetchResponse::internal_error(),
            };
        }
        request.params = input;

        let endpoint = &route.endpoint;
        let start = Instant::now();
        let method = request.method;
        let result = AssertUnwindSafe(endpoint.handler.handle(request, lobby, execution, ctx))
            .catch_unwind()
            .await;
        histogram!(HTTP_HANDLER_DURATION_SECONDS, "method" => method.as_str())
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(Ok(body)) => {
                if let Some(schema) = &endpoint.response {
                    if let Err(issues) = schema.validate(&body) {
                        warn!(
                            path = %endpoint.path,
                            issues = issues.len(),
                            "response does not match declared schema"
                        );
                    }
                }
                FetchResponse::json(200, body)
            }
            Ok(Err(e)) => {
                warn!(path = %endpoint.path, error = %e, "endpoint handler failed");
                FetchResponse::internal_error()
            }
            Err(_) => {
                warn!(path = %endpoint.path, "endpoint handler panicked");
                FetchResponse::internal_error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partywire_core::logging::capture_logs;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Ctx {
        counter: AtomicI64,
    }

    fn endpoints() -> Vec<Endpoint<Ctx>> {
        vec![
            Endpoint::get("/api/counter", |_req, _lobby, _exec, ctx: Arc<Ctx>| async move {
                Ok(json!({"counter": ctx.counter.load(Ordering::SeqCst)}))
            })
            .response(Schema::object([Field::required("counter", Schema::integer())])),
            Endpoint::post("/api/counter", |req: FetchRequest, _l, _e, ctx: Arc<Ctx>| async move {
                let amount = req.params["body"]["amount"].as_i64().unwrap_or_default();
                Ok(json!({"counter": ctx.counter.fetch_add(amount, Ordering::SeqCst) + amount}))
            })
            .body(Schema::object([Field::required("amount", Schema::integer())])),
            Endpoint::get("/api/search", |req: FetchRequest, _l, _e, _c| async move {
                Ok(req.params)
            })
            .query(Schema::object([Field::required("q", Schema::string())])),
            Endpoint::get("/api/secure", |_r, _l, _e, _c| async move { Ok("ok") })
                .header(Schema::object([Field::required("x-token", Schema::literal("s3cret"))])),
            Endpoint::get("/api/rooms/:room/members/:member", |req: FetchRequest, _l, _e, _c| async move {
                Ok(json!({"room": req.path_params["room"], "member": req.path_params["member"]}))
            }),
            Endpoint::get("/api/fail", |_r, _l, _e, _c| async move {
                Err::<Value, _>(anyhow::anyhow!("db down"))
            }),
            Endpoint::get("/api/panic", |_r, _l, _e, _c| async move {
                if true {
                    panic!("oops");
                }
                Ok(Value::Null)
            }),
            Endpoint::get("/api/wrong-shape", |_r, _l, _e, _c| async move { Ok(json!({"counter": "x"})) })
                .response(Schema::object([Field::required("counter", Schema::integer())])),
        ]
    }

    struct Harness {
        router: EndpointRouter<Ctx>,
        lobby: Arc<Lobby<Ctx>>,
        exec: ExecutionContext,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                router: EndpointRouter::new(endpoints()).unwrap(),
                lobby: Arc::new(Lobby::new(Ctx::default())),
                exec: ExecutionContext::default(),
            }
        }

        async fn call(&self, request: FetchRequest) -> FetchResponse {
            let ctx = Arc::clone(self.lobby.global());
            self.router.on_fetch(request, &self.lobby, &self.exec, &ctx).await
        }
    }

    fn json_body(resp: &FetchResponse) -> &Value {
        match &resp.body {
            FetchBody::Json(v) => v,
            FetchBody::Text(t) => panic!("expected JSON body, got text {t:?}"),
        }
    }

    // ── Construction ────────────────────────────────────────────────

    #[test]
    fn endpoints_map_indexes_by_method() {
        let h = Harness::new();
        let map = h.router.endpoints_map();
        assert_eq!(map[&Method::Get].len(), 7);
        assert_eq!(map[&Method::Post].len(), 1);
        assert!(!map.contains_key(&Method::Delete));
        assert_eq!(map[&Method::Post][0].endpoint().path(), "/api/counter");
    }

    #[test]
    fn duplicate_endpoint_rejected() {
        let noop = |_r: FetchRequest, _l: Arc<Lobby<()>>, _e: ExecutionContext, _c: Arc<()>| async move {
            Ok::<_, anyhow::Error>(Value::Null)
        };
        let err = EndpointRouter::new([
            Endpoint::get("/a/:id", noop),
            Endpoint::get("/a/:other", noop),
        ])
        .err();
        assert_eq!(
            err,
            Some(RouteError::DuplicateEndpoint {
                method: "GET".into(),
                path: "/a/:other".into()
            })
        );
        assert!(EndpointRouter::new([Endpoint::get("/a", noop), Endpoint::post("/a", noop)]).is_ok());
    }

    #[test]
    fn malformed_paths_rejected() {
        let noop = |_r: FetchRequest, _l: Arc<Lobby<()>>, _e: ExecutionContext, _c: Arc<()>| async move {
            Ok::<_, anyhow::Error>(Value::Null)
        };
        for bad in ["api", "/a/:", "/a/:x/:x", "/a?x=1"] {
            let result = EndpointRouter::new([Endpoint::get(bad, noop)]);
            assert!(matches!(result, Err(RouteError::InvalidPath { .. })), "{bad}");
        }
    }

    #[test]
    fn method_parse_round_trips() {
        assert_eq!(Method::parse("patch"), Some(Method::Patch));
        assert_eq!(Method::parse("TRACE"), None);
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn body_from_bytes_variants() {
        assert_eq!(body_from_bytes(b""), None);
        assert_eq!(body_from_bytes(br#"{"a":1}"#), Some(json!({"a": 1})));
        assert_eq!(body_from_bytes(b"plain"), Some(json!("plain")));
    }

    // ── Dispatch ────────────────────────────────────────────────────

    #[tokio::test]
    async fn unmatched_is_404() {
        let h = Harness::new();
        let resp = h.call(FetchRequest::new(Method::Get, "/nope")).await;
        assert_eq!(resp, FetchResponse::not_found());
        let resp = h.call(FetchRequest::new(Method::Delete, "/api/counter")).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn get_counter_reads_context() {
        let h = Harness::new();
        h.lobby.global().counter.store(10, Ordering::SeqCst);
        let resp = h.call(FetchRequest::new(Method::Get, "/api/counter")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(json_body(&resp), &json!({"counter": 10}));
    }

    #[tokio::test]
    async fn valid_body_reaches_handler() {
        let h = Harness::new();
        let req = FetchRequest::new(Method::Post, "/api/counter").with_raw_body(br#"{"amount":4}"#);
        let resp = h.call(req).await;
        assert_eq!(json_body(&resp), &json!({"counter": 4}));
    }

    #[tokio::test]
    async fn invalid_body_is_fetch_error() {
        let h = Harness::new();
        let req = FetchRequest::new(Method::Post, "/api/counter").with_json(json!({"amount": "x"}));
        let resp = h.call(req).await;
        assert_eq!(resp.status, 400);
        let body = json_body(&resp);
        assert_eq!(body["type"], "fetch.error");
        assert_eq!(body["reason"], "invalid params");
        assert_eq!(body["issues"][0]["path"], json!(["body", "amount"]));
        assert_eq!(h.lobby.global().counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_body_passes_partial_schema() {
        let h = Harness::new();
        let resp = h.call(FetchRequest::new(Method::Post, "/api/counter")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(json_body(&resp), &json!({"counter": 0}));
    }

    #[tokio::test]
    async fn invalid_params_status_is_configurable() {
        let mut h = Harness::new();
        h.router = EndpointRouter::new(endpoints())
            .unwrap()
            .with_invalid_params_status(200);
        let req = FetchRequest::new(Method::Get, "/api/search").with_query("q", "");
        let ok = h.call(req).await;
        assert_eq!(ok.status, 200);

        let req = FetchRequest::new(Method::Get, "/api/secure").with_header("X-Token", "wrong");
        let resp = h.call(req).await;
        assert_eq!(resp.status, 200);
        assert_eq!(json_body(&resp)["type"], "fetch.error");
        assert_eq!(json_body(&resp)["issues"][0]["path"], json!(["header", "x-token"]));
    }

    #[tokio::test]
    async fn query_params_are_validated_and_attached() {
        let h = Harness::new();
        let req = FetchRequest::new(Method::Get, "/api/search")
            .with_query("q", "rust")
            .with_query("page", "2");
        let resp = h.call(req).await;
        assert_eq!(json_body(&resp), &json!({"query": {"q": "rust", "page": "2"}}));
    }

    #[tokio::test]
    async fn header_names_are_lowercased() {
        let h = Harness::new();
        let req = FetchRequest::new(Method::Get, "/api/secure").with_header("X-Token", "s3cret");
        let resp = h.call(req).await;
        assert_eq!(resp.status, 200);
        assert_eq!(json_body(&resp), &json!("ok"));
    }

    #[tokio::test]
    async fn path_params_are_captured() {
        let h = Harness::new();
        let resp = h
            .call(FetchRequest::new(Method::Get, "/api/rooms/main/members/ada/"))
            .await;
        assert_eq!(json_body(&resp), &json!({"room": "main", "member": "ada"}));
    }

    #[tokio::test]
    async fn path_params_are_percent_decoded() {
        let h = Harness::new();
        let resp = h
            .call(FetchRequest::new(Method::Get, "/api/rooms/a%2Fb%3Fx%3D1/members/ada%20l"))
            .await;
        assert_eq!(json_body(&resp), &json!({"room": "a/b?x=1", "member": "ada l"}));
    }

    #[tokio::test]
    async fn handler_error_is_500() {
        let h = Harness::new();
        let (logs, _guard) = capture_logs();
        let resp = h.call(FetchRequest::new(Method::Get, "/api/fail")).await;
        assert_eq!(resp, FetchResponse::text(500, "Internal server error"));
        assert!(logs.has_event(tracing::Level::WARN, "endpoint handler failed"));
    }

    #[tokio::test]
    async fn handler_panic_is_500() {
        let h = Harness::new();
        let resp = h.call(FetchRequest::new(Method::Get, "/api/panic")).await;
        assert_eq!(resp, FetchResponse::internal_error());
    }

    #[tokio::test]
    async fn response_mismatch_is_logged_not_blocked() {
        let h = Harness::new();
        let (logs, _guard) = capture_logs();
        let resp = h.call(FetchRequest::new(Method::Get, "/api/wrong-shape")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(json_body(&resp), &json!({"counter": "x"}));
        assert!(logs.has_event(tracing::Level::WARN, "does not match declared schema"));
    }

    #[tokio::test]
    async fn wait_until_is_tracked() {
        let exec = ExecutionContext::default();
        let done = Arc::new(AtomicI64::new(0));
        let flag = Arc::clone(&done);
        exec.wait_until(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            flag.store(1, Ordering::SeqCst);
        });
        let _ = exec.tracker().close();
        exec.tracker().wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
