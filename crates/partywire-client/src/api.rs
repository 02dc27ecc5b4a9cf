//! HTTP API client for declared endpoints.

use std::collections::BTreeMap;

use partywire_core::FetchError;
use partywire_core::message::FETCH_ERROR;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::errors::ApiError;

/// A declared endpoint: method plus path template (`/api/rooms/:room`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRoute {
    /// HTTP method.
    pub method: Method,
    /// Path template.
    pub path: String,
}

impl ApiRoute {
    /// Declare a route.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

/// Request parameters. Empty maps are omitted from the request.
#[derive(Clone, Debug, Default)]
pub struct RequestParams {
    /// JSON body.
    pub body: Option<Value>,
    /// Query string pairs.
    pub query: BTreeMap<String, String>,
    /// Extra headers.
    pub header: BTreeMap<String, String>,
    /// Values for `:name` segments of the path template.
    pub path: BTreeMap<String, String>,
}

impl RequestParams {
    /// Empty params.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the JSON body.
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a query pair.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.query.insert(key.into(), value.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.header.insert(name.into(), value.into());
        self
    }

    /// Fill a `:name` path segment.
    #[must_use]
    pub fn path(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.path.insert(name.into(), value.into());
        self
    }
}

/// Client for a fixed set of declared endpoints.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    routes: Vec<ApiRoute>,
}

impl ApiClient {
    /// Client for `routes` under `base_url`.
    pub fn new(base_url: impl Into<String>, routes: impl IntoIterator<Item = ApiRoute>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url, routes)
    }

    /// Same as [`new`](Self::new) with a preconfigured `reqwest::Client`.
    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        routes: impl IntoIterator<Item = ApiRoute>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            routes: routes.into_iter().collect(),
        }
    }

    /// Replace the base URL.
    pub fn set_base_url(&mut self, base_url: impl Into<String>) -> &mut Self {
        self.base_url = base_url.into();
        self
    }

    /// Current base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Declared routes.
    pub fn routes(&self) -> &[ApiRoute] {
        &self.routes
    }

    /// The declared route with this exact path template and method.
    pub fn find(&self, path: &str, method: &Method) -> Option<&ApiRoute> {
        self.routes
            .iter()
            .find(|r| r.path == path && r.method == *method)
    }

    /// `GET path`
    pub async fn get(&self, path: &str, params: RequestParams) -> Result<Value, ApiError> {
        self.request(Method::GET, path, params).await
    }

    /// `POST path`
    pub async fn post(&self, path: &str, params: RequestParams) -> Result<Value, ApiError> {
        self.request(Method::POST, path, params).await
    }

    /// `PUT path`
    pub async fn put(&self, path: &str, params: RequestParams) -> Result<Value, ApiError> {
        self.request(Method::PUT, path, params).await
    }

    /// `PATCH path`
    pub async fn patch(&self, path: &str, params: RequestParams) -> Result<Value, ApiError> {
        self.request(Method::PATCH, path, params).await
    }

    /// `DELETE path`
    pub async fn delete(&self, path: &str, params: RequestParams) -> Result<Value, ApiError> {
        self.request(Method::DELETE, path, params).await
    }

    /// `HEAD path`; the result is always `null` on success.
    pub async fn head(&self, path: &str, params: RequestParams) -> Result<Value, ApiError> {
        self.request(Method::HEAD, path, params).await
    }

    /// Call a declared route and decode the JSON response into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: RequestParams,
    ) -> Result<T, ApiError> {
        let value = self.request(method, path, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call a declared route. An empty success body decodes to `null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: RequestParams,
    ) -> Result<Value, ApiError> {
        if self.find(path, &method).is_none() {
            return Err(ApiError::UnknownRoute {
                method: method.to_string(),
                path: path.to_owned(),
            });
        }

        let url = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            expand_path(path, &params.path)?
        );
        debug!(%method, %url, "api request");

        let mut builder = self.http.request(method, url);
        if !params.query.is_empty() {
            builder = builder.query(&params.query);
        }
        for (name, value) in &params.header {
            builder = builder.header(name, value);
        }
        if let Some(body) = &params.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            let value: Value = serde_json::from_slice(&bytes)?;
            // `fetch.error` may arrive with a 2xx status
            if value.get("type").and_then(Value::as_str) == Some(FETCH_ERROR) {
                if let Ok(err) = serde_json::from_value::<FetchError>(value.clone()) {
                    debug!(status = status.as_u16(), issues = err.issues.len(), "invalid params");
                    return Err(ApiError::InvalidParams(err.issues));
                }
            }
            return Ok(value);
        }
        if let Ok(err) = serde_json::from_slice::<FetchError>(&bytes) {
            debug!(status = status.as_u16(), issues = err.issues.len(), "invalid params");
            return Err(ApiError::InvalidParams(err.issues));
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// Everything but unreserved characters is escaped inside one path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Substitute `:name` segments from `values`, percent-encoded.
fn expand_path(template: &str, values: &BTreeMap<String, String>) -> Result<String, ApiError> {
    let mut out = Vec::new();
    for segment in template.split('/') {
        match segment.strip_prefix(':') {
            Some(name) => {
                let value = values
                    .get(name)
                    .ok_or_else(|| ApiError::MissingPathParam(name.to_owned()))?;
                out.push(utf8_percent_encode(value, PATH_SEGMENT).to_string());
            }
            None => out.push(segment.to_owned()),
        }
    }
    Ok(out.join("/"))
}
