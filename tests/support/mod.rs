//! In-process HTTP stub of the SLIPO API.
//!
//! An `axum` server on `127.0.0.1:0`, driven by its own tokio runtime so the
//! blocking client under test can call it from plain `#[test]` functions.
//! Every request is recorded and dispatched to a handler registered per
//! method and path.

#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

use slipo::{Client, ClientConfig, Credentials};

pub const API_KEY: &str = "test-key";
pub const SESSION_TOKEN: &str = "session-123";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// `(name, content)` of every multipart/form-data part.
    pub parts: Vec<(String, Vec<u8>)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query.get(name).cloned()
    }

    pub fn multipart(&self) -> Vec<(String, Vec<u8>)> {
        self.parts.clone()
    }
}

pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StubResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string().into_bytes(),
        }
    }

    /// `{"success": true, "result": result}` with HTTP 200.
    pub fn ok(result: Value) -> Self {
        Self::json(200, json!({"success": true, "errors": [], "result": result}))
    }

    /// `{"success": false, "errors": [..]}` with the given status.
    pub fn error(status: u16, code: &str, description: &str) -> Self {
        Self::json(
            status,
            json!({"success": false, "errors": [{"code": code, "description": description}]}),
        )
    }

    pub fn bytes(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/octet-stream".into())],
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl IntoResponse for StubResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = HeaderMap::new();
        for (k, v) in &self.headers {
            if let (Ok(k), Ok(v)) = (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
                headers.insert(k, v);
            }
        }
        (status, headers, self.body).into_response()
    }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> StubResponse + Send + Sync>;

#[derive(Default)]
struct Routes {
    handlers: HashMap<(String, String), Handler>,
    requests: Vec<RecordedRequest>,
}

type SharedRoutes = Arc<Mutex<Routes>>;

pub struct StubServer {
    addr: SocketAddr,
    routes: SharedRoutes,
    shutdown_tx: Option<oneshot::Sender<()>>,
    runtime: Option<Runtime>,
}

impl StubServer {
    /// Starts a server that already accepts [`API_KEY`] on the key validation endpoint.
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("build stub runtime");
        let routes = SharedRoutes::default();

        let app = Router::new().fallback(dispatch).with_state(routes.clone());
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .expect("bind stub server");
        let addr = listener.local_addr().expect("stub server address");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        runtime.spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        let server = Self {
            addr,
            routes,
            shutdown_tx: Some(shutdown_tx),
            runtime: Some(runtime),
        };
        server.route("GET", "/api/v1/key/validate/", |req| {
            if req.header("x-api-key") == Some(API_KEY) {
                StubResponse::ok(Value::Null).with_header("X-API-Session-Token", SESSION_TOKEN)
            } else {
                StubResponse::error(401, "BasicErrorCode.AUTHENTICATION_FAILED", "Invalid API key")
            }
        });
        server
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn route<F>(&self, method: &str, path: &str, handler: F)
    where
        F: Fn(&RecordedRequest) -> StubResponse + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap()
            .handlers
            .insert((method.to_string(), path.to_string()), Arc::new(handler));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.routes.lock().unwrap().requests.clone()
    }

    /// Recorded requests for one path, any method.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.url(), Credentials::api_key(API_KEY)).with_requires_ssl(false)
    }

    pub fn client(&self) -> Client {
        Client::connect_with(self.config())
            .expect("connect to stub server")
            .with_progress(false)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Pooled client connections would hold a graceful shutdown open.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn dispatch(
    State(routes): State<SharedRoutes>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let parts = if content_type.starts_with("multipart/form-data") {
        match read_parts(&content_type, body.clone()).await {
            Ok(parts) => parts,
            Err(status) => return status.into_response(),
        }
    } else {
        Vec::new()
    };

    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query,
        headers: headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect(),
        body: body.to_vec(),
        parts,
    };

    let handler = {
        let mut routes = routes.lock().unwrap();
        routes.requests.push(request.clone());
        routes
            .handlers
            .get(&(request.method.clone(), request.path.clone()))
            .cloned()
    };

    match handler {
        Some(h) => h(&request).into_response(),
        None => StubResponse::error(404, "NOT_FOUND", "no such endpoint").into_response(),
    }
}

async fn read_parts(content_type: &str, body: Bytes) -> Result<Vec<(String, Vec<u8>)>, StatusCode> {
    let req = Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let mut parts = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        let name = field.name().unwrap_or_default().to_string();
        let content = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        parts.push((name, content.to_vec()));
    }
    Ok(parts)
}
