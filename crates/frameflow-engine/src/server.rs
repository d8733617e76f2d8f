use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use frameflow_contracts::api::{ExploreRequest, GenerateRequest};
use frameflow_contracts::error::FlowError;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server};

use crate::gateway::Gateway;

pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
];

/// Blocking HTTP front for a [`Gateway`]; one thread per request so a slow
/// generation never holds up other callers.
pub struct GatewayServer {
    server: Arc<Server>,
    gateway: Arc<Gateway>,
}

impl GatewayServer {
    pub fn bind(addr: &str, gateway: Gateway) -> Result<Self> {
        let server = Server::http(addr).map_err(|err| anyhow!("failed to bind {addr}: {err}"))?;
        Ok(Self {
            server: Arc::new(server),
            gateway: Arc::new(gateway),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server
            .server_addr()
            .to_ip()
            .context("server is not listening on an IP address")
    }

    /// Makes a running [`GatewayServer::serve`] return.
    pub fn shutdown(&self) {
        self.server.unblock();
    }

    pub fn serve(&self) -> Result<()> {
        for request in self.server.incoming_requests() {
            dispatch(request_thread(), &self.gateway, request);
        }
        Ok(())
    }
}

fn request_thread() -> thread::Builder {
    thread::Builder::new().name("frameflow-request".to_string())
}

/// Runs `request` on its own thread. When the thread cannot be spawned the
/// request is dropped, tiny_http answers it with a bare 500, and the accept
/// loop keeps going.
fn dispatch(builder: thread::Builder, gateway: &Arc<Gateway>, request: Request) -> bool {
    let gateway = Arc::clone(gateway);
    match builder.spawn(move || handle(&gateway, request)) {
        Ok(_) => true,
        Err(err) => {
            eprintln!("frameflow: failed to spawn request thread: {err}");
            false
        }
    }
}

fn handle(gateway: &Gateway, mut request: Request) {
    let method = method_name(request.method());
    let url = request.url().to_string();
    let (status, body) = match read_body(&mut request) {
        Ok(bytes) => route(gateway, method, &url, &bytes),
        Err(err) => (err.http_status(), err.to_body()),
    };
    let mut response = Response::from_string(if status == 204 {
        String::new()
    } else {
        body.to_string()
    })
    .with_status_code(status);
    let mut headers = CORS_HEADERS.to_vec();
    if status != 204 {
        headers.push(("Content-Type", "application/json"));
    }
    for (name, value) in headers {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response = response.with_header(header);
        }
    }
    if let Err(err) = request.respond(response) {
        eprintln!("frameflow: failed to respond to {method} {url}: {err}");
    }
}

fn method_name(method: &Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Post => "POST",
        Method::Options => "OPTIONS",
        Method::Head => "HEAD",
        Method::Put => "PUT",
        Method::Delete => "DELETE",
        Method::Patch => "PATCH",
        _ => "OTHER",
    }
}

fn read_body(request: &mut Request) -> Result<Vec<u8>, FlowError> {
    if request.body_length().unwrap_or(0) > MAX_BODY_BYTES {
        return Err(body_too_large());
    }
    let mut bytes = Vec::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .map_err(|err| FlowError::invalid_input(format!("Failed to read request body: {err}")))?;
    if bytes.len() > MAX_BODY_BYTES {
        return Err(body_too_large());
    }
    Ok(bytes)
}

fn body_too_large() -> FlowError {
    FlowError::invalid_input("Request body exceeds 50 MiB")
}

/// Maps one request to a status code and JSON body.
pub fn route(gateway: &Gateway, method: &str, url: &str, body: &[u8]) -> (u16, Value) {
    let path = url.split('?').next().unwrap_or(url).trim_end_matches('/');
    let allowed = match path {
        "/generate" | "/explore" => "POST",
        "/health" => "GET",
        _ => return (404, json!({"error": "Not found"})),
    };
    if method == "OPTIONS" {
        return (204, Value::Null);
    }
    if method != allowed {
        return (405, json!({"error": "Method not allowed"}));
    }
    let outcome = match path {
        "/generate" => parse_body::<GenerateRequest>(body)
            .and_then(|request| gateway.generate(&request))
            .and_then(to_json),
        "/explore" => parse_body::<ExploreRequest>(body)
            .and_then(|request| gateway.explore(&request))
            .and_then(to_json),
        _ => Ok(json!({"status": "ok", "provider": gateway.provider_name()})),
    };
    match outcome {
        Ok(value) => (200, value),
        Err(err) => (err.http_status(), err.to_body()),
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, FlowError> {
    serde_json::from_slice(body)
        .map_err(|err| FlowError::invalid_input(format!("Invalid JSON body: {err}")))
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, FlowError> {
    serde_json::to_value(value).map_err(|err| {
        FlowError::generation_failed_message(err.to_string(), "Failed to encode response")
    })
}
