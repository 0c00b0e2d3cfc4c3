//! HTTP front for the SQL bridge
//! Minimal HTTP server using tokio and basic request parsing

use serde::de::DeserializeOwned;
use sql_bridge::api::{ErrorResponse, GenerateRequest, RefineRequest, SqlBridgeApi};
use sql_bridge::{BridgeConfig, BridgeError, QueryPipeline};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 1_000_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BridgeConfig::from_env()?;
    let pipeline = QueryPipeline::from_config(&config)?;
    let api = Arc::new(SqlBridgeApi::new(Arc::new(pipeline)).with_default_max_rows(config.default_max_rows));

    let listener = TcpListener::bind(config.server_addr).await?;
    info!("SQL bridge listening on http://{}", config.server_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("New connection from {}", addr);
        tokio::spawn(handle_connection(stream, Arc::clone(&api)));
    }
}

async fn handle_connection(mut stream: TcpStream, api: Arc<SqlBridgeApi>) {
    let mut buffer = Vec::new();
    let mut temp_buf = [0; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut temp_buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&temp_buf[..n]);
                    if let Ok(s) = std::str::from_utf8(&buffer) {
                        if let Some(headers_end) = s.find("\r\n\r\n").map(|i| i + 4) {
                            let content_length = extract_content_length(s).unwrap_or(0);
                            if buffer.len() >= headers_end + content_length {
                                break;
                            }
                        }
                    }
                    if buffer.len() > MAX_REQUEST_BYTES {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    })
    .await;

    match read_result {
        Err(_) => {
            warn!("Request read timeout");
            return;
        }
        Ok(Err(e)) => {
            warn!("Failed to read from stream: {}", e);
            return;
        }
        Ok(Ok(())) => {}
    }

    if buffer.is_empty() {
        return;
    }

    let response = match String::from_utf8(buffer) {
        Ok(request) => handle_request(&request, &api).await,
        Err(_) => create_response(400, "Bad Request", &error_body(400, "request is not valid UTF-8")),
    };
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to write response: {}", e);
    }
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.is_empty() {
            break;
        }
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(value) = line.split(':').nth(1) {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

async fn handle_request(request: &str, api: &SqlBridgeApi) -> String {
    let request_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", &error_body(400, "malformed request line"));
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/").trim_end_matches('/');
    let body = request.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");

    info!("{} {}", method, path);

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/health") => create_response(200, "OK", r#"{"status":"ok"}"#),
        ("POST", "/api/sql/generate") => match parse_body::<GenerateRequest>(body) {
            Ok(req) => respond(api.generate(req).await),
            Err(e) => error_response(&e),
        },
        ("POST", "/api/sql/refine") => match parse_body::<RefineRequest>(body) {
            Ok(req) => respond(api.refine(req).await),
            Err(e) => error_response(&e),
        },
        _ => create_response(404, "Not Found", &error_body(404, "no such route")),
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, BridgeError> {
    serde_json::from_str(body).map_err(BridgeError::from)
}

fn respond<T: serde::Serialize>(result: Result<T, BridgeError>) -> String {
    match result {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(json) => create_response(200, "OK", &json),
            Err(e) => error_response(&BridgeError::from(e)),
        },
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &BridgeError) -> String {
    let status = error.status_code();
    if status >= 500 {
        error!("Request failed: {}", error);
    } else {
        warn!("Request rejected: {}", error);
    }
    let body = serde_json::to_string(&ErrorResponse::from(error))
        .unwrap_or_else(|_| error_body(status, "internal error"));
    create_response(status, status_text(status), &body)
}

fn error_body(status: u16, message: &str) -> String {
    serde_json::json!({ "error": message, "status": status }).to_string()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
