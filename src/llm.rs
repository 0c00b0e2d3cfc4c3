//! Model Client
//!
//! Sends a prompt to the local Ollama generation endpoint and returns the raw
//! completion text. Non-streaming, one request per call.

use crate::config::{BridgeConfig, MODEL_TEMPERATURE};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Anything that turns a prompt into completion text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str {
        "unknown"
    }
}

pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f64,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            temperature: MODEL_TEMPERATURE,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.model_timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.generate_endpoint(),
            model: config.model.clone(),
            temperature: MODEL_TEMPERATURE,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(self)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "temperature": self.temperature,
        });

        debug!("POST {} (model {}, {} prompt chars)", self.endpoint, self.model, prompt.len());

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("Model request failed: {}", e);
                BridgeError::ModelUnavailable(format!("request to {} failed: {}", self.endpoint, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::ModelUnavailable(format!(
                "model service returned {}: {}",
                status,
                text.trim()
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BridgeError::ModelUnavailable(format!("unreadable model response: {}", e)))?;

        let content = response_json["response"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| BridgeError::ModelUnavailable("No response from the model".to_string()))?;

        Ok(content.to_string())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve exactly one HTTP response and hand back the raw request.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(split) = text.find("\r\n\r\n") {
                    let expected = text[..split]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + expected {
                        break;
                    }
                }
            }
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&raw).to_string());
        });

        (format!("http://{}/api/generate", addr), rx)
    }

    #[tokio::test]
    async fn test_generate_returns_response_field() {
        let (endpoint, request) =
            serve_once("HTTP/1.1 200 OK", r#"{"model":"m","response":"```sql\nSELECT 1\n```","done":true}"#).await;
        let client = OllamaClient::new(endpoint, "deepseek-r1:8b");

        let text = client.generate("count customers").await.unwrap();
        assert_eq!(text, "```sql\nSELECT 1\n```");

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /api/generate"));
        assert!(raw.contains("\"stream\":false"));
        assert!(raw.contains("\"model\":\"deepseek-r1:8b\""));
        assert!(raw.contains("\"prompt\":\"count customers\""));
        assert!(raw.contains("\"temperature\":0.2"));
        assert!(!raw.contains("0.2000"));
    }

    #[tokio::test]
    async fn test_empty_response_field_is_model_unavailable() {
        let (endpoint, _request) = serve_once("HTTP/1.1 200 OK", r#"{"response":""}"#).await;
        let err = OllamaClient::new(endpoint, "m").generate("q").await.unwrap_err();
        assert!(matches!(err, BridgeError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_server_error_status_is_model_unavailable() {
        let (endpoint, _request) =
            serve_once("HTTP/1.1 500 Internal Server Error", r#"{"error":"model not found"}"#).await;
        let err = OllamaClient::new(endpoint, "m").generate("q").await.unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_model_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OllamaClient::new(format!("http://{}/api/generate", addr), "m");
        let err = client.generate("q").await.unwrap_err();
        assert!(matches!(err, BridgeError::ModelUnavailable(_)));
    }

    #[test]
    fn test_from_config_uses_generate_endpoint() {
        let client = OllamaClient::from_config(&BridgeConfig::default()).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:11434/api/generate");
        assert_eq!(client.model_name(), "deepseek-r1:8b");
    }
}
