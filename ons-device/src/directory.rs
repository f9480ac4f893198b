//! Client for the directory service that assigns device ids.
//!
//! Registration is a form POST of the device name, authorized with the
//! owner's bearer token. The service answers `{"state": bool, "message":
//! string}`; on success `message` is the new device id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;

use crate::error::ControlError;

/// Something that can register a device and hand back its id.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Register `name` at `url` on behalf of the owner of `token`.
    async fn register(&self, url: &str, name: &str, token: &str) -> Result<String, ControlError>;
}

/// Body of a directory service reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterResponse {
    /// Whether the request succeeded.
    #[serde(default)]
    pub state: bool,
    /// The device id on success, a reason otherwise.
    #[serde(default)]
    pub message: String,
}

impl RegisterResponse {
    /// The assigned id, or the service's reason for refusing.
    pub fn into_device_id(self) -> Result<String, ControlError> {
        match (self.state, self.message.trim()) {
            (true, id) if !id.is_empty() => Ok(id.to_string()),
            (true, _) => Err(ControlError::Directory("empty device id".into())),
            (false, reason) => Err(ControlError::Rejected(reason.to_string())),
        }
    }
}

/// Authorization header value: bare tokens get the `Bearer` scheme.
pub fn authorization_value(token: &str) -> String {
    let token = token.trim();
    if token.contains(' ') {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}

/// [`Registrar`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistrar {
    client: reqwest::Client,
}

impl HttpRegistrar {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlError::Directory(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Registrar for HttpRegistrar {
    async fn register(&self, url: &str, name: &str, token: &str) -> Result<String, ControlError> {
        tracing::debug!("registering {:?} at {}", name, url);
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, authorization_value(token))
            .form(&[("name", name)])
            .send()
            .await
            .map_err(|e| ControlError::Directory(e.to_string()))?;

        let status = response.status();
        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| ControlError::Directory(format!("{status}: {e}")))?;
        body.into_device_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the raw request.
    async fn one_shot_server(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/nas/register", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !String::from_utf8_lossy(&request).contains("name=") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (url, handle)
    }

    #[test]
    fn response_maps_to_id_or_reason() {
        let ok = RegisterResponse {
            state: true,
            message: " 42 ".into(),
        };
        assert_eq!(ok.into_device_id().unwrap(), "42");

        let refused = RegisterResponse {
            state: false,
            message: "quota exceeded".into(),
        };
        assert!(matches!(
            refused.into_device_id(),
            Err(ControlError::Rejected(reason)) if reason == "quota exceeded"
        ));

        let empty = RegisterResponse {
            state: true,
            message: String::new(),
        };
        assert!(matches!(
            empty.into_device_id(),
            Err(ControlError::Directory(_))
        ));
    }

    #[test]
    fn bare_tokens_get_bearer_scheme() {
        assert_eq!(authorization_value("abc"), "Bearer abc");
        assert_eq!(authorization_value("Bearer abc"), "Bearer abc");
        assert_eq!(authorization_value("Basic Zm9v"), "Basic Zm9v");
    }

    #[tokio::test]
    async fn posts_form_with_authorization() {
        let (url, server) = one_shot_server(r#"{"state":true,"message":"7"}"#).await;
        let registrar = HttpRegistrar::new(Duration::from_secs(5)).unwrap();

        let id = registrar.register(&url, "nas-1", "tok").await.unwrap();
        assert_eq!(id, "7");

        let request = server.await.unwrap().to_lowercase();
        assert!(request.starts_with("post /api/nas/register"));
        assert!(request.contains("authorization: bearer tok"));
        assert!(request.contains("application/x-www-form-urlencoded"));
        assert!(request.contains("name=nas-1"));
    }

    #[tokio::test]
    async fn refusal_is_reported() {
        let (url, _server) = one_shot_server(r#"{"state":false,"message":"already bound"}"#).await;
        let registrar = HttpRegistrar::new(Duration::from_secs(5)).unwrap();

        let err = registrar.register(&url, "nas-1", "tok").await.unwrap_err();
        assert!(matches!(err, ControlError::Rejected(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_directory_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let registrar = HttpRegistrar::new(Duration::from_secs(2)).unwrap();
        let err = registrar
            .register(&format!("http://{addr}/api/nas/register"), "n", "t")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Directory(_)));
    }
}
