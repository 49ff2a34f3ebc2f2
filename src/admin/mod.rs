//! Administrative local control channel.
//!
//! An HTTP router served on a Unix domain socket. Access is granted by
//! filesystem permissions on the socket path alone, so the listener is only
//! started when `enable_local_mode` is set and is never bound to a network
//! interface.

mod password;

pub use password::{hash_password, verify_password};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{BlockdeckError, Result};

pub const RESET_PASSWORD_ROUTE: &str = "/api/v2/admin/users/{username}/password";

/// User accounts the admin channel may modify.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Replace the stored credential of `username`.
    ///
    /// Fails with [`BlockdeckError::UserNotFound`] for unknown users.
    async fn reset_password(&self, username: &str, password: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ResetPasswordRequest {
    password: String,
}

pub fn router(users: Arc<dyn UserDirectory>) -> Router {
    Router::new()
        .route(RESET_PASSWORD_ROUTE, post(reset_password))
        .with_state(users)
}

async fn reset_password(
    State(users): State<Arc<dyn UserDirectory>>,
    Path(username): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Response {
    if request.password.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "password must not be empty");
    }

    match users.reset_password(&username, &request.password).await {
        Ok(()) => {
            tracing::info!(%username, "admin reset password");
            (StatusCode::OK, Json(json!({ "success": true }))).into_response()
        }
        Err(BlockdeckError::UserNotFound(name)) => {
            tracing::warn!(username = %name, "admin reset password for unknown user");
            error_response(StatusCode::NOT_FOUND, &format!("user not found: {}", name))
        }
        Err(BlockdeckError::InvalidPassword(reason)) => {
            error_response(StatusCode::BAD_REQUEST, &reason)
        }
        Err(e) => {
            tracing::error!(%username, error = %e, "admin reset password failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Listener for the local control channel.
pub struct AdminServer {
    socket_path: PathBuf,
    users: Arc<dyn UserDirectory>,
}

impl AdminServer {
    /// `None` unless local mode is enabled in `config`.
    pub fn from_config(config: &Config, users: Arc<dyn UserDirectory>) -> Option<Self> {
        if !config.enable_local_mode {
            return None;
        }
        Some(Self::new(config.local_mode_socket_location.clone(), users))
    }

    pub fn new(socket_path: impl Into<PathBuf>, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            socket_path: socket_path.into(),
            users,
        }
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }

    /// Serve until `shutdown` is cancelled, then remove the socket file.
    #[cfg(unix)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        // A socket left behind by a crashed process makes bind fail.
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let listener = tokio::net::UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        tracing::info!(socket = %self.socket_path.display(), "admin local channel listening");

        let app = router(self.users);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!(socket = %self.socket_path.display(), "admin local channel stopped");
        Ok(())
    }

    #[cfg(not(unix))]
    pub async fn run(self, _shutdown: CancellationToken) -> Result<()> {
        Err(BlockdeckError::Config(
            "local mode requires Unix domain sockets".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeDirectory {
        passwords: Mutex<HashMap<String, String>>,
    }

    impl FakeDirectory {
        fn with_user(name: &str) -> Arc<Self> {
            let dir = Self::default();
            dir.passwords
                .lock()
                .unwrap()
                .insert(name.to_string(), hash_password("old"));
            Arc::new(dir)
        }

        fn password_of(&self, name: &str) -> Option<String> {
            self.passwords.lock().unwrap().get(name).cloned()
        }
    }

    #[async_trait]
    impl UserDirectory for FakeDirectory {
        async fn reset_password(&self, username: &str, password: &str) -> Result<()> {
            let mut passwords = self.passwords.lock().unwrap();
            match passwords.get_mut(username) {
                Some(stored) => {
                    *stored = hash_password(password);
                    Ok(())
                }
                None => Err(BlockdeckError::UserNotFound(username.to_string())),
            }
        }
    }

    fn reset_request(username: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/v2/admin/users/{}/password", username))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_reset_password_updates_directory() {
        let dir = FakeDirectory::with_user("alice");
        let app = router(dir.clone());

        let response = app
            .oneshot(reset_request("alice", r#"{"password":"n3w"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let stored = dir.password_of("alice").unwrap();
        assert!(verify_password(&stored, "n3w"));
    }

    #[tokio::test]
    async fn test_reset_password_unknown_user_is_404() {
        let app = router(FakeDirectory::with_user("alice"));
        let response = app
            .oneshot(reset_request("bob", r#"{"password":"n3w"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reset_password_rejects_empty_password() {
        let dir = FakeDirectory::with_user("alice");
        let app = router(dir.clone());
        let response = app
            .oneshot(reset_request("alice", r#"{"password":"  "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(verify_password(&dir.password_of("alice").unwrap(), "old"));
    }

    #[test]
    fn test_server_disabled_unless_local_mode() {
        let mut config = Config::default();
        let dir: Arc<dyn UserDirectory> = FakeDirectory::with_user("alice");
        assert!(AdminServer::from_config(&config, dir.clone()).is_none());

        config.enable_local_mode = true;
        let server = AdminServer::from_config(&config, dir).unwrap();
        assert_eq!(server.socket_path(), config.local_mode_socket_location.as_path());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_round_trip_and_shutdown() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let tmp = tempfile::TempDir::new().unwrap();
        let socket = tmp.path().join("admin.socket");
        let dir = FakeDirectory::with_user("alice");
        let shutdown = CancellationToken::new();

        let server = AdminServer::new(&socket, dir.clone());
        let handle = tokio::spawn(server.run(shutdown.clone()));

        let mut stream = loop {
            match tokio::net::UnixStream::connect(&socket).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };

        let body = r#"{"password":"via-socket"}"#;
        let request = format!(
            "POST /api/v2/admin/users/alice/password HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(verify_password(&dir.password_of("alice").unwrap(), "via-socket"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(!socket.exists());
    }
}
