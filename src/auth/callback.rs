//! Loopback listener that receives the authorization code redirect.
//!
//! The listener serves a single fallback route. The first request whose query
//! string carries a non-empty `code` completes the wait; every request,
//! including late duplicates, is answered with 200 so the browser tab can be
//! closed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::error::{AuthError, Result};

pub const CODE_RECEIVED_BODY: &str = "Received Authorization Code, You may close this window now";
pub const DUPLICATE_CODE_BODY: &str =
    "Authorization Code was already received, You may close this window now";
pub const WAITING_BODY: &str = "Waiting for authorization code";

#[derive(Clone)]
struct CallbackState {
    code_tx: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl CallbackState {
    /// Take the sender; only the first caller gets it
    fn take_sender(&self) -> Option<oneshot::Sender<String>> {
        match self.code_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Router that forwards the first authorization code to `code_tx`
pub fn callback_router(code_tx: oneshot::Sender<String>) -> Router {
    let state = CallbackState {
        code_tx: Arc::new(Mutex::new(Some(code_tx))),
    };
    Router::new().fallback(handle_callback).with_state(state)
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    if let Some(error) = params.get("error") {
        tracing::warn!(
            error = %error,
            description = ?params.get("error_description"),
            "Authorization server redirected with an error"
        );
    }

    let code = match params.get("code").filter(|c| !c.is_empty()) {
        Some(code) => code.clone(),
        None => {
            tracing::debug!("Callback request without code, still waiting");
            return (StatusCode::OK, WAITING_BODY);
        }
    };

    match state.take_sender() {
        Some(tx) => {
            tracing::info!("Authorization code received");
            if tx.send(code).is_err() {
                tracing::warn!("Authorization code arrived after the wait was abandoned");
            }
            (StatusCode::OK, CODE_RECEIVED_BODY)
        }
        None => {
            tracing::debug!("Ignoring duplicate authorization code");
            (StatusCode::OK, DUPLICATE_CODE_BODY)
        }
    }
}

/// Short-lived HTTP listener bound to a loopback port
pub struct CallbackListener {
    port: u16,
    code_rx: Option<oneshot::Receiver<String>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl CallbackListener {
    /// Bind to `127.0.0.1:port` and start serving. Port 0 picks a free port.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| AuthError::Listener(format!("failed to bind port {}: {}", port, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::Listener(e.to_string()))?
            .port();

        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = callback_router(code_tx);

        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Callback listener stopped: {}", e);
            }
        });

        tracing::info!("Listening for authorization callback on port {}", port);

        Ok(Self {
            port,
            code_rx: Some(code_rx),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// The bound port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the authorization code, then stop the listener
    pub async fn wait_for_code(mut self, timeout: Duration) -> Result<String> {
        let code_rx = self
            .code_rx
            .take()
            .ok_or_else(|| AuthError::Listener("code receiver already consumed".to_string()))?;

        let result = tokio::time::timeout(timeout, code_rx).await;
        self.stop();

        match result {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(_)) => Err(AuthError::Listener(
                "listener stopped before an authorization code arrived".to_string(),
            )),
            Err(_) => {
                tracing::error!("No authorization callback within {:?}", timeout);
                Err(AuthError::CallbackTimeout(timeout))
            }
        }
    }

    /// Stop the listener
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::debug!("Callback listener on port {} shutting down", self.port);
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.stop();
    }
}
