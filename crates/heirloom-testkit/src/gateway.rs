//! Axum server exposing a [`MemoryLedger`] over the gateway JSON routes.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use heirloom_client::{
    ACCOUNTS_PATH, AccountResponseV1, Address, GatewayErrorBody, GatewayErrorEnvelope, LedgerRpc,
    OperationRequest, RpcError, SIMULATE_PATH, SUBMIT_PATH, SignedEnvelope, SubmissionHandle,
    SubmitResponseV1, SubmitStatus, TRANSACTIONS_PATH,
};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

use crate::ledger::MemoryLedger;

#[derive(Clone)]
struct GatewayState {
    ledger: Arc<MemoryLedger>,
    calls: Arc<Mutex<Vec<String>>>,
    auth_token: Option<String>,
}

pub struct MockGateway {
    pub base_url: String,
    calls: Arc<Mutex<Vec<String>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockGateway {
    /// Route names in arrival order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Serves `ledger` on an ephemeral local port. When `auth_token` is set,
/// requests without the matching bearer token get a 401 error envelope.
pub async fn spawn_mock_gateway(
    ledger: Arc<MemoryLedger>,
    auth_token: Option<String>,
) -> Result<MockGateway> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let state = GatewayState {
        ledger,
        calls: calls.clone(),
        auth_token,
    };
    let app = Router::new()
        .route(SIMULATE_PATH, post(simulate))
        .route(SUBMIT_PATH, post(submit))
        .route(&format!("{TRANSACTIONS_PATH}/:hash"), get(transaction_status))
        .route(&format!("{ACCOUNTS_PATH}/:id"), get(account))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    Ok(MockGateway {
        base_url: format!("http://{addr}"),
        calls,
        shutdown: Some(shutdown_tx),
    })
}

async fn record_call(calls: &Arc<Mutex<Vec<String>>>, name: &str) {
    let mut guard = calls.lock().await;
    guard.push(name.to_string());
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(GatewayErrorEnvelope {
            error: GatewayErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }),
    )
        .into_response()
}

fn rpc_error_response(error: &RpcError) -> Response {
    match error {
        RpcError::Parse(message) => error_response(StatusCode::BAD_REQUEST, "bad_request", message),
        other => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "node_unavailable",
            other.to_string(),
        ),
    }
}

fn authorized(state: &GatewayState, headers: &axum::http::HeaderMap) -> bool {
    let Some(expected) = state.auth_token.as_deref() else {
        return true;
    };
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "unauthorized", "missing or invalid bearer token")
}

async fn simulate(
    State(state): State<GatewayState>,
    headers: axum::http::HeaderMap,
    Json(request): Json<OperationRequest>,
) -> Response {
    record_call(&state.calls, "simulate").await;
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match state.ledger.simulate(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => rpc_error_response(&error),
    }
}

async fn submit(
    State(state): State<GatewayState>,
    headers: axum::http::HeaderMap,
    Json(envelope): Json<SignedEnvelope>,
) -> Response {
    record_call(&state.calls, "submit").await;
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match state.ledger.submit(&envelope).await {
        Ok(handle) => Json(SubmitResponseV1 {
            hash: handle.as_str().to_string(),
            status: SubmitStatus::Pending,
            error_result: None,
        })
        .into_response(),
        Err(RpcError::Rejected { status, detail }) => {
            let status = if status == SubmitStatus::TryAgainLater.as_str() {
                SubmitStatus::TryAgainLater
            } else {
                SubmitStatus::Error
            };
            Json(SubmitResponseV1 {
                hash: envelope.digest(),
                status,
                error_result: Some(detail),
            })
            .into_response()
        }
        Err(error) => rpc_error_response(&error),
    }
}

async fn transaction_status(
    State(state): State<GatewayState>,
    headers: axum::http::HeaderMap,
    Path(hash): Path<String>,
) -> Response {
    record_call(&state.calls, "transaction_status").await;
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match state.ledger.get_status(&SubmissionHandle::new(hash)).await {
        Ok(status) => Json(status).into_response(),
        Err(error) => rpc_error_response(&error),
    }
}

async fn account(
    State(state): State<GatewayState>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
) -> Response {
    record_call(&state.calls, "account").await;
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let id = match Address::account(&id) {
        Ok(id) => id,
        Err(error) => {
            return error_response(StatusCode::NOT_FOUND, "account_not_found", error.to_string());
        }
    };
    match state.ledger.load_account_state(&id).await {
        Ok(account) => Json(AccountResponseV1 {
            id,
            sequence: account.sequence,
        })
        .into_response(),
        Err(error) => rpc_error_response(&error),
    }
}
