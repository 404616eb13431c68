//! One transaction per request
//!
//! The middleware begins a transaction, binds it into the request
//! extensions and finishes it from the response: commit on success,
//! rollback on error status, abort marker, or panic.

use std::panic::AssertUnwindSafe;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;

use super::AppState;
use super::context::AbortTransaction;
use crate::Error;

pub async fn transaction(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let tx = match state.store.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            tracing::error!("Failed to begin transaction: {}", err);
            return err.into_response();
        }
    };
    req.extensions_mut().insert(tx.clone());

    let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            tracing::error!(tx = tx.id(), "Handler panicked, rolling back");
            if let Err(err) = tx.rollback().await {
                tracing::error!(tx = tx.id(), "Failed to rollback transaction: {}", err);
            }
            std::panic::resume_unwind(panic);
        }
    };

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        tracing::debug!(tx = tx.id(), %status, "Rolling back on error response");
        if let Err(err) = tx.rollback().await {
            tracing::error!(tx = tx.id(), "Failed to rollback transaction: {}", err);
        }
        return response;
    }

    if response.extensions().get::<AbortTransaction>().is_some() {
        tracing::debug!(tx = tx.id(), "Rolling back on abort marker");
        if let Err(err) = tx.rollback().await {
            tracing::error!(tx = tx.id(), "Failed to rollback transaction: {}", err);
        }
        return response;
    }

    match tx.commit().await {
        Ok(()) => response,
        Err(err) => Error::CommitFailed(err.to_string()).into_response(),
    }
}
