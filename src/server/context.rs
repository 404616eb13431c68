//! Request-scoped context carried in axum request extensions
//!
//! The transaction middleware inserts the [`Transaction`], authentication
//! inserts the [`VerifiedSubject`](super::auth::VerifiedSubject), and
//! identity loading inserts the [`Identity`]. Handlers reach them through
//! the extractors below.

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::Extensions;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use crate::identity::Identity;
use crate::storage::Transaction;
use crate::{Error, Result};

/// Response extension asking the coordinator to roll back a successful response
#[derive(Debug, Clone, Copy)]
pub struct AbortTransaction;

/// Resolve the executor bound to this request.
///
/// There is no fallback connection; without a bound transaction this fails
/// with [`Error::TransactionRequired`].
pub fn executor(extensions: &Extensions) -> Result<Transaction> {
    match extensions.get::<Transaction>() {
        Some(tx) => Ok(tx.clone()),
        None => {
            tracing::error!("No transaction bound to request context");
            Err(Error::TransactionRequired)
        }
    }
}

/// Extractor for the request's transaction
pub struct Executor(pub Transaction);

impl<S> FromRequestParts<S> for Executor
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        executor(&parts.extensions).map(Executor)
    }
}

/// Extractor for the caller's identity; rejects anonymous requests with 401
pub struct CurrentIdentity(pub Identity);

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentIdentity)
            .ok_or(Error::Unauthenticated)
    }
}

/// JSON request body; malformed bodies are rejected as [`Error::InvalidInput`]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

/// Numeric `{id}` path segment; anything else is [`Error::InvalidInput`]
pub struct PathId(pub i64);

impl<S> FromRequestParts<S> for PathId
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(id) = Path::<i64>::from_request_parts(parts, state).await?;
        Ok(PathId(id))
    }
}
