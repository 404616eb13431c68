//! Bearer credentials and identity resolution.
//!
//! Resolution runs in two steps. [`authenticate`] verifies the bearer
//! credential into a [`VerifiedSubject`] before any transaction exists.
//! [`load_identity`] runs inside the transaction and loads the local
//! [`Identity`] for that subject through the bound executor.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

use super::AppState;
use super::context::executor;
use crate::config::TokenEntry;
use crate::identity::{self, Identity};
use crate::{Error, Result};

/// Subject asserted by a verified credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSubject {
    pub subject_id: String,
    pub email: String,
}

/// Verifies a raw bearer credential
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedSubject>;
}

/// Verifier backed by SHA-256 digests of known tokens
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    by_digest: HashMap<String, VerifiedSubject>,
}

impl StaticTokenVerifier {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let by_digest = entries
            .iter()
            .map(|e| {
                (
                    e.token_sha256.to_ascii_lowercase(),
                    VerifiedSubject {
                        subject_id: e.subject_id.clone(),
                        email: e.email.clone(),
                    },
                )
            })
            .collect();
        Self { by_digest }
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedSubject> {
        self.by_digest
            .get(&hash_token(token))
            .cloned()
            .ok_or(Error::Unauthenticated)
    }
}

/// Hex-encoded SHA-256 of a token, as stored in configuration
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Extract the credential from an `Authorization: Bearer <token>` value.
/// The scheme is case-insensitive.
pub fn extract_bearer(value: &str) -> Option<&str> {
    let (scheme, rest) = value.split_at_checked(7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

/// Turn an optional `Authorization` header into a verified subject.
///
/// A missing, malformed or rejected credential yields `Ok(None)` unless
/// `required` is set, in which case it is [`Error::Unauthenticated`].
pub async fn resolve_credential(
    verifier: &dyn CredentialVerifier,
    header: Option<&str>,
    required: bool,
) -> Result<Option<VerifiedSubject>> {
    let Some(token) = header.and_then(extract_bearer) else {
        if required {
            return Err(Error::Unauthenticated);
        }
        return Ok(None);
    };

    match verifier.verify(token).await {
        Ok(subject) => Ok(Some(subject)),
        Err(err) => {
            tracing::debug!("Credential rejected: {}", err);
            if required {
                Err(Error::Unauthenticated)
            } else {
                Ok(None)
            }
        }
    }
}

/// Verify the bearer credential and record the subject on the request
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let subject = resolve_credential(state.verifier.as_ref(), header, state.auth_required).await?;
    if let Some(subject) = subject {
        tracing::debug!(subject = %subject.subject_id, "Authenticated request");
        req.extensions_mut().insert(subject);
    }

    Ok(next.run(req).await)
}

/// Load the local identity for the verified subject.
///
/// Requires the transaction middleware to run first. A subject with no
/// local record continues anonymously. A failed lookup fails the request,
/// so the coordinator rolls back.
pub async fn load_identity(mut req: Request, next: Next) -> Result<Response> {
    let Some(subject) = req.extensions().get::<VerifiedSubject>().cloned() else {
        return Ok(next.run(req).await);
    };

    let tx = executor(req.extensions())?;
    match identity::find_by_subject(&tx, &subject.subject_id).await {
        Ok(Some(found)) => {
            req.extensions_mut().insert(found);
        }
        Ok(None) => {
            tracing::debug!(subject = %subject.subject_id, "No local identity for subject");
        }
        Err(err) => {
            tracing::warn!(subject = %subject.subject_id, "Identity lookup failed: {}", err);
            return Err(err);
        }
    }

    Ok(next.run(req).await)
}

/// Route guard: 401 without an identity, 403 for non-admins
pub async fn require_admin(req: Request, next: Next) -> Result<Response> {
    match req.extensions().get::<Identity>() {
        None => Err(Error::Unauthenticated),
        Some(identity) if !identity.is_admin() => {
            Err(Error::Forbidden("admin role required".to_string()))
        }
        Some(_) => Ok(next.run(req).await),
    }
}
