//! Local identities
//!
//! An [`Identity`] is the local record behind a verified external subject.
//! Identities are only ever read from the store; nothing here fabricates one.

use std::fmt;
use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::storage::Transaction;
use crate::{Error, Result};

/// Authorization role of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(Error::InvalidType(format!("unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller of a request, loaded from the `user` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub subject_id: String,
    pub email: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Input for registering a new identity
#[derive(Debug, Clone, Deserialize)]
pub struct NewIdentity {
    pub subject_id: String,
    pub email: String,
    pub role: Role,
}

const SELECT_IDENTITY: &str = "SELECT id, subject_id, email, role FROM user";

fn row_to_identity(row: &rusqlite::Row) -> rusqlite::Result<Identity> {
    let role: String = row.get(3)?;
    let role = role.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Identity {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        email: row.get(2)?,
        role,
    })
}

fn query_by_subject(conn: &Connection, subject_id: &str) -> Result<Option<Identity>> {
    conn.query_row(
        &format!("{} WHERE subject_id = ?1", SELECT_IDENTITY),
        [subject_id],
        row_to_identity,
    )
    .optional()
    .map_err(Into::into)
}

/// Look up the identity linked to a verified subject
pub async fn find_by_subject(tx: &Transaction, subject_id: &str) -> Result<Option<Identity>> {
    let subject_id = subject_id.to_string();
    tx.run(move |conn| query_by_subject(conn, &subject_id)).await
}

/// All identities, newest first
pub async fn list(tx: &Transaction) -> Result<Vec<Identity>> {
    tx.run(|conn| {
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY created_when DESC, id DESC",
            SELECT_IDENTITY
        ))?;
        let users = stmt
            .query_map([], row_to_identity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    })
    .await
}

/// Register an identity; subject and email must both be unused
pub async fn create(tx: &Transaction, input: NewIdentity) -> Result<Identity> {
    let email = input.email.trim().to_string();
    if email.is_empty() || input.subject_id.trim().is_empty() {
        return Err(Error::InvalidInput("subject and email are required".to_string()));
    }

    tx.run(move |conn| {
        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user WHERE subject_id = ?1 OR LOWER(email) = LOWER(?2)",
            params![input.subject_id, email],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(Error::DuplicateName(format!(
                "user with subject '{}' or email '{}' already exists",
                input.subject_id, email
            )));
        }

        conn.execute(
            "INSERT INTO user (subject_id, email, role) VALUES (?1, ?2, ?3)",
            params![input.subject_id, email, input.role.as_str()],
        )?;

        query_by_subject(conn, &input.subject_id)?
            .ok_or_else(|| Error::NotFound(format!("user {}", input.subject_id)))
    })
    .await
}
