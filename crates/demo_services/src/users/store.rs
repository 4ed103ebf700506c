//! Access to the `users` table.

use async_trait::async_trait;
use op_telemetry::ErrorKind;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub type UserId = i64;

/// A stored user. The password is kept but never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserUpdate {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The unique index on `email` rejected the write
    #[error("Email {email} is already registered")]
    DuplicateEmail { email: String },
    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

impl ErrorKind for StoreError {
    fn error_kind(&self) -> Cow<'static, str> {
        Cow::Borrowed(match self {
            Self::DuplicateEmail { .. } => "unique_violation",
            Self::Unavailable(_) => "unavailable",
        })
    }
}

/// Relational-store operations the user service needs.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list(&self) -> Result<Vec<User>, StoreError>;

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    /// Returns the updated row, or `None` when `id` does not exist.
    async fn update(&self, id: UserId, update: UserUpdate) -> Result<Option<User>, StoreError>;

    /// Returns whether a row was deleted.
    async fn delete(&self, id: UserId) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<UserId, User>,
    next_id: UserId,
}

impl Table {
    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.rows
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }
}

/// `users` table held in memory, with auto-increment ids and a unique email.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStore {
    table: Arc<Mutex<Table>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R>(&self, f: impl FnOnce(&mut Table) -> R) -> R {
        f(&mut self.table.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn list(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.with_table(|t| t.rows.values().cloned().collect()))
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.with_table(|t| t.rows.get(&id).cloned()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.with_table(|t| t.rows.values().find(|u| u.email == email).cloned()))
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        self.with_table(|t| {
            if t.email_taken(&user.email, None) {
                return Err(StoreError::DuplicateEmail { email: user.email });
            }
            t.next_id += 1;
            let row = User {
                id: t.next_id,
                name: user.name,
                email: user.email,
                password: user.password,
            };
            t.rows.insert(row.id, row.clone());
            Ok(row)
        })
    }

    async fn update(&self, id: UserId, update: UserUpdate) -> Result<Option<User>, StoreError> {
        self.with_table(|t| {
            if !t.rows.contains_key(&id) {
                return Ok(None);
            }
            if t.email_taken(&update.email, Some(id)) {
                return Err(StoreError::DuplicateEmail {
                    email: update.email,
                });
            }
            Ok(t.rows.get_mut(&id).map(|row| {
                row.name = update.name;
                row.email = update.email;
                row.clone()
            }))
        })
    }

    async fn delete(&self, id: UserId) -> Result<bool, StoreError> {
        Ok(self.with_table(|t| t.rows.remove(&id).is_some()))
    }
}
