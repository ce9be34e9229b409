//! Hosted backend collaborators
//!
//! The backend is opaque: a row service with filtered/ordered/limited reads
//! and single-row writes, and an auth service that owns the session.

pub mod memory;
pub mod rest;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use memory::{MemoryAuthService, MemoryRowService};
pub use rest::RestRowService;

/// Comparison applied by a row filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Neq,
    Gte,
    Lte,
}

impl FilterOp {
    /// Operator name in PostgREST query syntax
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
        }
    }
}

/// `column <op> value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl fmt::Display) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.to_string(),
        }
    }
}

/// Sort order of a read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// A read against one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowQuery {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl RowQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn filter(
        mut self,
        column: impl Into<String>,
        op: FilterOp,
        value: impl fmt::Display,
    ) -> Self {
        self.filters.push(Filter::new(column, op, value));
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl fmt::Display) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn gte(self, column: impl Into<String>, value: impl fmt::Display) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Row data service
#[async_trait]
pub trait RowService: Send + Sync {
    /// Rows matching `query`
    async fn select(&self, query: &RowQuery) -> Result<Vec<Value>>;

    /// Insert one row; returns the stored row
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// Apply `changes` to every row matching `filters`; returns the updated rows
    async fn update(&self, table: &str, filters: &[Filter], changes: Value) -> Result<Vec<Value>>;

    /// Authorize later calls as the signed-in user; `None` falls back to the anonymous key
    fn set_access_token(&self, _token: Option<String>) {}
}

/// Signed-in session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Auth state transitions reported by the auth service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Listener registered with `on_auth_state_change`
pub type AuthCallback = Box<dyn Fn(AuthEvent, Option<Session>) + Send + Sync>;

/// Unsubscribe handle; dropping it unsubscribes
pub struct AuthSubscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl AuthSubscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

/// Authentication/session service
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Current session, if signed in
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Register a listener for auth state changes
    fn on_auth_state_change(&self, callback: AuthCallback) -> AuthSubscription;
}
