//! In-process backend used for offline runs and tests

use super::{
    AuthCallback, AuthEvent, AuthService, AuthSubscription, Filter, FilterOp, RowQuery, RowService,
    Session,
};
use crate::error::{LinkSwipeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

/// Row service keeping tables as vectors of JSON objects
#[derive(Default)]
pub struct MemoryRowService {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    fail_writes: AtomicBool,
    selects: AtomicUsize,
    access_token: Mutex<Option<String>>,
}

impl MemoryRowService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert/update fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    /// Number of `select` calls served
    pub fn select_count(&self) -> usize {
        self.selects.load(AtomicOrdering::SeqCst)
    }

    /// Token most recently handed over by the session
    pub fn access_token(&self) -> Option<String> {
        self.access_token.lock().ok().and_then(|t| t.clone())
    }

    /// All rows of `table`
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        let tables = self.tables.read().await;
        tables.get(table).cloned().unwrap_or_default()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(AtomicOrdering::SeqCst) {
            return Err(LinkSwipeError::Backend("writes are disabled".to_string()));
        }
        Ok(())
    }
}

/// Compare a row field with a filter value
fn compare(field: &Value, expected: &str) -> Option<Ordering> {
    match field {
        Value::String(s) => Some(s.as_str().cmp(expected)),
        Value::Number(n) => {
            let expected: f64 = expected.parse().ok()?;
            n.as_f64()?.partial_cmp(&expected)
        }
        Value::Bool(b) => {
            let expected: bool = expected.parse().ok()?;
            Some(b.cmp(&expected))
        }
        Value::Null => (expected == "null").then_some(Ordering::Equal),
        _ => None,
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let field = row.get(&filter.column).unwrap_or(&Value::Null);
    let ordering = compare(field, &filter.value);

    match filter.op {
        FilterOp::Eq => ordering == Some(Ordering::Equal),
        FilterOp::Neq => ordering != Some(Ordering::Equal),
        FilterOp::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
    }
}

fn sort_key_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl RowService for MemoryRowService {
    async fn select(&self, query: &RowQuery) -> Result<Vec<Value>> {
        self.selects.fetch_add(1, AtomicOrdering::SeqCst);

        let tables = self.tables.read().await;
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = sort_key_cmp(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        debug!("Selected {} rows from {}", rows.len(), query.table);
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        self.check_writable()?;
        if !row.is_object() {
            return Err(LinkSwipeError::InvalidInput(format!(
                "row for {} must be an object",
                table
            )));
        }

        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, filters: &[Filter], changes: Value) -> Result<Vec<Value>> {
        self.check_writable()?;
        let changes = match changes {
            Value::Object(map) => map,
            _ => {
                return Err(LinkSwipeError::InvalidInput(
                    "changes must be an object".to_string(),
                ))
            }
        };

        let mut tables = self.tables.write().await;
        let mut updated = Vec::new();

        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut() {
                if !filters.iter().all(|f| matches(row, f)) {
                    continue;
                }
                if let Value::Object(fields) = row {
                    for (column, value) in &changes {
                        fields.insert(column.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
        }

        Ok(updated)
    }

    fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut current) = self.access_token.lock() {
            *current = token;
        }
    }
}

type Listeners = HashMap<u64, Arc<AuthCallback>>;

/// Auth service holding one session in memory
#[derive(Clone, Default)]
pub struct MemoryAuthService {
    session: Arc<Mutex<Option<Session>>>,
    listeners: Arc<Mutex<Listeners>>,
    next_listener: Arc<AtomicUsize>,
}

impl MemoryAuthService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service that starts out signed in
    pub fn signed_in(session: Session) -> Self {
        let service = Self::default();
        if let Ok(mut current) = service.session.lock() {
            *current = Some(session);
        }
        service
    }

    pub fn sign_in(&self, session: Session) {
        self.set_session(Some(session), AuthEvent::SignedIn);
    }

    pub fn sign_out(&self) {
        self.set_session(None, AuthEvent::SignedOut);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn set_session(&self, session: Option<Session>, event: AuthEvent) {
        if let Ok(mut current) = self.session.lock() {
            *current = session.clone();
        }

        // Call listeners outside the lock so they may query the service
        let listeners: Vec<Arc<AuthCallback>> = self
            .listeners
            .lock()
            .map(|l| l.values().cloned().collect())
            .unwrap_or_default();

        for listener in listeners {
            listener(event, session.clone());
        }
    }
}

#[async_trait]
impl AuthService for MemoryAuthService {
    async fn get_session(&self) -> Result<Option<Session>> {
        self.session
            .lock()
            .map(|s| s.clone())
            .map_err(|_| LinkSwipeError::Authentication("session lock poisoned".to_string()))
    }

    fn on_auth_state_change(&self, callback: AuthCallback) -> AuthSubscription {
        let id = self.next_listener.fetch_add(1, AtomicOrdering::SeqCst) as u64;
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(id, Arc::new(callback));
        }

        let listeners = self.listeners.clone();
        AuthSubscription::new(move || {
            if let Ok(mut listeners) = listeners.lock() {
                listeners.remove(&id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_select_filter_order_limit() {
        let rows = MemoryRowService::new();
        for (id, user, at) in [
            ("1", "u1", "2024-01-01T00:00:00Z"),
            ("2", "u1", "2024-01-03T00:00:00Z"),
            ("3", "u2", "2024-01-02T00:00:00Z"),
            ("4", "u1", "2024-01-02T00:00:00Z"),
        ] {
            rows.insert("links", json!({"id": id, "user_id": user, "created_at": at}))
                .await
                .unwrap();
        }

        let query = RowQuery::table("links")
            .eq("user_id", "u1")
            .order_by("created_at", true)
            .limit(2);
        let result = rows.select(&query).await.unwrap();

        let ids: Vec<&str> = result.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["2", "4"]);
    }

    #[tokio::test]
    async fn test_select_missing_table_is_empty() {
        let rows = MemoryRowService::new();
        let result = rows.select(&RowQuery::table("links")).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_gte_filter_on_timestamps() {
        let rows = MemoryRowService::new();
        rows.insert("t", json!({"at": "2024-01-01T00:00:00Z"})).await.unwrap();
        rows.insert("t", json!({"at": "2024-01-05T00:00:00Z"})).await.unwrap();

        let result = rows
            .select(&RowQuery::table("t").gte("at", "2024-01-03T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_failing_writes() {
        let rows = MemoryRowService::new();
        rows.insert("t", json!({"id": 1, "n": 1})).await.unwrap();

        let updated = rows
            .update("t", &[Filter::new("id", FilterOp::Eq, 1)], json!({"n": 2}))
            .await
            .unwrap();
        assert_eq!(updated, vec![json!({"id": 1, "n": 2})]);

        rows.set_fail_writes(true);
        assert!(rows.insert("t", json!({"id": 2})).await.is_err());
    }

    #[tokio::test]
    async fn test_auth_listeners() {
        let auth = MemoryAuthService::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let sub = auth.on_auth_state_change(Box::new(move |event, _| {
            sink.lock().unwrap().push(event);
        }));
        assert_eq!(auth.listener_count(), 1);

        auth.sign_in(Session {
            user_id: "u1".into(),
            access_token: "t".into(),
            expires_at: None,
        });
        assert_eq!(auth.get_session().await.unwrap().unwrap().user_id, "u1");

        drop(sub);
        assert_eq!(auth.listener_count(), 0);
        auth.sign_out();

        assert_eq!(*seen.lock().unwrap(), vec![AuthEvent::SignedIn]);
    }
}
