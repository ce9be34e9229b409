//! PostgREST-style HTTP row service
//!
//! Handles the API key header, bearer tokens and status-to-error mapping.

use super::{Filter, RowQuery, RowService};
use crate::error::{LinkSwipeError, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    Client, RequestBuilder, Response, StatusCode,
};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

const REST_PATH: &str = "rest/v1";

/// Row service talking to a hosted PostgREST endpoint
pub struct RestRowService {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
}

impl RestRowService {
    /// Create a client for `base_url` authenticated with the project `api_key`
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key).map_err(|e| LinkSwipeError::ConfigError(e.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(LinkSwipeError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: RwLock::new(None),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.base_url, REST_PATH, table)
    }

    fn bearer(&self) -> String {
        let token = self
            .access_token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| self.api_key.clone());
        format!("Bearer {}", token)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, self.bearer())
    }

    async fn check_response(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(LinkSwipeError::Authentication(body))
            }
            _ => Err(LinkSwipeError::Backend(format!("{}: {}", status, body))),
        }
    }
}

/// PostgREST query parameters for filters
fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("{}.{}", f.op.as_str(), f.value)))
        .collect()
}

/// PostgREST query parameters for a full read
fn query_params(query: &RowQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(filter_params(&query.filters));

    if let Some(order) = &query.order {
        let direction = if order.descending { "desc" } else { "asc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

#[async_trait]
impl RowService for RestRowService {
    async fn select(&self, query: &RowQuery) -> Result<Vec<Value>> {
        debug!("GET {} ({} filters)", query.table, query.filters.len());

        let request = self
            .client
            .get(self.table_url(&query.table))
            .query(&query_params(query));
        let response = self.authorized(request).send().await?;
        let response = self.check_response(response).await?;

        Ok(response.json().await?)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        debug!("POST {}", table);

        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.authorized(request).send().await?;
        let response = self.check_response(response).await?;

        let mut rows: Vec<Value> = response.json().await?;
        if rows.is_empty() {
            return Err(LinkSwipeError::Backend(format!(
                "insert into {} returned no row",
                table
            )));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(&self, table: &str, filters: &[Filter], changes: Value) -> Result<Vec<Value>> {
        debug!("PATCH {} ({} filters)", table, filters.len());

        let request = self
            .client
            .patch(self.table_url(table))
            .query(&filter_params(filters))
            .header("Prefer", "return=representation")
            .json(&changes);
        let response = self.authorized(request).send().await?;
        let response = self.check_response(response).await?;

        Ok(response.json().await?)
    }

    fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut current) = self.access_token.write() {
            *current = token;
        }
    }
}
