use crate::external::provider::{
    FinancialDataProvider, ProviderAccount, ProviderBill, ProviderError, ProviderTransaction,
};
use crate::services::rate_limiter::{RateLimitGuard, RateLimiter};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Pluggy API keys are valid for two hours; refresh a little earlier.
const API_KEY_TTL: Duration = Duration::from_secs(110 * 60);
const TRANSACTIONS_PAGE_SIZE: u32 = 500;

pub struct PluggyClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    api_key: Mutex<Option<(String, Instant)>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl PluggyClient {
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_key: Mutex::new(None),
            rate_limiter: None,
        }
    }

    /// Every request, authentication included, waits for a slot on `limiter`.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    async fn throttle(&self) -> Result<Option<RateLimitGuard>, ProviderError> {
        match &self.rate_limiter {
            Some(limiter) => limiter
                .acquire()
                .await
                .map(Some)
                .map_err(|_| ProviderError::RateLimited),
            None => Ok(None),
        }
    }

    async fn api_key(&self) -> Result<String, ProviderError> {
        let cached = self.api_key.lock().clone();
        if let Some((key, issued_at)) = cached {
            if issued_at.elapsed() < API_KEY_TTL {
                return Ok(key);
            }
        }

        let _slot = self.throttle().await?;
        let resp = self
            .client
            .post(format!("{}/auth", self.base_url))
            .json(&AuthRequest {
                client_id: &self.client_id,
                client_secret: &self.client_secret,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // A rejected client secret is a deployment problem, not a user credential problem.
        if !resp.status().is_success() {
            return Err(ProviderError::BadResponse(format!(
                "authentication failed with status {}",
                resp.status()
            )));
        }

        let body: AuthResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        *self.api_key.lock() = Some((body.api_key.clone(), Instant::now()));
        Ok(body.api_key)
    }

    async fn send_get(&self, path: &str, query: &[(&str, String)], api_key: &str) -> Result<Response, ProviderError> {
        debug!("GET {}{} {:?}", self.base_url, path, query);

        let _slot = self.throttle().await?;
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("X-API-KEY", api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }

    /// Drops the cached key unless another request already replaced it.
    fn forget_api_key(&self, rejected: &str) {
        let mut cached = self.api_key.lock();
        if cached.as_ref().map(|(key, _)| key.as_str()) == Some(rejected) {
            *cached = None;
        }
    }

    /// A 401/403 is first blamed on the API key: the request is retried once
    /// with a fresh key. Only a rejection of the fresh key is `Unauthorized`.
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ProviderError> {
        let api_key = self.api_key().await?;
        let mut resp = self.send_get(path, query, &api_key).await?;

        if is_rejection(resp.status()) {
            warn!("API key rejected on {}, re-authenticating", path);
            self.forget_api_key(&api_key);
            let fresh = self.api_key().await?;
            resp = self.send_get(path, query, &fresh).await?;
            if is_rejection(resp.status()) {
                return Err(ProviderError::Unauthorized);
            }
        }

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(ProviderError::RateLimited),
            status if !status.is_success() => {
                let text = resp.text().await.unwrap_or_default();
                return Err(ProviderError::BadResponse(format!("{}: {}", status, text)));
            }
            _ => {}
        }

        resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))
    }

    /// The stored credential is an item id; a missing or errored item means the
    /// user's connection is no longer usable.
    async fn ensure_item_usable(&self, item_id: &str) -> Result<(), ProviderError> {
        let item: ItemResponse = match self.get(&format!("/items/{}", item_id), &[]).await {
            Err(ProviderError::BadResponse(msg)) if msg.starts_with("404") => {
                return Err(ProviderError::Unauthorized)
            }
            other => other?,
        };

        if item.status == "LOGIN_ERROR" {
            return Err(ProviderError::Unauthorized);
        }
        Ok(())
    }
}

fn is_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    api_key: String,
}

#[derive(Deserialize)]
struct ItemResponse {
    status: String,
}

#[derive(Deserialize)]
struct ResultsPage<T> {
    results: Vec<T>,
    #[serde(rename = "totalPages", default = "one")]
    total_pages: u32,
}

fn one() -> u32 {
    1
}

#[async_trait]
impl FinancialDataProvider for PluggyClient {
    async fn fetch_accounts(&self, credential: &str) -> Result<Vec<ProviderAccount>, ProviderError> {
        self.ensure_item_usable(credential).await?;

        let page: ResultsPage<ProviderAccount> = self
            .get("/accounts", &[("itemId", credential.to_string())])
            .await?;
        Ok(page.results)
    }

    async fn fetch_transactions(
        &self,
        _credential: &str,
        provider_account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        let mut all = Vec::new();
        let mut page_number = 1;

        loop {
            let page: ResultsPage<ProviderTransaction> = self
                .get(
                    "/transactions",
                    &[
                        ("accountId", provider_account_id.to_string()),
                        ("from", since.format("%Y-%m-%d").to_string()),
                        ("pageSize", TRANSACTIONS_PAGE_SIZE.to_string()),
                        ("page", page_number.to_string()),
                    ],
                )
                .await?;

            all.extend(page.results);
            if page_number >= page.total_pages {
                break;
            }
            page_number += 1;
        }

        Ok(all)
    }

    async fn fetch_bills(
        &self,
        _credential: &str,
        provider_account_id: &str,
    ) -> Result<Vec<ProviderBill>, ProviderError> {
        let page: ResultsPage<ProviderBill> = self
            .get("/bills", &[("accountId", provider_account_id.to_string())])
            .await?;
        Ok(page.results)
    }
}
