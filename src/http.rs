use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Semaphore;
use url::Url;

use crate::auth::Auth;
use crate::error::{HarnessError, Result};
use crate::retry::{retry, RetryOptions, Retryable};

const MAX_CONCURRENT_REQUESTS: usize = 50;
const REQUEST_TIMEOUT_SECONDS: u64 = 60;
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// REST client shared by every provider binding.
///
/// Requests are authenticated, bounded by a semaphore and wrapped in the
/// retry engine: connection failures, rate limits and server errors are
/// retried with backoff, a 404 becomes [`HarnessError::NotFound`] right away
/// and any other client error becomes [`HarnessError::Api`] without retrying.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    auth: Auth,
    retry: RetryOptions,
    semaphore: Arc<Semaphore>,
}

impl ApiClient {
    pub fn new(base_url: &str, auth: Auth) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("promoctl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| HarnessError::Config(format!("Failed to create HTTP client: {e}")))?;

        // Url::join drops the last path segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| HarnessError::Config(format!("Invalid base URL '{base_url}': {e}")))?;

        Ok(Self {
            client,
            base_url,
            auth,
            retry: RetryOptions::new(5, Duration::from_secs(2), Duration::from_secs(30)).randomized(),
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Resolves `path` (no leading slash) against the base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| HarnessError::Config(format!("Invalid request path '{path}': {e}")))
    }

    /// Sends a request built by `customize`, retrying transient failures.
    ///
    /// `customize` runs once per attempt, so it must be cheap and repeatable.
    pub async fn execute<F>(&self, method: Method, path: &str, customize: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path)?;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| HarnessError::Unsupported(format!("request limiter closed: {e}")))?;

        let label = format!("{method} {}", url.path());
        retry(&label, &self.retry, |_| {
            let request = customize(
                self.auth
                    .apply(self.client.request(method.clone(), url.clone())),
            );
            let url = url.clone();
            async move { classify(&url, request.send().await).await }
        })
        .await
    }

    pub async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.execute(Method::GET, path, |r| r.query(query)).await?;
        Ok(response.json().await?)
    }

    pub async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let response = self.execute(Method::GET, path, |r| r.query(query)).await?;
        Ok(response.text().await?)
    }

    /// GET with an explicit `Accept` header (raw file contents, plain logs).
    pub async fn get_text_as(&self, path: &str, accept: &str) -> Result<String> {
        let response = self
            .execute(Method::GET, path, |r| {
                r.header(reqwest::header::ACCEPT, accept)
            })
            .await?;
        Ok(response.text().await?)
    }

    pub async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.execute(method, path, |r| r.json(body)).await?;
        Ok(response.json().await?)
    }

    /// Sends a request and discards the response body.
    pub async fn send_unit(&self, method: Method, path: &str) -> Result<()> {
        self.execute(method, path, |r| r).await?;
        Ok(())
    }
}

async fn classify(url: &Url, sent: reqwest::Result<Response>) -> Retryable<Response> {
    let response = match sent {
        Ok(response) => response,
        Err(e) => return Retryable::from_result(Err(e.into())),
    };

    let status = response.status();
    if status.is_success() {
        return Retryable::Success(response);
    }

    if status == StatusCode::NOT_FOUND {
        return Retryable::Stop(HarnessError::NotFound(url.path().to_string()));
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());

    Retryable::from_result(Err(api_error(status, &body)))
}

/// Builds an [`HarnessError::Api`] from an error response body, pulling out
/// the message and error code when the body is JSON.
pub fn api_error(status: StatusCode, body: &str) -> HarnessError {
    let json: Option<serde_json::Value> = serde_json::from_str(body).ok();

    let field = |names: &[&str]| -> Option<String> {
        let json = json.as_ref()?;
        names.iter().find_map(|name| match json.get(*name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };

    let message = field(&["message", "error_description", "error"]).unwrap_or_else(|| {
        let mut text = body.trim().to_string();
        if text.len() > MAX_ERROR_MESSAGE_LEN {
            let cut = (0..=MAX_ERROR_MESSAGE_LEN)
                .rev()
                .find(|i| text.is_char_boundary(*i))
                .unwrap_or(0);
            text.truncate(cut);
        }
        text
    });

    HarnessError::Api {
        status: status.as_u16(),
        message,
        code: field(&["code", "errorCode", "typeKey", "error_code"]),
    }
}
