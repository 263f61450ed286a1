//! # Remote Token Validator
//!
//! `GET {endpoint}?account_id=..&authtoken=..` with a bearer service
//! credential. Anything but a 200 carrying `{valid, cause}` JSON is an
//! upstream error; the caller must not read it as "invalid".

use std::time::Duration;

use async_trait::async_trait;
use domains::{DomainError, Result, TokenValidator, TokenVerdict};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str = "PlayerAdvertisements/1.0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub struct ValidatorConfig {
    pub endpoint: String,
    /// Service credential sent as `Authorization: Bearer ..`; omitted when unset.
    pub credential: Option<SecretString>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl ValidatorConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

pub struct HttpTokenValidator {
    client: Client,
    endpoint: String,
    credential: Option<SecretString>,
}

impl HttpTokenValidator {
    pub fn new(config: ValidatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(DomainError::upstream)?;
        if config.credential.is_none() {
            warn!("token validator has no service credential; requests go out unauthenticated");
        }
        Ok(Self {
            client,
            endpoint: config.endpoint,
            credential: config.credential,
        })
    }
}

#[async_trait]
impl TokenValidator for HttpTokenValidator {
    async fn validate(&self, account_id: i64, token: &str) -> Result<TokenVerdict> {
        let account = account_id.to_string();
        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("account_id", account.as_str()), ("authtoken", token)]);
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential.expose_secret());
        }

        debug!(account_id, token_len = token.len(), "calling token validator");
        let response = request.send().await.map_err(DomainError::upstream)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(account_id, %status, "token validator refused request");
            return Err(DomainError::Upstream(format!("validator returned {status}: {body}")));
        }

        let verdict: TokenVerdict = response
            .json()
            .await
            .map_err(|e| DomainError::Upstream(format!("malformed validator response: {e}")))?;
        debug!(account_id, valid = verdict.valid, "validator answered");
        Ok(verdict)
    }
}
