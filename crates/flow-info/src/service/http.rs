//! HTTP client for the Globus Flows service.
//!
//! Authenticates as a confidential client through the OAuth2
//! client-credentials grant. The access token is requested once, on the
//! first call, and reused for the lifetime of the client.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::errors::ServiceError;
use crate::traits::{FlowQuery, FlowsService, RunPage, RunQuery};
use crate::types::{FlowDefinition, RunLog, RunSummary};

const FLOWS_SCOPE_PREFIX: &str =
    "https://auth.globus.org/scopes/eec9b274-0c81-4334-bdc2-54e90e689b9a";

/// Endpoints and scopes used by [`HttpFlowsService`].
#[derive(Debug, Clone)]
pub struct HttpServiceConfig {
    /// Default: `https://flows.globus.org`.
    pub flows_url: String,
    /// Default: `https://auth.globus.org/v2/oauth2/token`.
    pub token_url: String,
    pub scopes: Vec<String>,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            flows_url: "https://flows.globus.org".into(),
            token_url: "https://auth.globus.org/v2/oauth2/token".into(),
            scopes: vec![
                format!("{FLOWS_SCOPE_PREFIX}/view_flows"),
                format!("{FLOWS_SCOPE_PREFIX}/run_status"),
            ],
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct FlowsPage {
    #[serde(default)]
    flows: Vec<FlowDefinition>,
    #[serde(default)]
    has_next_page: bool,
    #[serde(default)]
    marker: Option<String>,
}

#[derive(Deserialize)]
struct RunsPage {
    #[serde(default)]
    runs: Vec<RunSummary>,
    #[serde(default)]
    has_next_page: bool,
    #[serde(default)]
    marker: Option<String>,
}

/// [`FlowsService`] backed by the Globus Flows REST API.
pub struct HttpFlowsService {
    client: Client,
    config: HttpServiceConfig,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<String>>,
}

impl std::fmt::Debug for HttpFlowsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFlowsService")
            .field("flows_url", &self.config.flows_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl HttpFlowsService {
    /// Create a client. Empty credentials are rejected immediately.
    pub fn new(
        config: HttpServiceConfig,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if client_id.trim().is_empty() {
            return Err(ServiceError::Credentials {
                message: "client id is empty".into(),
            });
        }
        if client_secret.trim().is_empty() {
            return Err(ServiceError::Credentials {
                message: "client secret is empty".into(),
            });
        }
        Ok(Self {
            client: Client::new(),
            config: HttpServiceConfig {
                flows_url: config.flows_url.trim_end_matches('/').to_string(),
                ..config
            },
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    /// Create a client for `profile`, reading the secret from
    /// `{PROFILE}_CLIENT_SECRET`.
    pub fn from_env(profile: &str, client_id: impl Into<String>) -> Result<Self, ServiceError> {
        let key = secret_env_key(profile);
        let secret = match std::env::var(&key) {
            Ok(val) => val,
            Err(std::env::VarError::NotPresent) => {
                return Err(ServiceError::Credentials {
                    message: format!("please set {key} to fetch data for {profile}"),
                })
            }
            Err(e) => {
                return Err(ServiceError::Credentials {
                    message: format!("failed to read env var {key}: {e}"),
                })
            }
        };
        Self::new(HttpServiceConfig::default(), client_id, secret)
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let mut token = self.token.lock().await;
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }
        tracing::debug!(client_id = %self.client_id, "requesting access token");
        let scope = self.config.scopes.join(" ");
        let response = self
            .client
            .post(&self.config.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", scope.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Unauthorized {
                message: format!("token request rejected ({status}): {body}"),
            });
        }
        let body: TokenResponse = decode(response).await?;
        *token = Some(body.access_token.clone());
        Ok(body.access_token)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        let token = self.access_token().await?;
        let url = format!("{}{path}", self.config.flows_url);
        let request: RequestBuilder = self.client.get(&url).bearer_auth(token).query(query);
        let response = request.send().await.map_err(transport_error)?;
        decode(response).await
    }
}

#[async_trait]
impl FlowsService for HttpFlowsService {
    async fn list_flows(&self, query: &FlowQuery) -> Result<Vec<FlowDefinition>, ServiceError> {
        let mut flows = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut params = vec![("orderby", query.order.as_query().to_string())];
            if let Some(limit) = query.limit {
                params.push(("per_page", limit.to_string()));
            }
            if let Some(m) = marker.take() {
                params.push(("marker", m));
            }
            let page: FlowsPage = self.get_json("/flows", &params).await?;
            flows.extend(page.flows);
            if let Some(limit) = query.limit {
                if flows.len() >= limit {
                    flows.truncate(limit);
                    break;
                }
            }
            match (page.has_next_page, page.marker) {
                (true, Some(m)) => marker = Some(m),
                _ => break,
            }
        }
        tracing::debug!(count = flows.len(), "listed flows");
        Ok(flows)
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<RunPage, ServiceError> {
        let mut params = vec![("orderby", query.order.as_query().to_string())];
        if let Some(limit) = query.limit {
            params.push(("per_page", limit.to_string()));
        }
        if let Some(marker) = &query.marker {
            params.push(("marker", marker.clone()));
        }
        let page: RunsPage = self.get_json("/runs", &params).await?;
        Ok(RunPage {
            runs: page.runs,
            marker: page.marker,
            has_next_page: page.has_next_page,
        })
    }

    async fn get_run_log(&self, run_id: &str, limit: usize) -> Result<RunLog, ServiceError> {
        let path = format!("/runs/{run_id}/log");
        self.get_json(&path, &[("limit", limit.to_string())])
            .await
            .map_err(|e| match e {
                ServiceError::NotFound { .. } => ServiceError::NotFound {
                    id: run_id.to_string(),
                },
                other => other,
            })
    }
}

/// Environment variable holding the client secret of `profile`.
pub fn secret_env_key(profile: &str) -> String {
    format!("{}_CLIENT_SECRET", profile.to_uppercase())
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    ServiceError::Transient {
        message: format!("request failed: {e}"),
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ServiceError> {
    let status = response.status();
    let url = response.url().to_string();
    if status.is_success() {
        return response.json::<T>().await.map_err(|e| ServiceError::Decode {
            message: format!("{url}: {e}"),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &url, body))
}

fn classify_status(status: StatusCode, url: &str, body: String) -> ServiceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Unauthorized {
            message: format!("{url} returned {status}: {body}"),
        },
        StatusCode::NOT_FOUND => ServiceError::NotFound { id: url.to_string() },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => ServiceError::Transient {
            message: format!("{url} returned {status}"),
        },
        s if s.is_server_error() => ServiceError::Transient {
            message: format!("{url} returned {status}: {body}"),
        },
        s => ServiceError::Rejected {
            status: s.as_u16(),
            message: body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_credentials_rejected() {
        let err = HttpFlowsService::new(HttpServiceConfig::default(), "id", " ").unwrap_err();
        assert!(matches!(err, ServiceError::Credentials { .. }));
        assert!(err.is_fatal());
        let err = HttpFlowsService::new(HttpServiceConfig::default(), "", "secret").unwrap_err();
        assert!(matches!(err, ServiceError::Credentials { .. }));
    }

    #[test]
    fn test_from_env_requires_secret() {
        let err =
            HttpFlowsService::from_env("flowinfo_definitely_unset_profile", "id").unwrap_err();
        match err {
            ServiceError::Credentials { message } => {
                assert!(message.contains("FLOWINFO_DEFINITELY_UNSET_PROFILE_CLIENT_SECRET"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_env_reads_secret() {
        // Use a unique name to avoid cross-test interference.
        unsafe { std::env::set_var("FLOWINFO_TEST_XYZ_CLIENT_SECRET", "s3cret") };
        let service = HttpFlowsService::from_env("flowinfo_test_xyz", "client").unwrap();
        assert_eq!(service.client_secret, "s3cret");
        unsafe { std::env::remove_var("FLOWINFO_TEST_XYZ_CLIENT_SECRET") };
    }

    #[test]
    fn test_status_classification() {
        let url = "https://flows.globus.org/runs";
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, url, String::new()),
            ServiceError::Unauthorized { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, url, String::new()),
            ServiceError::Transient { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, url, String::new()),
            ServiceError::Transient { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, url, "bad".into()),
            ServiceError::Rejected { status: 422, .. }
        ));
    }

    #[test]
    fn test_flows_url_trailing_slash_trimmed() {
        let config = HttpServiceConfig {
            flows_url: "https://flows.example.org/".into(),
            ..HttpServiceConfig::default()
        };
        let service = HttpFlowsService::new(config, "id", "secret").unwrap();
        assert_eq!(service.config.flows_url, "https://flows.example.org");
    }
}
