//! Health of configured HTTP APIs.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hostaudit_core::{ApiCheck, Probe, ProbeError, ProbeResult, Recommendation, ResultBuilder};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use tracing::{info, warn};

use crate::narration::{finish, Narration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    Healthy,
    UnexpectedResponse,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiHealth {
    pub status: ApiStatus,
    pub message: String,
}

impl ApiHealth {
    fn unhealthy(message: String) -> Self {
        Self {
            status: ApiStatus::Unhealthy,
            message,
        }
    }
}

/// Base URL with the port replaced and the endpoint appended to its path.
pub fn build_url(check: &ApiCheck) -> Result<Url, String> {
    let mut url = Url::parse(&check.url).map_err(|e| format!("invalid URL {}: {}", check.url, e))?;
    if check.port.is_some() {
        url.set_port(check.port)
            .map_err(|_| format!("URL {} cannot carry a port", check.url))?;
    }
    let (endpoint, query) = match check.endpoint.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (check.endpoint.as_str(), None),
    };
    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );
    url.set_path(&path);
    url.set_query(query);
    Ok(url)
}

/// Classify one response. The body is compared after trimming.
pub fn assess_response(name: &str, status: StatusCode, body: &str, expected: Option<&str>) -> ApiHealth {
    let body = body.trim();
    if !status.is_success() {
        return ApiHealth::unhealthy(format!("{} API responded with HTTP error: {}", name, status));
    }
    match expected {
        Some(want) if want != body => ApiHealth {
            status: ApiStatus::UnexpectedResponse,
            message: format!("{} API responded, but not with expected result: {}", name, body),
        },
        _ => ApiHealth {
            status: ApiStatus::Healthy,
            message: format!("{} API is running and responded as expected", name),
        },
    }
}

pub fn remediation(apis: &BTreeMap<String, ApiHealth>) -> Vec<Recommendation> {
    apis.iter()
        .filter(|(_, health)| health.status != ApiStatus::Healthy)
        .map(|(name, health)| {
            let mut task = Recommendation::new(
                "check_or_fix_api",
                format!("Check or fix {} API", name),
                health.message.clone(),
            );
            task.tags = vec!["api".to_string(), name.clone()];
            task
        })
        .collect()
}

pub struct ServiceApiProbe {
    apis: Vec<ApiCheck>,
    timeout: Duration,
}

impl ServiceApiProbe {
    pub fn new(apis: Vec<ApiCheck>, timeout: Duration) -> Self {
        Self { apis, timeout }
    }

    async fn check(&self, client: &reqwest::Client, api: &ApiCheck) -> ApiHealth {
        let url = match build_url(api) {
            Ok(url) => url,
            Err(e) => return ApiHealth::unhealthy(format!("{} API check failed: {}", api.name, e)),
        };
        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(probe = "service_api", api = %api.name, "API request timed out");
                return ApiHealth::unhealthy(format!("{} API request timed out", api.name));
            }
            Err(e) => {
                warn!(probe = "service_api", api = %api.name, reason = %e, "API check failed");
                return ApiHealth::unhealthy(format!("{} API check failed: {}", api.name, e));
            }
        };
        let status = response.status();
        match response.text().await {
            Ok(body) => assess_response(&api.name, status, &body, api.expected_result.as_deref()),
            Err(e) => ApiHealth::unhealthy(format!("{} API check failed: {}", api.name, e)),
        }
    }
}

#[async_trait]
impl Probe for ServiceApiProbe {
    fn name(&self) -> &str {
        "service_api"
    }

    fn description(&self) -> &str {
        "Health of configured HTTP APIs"
    }

    async fn invoke(&self, id_offset: u64, log_path: &Path) -> Result<ProbeResult, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent("hostaudit")
            .build()
            .map_err(|e| ProbeError::Other(e.to_string()))?;

        let mut apis = BTreeMap::new();
        for api in &self.apis {
            let health = self.check(&client, api).await;
            apis.insert(api.name.clone(), health);
        }
        let healthy = apis.values().filter(|h| h.status == ApiStatus::Healthy).count();
        info!(probe = "service_api", checked = apis.len(), healthy, "API check done");

        let actions = remediation(&apis);
        Ok(finish(
            ResultBuilder::new(self.name(), id_offset, log_path),
            serde_json::json!({ "api_info": apis }),
            actions,
            Narration::new(
                "Checking service APIs.",
                format!("API check completed. {} of {} healthy.", healthy, apis.len()),
                &["system", "api", "status"],
            ),
        ))
    }
}
