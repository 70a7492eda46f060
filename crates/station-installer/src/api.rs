//! REST client for the station backend.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ClientConfig;
use crate::model::{
    CancelRequest, Dashboard, DestinationsResponse, Health, InstallAccepted, InstallDestination,
    InstallRequest, InstallTask, PresetResource, PresetResourcesResponse, Resource, StatusReport,
    TaskPayload,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{context}: server returned {status}{}", body_suffix(.body))]
    Status {
        context: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{context}: invalid response body: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("install accepted without a task id")]
    MissingTaskId,

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

fn body_suffix(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" - {trimmed}")
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct StationApi {
    client: reqwest::Client,
    base_url: String,
    api_prefix: String,
}

impl StationApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = config.base_url.trim().to_string();
        let reason = match reqwest::Url::parse(&base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => None,
            Ok(url) => Some(format!("unsupported scheme '{}'", url.scheme())),
            Err(err) => Some(err.to_string()),
        };
        if let Some(reason) = reason {
            return Err(ApiError::InvalidBaseUrl {
                url: base_url,
                reason,
            });
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_prefix: config.api_prefix.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        station_util::join_url(&self.base_url, &self.api_prefix, endpoint)
    }

    pub async fn list_tasks(&self) -> Result<Vec<InstallTask>> {
        let resp = self.client.get(self.url("/installer/tasks")).send().await?;
        let payloads: Vec<TaskPayload> = decode(resp, "list tasks").await?;
        let now = Utc::now();
        Ok(payloads
            .into_iter()
            .filter(|payload| !payload.id.trim().is_empty())
            .map(|payload| payload.into_task(now))
            .collect())
    }

    pub async fn install(
        &self,
        resource: &Resource,
        destination: &InstallDestination,
    ) -> Result<InstallAccepted> {
        let resp = self
            .client
            .post(self.url("/installer/install"))
            .json(&InstallRequest {
                resource,
                destination,
            })
            .send()
            .await?;
        let accepted: InstallAccepted = decode(resp, "start installation").await?;
        if accepted.task_id.trim().is_empty() {
            return Err(ApiError::MissingTaskId);
        }
        Ok(accepted)
    }

    pub async fn status(&self, task_id: &str) -> Result<StatusReport> {
        debug!("polling status for {task_id}");
        let resp = self
            .client
            .get(self.url("/installer/status"))
            .query(&[("taskId", task_id)])
            .send()
            .await?;
        decode(resp, "fetch task status").await
    }

    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/installer/cancel"))
            .json(&CancelRequest { task_id })
            .send()
            .await?;
        ensure_success(resp, "cancel task").await?;
        Ok(())
    }

    pub async fn preset_resources(&self) -> Result<Vec<PresetResource>> {
        let resp = self.client.get(self.url("/preset-resources")).send().await?;
        let body: PresetResourcesResponse = decode(resp, "fetch preset resources").await?;
        Ok(body.resources)
    }

    pub async fn installation_destinations(&self) -> Result<Vec<InstallDestination>> {
        let resp = self
            .client
            .get(self.url("/installation-destinations"))
            .send()
            .await?;
        let body: DestinationsResponse = decode(resp, "fetch installation destinations").await?;
        Ok(body
            .destinations
            .into_iter()
            .map(|entry| entry.into_destination())
            .collect())
    }

    pub async fn dashboard(&self) -> Result<Dashboard> {
        let resp = self.client.get(self.url("/dashboard")).send().await?;
        decode(resp, "fetch dashboard").await
    }

    /// Health lives at the server root, outside the API prefix.
    pub async fn health(&self) -> Result<Health> {
        let url = station_util::join_url(&self.base_url, "", "/health");
        let resp = self.client.get(url).send().await?;
        decode(resp, "health check").await
    }
}

async fn ensure_success(resp: Response, context: &'static str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        context,
        status,
        body,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response, context: &'static str) -> Result<T> {
    let resp = ensure_success(resp, context).await?;
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode { context, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceKind, TaskStatus};
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> StationApi {
        StationApi::new(&ClientConfig::for_base_url(server.uri())).unwrap()
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        for bad in ["not a url", "station.local:8080"] {
            let err = StationApi::new(&ClientConfig::for_base_url(bad))
                .err()
                .expect("base URL must be rejected");
            assert!(matches!(err, ApiError::InvalidBaseUrl { .. }), "{bad}");
        }
        assert!(StationApi::new(&ClientConfig::for_base_url(" http://127.0.0.1:9 ")).is_ok());
    }

    #[tokio::test]
    async fn install_posts_nested_contract() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/installer/install"))
            .and(body_json(serde_json::json!({
                "resource": {
                    "id": "custom",
                    "name": "MyResource",
                    "type": "custom",
                    "url": "https://example.com/r.zip"
                },
                "destination": {"id": "d1", "name": "Custom", "path": "/custom", "type": "custom"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "taskId": "t42",
                "status": "pending",
                "message": "Installation task created successfully"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resource = Resource::custom("https://example.com/r.zip", "MyResource", None);
        let destination = InstallDestination {
            id: "d1".into(),
            name: "Custom".into(),
            path: "/custom".into(),
            kind: "custom".into(),
        };
        let accepted = api_for(&server)
            .install(&resource, &destination)
            .await
            .expect("install");
        assert_eq!(accepted.task_id, "t42");
    }

    #[tokio::test]
    async fn status_sends_task_id_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .and(query_param("taskId", "t42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "downloading",
                "progress": 37.5
            })))
            .mount(&server)
            .await;

        let report = api_for(&server).status("t42").await.expect("status");
        assert_eq!(report.status, TaskStatus::Downloading);
        assert_eq!(report.progress, 37.5);
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/installer/cancel"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Task not found"))
            .mount(&server)
            .await;

        let err = api_for(&server).cancel("nope").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status, .. } if status == StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("Task not found"));
    }

    #[tokio::test]
    async fn catalog_endpoints_normalize_payloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/preset-resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": [
                    {"id": "controlnet", "name": "ControlNet", "type": "extension", "size": "2.1 GB"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/installation-destinations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "destinations": [{"type": "extensions", "path": "/sd/extensions"}]
            })))
            .mount(&server)
            .await;

        let api = api_for(&server);
        let presets = api.preset_resources().await.expect("presets");
        assert_eq!(presets[0].kind, ResourceKind::Extension);
        let destinations = api.installation_destinations().await.expect("destinations");
        assert_eq!(destinations[0].id, "/sd/extensions");
        assert_eq!(destinations[0].name, "Extensions");
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = api_for(&server).status("t1").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[tokio::test]
    async fn health_ignores_api_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
            )
            .mount(&server)
            .await;

        let health = api_for(&server).health().await.expect("health");
        assert!(health.is_ok());
    }
}
