//! HTTP client of the secrets and session service.

use crate::TaskDirs;
use async_trait::async_trait;
use cw_config::SmsConfig;
use cw_types::{SecretsClient, SecretsError, SecretsResult, TaskAuthorization};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

/// Answer of `POST /secure`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskSecrets {
    /// Hex key of the task dataset, if the dataset is encrypted.
    #[serde(default)]
    dataset_key: Option<String>,
}

/// [SecretsClient] talking to the secrets service over HTTP.
#[derive(Debug, Clone)]
pub struct SmsClient {
    base: String,
    client: Client,
    dirs: TaskDirs,
}

impl SmsClient {
    /// Create a client storing fetched secrets under `dirs`.
    pub fn new(config: &SmsConfig, dirs: TaskDirs) -> SecretsResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SecretsError::Http(e.to_string()))?;
        Ok(Self { base: config.url.trim_end_matches('/').to_string(), client, dirs })
    }

    async fn post(&self, path: &str, auth: &TaskAuthorization) -> SecretsResult<reqwest::Response> {
        let url = format!("{}{path}", self.base);
        let resp = self
            .client
            .post(&url)
            .json(auth)
            .send()
            .await
            .map_err(|e| SecretsError::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SecretsError::Http(format!("{url} returned {status}: {body}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl SecretsClient for SmsClient {
    async fn fetch_task_secrets(&self, auth: &TaskAuthorization) -> SecretsResult<()> {
        let chain_task_id = auth.chain_task_id;
        let secrets: TaskSecrets = self
            .post("/secure", auth)
            .await?
            .json()
            .await
            .map_err(|e| SecretsError::Http(e.to_string()))?;

        let Some(key) = secrets.dataset_key else {
            debug!(target: "worker::sms", %chain_task_id, "no dataset key for task");
            return Ok(());
        };
        tokio::fs::create_dir_all(self.dirs.secrets_dir(chain_task_id)).await?;
        tokio::fs::write(self.dirs.dataset_key_path(chain_task_id), key).await?;
        info!(target: "worker::sms", %chain_task_id, "dataset key stored");
        Ok(())
    }

    async fn create_tee_session(&self, auth: &TaskAuthorization) -> SecretsResult<String> {
        let session_id = self
            .post("/tee/sessions", auth)
            .await?
            .text()
            .await
            .map_err(|e| SecretsError::Http(e.to_string()))?;
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(SecretsError::NoSession(auth.chain_task_id));
        }
        Ok(session_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cw_test_utils::task_offer;
    use cw_types::{Address, B256};
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn client(server: &MockServer, dirs: TaskDirs) -> SmsClient {
        let config = SmsConfig { url: server.uri(), ..Default::default() };
        SmsClient::new(&config, dirs).unwrap()
    }

    fn auth() -> TaskAuthorization {
        task_offer(B256::repeat_byte(1), Address::repeat_byte(2)).contribution_authorization
    }

    #[tokio::test]
    async fn test_fetch_stores_dataset_key() -> eyre::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"datasetKey":"0a0b"}"#))
            .mount(&server)
            .await;
        let tmp = tempfile::tempdir()?;
        let dirs = TaskDirs::new(tmp.path());
        let sms = client(&server, dirs.clone());

        sms.fetch_task_secrets(&auth()).await?;
        let stored = std::fs::read_to_string(dirs.dataset_key_path(auth().chain_task_id))?;
        assert_eq!(stored, "0a0b");
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_without_key() -> eyre::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;
        let tmp = tempfile::tempdir()?;
        let dirs = TaskDirs::new(tmp.path());
        let sms = client(&server, dirs.clone());

        sms.fetch_task_secrets(&auth()).await?;
        assert!(!dirs.dataset_key_path(auth().chain_task_id).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_error_status() -> eyre::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let tmp = tempfile::tempdir()?;
        let sms = client(&server, TaskDirs::new(tmp.path()));
        assert_matches!(sms.fetch_task_secrets(&auth()).await, Err(SecretsError::Http(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_tee_session() -> eyre::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tee/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("session-42\n"))
            .mount(&server)
            .await;
        let tmp = tempfile::tempdir()?;
        let sms = client(&server, TaskDirs::new(tmp.path()));
        assert_eq!(sms.create_tee_session(&auth()).await?, "session-42");
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_session_is_error() -> eyre::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tee/sessions"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let tmp = tempfile::tempdir()?;
        let sms = client(&server, TaskDirs::new(tmp.path()));
        assert_matches!(sms.create_tee_session(&auth()).await, Err(SecretsError::NoSession(_)));
        Ok(())
    }
}
