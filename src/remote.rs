use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;

use crate::cache::normalize;
use crate::config::Identity;
use crate::status::StatusCode;

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status service returned {status}: {body}")]
    Status { status: u16, body: String },
}

// ─── Wire format ────────────────────────────────────────────────────

/// JSON body of the publish endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRecord {
    pub username: String,
    pub uuid: String,
    pub is_iron: bool,
    pub is_hardcore: bool,
    pub is_ultimate: bool,
    pub group_mates: Vec<String>,
}

impl From<&Identity> for PublishRecord {
    fn from(identity: &Identity) -> Self {
        // The raw free-text field goes over as a single element, empty or not;
        // the service does its own splitting. Only a non-iron record, which is
        // what a retraction publishes, carries no group.
        let group_mates = if identity.is_iron {
            vec![identity.group_names.clone()]
        } else {
            Vec::new()
        };
        Self {
            username: identity.username.clone(),
            uuid: identity.uuid.clone(),
            is_iron: identity.is_iron,
            is_hardcore: identity.is_hardcore,
            is_ultimate: identity.is_ultimate,
            group_mates,
        }
    }
}

// ─── Store interface ────────────────────────────────────────────────

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Look up a player's published status. Any failure yields `None`.
    async fn resolve(&self, username: &str) -> Option<StatusCode>;

    async fn push(&self, record: &PublishRecord) -> Result<(), RemoteError>;

    /// Retract the player's published status.
    async fn clear(&self, identity: &Identity) -> Result<(), RemoteError> {
        self.push(&PublishRecord::from(&identity.retracted())).await
    }
}

// ─── HTTP store ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpStatusStore {
    base: String,
    client: reqwest::Client,
}

impl HttpStatusStore {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        info!("Status store at {}", base);
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, username: &str) -> Result<StatusCode, RemoteError> {
        let url = format!("{}/status", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[("username", normalize(username))])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = resp.text().await?;
        Ok(StatusCode::from_wire(&body))
    }
}

#[async_trait]
impl StatusStore for HttpStatusStore {
    async fn resolve(&self, username: &str) -> Option<StatusCode> {
        match self.fetch(username).await {
            Ok(code) => {
                debug!("resolved {} -> {}", username, code);
                Some(code)
            }
            Err(e) => {
                debug!("status lookup for {} failed: {}", username, e);
                None
            }
        }
    }

    async fn push(&self, record: &PublishRecord) -> Result<(), RemoteError> {
        let url = format!("{}/publish", self.base);
        let resp = self.client.post(&url).json(record).send().await?;
        let status = resp.status();
        if status.is_success() {
            debug!("published status for {}", record.username);
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            warn!("publish for {} rejected: {} {}", record.username, status, body);
            Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
