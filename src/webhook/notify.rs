//! Push notification delivery.
//!
//! Runs inside the post-receive hook process: look up the repository's
//! webhook, resolve the new tip commit and POST a small JSON document to the
//! listener.  One attempt, no retry.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use super::target;
use crate::config::WebhookConfig;
use crate::git;
use crate::repo::Repository;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Gitto-Signature-256";
pub const EVENT_HEADER: &str = "X-Gitto-Event";

/// Body of every webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub repo_id: String,
    pub repo_name: String,
    /// Tip of `HEAD` after the push; empty when it could not be resolved.
    pub git_commit_hash: String,
}

/// Result of a [`Notifier::notify`] call that did not hit a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The repository has no webhook configured.
    NotConfigured,
    /// The listener answered with this HTTP status.
    Delivered(u16),
}

pub struct Notifier {
    client: reqwest::Client,
    git: PathBuf,
    secret: Option<String>,
}

impl Notifier {
    /// Build a notifier from the webhook settings.  The signing secret is
    /// read from the environment variable named in `config.secret_env`.
    pub fn new(config: &WebhookConfig, git: PathBuf) -> Result<Self> {
        let secret = std::env::var(&config.secret_env)
            .ok()
            .filter(|s| !s.is_empty());
        Self::with_secret(config, git, secret)
    }

    fn with_secret(config: &WebhookConfig, git: PathBuf, secret: Option<String>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().context("failed to build reqwest client")?;
        Ok(Self {
            client,
            git,
            secret,
        })
    }

    /// Deliver the push notification for `repo`, copying the listener's
    /// response body to `out`.
    ///
    /// A non-2xx answer is still a completed delivery; only transport
    /// failures are errors.
    #[instrument(skip(self, out), fields(repo_id = %repo.id))]
    pub async fn notify<W>(&self, repo: &Repository, out: &mut W) -> Result<Delivery>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(url) = target::get(repo).await else {
            debug!("no webhook configured");
            return Ok(Delivery::NotConfigured);
        };

        let git_commit_hash = match git::rev_parse_head(&self.git, &repo.path()).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(error = %e, "failed to get commit hash");
                String::new()
            }
        };

        let payload = NotificationPayload {
            repo_id: repo.id.clone(),
            repo_name: repo.name.clone(),
            git_commit_hash,
        };
        let body = serde_json::to_vec(&payload).context("failed to encode webhook payload")?;

        let mut request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, "push");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .with_context(|| format!("webhook delivery to {url} failed"))?;

        let status = response.status();
        info!(%url, %status, commit = %payload.git_commit_hash, "webhook delivered");

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read webhook response from {url}"))?;
        out.write_all(&bytes)
            .await
            .context("failed to write webhook response")?;
        out.flush().await.context("failed to write webhook response")?;

        Ok(Delivery::Delivered(status.as_u16()))
    }
}

/// `sha256=<hex>` HMAC of `body` keyed with `secret`.
fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("HMAC key error: {e}"))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
