//! Hook mode: what `gitto hook` does when git runs it after a push.

use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{error, warn};

use crate::config::{Config, DeliveryFailurePolicy};
use crate::repo::Repository;
use crate::webhook::{Delivery, Notifier};

/// Fire the webhook for the repository at `cwd`.
///
/// A working directory that is not a hosted repository is reported on `out`
/// and is not an error: it must never fail the push.  Delivery failures are
/// handled per `webhook.on_delivery_failure`.
pub async fn run<W>(config: &Config, cwd: &Path, out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(repo) = Repository::from_repo_path(cwd) else {
        let msg = format!("Failed to find the repo: {}\n", cwd.display());
        out.write_all(msg.as_bytes()).await?;
        out.flush().await?;
        return Ok(());
    };

    let notifier = Notifier::new(&config.webhook, config.git.binary.clone())?;
    match notifier.notify(&repo, out).await {
        Ok(Delivery::Delivered(status)) if status >= 400 => {
            warn!(repo_id = %repo.id, status, "webhook listener rejected the notification");
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) => match config.webhook.on_delivery_failure {
            DeliveryFailurePolicy::Ignore => {
                warn!(repo_id = %repo.id, error = %format!("{e:#}"), "webhook delivery failed");
                Ok(())
            }
            DeliveryFailurePolicy::Fail => {
                error!(repo_id = %repo.id, error = %format!("{e:#}"), "webhook delivery failed");
                Err(e)
            }
        },
    }
}
