//! Update Client
//!
//! Fetches one list update from the list server and applies it. Every
//! failure leaves the list and its snapshot exactly as they were.

use crate::config::UpdateConfig;
use crate::error::UpdateError;
use crate::protocol::{build_request, parse_update, read_body, read_response_head, ListUpdate, UpdateKind};
use crate::store::{self, BlockList, ListVersion};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Result of a successful update run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Server had nothing newer
    Unchanged,
    /// List content was replaced or patched
    Updated {
        from: Option<ListVersion>,
        to: ListVersion,
        kind: UpdateKind,
        added: usize,
        removed: usize,
    },
}

/// Client for the list server
pub struct UpdateClient {
    config: UpdateConfig,
}

impl UpdateClient {
    pub fn new(config: UpdateConfig) -> Self {
        Self { config }
    }

    /// Ask the server for the update following the version `list` holds.
    ///
    /// `None` means the server has nothing new.
    pub async fn fetch(&self, list: &BlockList) -> Result<Option<ListUpdate>, UpdateError> {
        let timeout = self.config.timeout();
        let addr = (self.config.host.as_str(), self.config.port);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                debug!("Error opening stream to {}", self.config.host);
                return Err(UpdateError::Connect {
                    host: self.config.host.clone(),
                    source,
                });
            }
            Err(_) => return Err(UpdateError::Timeout(timeout)),
        };

        tokio::time::timeout(timeout, self.exchange(stream, list))
            .await
            .map_err(|_| UpdateError::Timeout(timeout))?
    }

    /// Run request and response over an established stream
    pub async fn exchange<S>(&self, stream: S, list: &BlockList) -> Result<Option<ListUpdate>, UpdateError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);

        debug!(
            "Requesting {} version {} from {}",
            list.name(),
            list.request_version(),
            self.config.host
        );
        stream
            .write_all(build_request(&self.config, list).as_bytes())
            .await?;
        stream.flush().await?;

        let head = read_response_head(&mut stream).await?;
        let Some(body) = read_body(&mut stream, &head).await? else {
            debug!("No update available for {}", list.name());
            return Ok(None);
        };

        let body = String::from_utf8_lossy(&body);
        Ok(Some(parse_update(&body, list.name())?))
    }

    /// Fetch and apply the next update to `list`
    pub async fn update(&self, list: &mut BlockList) -> Result<UpdateOutcome, UpdateError> {
        let Some(update) = self.fetch(list).await? else {
            return Ok(UpdateOutcome::Unchanged);
        };

        if update.skipped > 0 {
            warn!(
                "Skipped {} malformed lines in update for {}",
                update.skipped,
                list.name()
            );
        }

        let outcome = UpdateOutcome::Updated {
            from: list.version(),
            to: update.version,
            kind: update.kind,
            added: update.adds.len(),
            removed: update.removes.len(),
        };
        list.apply(update)?;
        Ok(outcome)
    }
}

/// Load the snapshot of list `name`, update it and persist the result
pub async fn sync_list(client: &UpdateClient, name: &str, path: &Path) -> Result<UpdateOutcome, UpdateError> {
    let mut list = store::load(path, name)?.unwrap_or_else(|| BlockList::new(name));
    let previous = list.version_label();

    let outcome = client.update(&mut list).await?;
    match &outcome {
        UpdateOutcome::Updated { added, removed, .. } => {
            store::save(path, &list)?;
            info!(
                "{} updated from {} to {} (+{} -{}, {} hashes)",
                name,
                previous,
                list.version_label(),
                added,
                removed,
                list.len()
            );
        }
        UpdateOutcome::Unchanged => {
            info!("{} unchanged at {}", name, previous);
        }
    }
    Ok(outcome)
}
