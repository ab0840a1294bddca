//! HTTP side-channel fetcher, used when the swarm is too slow or
//! unreachable to resolve metainfo or individual files.

use std::time::Duration;

use crate::error::{ManagerError, Result};
use crate::infohash::Infohash;

pub struct BoostFetcher {
    client: reqwest::Client,
    nodes: Vec<String>,
}

impl BoostFetcher {
    pub fn new(nodes: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ManagerError::BoostFailed(e.to_string()))?;
        Ok(Self { client, nodes })
    }

    /// Fetch a `.torrent`'s metainfo bytes from the first boost node
    /// that answers 200. Fails with `BoostFailed` when every node is
    /// exhausted; a single unreachable endpoint must not abort the
    /// attempt as a whole.
    pub async fn fetch_torrent(&self, infohash: Infohash) -> Result<Vec<u8>> {
        self.fetch_path(&format!("{}/torrent", infohash.to_hex()))
            .await
    }

    /// Fetch the bytes of a named sub-file from the boost side-channel.
    pub async fn fetch_file(&self, infohash: Infohash, sub_path: &str) -> Result<Vec<u8>> {
        self.fetch_path(&format!("{}/{}", infohash.to_hex(), sub_path))
            .await
    }

    async fn fetch_path(&self, path: &str) -> Result<Vec<u8>> {
        if self.nodes.is_empty() {
            return Err(ManagerError::BoostFailed("no boost nodes configured".into()));
        }

        let mut last_err = String::new();
        for base in &self.nodes {
            let url = format!("{}/{}", base.trim_end_matches('/'), path);
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| ManagerError::BoostFailed(e.to_string()));
                }
                Ok(resp) => {
                    last_err = format!("{url}: HTTP {}", resp.status());
                    tracing::debug!(url, status = %resp.status(), "boost node returned non-success");
                }
                Err(e) => {
                    last_err = format!("{url}: {e}");
                    tracing::debug!(url, error = %e, "boost node unreachable");
                }
            }
        }

        Err(ManagerError::BoostFailed(last_err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_with_no_nodes_fails_fast() {
        let fetcher = BoostFetcher::new(Vec::new(), Duration::from_secs(1)).unwrap();
        let err = tokio_test::block_on(fetcher.fetch_torrent(Infohash::from_bytes([0u8; 20])))
            .unwrap_err();
        assert!(matches!(err, ManagerError::BoostFailed(_)));
    }
}
