use crate::error::ClientError;
use shard_trie::ShardTrie;
use std::time::Duration;

/// Thin `reqwest`-based client for the two outbound call patterns a sharder
/// pass makes against other nodes' proxy endpoints: fetching a remote
/// shard's distributed-node trie, and ensuring a newly-split shard
/// container is listed under its account.
pub struct InternalClient {
    http: reqwest::Client,
    node_timeout: Duration,
    request_tries: u32,
}

impl InternalClient {
    pub fn new(conn_timeout: Duration, node_timeout: Duration, request_tries: u32) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().connect_timeout(conn_timeout).build()?;
        Ok(InternalClient {
            http,
            node_timeout,
            request_tries: request_tries.max(1),
        })
    }

    /// `GET <acct>/<cont>?format=trie&trie_nodes=distributed` with
    /// `X-Skip-Sharding: On`, retried up to `request_tries` times.
    pub async fn fetch_trie(&self, base_url: &reqwest::Url, account: &str, container: &str) -> Result<ShardTrie, ClientError> {
        let url = base_url
            .join(&format!("v1/{account}/{container}"))
            .map_err(|_| ClientError::UnexpectedResponse {
                status: 0,
                url: format!("{base_url}v1/{account}/{container}"),
            })?;

        let mut last_err = None;
        for attempt in 0..self.request_tries {
            let attempt_result = self.try_fetch_trie(&url).await;
            match attempt_result {
                Ok(trie) => return Ok(trie),
                Err(err) => {
                    tracing::warn!(attempt, url = %url, error = %err, "trie fetch attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(ClientError::Timeout(self.request_tries)))
    }

    async fn try_fetch_trie(&self, url: &reqwest::Url) -> Result<ShardTrie, ClientError> {
        let response = tokio::time::timeout(
            self.node_timeout,
            self.http
                .get(url.clone())
                .query(&[("format", "trie"), ("trie_nodes", "distributed")])
                .header("X-Skip-Sharding", "On")
                .send(),
        )
        .await
        .map_err(|_| ClientError::Timeout(1))??;

        if !response.status().is_success() {
            return Err(ClientError::UnexpectedResponse {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.bytes().await?;
        Ok(ShardTrie::deserialize(&body)?)
    }

    /// `PUT <acct>/<cont>` with `X-Storage-Policy`, tolerating a conflict
    /// response as a success since the container already existing is the
    /// desired end state.
    pub async fn create_container(&self, base_url: &reqwest::Url, account: &str, container: &str, policy_name: &str) -> Result<(), ClientError> {
        let url = base_url
            .join(&format!("v1/{account}/{container}"))
            .map_err(|_| ClientError::UnexpectedResponse {
                status: 0,
                url: format!("{base_url}v1/{account}/{container}"),
            })?;

        let mut last_err = None;
        for attempt in 0..self.request_tries {
            let response = tokio::time::timeout(
                self.node_timeout,
                self.http.put(url.clone()).header("X-Storage-Policy", policy_name).send(),
            )
            .await;

            match response {
                Ok(Ok(response)) if response.status().is_success() || response.status().as_u16() == 409 => {
                    return Ok(());
                }
                Ok(Ok(response)) => {
                    let status = response.status().as_u16();
                    tracing::warn!(attempt, url = %url, status, "create_container attempt returned unexpected status");
                    last_err = Some(ClientError::UnexpectedResponse { status, url: url.to_string() });
                }
                Ok(Err(err)) => {
                    tracing::warn!(attempt, url = %url, error = %err, "create_container attempt failed");
                    last_err = Some(err.into());
                }
                Err(_) => {
                    tracing::warn!(attempt, url = %url, "create_container attempt timed out");
                    last_err = Some(ClientError::Timeout(attempt + 1));
                }
            }
        }
        Err(last_err.unwrap_or(ClientError::Timeout(self.request_tries)))
    }
}
