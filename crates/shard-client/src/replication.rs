use crate::error::ReplicationError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Pushes a just-written database file to a replica. Implementations never
/// mutate pass-scoped state directly; callers hold the pass's bookkeeping
/// maps and only read from the snapshot they pass in.
#[async_trait]
pub trait ReplicationEngine: Send + Sync {
    async fn push(&self, part: u64, db_path: &Path, node_id: u32) -> Result<(), ReplicationError>;
}

/// Pushes the database file over HTTP to the owning node, resolving
/// `node_id` against the ring's device table.
pub struct HttpReplicationEngine {
    http: reqwest::Client,
    ring: Arc<shard_ring::Ring>,
    node_timeout: Duration,
    request_tries: u32,
}

impl HttpReplicationEngine {
    pub fn new(ring: Arc<shard_ring::Ring>, conn_timeout: Duration, node_timeout: Duration, request_tries: u32) -> Result<Self, ReplicationError> {
        let http = reqwest::Client::builder().connect_timeout(conn_timeout).build()?;
        Ok(HttpReplicationEngine {
            http,
            ring,
            node_timeout,
            request_tries: request_tries.max(1),
        })
    }
}

#[async_trait]
impl ReplicationEngine for HttpReplicationEngine {
    async fn push(&self, part: u64, db_path: &Path, node_id: u32) -> Result<(), ReplicationError> {
        let device = self.ring.device(node_id).ok_or(ReplicationError::UnknownDevice(node_id))?;
        let bytes = tokio::fs::read(db_path).await?;
        let url = format!("http://{}:{}/replicate/{}/{}", device.ip, device.port, part, device.device);

        let mut last_err = None;
        for attempt in 0..self.request_tries {
            let sent = tokio::time::timeout(self.node_timeout, self.http.post(&url).body(bytes.clone()).send()).await;
            match sent {
                Ok(Ok(response)) if response.status().is_success() => return Ok(()),
                Ok(Ok(response)) => {
                    let status = response.status().as_u16();
                    tracing::warn!(attempt, %url, status, "replication push attempt returned unexpected status");
                    last_err = Some(ReplicationError::UnexpectedResponse { status, device_id: node_id });
                }
                Ok(Err(err)) => {
                    tracing::warn!(attempt, %url, error = %err, "replication push attempt failed");
                    last_err = Some(err.into());
                }
                Err(_) => {
                    tracing::warn!(attempt, %url, "replication push attempt timed out");
                }
            }
        }
        Err(last_err.unwrap_or(ReplicationError::UnexpectedResponse { status: 0, device_id: node_id }))
    }
}

/// Records every push it receives and always reports success. Used by
/// scenario tests that want to assert on what was replicated, where, and how
/// many times, without opening a socket.
#[derive(Default)]
pub struct RecordingReplicationEngine {
    pushes: Mutex<Vec<(u64, std::path::PathBuf, u32)>>,
}

impl RecordingReplicationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pushes(&self) -> Vec<(u64, std::path::PathBuf, u32)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplicationEngine for RecordingReplicationEngine {
    async fn push(&self, part: u64, db_path: &Path, node_id: u32) -> Result<(), ReplicationError> {
        self.pushes.lock().unwrap().push((part, db_path.to_path_buf(), node_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_engine_captures_every_push() {
        let engine = RecordingReplicationEngine::new();
        engine.push(1, Path::new("/tmp/a.db"), 7).await.unwrap();
        engine.push(2, Path::new("/tmp/b.db"), 8).await.unwrap();
        let pushes = engine.pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].2, 7);
        assert_eq!(pushes[1].0, 2);
    }
}
