use std::collections::BTreeMap;
use std::path::Path;

/// Writes `{"container_sharder_pass_completed": elapsed_seconds}` into the
/// JSON blob at `path`, merging into whatever object is already there
/// instead of truncating it, since several daemons share one recon cache
/// file on a real node.
pub fn dump_pass_completed(path: impl AsRef<Path>, elapsed_seconds: f64) -> std::io::Result<()> {
    let path = path.as_ref();
    let mut existing: BTreeMap<String, serde_json::Value> = match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(err) => return Err(err),
    };
    existing.insert("container_sharder_pass_completed".to_string(), elapsed_seconds.into());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec(&existing)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_creates_file_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("container.recon");
        dump_pass_completed(&path, 1.5).unwrap();
        let contents: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(contents["container_sharder_pass_completed"], 1.5);
    }

    #[test]
    fn dump_merges_into_existing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("container.recon");
        std::fs::write(&path, br#"{"object_updater_sweep":{"elapsed":3}}"#).unwrap();
        dump_pass_completed(&path, 2.0).unwrap();
        let contents: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(contents["container_sharder_pass_completed"], 2.0);
        assert_eq!(contents["object_updater_sweep"]["elapsed"], 3);
    }
}
