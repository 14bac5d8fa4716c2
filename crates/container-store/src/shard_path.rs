//! Deterministic naming and placement for shard containers, mirroring the
//! storage-layout conventions of the broader ring/placement subsystem.

/// The account a shard container is filed under, derived from the root
/// account so that shard containers never collide with user-visible
/// accounts.
pub fn shard_account(root_account: &str) -> String {
    format!(".shards_{root_account}")
}

/// The container name a shard is filed under: the root container name plus
/// the prefix it owns, so two shards of the same root never collide.
pub fn shard_container(root_container: &str, prefix: &str) -> String {
    format!("{root_container}-{prefix}")
}

/// `(shard_account, shard_container)` for `(root_account, root_container,
/// prefix)`. The root shard (`prefix == ""`) maps back onto the root
/// identity itself.
pub fn get_container_shard_path(root_account: &str, root_container: &str, prefix: &str) -> (String, String) {
    if prefix.is_empty() {
        (root_account.to_string(), root_container.to_string())
    } else {
        (shard_account(root_account), shard_container(root_container, prefix))
    }
}

/// A stable digest of `(account, container)`, used to name the on-disk
/// database file and to place it within the device's hashed directory tree.
pub fn hash_path(account: &str, container: &str) -> String {
    let digest = md5::compute(format!("{account}/{container}"));
    format!("{digest:x}")
}

/// The directory a database file lives in beneath a device root, bucketed
/// by the last three characters of the hash to bound directory fan-out.
pub fn storage_directory(datadir: &str, part: u64, hsh: &str) -> std::path::PathBuf {
    let suffix = if hsh.len() >= 3 { &hsh[hsh.len() - 3..] } else { hsh };
    std::path::Path::new(datadir).join(part.to_string()).join(suffix).join(hsh)
}
