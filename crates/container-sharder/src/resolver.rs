use anyhow::Context;
use shard_client::InternalClient;
use shard_trie::ShardTrie;
use std::collections::HashMap;

/// Per-pass cache of remote trie fragments already fetched, keyed by the
/// distributed-branch prefix they were fetched for. Shared across every key
/// resolved within one pass so a hot branch is only ever fetched once.
pub type FragmentCache = HashMap<String, ShardTrie>;

/// Walks `root_trie`, following distributed branches via `client` until the
/// shard that owns `key` is found, returning that shard's prefix.
///
/// Each recursive step consumes exactly one `DISTRIBUTED_BRANCH` level of
/// what is, by construction, an acyclic forest rooted at the original
/// container - so this terminates in a number of steps bounded by the
/// forest's depth.
pub async fn resolve(
    root_trie: &ShardTrie,
    key: &str,
    root_account: &str,
    root_container: &str,
    client: &InternalClient,
    base_url: &reqwest::Url,
    cache: &mut FragmentCache,
) -> anyhow::Result<String> {
    match root_trie.lookup(key) {
        Ok(_) | Err(shard_trie::TrieError::NotFound(_)) => Ok(root_trie.root_key().to_string()),
        Err(shard_trie::TrieError::DistributedBranch(_, branch)) => {
            if let Some(cached) = cache.get(&branch) {
                let cached = cached.clone();
                return Box::pin(resolve(&cached, key, root_account, root_container, client, base_url, cache)).await;
            }

            let (shard_account, shard_container) = container_store::shard_path::get_container_shard_path(root_account, root_container, &branch);
            let mut fetched = client
                .fetch_trie(base_url, &shard_account, &shard_container)
                .await
                .with_context(|| format!("fetching remote trie fragment for branch '{branch}'"))?;

            if fetched.is_empty() {
                fetched.stamp_root(branch.clone());
            }
            fetched.trim_trunk();
            cache.insert(branch.clone(), fetched.clone());

            Box::pin(resolve(&fetched, key, root_account, root_container, client, base_url, cache)).await
        }
        Err(other) => Err(other).context("resolving shard path"),
    }
}
