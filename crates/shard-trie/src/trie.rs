use crate::error::TrieError;
use crate::node::{NodeFlag, ObjectData, ShardTrieNode, Timestamp};
use serde::{Deserialize, Serialize};

/// A prefix trie over object names, rooted at some `prefix` that may itself
/// be beneath a remote shard's own root.
///
/// Children are keyed by a single character edge label, so repeated
/// single-child chains accumulate as ordinary interior nodes; `trim_trunk`
/// is the operation that collapses them back down to the first real branch
/// or data node, which is what callers want after fetching a remote
/// fragment that they intend to use as a fresh routing root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardTrie {
    root: ShardTrieNode,
    data_node_count: usize,
}

impl ShardTrie {
    /// A fresh, empty trie rooted at `root_key`.
    pub fn new(root_key: impl Into<String>) -> Self {
        let root_key = root_key.into();
        ShardTrie {
            root: ShardTrieNode::new_interior(root_key.clone(), root_key),
            data_node_count: 0,
        }
    }

    pub fn root(&self) -> &ShardTrieNode {
        &self.root
    }

    pub fn root_key(&self) -> &str {
        &self.root.full_key
    }

    pub fn data_node_count(&self) -> usize {
        self.data_node_count
    }

    /// True when this trie holds no data and has no descendants at all -
    /// the state of a trie fetched from a shard that has not yet received
    /// any objects.
    pub fn is_empty(&self) -> bool {
        self.data_node_count == 0 && self.root.children.is_empty()
    }

    /// Re-roots an empty trie at `full_key`. Used when a just-fetched remote
    /// fragment came back with nothing in it: the caller still needs a
    /// valid `root_key` to route by.
    pub fn stamp_root(&mut self, full_key: impl Into<String>) {
        let full_key = full_key.into();
        self.root.key = full_key.clone();
        self.root.full_key = full_key;
    }

    fn relative_suffix(&self, key: &str) -> Result<Vec<char>, TrieError> {
        if !key.starts_with(&self.root.full_key) {
            return Err(TrieError::NoSuchPrefix(key.to_string()));
        }
        Ok(key[self.root.full_key.len()..].chars().collect())
    }

    /// Inserts a `DATA` node at `key`, creating interior nodes along the way.
    /// Fails with [`TrieError::DistributedBranch`] if the path crosses an
    /// existing distributed branch - the caller is expected to route the
    /// insert elsewhere rather than treat this as a hard error.
    pub fn insert(&mut self, key: &str, data: ObjectData, timestamp: Timestamp) -> Result<(), TrieError> {
        let suffix = self
            .relative_suffix(key)
            .map_err(|_| TrieError::NoSuchPrefix(key.to_string()))?;

        if self.root.flag == NodeFlag::DistributedBranch {
            return Err(TrieError::DistributedBranch(
                key.to_string(),
                self.root.full_key.clone(),
            ));
        }

        let mut node = &mut self.root;
        let mut full = self.root.full_key.clone();
        for c in suffix {
            full.push(c);
            let entry = node
                .children
                .entry(c)
                .or_insert_with(|| ShardTrieNode::new_interior(full.clone(), c.to_string()));
            if entry.flag == NodeFlag::DistributedBranch {
                return Err(TrieError::DistributedBranch(
                    key.to_string(),
                    entry.full_key.clone(),
                ));
            }
            node = entry;
        }

        let was_data = node.flag == NodeFlag::Data;
        node.flag = NodeFlag::Data;
        node.timestamp = timestamp;
        node.data = Some(data);
        if !was_data {
            self.data_node_count += 1;
        }
        Ok(())
    }

    /// Stamps `key` as a `DISTRIBUTED_BRANCH`, creating interior nodes along
    /// the way. Used to rebuild a trie from a container's stored `TRIE_NODE`
    /// records, as opposed to [`ShardTrie::split_trie`], which derives the
    /// branch from a live subtree it is detaching.
    pub fn mark_distributed(&mut self, key: &str, timestamp: Timestamp) -> Result<(), TrieError> {
        let suffix = self
            .relative_suffix(key)
            .map_err(|_| TrieError::NoSuchPrefix(key.to_string()))?;

        if self.root.flag == NodeFlag::DistributedBranch {
            return Err(TrieError::DistributedBranch(
                key.to_string(),
                self.root.full_key.clone(),
            ));
        }
        if suffix.is_empty() {
            self.data_node_count -= if self.root.flag == NodeFlag::Data { 1 } else { 0 };
            self.root.flag = NodeFlag::DistributedBranch;
            self.root.timestamp = timestamp;
            self.root.data = None;
            self.root.children.clear();
            return Ok(());
        }

        let mut node = &mut self.root;
        let mut full = self.root.full_key.clone();
        for &c in &suffix[..suffix.len() - 1] {
            full.push(c);
            let entry = node
                .children
                .entry(c)
                .or_insert_with(|| ShardTrieNode::new_interior(full.clone(), c.to_string()));
            if entry.flag == NodeFlag::DistributedBranch {
                return Err(TrieError::DistributedBranch(
                    key.to_string(),
                    entry.full_key.clone(),
                ));
            }
            node = entry;
        }

        let last = *suffix.last().unwrap();
        full.push(last);
        let target = node
            .children
            .entry(last)
            .or_insert_with(|| ShardTrieNode::new_interior(full.clone(), last.to_string()));
        if target.flag == NodeFlag::DistributedBranch {
            return Err(TrieError::DistributedBranch(key.to_string(), target.full_key.clone()));
        }
        if target.flag == NodeFlag::Data {
            self.data_node_count -= 1;
        }
        target.flag = NodeFlag::DistributedBranch;
        target.timestamp = timestamp;
        target.data = None;
        target.children.clear();
        Ok(())
    }

    /// Looks up `key`, returning the `DATA` node if present.
    ///
    /// Totality: for every key and every trie state reachable by
    /// `insert`/`split_trie`, this returns exactly one of a data node,
    /// [`TrieError::NotFound`], or [`TrieError::DistributedBranch`] whose
    /// branch key is a prefix of `key`.
    pub fn lookup(&self, key: &str) -> Result<&ShardTrieNode, TrieError> {
        let suffix = self
            .relative_suffix(key)
            .map_err(|_| TrieError::NotFound(key.to_string()))?;

        let mut node = &self.root;
        if node.flag == NodeFlag::DistributedBranch {
            return Err(TrieError::DistributedBranch(
                key.to_string(),
                node.full_key.clone(),
            ));
        }

        for c in suffix {
            match node.children.get(&c) {
                Some(next) => {
                    node = next;
                    if node.flag == NodeFlag::DistributedBranch {
                        return Err(TrieError::DistributedBranch(
                            key.to_string(),
                            node.full_key.clone(),
                        ));
                    }
                }
                None => return Err(TrieError::NotFound(key.to_string())),
            }
        }

        if node.flag == NodeFlag::Data {
            Ok(node)
        } else {
            Err(TrieError::NotFound(key.to_string()))
        }
    }

    /// Collapses single-child interior chains from the root downward until
    /// branching or data is found, and re-roots the trie there. A no-op on
    /// an empty trie or one that already branches at the root.
    pub fn trim_trunk(&mut self) {
        loop {
            if self.root.flag != NodeFlag::Interior || self.root.children.len() != 1 {
                break;
            }
            let only_key = *self.root.children.keys().next().unwrap();
            let child = self.root.children.remove(&only_key).unwrap();
            self.root = child;
        }
    }

    /// Detaches the subtree rooted at `prefix`, replacing it in `self` with
    /// a single `DISTRIBUTED_BRANCH` node, and returns the detached subtree
    /// as its own trie. After this call, `self.lookup(k)` for any `k`
    /// starting with `prefix` fails with `DistributedBranch(prefix)`.
    pub fn split_trie(&mut self, prefix: &str) -> Result<ShardTrie, TrieError> {
        let suffix = self.relative_suffix(prefix)?;
        if suffix.is_empty() {
            // Splitting the trie's own root is not a meaningful operation:
            // there would be nothing left behind.
            return Err(TrieError::NoSuchPrefix(prefix.to_string()));
        }

        let mut node = &mut self.root;
        for &c in &suffix[..suffix.len() - 1] {
            node = node
                .children
                .get_mut(&c)
                .ok_or_else(|| TrieError::NoSuchPrefix(prefix.to_string()))?;
        }

        let last = *suffix.last().unwrap();
        let removed = node
            .children
            .remove(&last)
            .ok_or_else(|| TrieError::NoSuchPrefix(prefix.to_string()))?;

        let removed_count = count_data_nodes(&removed);
        self.data_node_count -= removed_count;

        let branch = ShardTrieNode {
            key: removed.key.clone(),
            full_key: prefix.to_string(),
            flag: NodeFlag::DistributedBranch,
            timestamp: Timestamp::now(),
            data: None,
            children: Default::default(),
        };
        node.children.insert(last, branch);

        Ok(ShardTrie {
            root: removed,
            data_node_count: removed_count,
        })
    }

    /// All `DATA` nodes, in ascending key order.
    pub fn get_data_nodes(&self) -> impl Iterator<Item = &ShardTrieNode> {
        let mut out = Vec::new();
        collect(&self.root, &mut out, false);
        out.into_iter()
    }

    /// All `DATA` and `DISTRIBUTED_BRANCH` nodes (interior path nodes
    /// skipped), in ascending key order.
    pub fn get_important_nodes(&self) -> impl Iterator<Item = &ShardTrieNode> {
        let mut out = Vec::new();
        collect(&self.root, &mut out, true);
        out.into_iter()
    }

    /// The lexicographically greatest data key present, used as a paging
    /// marker when a built sub-trie was capped at the listing limit.
    pub fn get_last_node(&self) -> Option<String> {
        self.get_data_nodes().last().map(|n| n.full_key.clone())
    }

    pub fn serialize(&self) -> Result<Vec<u8>, TrieError> {
        serde_json::to_vec(self).map_err(|err| TrieError::Serialize(err.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, TrieError> {
        serde_json::from_slice(bytes).map_err(|err| TrieError::Deserialize(err.to_string()))
    }
}

fn collect<'a>(node: &'a ShardTrieNode, out: &mut Vec<&'a ShardTrieNode>, important_only: bool) {
    match node.flag {
        NodeFlag::Data => out.push(node),
        NodeFlag::DistributedBranch if important_only => out.push(node),
        _ => {}
    }
    // A DISTRIBUTED_BRANCH never has children (invariant), so recursing
    // unconditionally is safe and keeps this function simple.
    for child in node.children.values() {
        collect(child, out, important_only);
    }
}

fn count_data_nodes(node: &ShardTrieNode) -> usize {
    let mut n = if node.flag == NodeFlag::Data { 1 } else { 0 };
    for child in node.children.values() {
        n += count_data_nodes(child);
    }
    n
}
