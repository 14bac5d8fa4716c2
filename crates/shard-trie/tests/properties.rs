#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

use shard_trie::{CountingTrie, ObjectData, ShardTrie, Timestamp, TrieError};

fn sample_keys(raw: Vec<u8>) -> Vec<String> {
    // Map arbitrary bytes onto a small alphabet so tries actually branch
    // instead of degenerating into one long chain almost every run.
    raw.into_iter()
        .map(|b| {
            let c = (b'a' + (b % 6)) as char;
            let n = b % 3;
            format!("{c}{n}")
        })
        .collect()
}

fn data() -> ObjectData {
    ObjectData::empty(0)
}

#[quickcheck]
fn lookup_is_total(raw: Vec<u8>) -> bool {
    let keys = sample_keys(raw);
    let mut trie = ShardTrie::new("");
    for k in &keys {
        trie.insert(k, data(), Timestamp::now()).ok();
    }
    keys.iter().all(|k| match trie.lookup(k) {
        Ok(node) => node.full_key == *k,
        Err(TrieError::NotFound(_)) => false,
        Err(TrieError::DistributedBranch(key, branch)) => key == *k && key.starts_with(&branch),
        Err(_) => false,
    })
}

#[quickcheck]
fn split_preserves_every_key_exactly_once(raw: Vec<u8>) -> bool {
    let keys = sample_keys(raw);
    let mut trie = ShardTrie::new("");
    for k in &keys {
        trie.insert(k, data(), Timestamp::now()).ok();
    }
    let before = trie.data_node_count();

    let split = match trie.split_trie("a") {
        Ok(split) => split,
        Err(_) => return true, // "a" never populated this run; nothing to check
    };

    let remaining: Vec<_> = trie.get_data_nodes().map(|n| n.full_key.clone()).collect();
    let moved: Vec<_> = split.get_data_nodes().map(|n| n.full_key.clone()).collect();

    remaining.len() + moved.len() == before
        && moved.iter().all(|k| k.starts_with('a'))
        && remaining.iter().all(|k| !k.starts_with('a'))
}

#[quickcheck]
fn counting_trie_candidates_never_overlap(raw: Vec<u8>) -> bool {
    let keys = sample_keys(raw);
    let mut ct = CountingTrie::new("", 2);
    for k in &keys {
        ct.add_data(k, ());
    }
    let candidates = ct.candidates();
    candidates.iter().enumerate().all(|(i, a)| {
        candidates
            .iter()
            .enumerate()
            .all(|(j, b)| i == j || (!a.starts_with(b.as_str()) && !b.starts_with(a.as_str())))
    })
}

#[quickcheck]
fn misplaced_detection_is_order_insensitive(raw: Vec<u8>) -> bool {
    let keys = sample_keys(raw);
    if keys.is_empty() {
        return true;
    }
    let branch = "a".to_string();

    let mut forward = CountingTrie::new("", usize::MAX);
    forward.add_distributed(&branch);
    for k in &keys {
        forward.add_data(k, ());
    }

    let mut backward = CountingTrie::new("", usize::MAX);
    for k in &keys {
        backward.add_data(k, ());
    }
    backward.add_distributed(&branch);

    let mut forward_misplaced: Vec<_> = forward.misplaced().iter().map(|(k, _, _)| k.clone()).collect();
    let mut backward_misplaced: Vec<_> = backward.misplaced().iter().map(|(k, _, _)| k.clone()).collect();
    forward_misplaced.sort();
    backward_misplaced.sort();

    forward_misplaced == backward_misplaced
}

#[quickcheck]
fn serialize_roundtrip_is_exact(raw: Vec<u8>) -> bool {
    let keys = sample_keys(raw);
    let mut trie = ShardTrie::new("");
    for k in &keys {
        trie.insert(k, data(), Timestamp::now()).ok();
    }
    let bytes = trie.serialize().unwrap();
    let back = ShardTrie::deserialize(&bytes).unwrap();
    trie == back
}
