use std::collections::{HashMap, HashSet};

/// An online pass over a stream of keys that discovers candidate split
/// points without ever materializing a full [`crate::ShardTrie`].
///
/// `prefix` is the root this counting trie is scoped to - only the portion
/// of each key strictly beneath it is eligible to become a candidate, so the
/// root itself can never saturate and short-circuit the rest of the pass.
/// Each distinct ancestor path is counted independently; once an ancestor's
/// count reaches `group_count` it is marked saturated and emitted as a
/// candidate, and no descendant of a saturated ancestor is counted further,
/// which is what keeps candidates proper-prefix-free of one another.
pub struct CountingTrie<T> {
    prefix_len: usize,
    group_count: usize,
    counts: HashMap<String, usize>,
    saturated: HashSet<String>,
    candidates: Vec<String>,
    distributed: Vec<String>,
    data_items: Vec<(String, T)>,
    misplaced: Vec<(String, String, T)>,
    misplaced_keys: HashSet<String>,
}

impl<T: Clone> CountingTrie<T> {
    pub fn new(prefix: impl Into<String>, group_count: usize) -> Self {
        let prefix = prefix.into();
        CountingTrie {
            prefix_len: prefix.chars().count(),
            group_count,
            counts: HashMap::new(),
            saturated: HashSet::new(),
            candidates: Vec::new(),
            distributed: Vec::new(),
            data_items: Vec::new(),
            misplaced: Vec::new(),
            misplaced_keys: HashSet::new(),
        }
    }

    /// Candidate split points discovered so far, in the order each first
    /// saturated. All candidates carry weight exactly `group_count` - once
    /// saturated, an ancestor's count is never incremented again - so this
    /// discovery order doubles as the descending-weight, earlier-first
    /// ordering a shard pass consumes them in.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Object keys observed to live under a distributed branch other than
    /// the one they were filed under, paired with the branch key they
    /// belong beneath. Populated regardless of which order the data key and
    /// the distributed-branch key were added in.
    pub fn misplaced(&self) -> &[(String, String, T)] {
        &self.misplaced
    }

    pub fn add_data(&mut self, key: &str, data: T) {
        if let Some(branch) = self
            .distributed
            .iter()
            .find(|branch| is_strictly_under(key, branch))
            .cloned()
        {
            self.note_misplaced(key, &branch, data.clone());
        }
        self.data_items.push((key.to_string(), data));
        self.count_ancestors(key);
    }

    pub fn add_distributed(&mut self, key: &str) {
        let mut newly_misplaced = Vec::new();
        for (existing_key, existing_data) in &self.data_items {
            if is_strictly_under(existing_key, key) && !self.misplaced_keys.contains(existing_key) {
                newly_misplaced.push((existing_key.clone(), existing_data.clone()));
            }
        }
        for (existing_key, existing_data) in newly_misplaced {
            self.note_misplaced(&existing_key, key, existing_data);
        }
        self.distributed.push(key.to_string());
    }

    fn note_misplaced(&mut self, key: &str, branch: &str, data: T) {
        if self.misplaced_keys.insert(key.to_string()) {
            self.misplaced.push((key.to_string(), branch.to_string(), data));
        }
    }

    fn count_ancestors(&mut self, key: &str) {
        let chars: Vec<char> = key.chars().collect();
        if chars.len() <= self.prefix_len {
            return;
        }
        for len in (self.prefix_len + 1)..=chars.len() {
            let ancestor: String = chars[..len].iter().collect();
            if self.saturated.contains(&ancestor) {
                break;
            }
            let count = self.counts.entry(ancestor.clone()).or_insert(0);
            *count += 1;
            if *count == self.group_count {
                self.saturated.insert(ancestor.clone());
                self.candidates.push(ancestor);
                // A descendant of a just-saturated ancestor must not also be
                // counted on this same add, or two candidates can end up in
                // a proper-prefix relation.
                break;
            }
        }
    }
}

fn is_strictly_under(key: &str, branch: &str) -> bool {
    key.len() > branch.len() && key.starts_with(branch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_stay_under_group_count_and_non_overlapping() {
        let mut ct = CountingTrie::new("", 2);
        for k in ["a1", "a2", "b1", "b2", "c1"] {
            ct.add_data(k, ());
        }
        assert_eq!(ct.candidates(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn root_prefix_itself_never_becomes_a_candidate() {
        let mut ct = CountingTrie::new("a", 2);
        for k in ["a1", "a2"] {
            ct.add_data(k, ());
        }
        // Both objects share ancestor "a1"/"a2" at length prefix_len + 1,
        // but they diverge there, so neither saturates and "a" is never
        // eligible regardless.
        assert!(ct.candidates().is_empty());
    }

    #[test]
    fn saturated_ancestor_stops_counting_its_descendants() {
        let mut ct = CountingTrie::new("", 1);
        ct.add_data("a1", ());
        // "a" saturates at count 1 immediately; "a2" still gets its own
        // independent subtree counted, but "a" itself must not re-trigger.
        ct.add_data("a2", ());
        assert_eq!(ct.candidates(), &["a".to_string()]);
    }

    #[test]
    fn saturating_ancestor_does_not_also_saturate_its_own_descendant() {
        let mut ct = CountingTrie::new("", 2);
        ct.add_data("aax", ());
        // This add saturates "a" (count 2) and, on the same character walk,
        // would also bring "aa" to count 2 - only the shallower ancestor may
        // become a candidate here, not both.
        ct.add_data("aay", ());
        assert_eq!(ct.candidates(), &["a".to_string()]);
    }

    #[test]
    fn misplaced_detected_regardless_of_add_order() {
        let mut forward = CountingTrie::new("", 100);
        forward.add_distributed("b");
        forward.add_data("b1", "forward");

        let mut backward = CountingTrie::new("", 100);
        backward.add_data("b1", "backward");
        backward.add_distributed("b");

        assert_eq!(forward.misplaced(), &[("b1".to_string(), "b".to_string(), "forward")]);
        assert_eq!(backward.misplaced(), &[("b1".to_string(), "b".to_string(), "backward")]);
    }

    #[test]
    fn equal_key_is_not_misplaced_under_itself() {
        let mut ct = CountingTrie::new("", 100);
        ct.add_distributed("b1");
        ct.add_data("b1", ());
        assert!(ct.misplaced().is_empty());
    }
}
