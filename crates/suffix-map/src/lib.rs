//! A map keyed by domain-name suffixes.
//!
//! Lookups resolve through the *longest matching suffix* on label
//! boundaries: with an entry for `gmail.com`, both `gmail.com` and
//! `mail.gmail.com` resolve to it, while `notgmail.com` does not.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

#[derive(Clone)]
struct Node<V: Clone> {
    value: Option<V>,
    children: HashMap<String, Self>,
}

impl<V: Clone> Node<V> {
    fn new() -> Self {
        Self {
            value: None,
            children: HashMap::new(),
        }
    }
}

impl<V: Debug + Clone> Debug for Node<V> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Node")
            .field("value", &self.value)
            .field("children", &self.children)
            .finish()
    }
}

/// A SuffixMap is conceptually similar to a HashMap whose keys are domain
/// name strings like "example.com". A lookup walks the labels of the query
/// from the right and returns the value stored at the deepest entry whose
/// labels are all matched, so subdomains resolve through their parent
/// entries. Matching is per-label: "badexample.com" never matches an
/// "example.com" entry.
#[derive(Default, Clone, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, V>", into = "BTreeMap<String,V>")]
pub struct SuffixMap<V: Clone> {
    top: HashMap<String, Node<V>>,
}

impl<V: Debug + Clone> Debug for SuffixMap<V> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("SuffixMap").field("top", &self.top).finish()
    }
}

impl<V: Clone> SuffixMap<V> {
    pub fn new() -> Self {
        Self {
            top: HashMap::new(),
        }
    }

    pub fn insert(&mut self, suffix: &str, value: V) {
        let mut current = &mut self.top;
        let mut iter = suffix.rsplit('.').peekable();
        while let Some(seg) = iter.next() {
            let node = current
                .entry(seg.to_ascii_lowercase())
                .or_insert_with(Node::new);

            if iter.peek().is_none() {
                node.value.replace(value);
                return;
            }
            current = &mut node.children;
        }
    }

    /// Resolve `name` through the longest matching suffix entry.
    pub fn get(&self, name: &str) -> Option<&V> {
        let mut current = &self.top;
        let mut best = None;
        for seg in name.rsplit('.') {
            match current.get(&seg.to_ascii_lowercase()) {
                Some(node) => {
                    if let Some(value) = &node.value {
                        best = Some(value);
                    }
                    current = &node.children;
                }
                None => break,
            }
        }
        best
    }

    /// Like `get`, but also reports the suffix string that matched.
    pub fn get_with_suffix(&self, name: &str) -> Option<(String, &V)> {
        let mut current = &self.top;
        let mut best = None;
        let mut labels: Vec<&str> = vec![];
        for seg in name.rsplit('.') {
            match current.get(&seg.to_ascii_lowercase()) {
                Some(node) => {
                    labels.push(seg);
                    if let Some(value) = &node.value {
                        let mut suffix: Vec<&str> = labels.clone();
                        suffix.reverse();
                        best = Some((suffix.join(".").to_ascii_lowercase(), value));
                    }
                    current = &node.children;
                }
                None => break,
            }
        }
        best
    }
}

impl<V: Clone> From<BTreeMap<String, V>> for SuffixMap<V> {
    fn from(map: BTreeMap<String, V>) -> Self {
        let mut result = Self::new();
        for (k, v) in map {
            result.insert(&k, v);
        }
        result
    }
}

impl<V: Clone> From<SuffixMap<V>> for BTreeMap<String, V> {
    fn from(map: SuffixMap<V>) -> Self {
        fn walk<V: Clone>(
            node: &Node<V>,
            labels: &mut Vec<String>,
            result: &mut BTreeMap<String, V>,
        ) {
            if let Some(v) = &node.value {
                let mut suffix: Vec<String> = labels.clone();
                suffix.reverse();
                result.insert(suffix.join("."), v.clone());
            }
            for (label, child) in &node.children {
                labels.push(label.clone());
                walk(child, labels, result);
                labels.pop();
            }
        }

        let mut result = BTreeMap::new();
        for (label, node) in &map.top {
            let mut labels = vec![label.clone()];
            walk(node, &mut labels, &mut result);
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn map() -> SuffixMap<u32> {
        let mut map = SuffixMap::new();
        map.insert("gmail.com", 1);
        map.insert("yahoo.co.uk", 2);
        map.insert("mail.example.com", 3);
        map.insert("example.com", 4);
        map
    }

    #[test]
    fn exact_match() {
        let map = map();
        assert_eq!(map.get("gmail.com"), Some(&1));
        assert_eq!(map.get("yahoo.co.uk"), Some(&2));
    }

    #[test]
    fn subdomain_resolves_through_suffix() {
        let map = map();
        assert_eq!(map.get("mx.gmail.com"), Some(&1));
        assert_eq!(map.get("deep.mx.gmail.com"), Some(&1));
    }

    #[test]
    fn longest_suffix_wins() {
        let map = map();
        assert_eq!(map.get("example.com"), Some(&4));
        assert_eq!(map.get("mail.example.com"), Some(&3));
        assert_eq!(map.get("a.mail.example.com"), Some(&3));
        assert_eq!(map.get("web.example.com"), Some(&4));
    }

    #[test]
    fn label_boundaries_are_respected() {
        let map = map();
        assert_eq!(map.get("notgmail.com"), None);
        assert_eq!(map.get("gmail.com.evil.org"), None);
        assert_eq!(map.get("com"), None);
    }

    #[test]
    fn case_insensitive() {
        let map = map();
        assert_eq!(map.get("MX.GMail.Com"), Some(&1));
    }

    #[test]
    fn reports_matched_suffix() {
        let map = map();
        let (suffix, value) = map.get_with_suffix("mx.gmail.com").unwrap();
        assert_eq!(suffix, "gmail.com");
        assert_eq!(*value, 1);
    }
}
