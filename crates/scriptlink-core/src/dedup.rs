use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::event::Scene;

/// Bounded key set. Reaching the cap clears it wholesale, so an entry older
/// than the last clear can be admitted again.
#[derive(Debug, Clone)]
pub struct DedupCache {
    cap: usize,
    seen: HashSet<String>,
    clears: u64,
}

impl DedupCache {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            seen: HashSet::with_capacity(cap.min(4096)),
            clears: 0,
        }
    }

    pub fn check_and_insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.seen.len() >= self.cap {
            self.seen.clear();
            self.clears += 1;
        }
        self.seen.insert(key.to_string());
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clears(&self) -> u64 {
        self.clears
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn content_prefix(text: &str, raw_content: &str, prefix_chars: usize) -> String {
    if text.is_empty() {
        return sha256_hex(raw_content.as_bytes());
    }
    text.chars().take(prefix_chars).collect()
}

pub fn dedup_key(timestamp_ms: i64, scene: Scene, from: &str, to: &str, prefix: &str) -> String {
    let material = format!("{timestamp_ms}|{}|{from}|{to}|{prefix}", scene.as_str());
    sha256_hex(material.as_bytes())
}
