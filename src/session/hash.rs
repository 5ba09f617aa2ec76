// src/session/hash.rs

//! Deterministic session state digest
//!
//! The hash is the optimistic-concurrency token a client echoes back on
//! `apply`. It covers every pack and page field in a canonical order:
//! packs sorted by name, pack fields in a fixed order, then pages sorted by
//! name with their own fixed field order. `ref_id`, `user_id` and the
//! timestamp are not covered: a select-then-deselect round trip restores
//! the original hash.
//!
//! Every field is written as `tag | length | bytes`, so no two different
//! states can produce the same byte stream by shifting content between
//! adjacent fields.

use super::{PackState, SessionState};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Length of the hex digest carried in `SessionState::hash`
pub const HASH_LEN: usize = 12;

/// Feeds canonical, length-prefixed fields into SHA-256
struct CanonicalWriter {
    hasher: Sha256,
}

impl CanonicalWriter {
    fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    fn bytes(&mut self, tag: u8, data: &[u8]) {
        self.hasher.update([tag]);
        self.hasher.update((data.len() as u64).to_le_bytes());
        self.hasher.update(data);
    }

    fn str(&mut self, value: &str) {
        self.bytes(b's', value.as_bytes());
    }

    fn opt_str(&mut self, value: Option<&str>) {
        match value {
            Some(v) => self.str(v),
            None => self.bytes(b'n', &[]),
        }
    }

    fn bool(&mut self, value: bool) {
        self.bytes(b'b', &[value as u8]);
    }

    fn count(&mut self, value: usize) {
        self.bytes(b'c', &(value as u64).to_le_bytes());
    }

    fn finish(self) -> String {
        let mut digest = format!("{:x}", self.hasher.finalize());
        digest.truncate(HASH_LEN);
        digest
    }
}

/// Hash a pack map
pub fn hash_packs(packs: &BTreeMap<String, PackState>) -> String {
    let mut w = CanonicalWriter::new();
    w.count(packs.len());

    // BTreeMap iteration is already sorted by key
    for (name, pack) in packs {
        w.str(name);
        w.str(pack.action.as_str());
        w.opt_str(pack.auto_selected_reason.as_deref());
        w.opt_str(pack.current_version.as_deref());
        w.opt_str(pack.target_version.as_deref());
        w.str(&pack.prefix);
        w.bool(pack.installed);

        w.count(pack.pages.len());
        for page in pack.pages.values() {
            w.str(&page.name);
            w.str(&page.default_title);
            w.str(&page.final_title);
            w.bool(page.has_conflict);
            w.opt_str(page.conflict_type.map(|c| c.as_str()));
            w.bool(page.installed);
        }
    }

    w.finish()
}

/// Hash a session's packs
pub fn compute_hash(state: &SessionState) -> String {
    hash_packs(&state.packs)
}
