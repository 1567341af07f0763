//! # Structural Fingerprints
//!
//! A fingerprint hashes the *shape* of a region (its static fragments
//! and the kind of each slot) independent of slot values. Two renders
//! with equal fingerprints can be patched slot-by-slot; a mismatch means
//! the statics must be retransmitted.
//!
//! The branch seed keeps the two arms of a conditional distinct even when
//! they happen to render identical statics: branch identity, not output
//! identity, defines the shape.

use std::collections::BTreeMap;

use crate::node::{RangeTree, SlotValue};

/// Seed for the taken branch of a conditional or with-block.
pub const SEED_TAKEN: u8 = 1;
/// Seed for the else branch.
pub const SEED_ELSE: u8 = 0;
/// Seed for regions with no branch identity (root, loop body, sub-tree).
pub const SEED_PLAIN: u8 = 2;

/// Fingerprint a rendered region.
pub fn region(seed: u8, statics: &[String], slots: &BTreeMap<u32, SlotValue>) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[seed]);
    hasher.update(&(statics.len() as u64).to_le_bytes());
    for fragment in statics {
        hasher.update(&(fragment.len() as u64).to_le_bytes());
        hasher.update(fragment.as_bytes());
    }
    for (slot, value) in slots {
        hasher.update(&slot.to_le_bytes());
        hasher.update(&[kind_tag(value)]);
    }
    truncate(hasher)
}

/// Fingerprint a loop's iteration shape from its statics.
pub fn range(statics: &[String]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(statics.len() as u64).to_le_bytes());
    for fragment in statics {
        hasher.update(&(fragment.len() as u64).to_le_bytes());
        hasher.update(fragment.as_bytes());
    }
    truncate(hasher)
}

fn kind_tag(value: &SlotValue) -> u8 {
    match value {
        SlotValue::Scalar(_) => 0,
        SlotValue::Nested(_) => 1,
        SlotValue::Range(_) => 2,
    }
}

fn truncate(hasher: blake3::Hasher) -> u64 {
    let bytes = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes.as_bytes()[..8]);
    u64::from_le_bytes(out)
}

/// Recompute a range fingerprint after the patcher adopts new statics.
pub fn refresh_range(tree: &mut RangeTree) {
    tree.fingerprint = tree.statics.as_deref().map(range);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TreeNode;

    fn statics(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_value_independent() {
        let slots_a = BTreeMap::from([(0u32, SlotValue::Scalar("x".into()))]);
        let slots_b = BTreeMap::from([(0u32, SlotValue::Scalar("totally different".into()))]);
        let s = statics(&["<b>", "</b>"]);
        assert_eq!(region(SEED_PLAIN, &s, &slots_a), region(SEED_PLAIN, &s, &slots_b));
    }

    #[test]
    fn test_statics_change_shape() {
        let slots = BTreeMap::from([(0u32, SlotValue::Scalar("x".into()))]);
        assert_ne!(
            region(SEED_PLAIN, &statics(&["<b>", "</b>"]), &slots),
            region(SEED_PLAIN, &statics(&["<i>", "</i>"]), &slots),
        );
    }

    #[test]
    fn test_slot_kind_changes_shape() {
        let s = statics(&["a", "b"]);
        let scalar = BTreeMap::from([(0u32, SlotValue::Scalar("x".into()))]);
        let nested = BTreeMap::from([(0u32, SlotValue::Nested(TreeNode::default()))]);
        assert_ne!(region(SEED_PLAIN, &s, &scalar), region(SEED_PLAIN, &s, &nested));
    }

    #[test]
    fn test_branch_seed_distinguishes_identical_output() {
        let s = statics(&["same"]);
        let slots = BTreeMap::new();
        assert_ne!(region(SEED_TAKEN, &s, &slots), region(SEED_ELSE, &s, &slots));
    }

    #[test]
    fn test_fragment_boundaries_matter() {
        // ["ab", ""] and ["a", "b"] must not collide.
        let slots = BTreeMap::from([(0u32, SlotValue::Scalar("x".into()))]);
        assert_ne!(
            region(SEED_PLAIN, &statics(&["ab", ""]), &slots),
            region(SEED_PLAIN, &statics(&["a", "b"]), &slots),
        );
    }
}
