//! # Reference Patcher
//!
//! Applies an update to a held tree, mirroring what the browser-side
//! patcher does to the DOM. The live runtime itself never needs this
//! (it retains the freshly generated tree), but it anchors the round-trip
//! property (`apply(P, diff(P, C)) ≡ C`) in tests and backs dev-mode
//! diagnostics.

use crate::fingerprint;
use crate::node::{
    RangeItem, RangeOp, RangeTree, SlotValue, TreeNode, UpdateItem, UpdateNode, UpdateSlot,
};

/// Apply `update` to `base`. `None` base is the first render.
pub fn apply(base: Option<&TreeNode>, update: &UpdateNode) -> TreeNode {
    match base {
        None => materialize(update),
        Some(base) => apply_node(base, update),
    }
}

fn apply_node(base: &TreeNode, update: &UpdateNode) -> TreeNode {
    let mut next = base.clone();
    if update.statics.is_some() {
        // A full region emission replaces everything at this level.
        return materialize(update);
    }
    for (slot, update_slot) in &update.slots {
        let applied = match (next.slots.get(slot), update_slot) {
            (Some(SlotValue::Nested(node)), UpdateSlot::Nested(nested)) => {
                SlotValue::Nested(apply_node(node, nested))
            }
            (Some(SlotValue::Range(range)), UpdateSlot::RangeOps(ops)) => {
                SlotValue::Range(apply_range_ops(range, &ops.ops))
            }
            (Some(SlotValue::Range(range)), UpdateSlot::RangeFull(full)) => {
                let statics = full.statics.clone().or_else(|| range.statics.clone());
                SlotValue::Range(materialize_range(statics, &full.items))
            }
            (_, update_slot) => materialize_slot(update_slot),
        };
        next.slots.insert(*slot, applied);
    }
    next
}

// ============================================================================
// FULL MATERIALIZATION
// ============================================================================

fn materialize(update: &UpdateNode) -> TreeNode {
    let statics = update.statics.clone();
    let slots = update
        .slots
        .iter()
        .map(|(slot, value)| (*slot, materialize_slot(value)))
        .collect();
    let fingerprint = update.fingerprint;
    TreeNode { statics, fingerprint, slots }
}

fn materialize_slot(update: &UpdateSlot) -> SlotValue {
    match update {
        UpdateSlot::Scalar(text) => SlotValue::Scalar(text.clone()),
        UpdateSlot::Nested(node) => SlotValue::Nested(materialize(node)),
        UpdateSlot::RangeFull(full) => {
            SlotValue::Range(materialize_range(full.statics.clone(), &full.items))
        }
        UpdateSlot::RangeOps(ops) => {
            // Ops against nothing: start from an empty keyed range.
            SlotValue::Range(apply_range_ops(&RangeTree { keyed: true, ..Default::default() }, &ops.ops))
        }
    }
}

fn materialize_range(statics: Option<Vec<String>>, items: &[UpdateItem]) -> RangeTree {
    let mut range = RangeTree {
        statics,
        fingerprint: None,
        items: items.iter().map(materialize_item).collect(),
        keyed: true,
    };
    fingerprint::refresh_range(&mut range);
    range
}

fn materialize_item(item: &UpdateItem) -> RangeItem {
    RangeItem {
        key: item.key.clone(),
        dynamics: item.dynamics.iter().map(materialize_slot).collect(),
    }
}

// ============================================================================
// RANGE OPERATIONS
// ============================================================================

fn apply_range_ops(base: &RangeTree, ops: &[RangeOp]) -> RangeTree {
    let mut next = base.clone();
    for op in ops {
        match op {
            RangeOp::Remove { key } => {
                next.items.retain(|item| item.key != *key);
            }
            RangeOp::Update { key, dynamics } => {
                if let Some(item) = next.items.iter_mut().find(|item| item.key == *key) {
                    for (slot, update) in dynamics {
                        let slot = *slot as usize;
                        if slot >= item.dynamics.len() {
                            item.dynamics.resize(slot + 1, SlotValue::Scalar(String::new()));
                        }
                        item.dynamics[slot] = match (&item.dynamics[slot], update) {
                            (SlotValue::Nested(node), UpdateSlot::Nested(nested)) => {
                                SlotValue::Nested(apply_node(node, nested))
                            }
                            (SlotValue::Range(range), UpdateSlot::RangeOps(ops)) => {
                                SlotValue::Range(apply_range_ops(range, &ops.ops))
                            }
                            (_, update) => materialize_slot(update),
                        };
                    }
                }
            }
            RangeOp::Insert { after, item } => {
                let index = match after {
                    None => 0,
                    Some(key) => next
                        .items
                        .iter()
                        .position(|existing| existing.key == *key)
                        .map(|i| i + 1)
                        .unwrap_or(next.items.len()),
                };
                next.items.insert(index, materialize_item(item));
            }
            RangeOp::Append { items, statics } => {
                if let Some(statics) = statics {
                    next.statics = Some(statics.clone());
                }
                next.items.extend(items.iter().map(materialize_item));
            }
            RangeOp::Reorder { keys } => {
                let mut reordered = Vec::with_capacity(next.items.len());
                for key in keys {
                    if let Some(pos) = next.items.iter().position(|item| item.key == *key) {
                        reordered.push(next.items.remove(pos));
                    }
                }
                reordered.append(&mut next.items);
                next.items = reordered;
            }
        }
    }
    fingerprint::refresh_range(&mut next);
    next
}

// ============================================================================
// CLIENT-VIEW EQUIVALENCE
// ============================================================================

/// Deep equality as the client sees it: values and identity must match;
/// statics are compared only where both sides hold them (a patched tree
/// legitimately keeps cached statics the server stopped sending).
pub fn equivalent(a: &TreeNode, b: &TreeNode) -> bool {
    if let (Some(sa), Some(sb)) = (&a.statics, &b.statics) {
        if sa != sb {
            return false;
        }
    }
    if a.slots.len() != b.slots.len() {
        return false;
    }
    a.slots.iter().zip(&b.slots).all(|((ka, va), (kb, vb))| {
        ka == kb
            && match (va, vb) {
                (SlotValue::Scalar(a), SlotValue::Scalar(b)) => a == b,
                (SlotValue::Nested(a), SlotValue::Nested(b)) => equivalent(a, b),
                (SlotValue::Range(a), SlotValue::Range(b)) => range_equivalent(a, b),
                _ => false,
            }
    })
}

fn range_equivalent(a: &RangeTree, b: &RangeTree) -> bool {
    if let (Some(sa), Some(sb)) = (&a.statics, &b.statics) {
        if sa != sb {
            return false;
        }
    }
    a.items.len() == b.items.len()
        && a.items.iter().zip(&b.items).all(|(ia, ib)| {
            ia.key == ib.key
                && ia.dynamics.len() == ib.dynamics.len()
                && ia
                    .dynamics
                    .iter()
                    .zip(&ib.dynamics)
                    .all(|(va, vb)| match (va, vb) {
                        (SlotValue::Scalar(a), SlotValue::Scalar(b)) => a == b,
                        (SlotValue::Nested(a), SlotValue::Nested(b)) => equivalent(a, b),
                        (SlotValue::Range(a), SlotValue::Range(b)) => range_equivalent(a, b),
                        _ => false,
                    })
        })
}
