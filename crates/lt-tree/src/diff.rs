//! # Tree Differ
//!
//! Compares the previously sent tree with the freshly generated one and
//! emits the minimal update payload.
//!
//! Rules, in order:
//! 1. No previous tree: send the current tree in full.
//! 2. Matching region fingerprints: emit only changed slots, omit `s`.
//! 3. Differing fingerprints: retransmit the region, statics included.
//! 4. Ranges diff by item key into `a`/`i`/`r`/`u`/`o` operations;
//!    unkeyed ranges degrade to whole-range replacement.
//! 5. Operations are emitted removes first, then updates, then
//!    inserts/appends, then at most one trailing reorder, each group in
//!    stable position order.
//!
//! Diffing never fails. Malformed input (an S-D violation, a slot whose
//! kind changed under a matching fingerprint) falls back to a full
//! send and records a diagnostic in the report.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::DiffReport;
use crate::node::{
    RangeFullUpdate, RangeItem, RangeOp, RangeOpsUpdate, RangeTree, SlotValue, TreeNode,
    UpdateItem, UpdateNode, UpdateSlot,
};

/// Diff `prev` against `cur`, discarding diagnostics.
pub fn diff(prev: Option<&TreeNode>, cur: &TreeNode) -> UpdateNode {
    let mut report = DiffReport::default();
    diff_with(prev, cur, &mut report)
}

/// Diff `prev` against `cur`, recording any recovered malformations.
pub fn diff_with(prev: Option<&TreeNode>, cur: &TreeNode, report: &mut DiffReport) -> UpdateNode {
    match prev {
        None => UpdateNode::full(cur),
        Some(prev) => diff_node(prev, cur, report),
    }
}

fn diff_node(prev: &TreeNode, cur: &TreeNode, report: &mut DiffReport) -> UpdateNode {
    if !prev.arity_holds() || !cur.arity_holds() {
        report.record("statics/dynamics arity violated; falling back to full send");
        return UpdateNode::full(cur);
    }
    if prev.fingerprint != cur.fingerprint {
        return UpdateNode::full(cur);
    }

    let mut slots = BTreeMap::new();
    for (slot, cur_value) in &cur.slots {
        match prev.slots.get(slot) {
            Some(prev_value) => {
                if let Some(update) = diff_slot(prev_value, cur_value, report) {
                    slots.insert(*slot, update);
                }
            }
            None => {
                report.record(format!("slot {} appeared under a matching fingerprint", slot));
                slots.insert(*slot, UpdateSlot::full(cur_value));
            }
        }
    }
    UpdateNode { statics: None, fingerprint: None, slots }
}

fn diff_slot(
    prev: &SlotValue,
    cur: &SlotValue,
    report: &mut DiffReport,
) -> Option<UpdateSlot> {
    if prev == cur {
        return None;
    }
    match (prev, cur) {
        (SlotValue::Scalar(_), SlotValue::Scalar(text)) => Some(UpdateSlot::Scalar(text.clone())),
        (SlotValue::Nested(prev), SlotValue::Nested(cur)) => {
            if prev.fingerprint != cur.fingerprint {
                // Shape changed (e.g. a conditional flipped): the region
                // retransmits in full, statics included.
                return Some(UpdateSlot::Nested(UpdateNode::full(cur)));
            }
            let update = diff_node(prev, cur, report);
            (!update.is_empty()).then(|| UpdateSlot::Nested(update))
        }
        (SlotValue::Range(prev), SlotValue::Range(cur)) => diff_range(prev, cur, report),
        (_, cur) => {
            report.record("slot kind changed under a matching fingerprint");
            Some(UpdateSlot::full(cur))
        }
    }
}

// ============================================================================
// RANGE DIFF
// ============================================================================

fn diff_range(
    prev: &RangeTree,
    cur: &RangeTree,
    report: &mut DiffReport,
) -> Option<UpdateSlot> {
    if prev == cur {
        return None;
    }

    if !prev.keyed || !cur.keyed {
        return Some(full_replacement(prev, cur));
    }

    let prev_by_key: HashMap<&str, &RangeItem> =
        prev.items.iter().map(|item| (item.key.as_str(), item)).collect();
    let cur_keys: HashSet<&str> = cur.items.iter().map(|item| item.key.as_str()).collect();
    if prev_by_key.len() != prev.items.len() || cur_keys.len() != cur.items.len() {
        report.record("duplicate range keys survived generation; replacing whole range");
        return Some(full_replacement(prev, cur));
    }

    let mut ops = Vec::new();

    // Removes, in previous-list position order.
    for item in &prev.items {
        if !cur_keys.contains(item.key.as_str()) {
            ops.push(RangeOp::Remove { key: item.key.clone() });
        }
    }

    // Updates, in new-list position order, carrying only changed slots.
    for item in &cur.items {
        if let Some(prev_item) = prev_by_key.get(item.key.as_str()) {
            let dynamics = diff_item(prev_item, item, report);
            if !dynamics.is_empty() {
                ops.push(RangeOp::Update { key: item.key.clone(), dynamics });
            }
        }
    }

    // Inserts, in new-list position order. A run of additions forming a
    // suffix of the new list collapses into a single append.
    let added: Vec<(usize, &RangeItem)> = cur
        .items
        .iter()
        .enumerate()
        .filter(|(_, item)| !prev_by_key.contains_key(item.key.as_str()))
        .collect();
    if !added.is_empty() {
        let tail_start = cur.items.len() - added.len();
        let is_suffix = added.iter().enumerate().all(|(i, (pos, _))| *pos == tail_start + i);
        if is_suffix {
            // Iteration statics ride along only on the first ever
            // non-empty render of this range.
            let statics = if prev.statics.is_none() { cur.statics.clone() } else { None };
            ops.push(RangeOp::Append {
                items: added.iter().map(|(_, item)| full_item(item)).collect(),
                statics,
            });
        } else {
            for (pos, item) in &added {
                let after = (*pos > 0).then(|| cur.items[pos - 1].key.clone());
                ops.push(RangeOp::Insert { after, item: full_item(item) });
            }
        }
    }

    // One trailing reorder, only when the surviving items' relative
    // order actually changed; element-wise operations already position
    // everything else.
    let prev_survivors: Vec<&str> = prev
        .items
        .iter()
        .map(|item| item.key.as_str())
        .filter(|key| cur_keys.contains(key))
        .collect();
    let cur_survivors: Vec<&str> = cur
        .items
        .iter()
        .map(|item| item.key.as_str())
        .filter(|key| prev_by_key.contains_key(key))
        .collect();
    if prev_survivors != cur_survivors {
        ops.push(RangeOp::Reorder {
            keys: cur.items.iter().map(|item| item.key.clone()).collect(),
        });
    }

    (!ops.is_empty()).then(|| UpdateSlot::RangeOps(RangeOpsUpdate { ops }))
}

/// Per-item sparse diff: only the slots whose values changed.
fn diff_item(
    prev: &RangeItem,
    cur: &RangeItem,
    report: &mut DiffReport,
) -> BTreeMap<u32, UpdateSlot> {
    let mut dynamics = BTreeMap::new();
    if prev.dynamics.len() != cur.dynamics.len() {
        report.record("range item arity changed; resending item in full");
        for (slot, value) in cur.dynamics.iter().enumerate() {
            dynamics.insert(slot as u32, UpdateSlot::full(value));
        }
        return dynamics;
    }
    for (slot, (prev_value, cur_value)) in prev.dynamics.iter().zip(&cur.dynamics).enumerate() {
        if let Some(update) = diff_slot(prev_value, cur_value, report) {
            dynamics.insert(slot as u32, update);
        }
    }
    dynamics
}

fn full_replacement(prev: &RangeTree, cur: &RangeTree) -> UpdateSlot {
    let statics = if prev.statics.is_none() { cur.statics.clone() } else { None };
    UpdateSlot::RangeFull(RangeFullUpdate {
        statics,
        items: cur.items.iter().map(full_item).collect(),
    })
}

fn full_item(item: &RangeItem) -> UpdateItem {
    UpdateItem {
        key: item.key.clone(),
        dynamics: item.dynamics.iter().map(UpdateSlot::full).collect(),
    }
}
