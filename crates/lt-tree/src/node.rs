//! # Tree Node Model - The Wire Contract
//!
//! The runtime representation of a rendered template region and the
//! update payloads diffed from it. These types define the exact JSON the
//! client patcher consumes:
//!
//! ```text
//! Tree Node      { "s": [statics…], "0": …, "1": …, … }
//! Range Node     { "s": [iteration statics…], "d": [[item dynamics…]…] }
//! Update Node    sparse Tree Node: only changed entries, no "s" unless
//!                the region's shape changed
//! Range ops      ["a", items(, statics)] | ["i", after, item] |
//!                ["r", key] | ["u", key, {slot: value…}] | ["o", [keys…]]
//! ```
//!
//! Fingerprints and item keys are server-side bookkeeping: they drive
//! shape detection and keyed diffing but never serialize. The client
//! recovers item identity from the rendered dynamics (e.g. a `data-key`
//! attribute the template itself emits).

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// One dynamic slot value inside a rendered region.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    /// Rendered text.
    Scalar(String),
    /// A nested region: conditional branch or inlined sub-template.
    Nested(TreeNode),
    /// A loop expansion.
    Range(RangeTree),
}

/// A fully rendered region: N+1 static fragments flanking N slots.
///
/// `statics` is `None` on regions that have never rendered any structure
/// (only range trees use this); on generated trees it is always
/// populated and `statics.len() == slots.len() + 1` (statics flank the
/// slots).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TreeNode {
    pub statics: Option<Vec<String>>,
    /// Structural fingerprint of this region's shape. Never serialized.
    pub fingerprint: Option<u64>,
    pub slots: BTreeMap<u32, SlotValue>,
}

/// A rendered loop. Iteration statics appear once; each item carries its
/// dynamics tuple plus a server-side identity key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeTree {
    /// Statics of one iteration; `None` while the loop has never rendered
    /// a non-empty body.
    pub statics: Option<Vec<String>>,
    /// Fingerprint of the iteration shape. Never serialized.
    pub fingerprint: Option<u64>,
    pub items: Vec<RangeItem>,
    /// False when items lacked the designated key field or collided on
    /// it; unkeyed ranges diff as whole-range replacements.
    pub keyed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeItem {
    /// Caller-designated identity, or the iteration index when unkeyed.
    pub key: String,
    /// Slot values of one iteration, in slot order.
    pub dynamics: Vec<SlotValue>,
}

impl TreeNode {
    /// Arity check: statics, when present, must flank the slots.
    pub fn arity_holds(&self) -> bool {
        match &self.statics {
            Some(s) => s.len() == self.slots.len() + 1,
            None => true,
        }
    }

    /// Flatten the full tree back into HTML. Only meaningful on trees
    /// with complete statics (i.e. generator output, not updates).
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        let empty = Vec::new();
        let statics = self.statics.as_ref().unwrap_or(&empty);
        let mut fragments = statics.iter();
        if let Some(first) = fragments.next() {
            out.push_str(first);
        }
        for value in self.slots.values() {
            value.write_html(out);
            if let Some(frag) = fragments.next() {
                out.push_str(frag);
            }
        }
    }
}

impl SlotValue {
    fn write_html(&self, out: &mut String) {
        match self {
            SlotValue::Scalar(text) => out.push_str(text),
            SlotValue::Nested(node) => node.write_html(out),
            SlotValue::Range(range) => range.write_html(out),
        }
    }
}

impl RangeTree {
    fn write_html(&self, out: &mut String) {
        let empty = Vec::new();
        let statics = self.statics.as_ref().unwrap_or(&empty);
        for item in &self.items {
            let mut fragments = statics.iter();
            if let Some(first) = fragments.next() {
                out.push_str(first);
            }
            for value in &item.dynamics {
                value.write_html(out);
                if let Some(frag) = fragments.next() {
                    out.push_str(frag);
                }
            }
        }
    }
}

// ============================================================================
// UPDATE NODES
// ============================================================================

/// A sparse tree: only entries that differ from the previously sent tree
/// at the same path. A first render is a fully populated `UpdateNode`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateNode {
    pub statics: Option<Vec<String>>,
    /// Carried for server bookkeeping on full emissions; never serialized.
    pub fingerprint: Option<u64>,
    pub slots: BTreeMap<u32, UpdateSlot>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSlot {
    Scalar(String),
    Nested(UpdateNode),
    /// Whole-range (re)send: first render of a loop, or the unkeyed
    /// degradation.
    RangeFull(RangeFullUpdate),
    /// Granular keyed mutations.
    RangeOps(RangeOpsUpdate),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeFullUpdate {
    /// Included only when the client has never received these statics.
    pub statics: Option<Vec<String>>,
    pub items: Vec<UpdateItem>,
}

/// One transmitted loop item. The key never serializes; it exists so
/// the reference patcher can mirror the client's identity bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateItem {
    pub key: String,
    pub dynamics: Vec<UpdateSlot>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeOpsUpdate {
    pub ops: Vec<RangeOp>,
}

/// A tagged range mutation, serialized as a tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeOp {
    /// `["a", items]` / `["a", items, statics]`: append at the tail;
    /// statics ride along on the first ever non-empty render.
    Append { items: Vec<UpdateItem>, statics: Option<Vec<String>> },
    /// `["i", afterKey, item]`: insert after the keyed item, or at the
    /// head when `after` is `None`.
    Insert { after: Option<String>, item: UpdateItem },
    /// `["r", key]`
    Remove { key: String },
    /// `["u", key, dynamics]`: only the changed slots of one item.
    Update { key: String, dynamics: BTreeMap<u32, UpdateSlot> },
    /// `["o", keys]`: reorder to the given key sequence.
    Reorder { keys: Vec<String> },
}

impl UpdateNode {
    /// Rule 1 of the diff: a first render transmits the current tree in
    /// full, statics included at every region.
    pub fn full(tree: &TreeNode) -> Self {
        Self {
            statics: tree.statics.clone(),
            fingerprint: tree.fingerprint,
            slots: tree
                .slots
                .iter()
                .map(|(k, v)| (*k, UpdateSlot::full(v)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statics.is_none() && self.slots.is_empty()
    }
}

impl UpdateSlot {
    pub fn full(value: &SlotValue) -> Self {
        match value {
            SlotValue::Scalar(s) => Self::Scalar(s.clone()),
            SlotValue::Nested(node) => Self::Nested(UpdateNode::full(node)),
            SlotValue::Range(range) => Self::RangeFull(RangeFullUpdate {
                statics: range.statics.clone(),
                items: range.items.iter().map(UpdateItem::full).collect(),
            }),
        }
    }
}

impl UpdateItem {
    fn full(item: &RangeItem) -> Self {
        Self {
            key: item.key.clone(),
            dynamics: item.dynamics.iter().map(UpdateSlot::full).collect(),
        }
    }
}

// ============================================================================
// WIRE SERIALIZATION
// ============================================================================

impl Serialize for TreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.statics.iter().len() + self.slots.len();
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(statics) = &self.statics {
            map.serialize_entry("s", statics)?;
        }
        for (slot, value) in &self.slots {
            map.serialize_entry(&slot.to_string(), value)?;
        }
        map.end()
    }
}

impl Serialize for SlotValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SlotValue::Scalar(text) => serializer.serialize_str(text),
            SlotValue::Nested(node) => node.serialize(serializer),
            SlotValue::Range(range) => range.serialize(serializer),
        }
    }
}

impl Serialize for RangeTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.statics.iter().len() + 1;
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(statics) = &self.statics {
            map.serialize_entry("s", statics)?;
        }
        let dynamics: Vec<&Vec<SlotValue>> = self.items.iter().map(|i| &i.dynamics).collect();
        map.serialize_entry("d", &dynamics)?;
        map.end()
    }
}

impl Serialize for UpdateNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.statics.iter().len() + self.slots.len();
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(statics) = &self.statics {
            map.serialize_entry("s", statics)?;
        }
        for (slot, value) in &self.slots {
            map.serialize_entry(&slot.to_string(), value)?;
        }
        map.end()
    }
}

impl Serialize for UpdateSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            UpdateSlot::Scalar(text) => serializer.serialize_str(text),
            UpdateSlot::Nested(node) => node.serialize(serializer),
            UpdateSlot::RangeFull(full) => full.serialize(serializer),
            UpdateSlot::RangeOps(ops) => ops.serialize(serializer),
        }
    }
}

impl Serialize for RangeFullUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.statics.iter().len() + 1;
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(statics) = &self.statics {
            map.serialize_entry("s", statics)?;
        }
        let dynamics: Vec<&Vec<UpdateSlot>> = self.items.iter().map(|i| &i.dynamics).collect();
        map.serialize_entry("d", &dynamics)?;
        map.end()
    }
}

impl Serialize for RangeOpsUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("d", &self.ops)?;
        map.end()
    }
}

impl Serialize for RangeOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RangeOp::Append { items, statics } => {
                let len = if statics.is_some() { 3 } else { 2 };
                let mut seq = serializer.serialize_seq(Some(len))?;
                seq.serialize_element("a")?;
                let dynamics: Vec<&Vec<UpdateSlot>> = items.iter().map(|i| &i.dynamics).collect();
                seq.serialize_element(&dynamics)?;
                if let Some(statics) = statics {
                    seq.serialize_element(statics)?;
                }
                seq.end()
            }
            RangeOp::Insert { after, item } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("i")?;
                seq.serialize_element(after)?;
                seq.serialize_element(&item.dynamics)?;
                seq.end()
            }
            RangeOp::Remove { key } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("r")?;
                seq.serialize_element(key)?;
                seq.end()
            }
            RangeOp::Update { key, dynamics } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("u")?;
                seq.serialize_element(key)?;
                let by_name: BTreeMap<String, &UpdateSlot> =
                    dynamics.iter().map(|(k, v)| (k.to_string(), v)).collect();
                seq.serialize_element(&by_name)?;
                seq.end()
            }
            RangeOp::Reorder { keys } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("o")?;
                seq.serialize_element(keys)?;
                seq.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(s: &str) -> SlotValue {
        SlotValue::Scalar(s.to_string())
    }

    #[test]
    fn test_sd_invariant_check() {
        let mut node = TreeNode {
            statics: Some(vec!["a".into(), "b".into()]),
            fingerprint: None,
            slots: BTreeMap::from([(0, scalar("x"))]),
        };
        assert!(node.arity_holds());
        node.statics = Some(vec!["a".into()]);
        assert!(!node.arity_holds());
    }

    #[test]
    fn test_tree_wire_shape() {
        let node = TreeNode {
            statics: Some(vec!["<b>".into(), "</b>".into()]),
            fingerprint: Some(7),
            slots: BTreeMap::from([(0, scalar("hi"))]),
        };
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#"{"s":["<b>","</b>"],"0":"hi"}"#);
    }

    #[test]
    fn test_fingerprint_never_serializes() {
        let node = TreeNode { fingerprint: Some(42), ..Default::default() };
        assert_eq!(serde_json::to_string(&node).unwrap(), "{}");
    }

    #[test]
    fn test_range_wire_shape() {
        let range = RangeTree {
            statics: Some(vec!["<li>".into(), "</li>".into()]),
            fingerprint: None,
            items: vec![
                RangeItem { key: "1".into(), dynamics: vec![scalar("A")] },
                RangeItem { key: "2".into(), dynamics: vec![scalar("B")] },
            ],
            keyed: true,
        };
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, r#"{"s":["<li>","</li>"],"d":[["A"],["B"]]}"#);
    }

    #[test]
    fn test_empty_range_wire_shape() {
        let range = RangeTree { keyed: true, ..Default::default() };
        assert_eq!(serde_json::to_string(&range).unwrap(), r#"{"d":[]}"#);
    }

    #[test]
    fn test_range_op_tuples() {
        let append = RangeOp::Append {
            items: vec![UpdateItem { key: "1".into(), dynamics: vec![UpdateSlot::Scalar("A".into())] }],
            statics: Some(vec!["<li>".into(), "</li>".into()]),
        };
        assert_eq!(
            serde_json::to_string(&append).unwrap(),
            r#"["a",[["A"]],["<li>","</li>"]]"#
        );

        let insert = RangeOp::Insert {
            after: None,
            item: UpdateItem { key: "9".into(), dynamics: vec![UpdateSlot::Scalar("Z".into())] },
        };
        assert_eq!(serde_json::to_string(&insert).unwrap(), r#"["i",null,["Z"]]"#);

        let remove = RangeOp::Remove { key: "2".into() };
        assert_eq!(serde_json::to_string(&remove).unwrap(), r#"["r","2"]"#);

        let update = RangeOp::Update {
            key: "1".into(),
            dynamics: BTreeMap::from([(0, UpdateSlot::Scalar("a'".into()))]),
        };
        assert_eq!(serde_json::to_string(&update).unwrap(), r#"["u","1",{"0":"a'"}]"#);

        let reorder = RangeOp::Reorder { keys: vec!["3".into(), "1".into(), "2".into()] };
        assert_eq!(serde_json::to_string(&reorder).unwrap(), r#"["o",["3","1","2"]]"#);
    }

    #[test]
    fn test_to_html_interleaves() {
        let node = TreeNode {
            statics: Some(vec!["<div>".into(), " & ".into(), "</div>".into()]),
            fingerprint: None,
            slots: BTreeMap::from([(0, scalar("a")), (1, scalar("b"))]),
        };
        assert_eq!(node.to_html(), "<div>a & b</div>");
    }

    #[test]
    fn test_range_to_html() {
        let range = RangeTree {
            statics: Some(vec!["<li>".into(), "</li>".into()]),
            fingerprint: None,
            items: vec![
                RangeItem { key: "1".into(), dynamics: vec![scalar("A")] },
                RangeItem { key: "2".into(), dynamics: vec![scalar("B")] },
            ],
            keyed: true,
        };
        let node = TreeNode {
            statics: Some(vec!["<ul>".into(), "</ul>".into()]),
            fingerprint: None,
            slots: BTreeMap::from([(0, SlotValue::Range(range))]),
        };
        assert_eq!(node.to_html(), "<ul><li>A</li><li>B</li></ul>");
    }
}
