//! # Boxing
//!
//! Bidirectional mapping between heterogeneous [`Boxed`] values and compact
//! `i64` keys, kept separately per [`UnifiedPosition`] (see
//! [`crate::predicate`]) so that two positions never share encodings even if
//! they happen to hold the same Rust type.
//!
//! ```text
//! BoxingTable
//!   `-- DashMap<UnifiedPosition, PositionTable>
//!         `-- PositionTable
//!               |-- RwLock<Kind>                 (Unknown -> T on first use)
//!               `-- RwLock<(Vec<Boxed>, HashMap<ObjKey, i64>)>   (objects only)
//! ```
//!
//! Primitive kinds (`bool`, `i32`, `i64`, `f64`, `char`) use reversible
//! bit-level encodings and never touch the per-position object table.
//! Objects and strings get incrementing ids, assigned the first time a
//! distinct value is seen at that position.

use crate::error::bug;
use crate::predicate::UnifiedPosition;
use crate::value::Boxed;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Reversible encode of a primitive `Boxed` into an `i64`. Kept free of any
/// position-table lookup so constants can be boxed before a position's type
/// has even been observed elsewhere.
fn encode_primitive(b: &Boxed) -> Option<i64> {
    match b {
        Boxed::NoValue => Some(0),
        Boxed::Bool(v) => Some(i64::from(*v)),
        Boxed::Int32(v) => Some(i64::from(*v)),
        Boxed::Int64(v) => Some(*v),
        Boxed::Float64(v) => Some(v.to_bits() as i64),
        Boxed::Char(v) => Some(i64::from(*v as u32)),
        Boxed::Str(_) | Boxed::Object(_) => None,
    }
}

fn decode_primitive(kind: &'static str, code: i64) -> Boxed {
    match kind {
        "no_value" => Boxed::NoValue,
        "bool" => Boxed::Bool(code != 0),
        "int32" => Boxed::Int32(code as i32),
        "int64" => Boxed::Int64(code),
        "float64" => Boxed::Float64(f64::from_bits(code as u64)),
        "char" => char::from_u32(code as u32)
            .map(Boxed::Char)
            .unwrap_or_else(|| bug!("invalid char code {code}")),
        other => bug!("decode_primitive called for non-primitive kind {other}"),
    }
}

#[derive(Default)]
struct ObjectTable {
    by_id: Vec<Boxed>,
    by_key: HashMap<String, i64>,
}

fn object_key(b: &Boxed) -> String {
    match b {
        Boxed::Str(s) => format!("s:{s}"),
        Boxed::Object(s) => format!("o:{s}"),
        other => bug!("object_key called on non-object Boxed {:?}", other.kind()),
    }
}

struct PositionTable {
    kind: RwLock<Option<&'static str>>,
    objects: RwLock<ObjectTable>,
}

impl PositionTable {
    fn new() -> Self {
        PositionTable {
            kind: RwLock::new(None),
            objects: RwLock::new(ObjectTable::default()),
        }
    }

    /// First-use type assignment: `Unknown -> T`. Mixing types afterward is
    /// a schema bug per spec §4.2, not a recoverable error.
    fn observe_kind(&self, kind: &'static str) {
        {
            let existing = self.kind.read();
            if let Some(seen) = *existing {
                if seen != kind {
                    bug!("mixed types at one unified position: {seen} then {kind}");
                }
                return;
            }
        }
        let mut existing = self.kind.write();
        match *existing {
            Some(seen) if seen != kind => bug!("mixed types at one unified position: {seen} then {kind}"),
            Some(_) => {}
            None => *existing = Some(kind),
        }
    }
}

/// Per-unified-position `Boxed <-> i64` table. One `BoxingTable` is owned by
/// the compiler/solver for the lifetime of a single [`crate::Solver::solve`]
/// call; it is grown at inject time and frozen (read-only) once the
/// interpreter starts.
pub struct BoxingTable {
    positions: DashMap<UnifiedPosition, PositionTable>,
}

impl BoxingTable {
    pub fn new() -> Self {
        BoxingTable {
            positions: DashMap::new(),
        }
    }

    fn table(&self, pos: UnifiedPosition) -> dashmap::mapref::one::Ref<'_, UnifiedPosition, PositionTable> {
        self.positions.entry(pos).or_insert_with(PositionTable::new);
        self.positions.get(&pos).unwrap_or_else(|| bug!("position table vanished for {pos:?}"))
    }

    /// `unbox_with(box, pos) -> i64`. Assigns a fresh object id the first
    /// time a distinct string/object value is seen at `pos`.
    pub fn unbox_with(&self, value: &Boxed, pos: UnifiedPosition) -> i64 {
        let table = self.table(pos);
        table.observe_kind(value.kind());
        if let Some(code) = encode_primitive(value) {
            return code;
        }
        let key = object_key(value);
        {
            let objects = table.objects.read();
            if let Some(&id) = objects.by_key.get(&key) {
                return id;
            }
        }
        let mut objects = table.objects.write();
        if let Some(&id) = objects.by_key.get(&key) {
            return id;
        }
        let id = objects.by_id.len() as i64;
        objects.by_id.push(value.clone());
        objects.by_key.insert(key, id);
        id
    }

    /// `box_with(int, pos) -> Boxed`. Requires `pos`'s type to have already
    /// been established by a prior `unbox_with` call.
    pub fn box_with(&self, code: i64, pos: UnifiedPosition) -> Boxed {
        let table = self.table(pos);
        let kind = table
            .kind
            .read()
            .unwrap_or_else(|| bug!("box_with called before any unbox_with at {pos:?}"));
        if kind == "str" || kind == "object" {
            let objects = table.objects.read();
            return objects
                .by_id
                .get(code as usize)
                .cloned()
                .unwrap_or_else(|| bug!("object id {code} out of range at {pos:?}"));
        }
        decode_primitive(kind, code)
    }
}

impl Default for BoxingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::UnifiedPosition;

    fn pos(n: u32) -> UnifiedPosition {
        UnifiedPosition(n)
    }

    #[test]
    fn primitives_round_trip() {
        let table = BoxingTable::new();
        let code = table.unbox_with(&Boxed::Int64(42), pos(0));
        assert_eq!(table.box_with(code, pos(0)), Boxed::Int64(42));
    }

    #[test]
    fn strings_get_stable_incrementing_ids() {
        let table = BoxingTable::new();
        let a = table.unbox_with(&Boxed::str("alice"), pos(1));
        let b = table.unbox_with(&Boxed::str("bob"), pos(1));
        let a2 = table.unbox_with(&Boxed::str("alice"), pos(1));
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(table.box_with(a, pos(1)), Boxed::str("alice"));
    }

    #[test]
    #[should_panic(expected = "mixed types")]
    fn mixed_types_at_one_position_is_a_bug() {
        let table = BoxingTable::new();
        table.unbox_with(&Boxed::Int64(1), pos(2));
        table.unbox_with(&Boxed::Bool(true), pos(2));
    }
}
