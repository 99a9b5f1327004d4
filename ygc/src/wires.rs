//! Compile-time wire graph. Wires are arena-allocated nodes identified by
//! [`WireId`]; each carries a circuit wire number, a six-valued state, an
//! optional alias edge to another wire, a lock flag and the list of wires
//! aliasing it. Alias edges are bidirectional: if `w.other == Some(t)` then
//! `w` appears exactly once in `t.refs`.

use crate::types::Num;

/// Compile-time knowledge about the value carried by a wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireState {
    /// Constant 0.
    #[default]
    Zero,
    /// Constant 1.
    One,
    /// Value unknown, carried by the wire's own label.
    Unknown,
    /// Value is the logical NOT of the wire's own label (deferred inversion).
    UnknownInvert,
    /// Value equals the label of the `other` wire.
    UnknownAlias,
    /// Value equals NOT of the label of the `other` wire.
    UnknownInvertAlias,
}

impl WireState {
    pub fn is_const(self) -> bool {
        matches!(self, WireState::Zero | WireState::One)
    }

    pub fn is_alias(self) -> bool {
        matches!(self, WireState::UnknownAlias | WireState::UnknownInvertAlias)
    }
}

/// Index of a wire in the arena. Distinct from the wire *number*, which is
/// the dense identity used in the emitted circuit.
pub type WireId = usize;

#[derive(Debug, Default)]
pub struct Wire {
    pub state: WireState,
    pub number: Num,
    pub other: Option<WireId>,
    pub locked: bool,
    pub refs: Vec<WireId>,
}

#[derive(Debug, Default)]
pub struct WireArena {
    wires: Vec<Wire>,
}

impl WireArena {
    pub fn new() -> Self {
        WireArena { wires: Vec::new() }
    }

    /// Allocates a fresh wire in state [`WireState::Zero`] with the given
    /// circuit number.
    pub fn alloc(&mut self, number: Num) -> WireId {
        self.wires.push(Wire { number, ..Wire::default() });
        self.wires.len() - 1
    }

    pub fn len(&self) -> usize {
        self.wires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wires.is_empty()
    }

    /// Number of wires currently aliasing `w`.
    pub fn refs(&self, w: WireId) -> usize {
        self.wires[w].refs.len()
    }

    /// Makes `from` an alias of `target`: sets `from.other` and registers
    /// the back edge.
    pub fn add_ref(&mut self, target: WireId, from: WireId) {
        self.wires[from].other = Some(target);
        self.wires[target].refs.push(from);
    }

    /// Drops the alias edge from `from` to `target`.
    pub fn remove_ref(&mut self, target: WireId, from: WireId) {
        debug_assert_eq!(self.wires[from].other, Some(target));
        let refs = &mut self.wires[target].refs;
        if let Some(i) = refs.iter().position(|&r| r == from) {
            refs.swap_remove(i);
        } else {
            tracing::warn!(target_wire = target, from_wire = from, "alias back edge missing");
        }
        self.wires[from].other = None;
    }

    /// If `w` aliases another wire, drops that dependency.
    pub fn free_refs(&mut self, w: WireId) {
        if let Some(t) = self.wires[w].other {
            self.remove_ref(t, w);
        }
    }

    /// A set may return to the pool only when none of its wires is locked or
    /// aliased by another wire.
    pub fn ready_to_free(&self, set: &[WireId]) -> bool {
        set.iter().all(|&w| self.refs(w) == 0 && !self.wires[w].locked)
    }
}

impl std::ops::Index<WireId> for WireArena {
    type Output = Wire;

    fn index(&self, w: WireId) -> &Wire {
        &self.wires[w]
    }
}

impl std::ops::IndexMut<WireId> for WireArena {
    fn index_mut(&mut self, w: WireId) -> &mut Wire {
        &mut self.wires[w]
    }
}

/// Builds the wire sequence of a non-negative value out of the two constant
/// wires, least significant bit first. `0` is a single zero wire.
pub fn int_to_wire_set(v: u64, w0: WireId, w1: WireId) -> Vec<WireId> {
    if v == 0 {
        return vec![w0];
    }
    let mut ws = Vec::new();
    let mut v = v;
    while v != 0 {
        ws.push(if v & 1 == 1 { w1 } else { w0 });
        v >>= 1;
    }
    ws
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_edges_are_bidirectional() {
        let mut arena = WireArena::new();
        let a = arena.alloc(0);
        let b = arena.alloc(1);

        arena.add_ref(a, b);
        assert_eq!(arena[b].other, Some(a));
        assert_eq!(arena.refs(a), 1);

        arena.remove_ref(a, b);
        assert_eq!(arena[b].other, None);
        assert_eq!(arena.refs(a), 0);
    }

    #[test]
    fn ready_to_free_respects_locks_and_refs() {
        let mut arena = WireArena::new();
        let a = arena.alloc(0);
        let b = arena.alloc(1);
        assert!(arena.ready_to_free(&[a, b]));

        arena[a].locked = true;
        assert!(!arena.ready_to_free(&[a, b]));
        arena[a].locked = false;

        let c = arena.alloc(2);
        arena.add_ref(b, c);
        assert!(!arena.ready_to_free(&[a, b]));
        arena.free_refs(c);
        assert!(arena.ready_to_free(&[a, b]));
    }

    #[test]
    fn int_to_wire_set_lsb_first() {
        let mut arena = WireArena::new();
        let w0 = arena.alloc(0);
        let w1 = arena.alloc(1);

        assert_eq!(int_to_wire_set(0, w0, w1), vec![w0]);
        assert_eq!(int_to_wire_set(6, w0, w1), vec![w0, w1, w1]);
        assert_eq!(int_to_wire_set(1, w0, w1), vec![w1]);
    }
}
