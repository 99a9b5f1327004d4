//! Wire-level helpers of the emitter: materialising deferred states into
//! copies and gates, inversion variants, reference-preserving reassignment
//! and conditional assignment under an `if` condition.

use super::Compiler;
use crate::ast::Loc;
use crate::error::{Error, Result};
use crate::variables::Variable;
use crate::wires::{WireId, WireState};

impl Compiler {
    /// The compile-time integer value of a variable; fails when any wire is
    /// not a known constant.
    pub(crate) fn wires_to_int(&self, v: &Variable, what: &str, loc: Loc) -> Result<i64> {
        v.const_int_value(&self.arena).ok_or_else(|| {
            Error::semantic(format!("{what} must be a compile-time constant"), loc)
        })
    }

    /// Reinitialises a wire for reuse when nothing references it; otherwise
    /// hands out a fresh pooled wire.
    pub(crate) fn clear_wire_for_reuse(&mut self, w: WireId) -> WireId {
        if self.arena.refs(w) > 0 {
            return self.pool.get_wire(&mut self.arena);
        }
        self.arena[w].state = WireState::Zero;
        self.arena.free_refs(w);
        w
    }

    /// Emits the copies/gates needed for the wire to physically contain its
    /// value: constants are copied from the constant wires, aliases from
    /// their target, and a deferred alias inversion becomes an XOR with 1.
    pub(crate) fn make_wire_contain_value(&mut self, w: WireId) {
        let state = self.arena[w].state;
        let number = self.arena[w].number;
        if state == WireState::One {
            self.writer.add_copy(&self.circuit.funcs, number, self.arena[self.w1].number);
        } else if state == WireState::Zero {
            self.writer.add_copy(&self.circuit.funcs, number, self.arena[self.w0].number);
        }

        let Some(other) = self.arena[w].other else {
            return;
        };
        if state == WireState::Unknown {
            return;
        }
        self.writer.add_copy(&self.circuit.funcs, number, self.arena[other].number);
        if state == WireState::UnknownInvertAlias {
            self.writer.add_gate(&self.circuit.funcs, 6, number, number, self.arena[self.w1].number);
        }
        self.arena[w].state = WireState::Unknown;
        self.arena.remove_ref(other, w);
    }

    /// Same as [`make_wire_contain_value`](Self::make_wire_contain_value)
    /// but never copies constants; used where the destination is known to
    /// be freshly written anyway.
    pub(crate) fn make_wire_contain_value_no_const_copy(&mut self, w: WireId) {
        let state = self.arena[w].state;
        let number = self.arena[w].number;
        if self.arena[w].other.is_none() || state == WireState::Unknown {
            if state == WireState::UnknownInvert {
                self.writer.add_gate(&self.circuit.funcs, 6, number, number, self.arena[self.w1].number);
                self.arena[w].state = WireState::Unknown;
            }
            return;
        }
        let other = self.arena[w].other.expect("alias state carries a target");
        self.writer.add_copy(&self.circuit.funcs, number, self.arena[other].number);
        if state == WireState::UnknownInvertAlias {
            self.writer.add_gate(&self.circuit.funcs, 6, number, number, self.arena[self.w1].number);
        }
        self.arena[w].state = WireState::Unknown;
        self.arena.remove_ref(other, w);
    }

    /// A fresh wire holding the inversion of `w2`, installed as a deferred
    /// state wherever possible.
    pub(crate) fn invert_wire(&mut self, w2: WireId) -> WireId {
        let w1 = self.pool.get_wire(&mut self.arena);
        match self.arena[w2].state {
            WireState::One => self.arena[w1].state = WireState::Zero,
            WireState::Zero => self.arena[w1].state = WireState::One,
            WireState::Unknown => {
                self.arena[w1].state = WireState::UnknownInvertAlias;
                self.arena.add_ref(w2, w1);
            }
            WireState::UnknownAlias => {
                self.arena[w1].state = WireState::UnknownInvertAlias;
                let t = self.arena[w2].other.expect("alias state carries a target");
                self.arena.add_ref(t, w1);
            }
            WireState::UnknownInvert => {
                self.arena[w1].state = WireState::UnknownAlias;
                self.arena.add_ref(w2, w1);
            }
            WireState::UnknownInvertAlias => {
                self.arena[w1].state = WireState::UnknownAlias;
                let t = self.arena[w2].other.expect("alias state carries a target");
                self.arena.add_ref(t, w1);
            }
        }
        w1
    }

    /// Inversion that refuses deferred results: an unknown operand gets an
    /// explicit XOR-with-1 gate instead.
    pub(crate) fn invert_wire_no_invert(&mut self, w2: WireId) -> WireId {
        let w1 = self.pool.get_wire(&mut self.arena);
        match self.arena[w2].state {
            WireState::One => self.arena[w1].state = WireState::Zero,
            WireState::Zero => self.arena[w1].state = WireState::One,
            WireState::Unknown => {
                let c1 = self.w1;
                self.add_gate_cmd(6, w2, c1, w1);
            }
            WireState::UnknownAlias => {
                let t = self.arena[w2].other.expect("alias state carries a target");
                let c1 = self.w1;
                self.add_gate_cmd(6, t, c1, w1);
            }
            WireState::UnknownInvert => {
                self.arena[w1].state = WireState::UnknownAlias;
                self.arena.add_ref(w2, w1);
            }
            WireState::UnknownInvertAlias => {
                self.arena[w1].state = WireState::UnknownAlias;
                let t = self.arena[w2].other.expect("alias state carries a target");
                self.arena.add_ref(t, w1);
            }
        }
        w1
    }

    /// Flips the wire in place when nothing references it, avoiding an
    /// allocation; otherwise falls back to [`invert_wire`](Self::invert_wire).
    pub(crate) fn invert_wire_no_alloc(&mut self, w2: WireId) -> WireId {
        if self.arena.refs(w2) > 0 {
            return self.invert_wire(w2);
        }
        self.arena[w2].state = match self.arena[w2].state {
            WireState::One => WireState::Zero,
            WireState::Zero => WireState::One,
            WireState::Unknown => WireState::UnknownInvert,
            WireState::UnknownInvert => WireState::Unknown,
            WireState::UnknownAlias => WireState::UnknownInvertAlias,
            WireState::UnknownInvertAlias => WireState::UnknownAlias,
        };
        w2
    }

    /// Moves every reference off a wire onto a fresh copy so the wire can
    /// be overwritten.
    pub(crate) fn clear_reffed_wire(&mut self, w: WireId) {
        if self.arena.refs(w) == 0 {
            return;
        }
        let newwire = self.pool.get_wire(&mut self.arena);
        let (to, from) = (self.arena[newwire].number, self.arena[w].number);
        self.writer.add_copy(&self.circuit.funcs, to, from);

        while let Some(&r) = self.arena[w].refs.last() {
            self.arena.remove_ref(w, r);
            self.arena.add_ref(newwire, r);
        }
        let state = self.arena[w].state;
        self.arena[newwire].state = state;
    }

    /// Assigns the value of `w2` to `w1` at the state level, preserving any
    /// references to `w1` by relocating them first.
    pub(crate) fn assign_wire(&mut self, w1: WireId, w2: WireId) {
        if w1 == w2 {
            return;
        }
        // w2 already aliases w1 and is its only reference: collapse the
        // edge instead of creating a cycle.
        if self.arena.refs(w1) == 1 && self.arena[w2].other == Some(w1) {
            match self.arena[w2].state {
                WireState::UnknownAlias => {
                    self.arena[w1].state = WireState::Unknown;
                    self.arena.remove_ref(w1, w2);
                }
                WireState::UnknownInvertAlias => {
                    self.arena[w1].state = WireState::UnknownInvert;
                    self.arena.remove_ref(w1, w2);
                }
                _ => tracing::warn!(w1, w2, "unexpected state in aliased assignment"),
            }
            return;
        }
        if self.arena.refs(w1) > 0 {
            self.clear_reffed_wire(w1);
        }
        if self.arena[w1].state.is_alias() {
            let t = self.arena[w1].other.expect("alias state carries a target");
            self.arena.remove_ref(t, w1);
        }

        match self.arena[w2].state {
            WireState::One => self.arena[w1].state = WireState::One,
            WireState::Zero => self.arena[w1].state = WireState::Zero,
            WireState::Unknown => {
                self.arena[w1].state = WireState::UnknownAlias;
                self.arena.add_ref(w2, w1);
            }
            WireState::UnknownAlias => {
                self.arena[w1].state = WireState::UnknownAlias;
                let t = self.arena[w2].other.expect("alias state carries a target");
                self.arena.add_ref(t, w1);
            }
            WireState::UnknownInvert => {
                self.arena[w1].state = WireState::UnknownInvertAlias;
                self.arena.add_ref(w2, w1);
            }
            WireState::UnknownInvertAlias => {
                self.arena[w1].state = WireState::UnknownInvertAlias;
                let t = self.arena[w2].other.expect("alias state carries a target");
                self.arena.add_ref(t, w1);
            }
        }
    }

    /// `w1 ← w1 ⊕ ((w1 ⊕ w2) ∧ cond)`: assigns `w2` only where `cond`
    /// holds.
    pub(crate) fn assign_wire_cond(&mut self, w1: WireId, w2: WireId, cond: WireId) {
        if w1 == w2 {
            return;
        }
        let xor1o = self.output_gate(6, w2, w1);
        let and1o = self.output_gate(8, xor1o, cond);

        if self.arena.refs(w1) > 0 {
            self.clear_reffed_wire(w1);
        } else if self.arena[w1].other.is_some() {
            self.make_wire_contain_value(w1);
        }
        self.output_gate_to_dest(6, w1, and1o, w1);
    }
}
