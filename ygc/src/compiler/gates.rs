//! Gate emission. Every gate goes through the short-circuit engine first;
//! only when it cannot be reduced is a command written, with the operand
//! states compensated: constants substitute the constant wires, aliases
//! substitute their target, and deferred inversions transform the table.

use super::Compiler;
use crate::shortcut::{invert_table, short_cut, short_cut_no_invert};
use crate::wires::{WireId, WireState};

impl Compiler {
    /// Writes the gate command for operands that did not short-circuit.
    pub(crate) fn add_gate_cmd(&mut self, mut table: u8, a: WireId, b: WireId, dest: WireId) -> WireId {
        let mut ax = self.arena[a].number;
        match self.arena[a].state {
            WireState::One => ax = self.arena[self.w1].number,
            WireState::Zero => ax = self.arena[self.w0].number,
            WireState::UnknownInvertAlias => {
                ax = self.arena[self.arena[a].other.expect("alias state carries a target")].number;
                table = invert_table(false, table);
            }
            WireState::UnknownAlias => {
                ax = self.arena[self.arena[a].other.expect("alias state carries a target")].number;
            }
            WireState::UnknownInvert => table = invert_table(false, table),
            WireState::Unknown => {}
        }

        let mut bx = self.arena[b].number;
        match self.arena[b].state {
            WireState::One => bx = self.arena[self.w1].number,
            WireState::Zero => bx = self.arena[self.w0].number,
            WireState::UnknownInvertAlias => {
                bx = self.arena[self.arena[b].other.expect("alias state carries a target")].number;
                table = invert_table(true, table);
            }
            WireState::UnknownAlias => {
                bx = self.arena[self.arena[b].other.expect("alias state carries a target")].number;
            }
            WireState::UnknownInvert => table = invert_table(true, table),
            WireState::Unknown => {}
        }

        // Anything still known would have been handled by the short-circuit
        // engine; what remains carries its own label.
        self.arena[dest].state = WireState::Unknown;
        let d = self.arena[dest].number;
        self.writer.add_gate(&self.circuit.funcs, table, d, ax, bx);
        dest
    }

    /// Produces `table(a, b)` on a fresh pooled wire, emitting a gate only
    /// when strictly necessary.
    pub(crate) fn output_gate(&mut self, table: u8, a: WireId, b: WireId) -> WireId {
        let dest = self.pool.get_wire(&mut self.arena);
        if short_cut(&mut self.arena, a, b, table, dest) {
            return dest;
        }
        self.add_gate_cmd(table, a, b, dest)
    }

    /// Produces `table(a, b)` into the given wire.
    pub(crate) fn output_gate_to_dest(&mut self, table: u8, a: WireId, b: WireId, dest: WireId) {
        if short_cut(&mut self.arena, a, b, table, dest) {
            return;
        }
        self.add_gate_cmd(table, a, b, dest);
    }

    /// Like [`output_gate`](Self::output_gate) but never leaves a deferred
    /// inversion on the result.
    pub(crate) fn output_gate_no_invert(&mut self, table: u8, a: WireId, b: WireId) -> WireId {
        let dest = self.pool.get_wire(&mut self.arena);
        if short_cut_no_invert(&mut self.arena, a, b, table, dest) {
            return dest;
        }
        self.add_gate_cmd(table, a, b, dest)
    }

    /// Like [`output_gate_to_dest`](Self::output_gate_to_dest) but never
    /// leaves a deferred inversion on the result.
    pub(crate) fn output_gate_no_invert_to_dest(
        &mut self,
        table: u8,
        a: WireId,
        b: WireId,
        dest: WireId,
    ) {
        if short_cut_no_invert(&mut self.arena, a, b, table, dest) {
            return;
        }
        self.add_gate_cmd(table, a, b, dest);
    }
}
