//! Command packer. Holds exactly one pending command and fuses each newly
//! appended command into it when the peephole allows: consecutive copies
//! become `MassCopy`, copies from a single source become `Replicate`, and
//! inputs/outputs of one party become their mass variants. Gate tallies are
//! maintained as commands flush into the function under construction.

use crate::circuit::{Command, CommandKind, EMPTY_COMMAND, Function};
use crate::types::Num;

/// Progressively writes commands into a circuit function. Nested procedure
/// bodies suspend the enclosing function on a stack.
#[derive(Debug)]
pub struct FuncWriter {
    f: Function,
    prev: Command,
    suspended: Vec<Function>,
}

impl Default for FuncWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FuncWriter {
    pub fn new() -> Self {
        FuncWriter { f: Function::new(), prev: EMPTY_COMMAND, suspended: Vec::new() }
    }

    /// Pushes the pending command into the function and pends `new` instead.
    /// `funcs` supplies gate tallies for function-call commands.
    fn add_prev(&mut self, funcs: &[Function], new: Command) {
        if self.prev.kind != CommandKind::Empty {
            if self.prev.kind == CommandKind::FunctionCall {
                let callee = &funcs[self.prev.x as usize];
                self.f.push_call(self.prev, callee.xor_gates, callee.non_xor_gates);
            } else {
                self.f.push_plain(self.prev);
            }
        }
        self.prev = new;
    }

    /// Flushes the pending command. Forced at end of emission and on every
    /// function change.
    pub fn flush(&mut self, funcs: &[Function]) {
        self.add_prev(funcs, EMPTY_COMMAND);
    }

    /// Suspends the function being written and starts a fresh one (used for
    /// user functions and procedure bodies).
    pub fn begin_function(&mut self, funcs: &[Function]) {
        self.flush(funcs);
        let outer = std::mem::take(&mut self.f);
        self.suspended.push(outer);
    }

    /// Finishes the innermost function, restores the enclosing one, and
    /// returns the finished command list.
    pub fn end_function(&mut self, funcs: &[Function]) -> Function {
        self.flush(funcs);
        let done = std::mem::take(&mut self.f);
        self.f = self.suspended.pop().expect("end_function without begin_function");
        done
    }

    /// Flushes and hands out the completed top-level function.
    pub fn finish(&mut self, funcs: &[Function]) -> Function {
        self.flush(funcs);
        debug_assert!(self.suspended.is_empty(), "unterminated nested function");
        std::mem::take(&mut self.f)
    }

    /// Emits `Gate(table) x,y→d`.
    pub fn add_gate(&mut self, funcs: &[Function], table: u8, d: Num, x: Num, y: Num) {
        self.add_prev(funcs, Command { kind: CommandKind::Gate(table & 0xf), x, y, to: d });
        tracing::trace!(table, x, y, to = d, "gate");
    }

    /// Emits `Copy from→to`, fusing with a pending copy when the wires are
    /// consecutive (mass copy) or share their source (replicate).
    pub fn add_copy(&mut self, funcs: &[Function], to: Num, from: Num) {
        let p = &mut self.prev;
        if p.kind == CommandKind::Copy && p.x + 1 == from && p.to + 1 == to {
            p.kind = CommandKind::MassCopy;
            p.y = 2;
        } else if p.kind == CommandKind::MassCopy && p.x + p.y == from && p.to + p.y == to {
            p.y += 1;
        } else if p.kind == CommandKind::Copy && p.x == from && p.to + 1 == to {
            p.kind = CommandKind::Replicate;
            p.y = 2;
        } else if p.kind == CommandKind::Replicate && p.x == from && p.to + p.y == to {
            p.y += 1;
        } else {
            self.add_prev(funcs, Command { kind: CommandKind::Copy, x: from, y: 0, to });
        }
    }

    /// Emits `MassCopy from,len→to`.
    pub fn add_mass_copy(&mut self, funcs: &[Function], to: Num, from: Num, len: Num) {
        let p = &mut self.prev;
        if p.kind == CommandKind::Copy && p.x + 1 == from && p.to + 1 == to {
            p.kind = CommandKind::MassCopy;
            p.y = len + 1;
        } else if p.kind == CommandKind::MassCopy && p.x + p.y == from && p.to + p.y == to {
            p.y += len;
        } else {
            self.add_prev(funcs, Command { kind: CommandKind::MassCopy, x: from, y: len, to });
        }
    }

    /// Emits `Replicate from,len→to`.
    pub fn add_replicate(&mut self, funcs: &[Function], to: Num, from: Num, len: Num) {
        let p = &mut self.prev;
        if p.kind == CommandKind::Copy && p.x == from && p.to + 1 == to {
            p.kind = CommandKind::Replicate;
            p.y = len + 1;
        } else if p.kind == CommandKind::Replicate && p.x == from && p.to + p.y == to {
            p.y += len;
        } else {
            self.add_prev(funcs, Command { kind: CommandKind::Replicate, x: from, y: len, to });
        }
    }

    /// Emits `FunctionCall fid`.
    pub fn add_function_call(&mut self, funcs: &[Function], fid: Num) {
        self.add_prev(funcs, Command { kind: CommandKind::FunctionCall, x: fid, y: 0, to: 0 });
    }

    /// Emits `FunctionCall fid` replayed `iter` times (a procedure).
    pub fn add_proc_call(&mut self, funcs: &[Function], fid: Num, iter: Num) {
        self.add_prev(funcs, Command { kind: CommandKind::FunctionCall, x: fid, y: iter, to: 0 });
    }

    /// Emits `Input party→wire`.
    pub fn add_in(&mut self, funcs: &[Function], wire: Num, party: Num) {
        let p = &mut self.prev;
        if p.kind == CommandKind::Input && p.x == party && p.to + 1 == wire {
            p.kind = CommandKind::MassInput;
            p.y = 2;
        } else if p.kind == CommandKind::MassInput && p.x == party && p.to + p.y == wire {
            p.y += 1;
        } else {
            self.add_prev(funcs, Command { kind: CommandKind::Input, x: party, y: 0, to: wire });
        }
    }

    /// Emits `MassInput party,len→wire`.
    pub fn add_mass_in(&mut self, funcs: &[Function], wire: Num, len: Num, party: Num) {
        let p = &mut self.prev;
        if p.kind == CommandKind::Input && p.x == party && p.to + 1 == wire {
            p.kind = CommandKind::MassInput;
            p.y = len + 1;
        } else if p.kind == CommandKind::MassInput && p.x == party && p.to + p.y == wire {
            p.y += len;
        } else {
            self.add_prev(funcs, Command { kind: CommandKind::MassInput, x: party, y: len, to: wire });
        }
    }

    /// Emits `Output wire→party`.
    pub fn add_out(&mut self, funcs: &[Function], wire: Num, party: Num) {
        let p = &mut self.prev;
        if p.kind == CommandKind::Output && p.x + 1 == wire && p.to == party {
            p.kind = CommandKind::MassOutput;
            p.y = 2;
        } else if p.kind == CommandKind::MassOutput && p.x + p.y == wire && p.to == party {
            p.y += 1;
        } else {
            self.add_prev(funcs, Command { kind: CommandKind::Output, x: wire, y: 0, to: party });
        }
    }

    /// Emits `MassOutput wire,len→party`.
    pub fn add_mass_out(&mut self, funcs: &[Function], wire: Num, len: Num, party: Num) {
        let p = &mut self.prev;
        if p.kind == CommandKind::Output && p.x + 1 == wire && p.to == party {
            p.kind = CommandKind::MassOutput;
            p.y = len + 1;
        } else if p.kind == CommandKind::MassOutput && p.x + p.y == wire && p.to == party {
            p.y += len;
        } else {
            self.add_prev(funcs, Command { kind: CommandKind::MassOutput, x: wire, y: len, to: party });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decodes a packed command back into its primitive single-wire form.
    fn primitives(commands: &[Command]) -> Vec<(CommandKind, Num, Num)> {
        let mut out = Vec::new();
        for c in commands {
            match c.kind {
                CommandKind::Copy => out.push((CommandKind::Copy, c.x, c.to)),
                CommandKind::MassCopy => {
                    for j in 0..c.y {
                        out.push((CommandKind::Copy, c.x + j, c.to + j));
                    }
                }
                CommandKind::Replicate => {
                    for j in 0..c.y {
                        out.push((CommandKind::Copy, c.x, c.to + j));
                    }
                }
                CommandKind::Input => out.push((CommandKind::Input, c.x, c.to)),
                CommandKind::MassInput => {
                    for j in 0..c.y {
                        out.push((CommandKind::Input, c.x, c.to + j));
                    }
                }
                CommandKind::Output => out.push((CommandKind::Output, c.x, c.to)),
                CommandKind::MassOutput => {
                    for j in 0..c.y {
                        out.push((CommandKind::Output, c.x + j, c.to));
                    }
                }
                _ => out.push((c.kind, c.x, c.to)),
            }
        }
        out
    }

    #[test]
    fn consecutive_copies_fuse_into_mass_copy() {
        let mut w = FuncWriter::new();
        let funcs = Vec::new();
        for i in 0..4 {
            w.add_copy(&funcs, 10 + i, 2 + i);
        }
        let f = w.finish(&funcs);
        assert_eq!(
            f.commands,
            vec![Command { kind: CommandKind::MassCopy, x: 2, y: 4, to: 10 }]
        );
    }

    #[test]
    fn same_source_copies_fuse_into_replicate() {
        let mut w = FuncWriter::new();
        let funcs = Vec::new();
        for i in 0..3 {
            w.add_copy(&funcs, 10 + i, 7);
        }
        let f = w.finish(&funcs);
        assert_eq!(
            f.commands,
            vec![Command { kind: CommandKind::Replicate, x: 7, y: 3, to: 10 }]
        );
    }

    #[test]
    fn inputs_fuse_per_party() {
        let mut w = FuncWriter::new();
        let funcs = Vec::new();
        w.add_in(&funcs, 2, 0);
        w.add_in(&funcs, 3, 0);
        // Different party breaks the run.
        w.add_in(&funcs, 4, 1);
        let f = w.finish(&funcs);
        assert_eq!(
            f.commands,
            vec![
                Command { kind: CommandKind::MassInput, x: 0, y: 2, to: 2 },
                Command { kind: CommandKind::Input, x: 1, y: 0, to: 4 },
            ]
        );
    }

    #[test]
    fn outputs_fuse_on_consecutive_wires() {
        let mut w = FuncWriter::new();
        let funcs = Vec::new();
        w.add_out(&funcs, 20, 0);
        w.add_mass_out(&funcs, 21, 3, 0);
        let f = w.finish(&funcs);
        assert_eq!(
            f.commands,
            vec![Command { kind: CommandKind::MassOutput, x: 20, y: 4, to: 0 }]
        );
    }

    #[test]
    fn packing_preserves_primitive_stream() {
        let mut packed = FuncWriter::new();
        let mut plain: Vec<(CommandKind, Num, Num)> = Vec::new();
        let funcs = Vec::new();

        // A mixed stream exercising every fusion path plus breaks.
        let script: Vec<(Num, Num)> =
            vec![(2, 10), (3, 11), (4, 12), (9, 13), (9, 14), (9, 15), (5, 30), (6, 31)];
        for &(from, to) in &script {
            packed.add_copy(&funcs, to, from);
            plain.push((CommandKind::Copy, from, to));
        }

        let f = packed.finish(&funcs);
        assert_eq!(primitives(&f.commands), plain);
        // The peephole actually compacted the stream.
        assert!(f.commands.len() < plain.len());
    }

    #[test]
    fn gate_counting_at_flush() {
        let mut w = FuncWriter::new();
        let mut funcs = Vec::new();

        // A callee with one non-XOR gate.
        w.begin_function(&funcs);
        w.add_gate(&funcs, 8, 5, 2, 3);
        let callee = w.end_function(&funcs);
        funcs.push(callee);

        w.add_gate(&funcs, 6, 6, 2, 3);
        w.add_proc_call(&funcs, 0, 4);
        let main = w.finish(&funcs);
        assert_eq!(main.xor_gates, 1);
        assert_eq!(main.non_xor_gates, 4);
    }
}
