//! The compiled-circuit representation: commands, functions, the circuit
//! itself, the forward-only traversal that expands function calls, and the
//! binary file round-trip.

use std::collections::VecDeque;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{Num, Type};

/// Identifies what a [`Command`] does with its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum CommandKind {
    Empty,
    Copy,
    FunctionCall,
    Input,
    Output,
    MassCopy,
    MassInput,
    MassOutput,
    Replicate,
    /// A two-input gate; the payload is the 4-entry truth table, bit
    /// `2a + b` being the output for inputs `a`, `b`. Table 6 is XOR
    /// (free), tables 0 and 15 produce the constants.
    Gate(u8),
}

/// One unit of computational work. The meaning of `x`, `y` and `to` depends
/// on the kind:
///
/// - `Copy x→to`, `MassCopy x,y→to`, `Replicate x,y→to`
/// - `Input x→to` / `MassInput x,y→to` (`x` is the party)
/// - `Output x→to` / `MassOutput x,y→to` (`to` is the party)
/// - `FunctionCall x,y` (`x` is the function index, `y` an iteration count;
///   `y > 0` marks a procedure replayed `y` times)
/// - `Gate(t) x,y→to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Command {
    pub kind: CommandKind,
    pub x: Num,
    pub y: Num,
    pub to: Num,
}

pub const EMPTY_COMMAND: Command = Command { kind: CommandKind::Empty, x: 0, y: 0, to: 0 };

impl Command {
    pub fn is_gate(&self) -> bool {
        matches!(self.kind, CommandKind::Gate(_))
    }

    /// The truth table of a gate command.
    pub fn gate(&self) -> Result<u8> {
        match self.kind {
            CommandKind::Gate(t) => Ok(t),
            _ => Err(Error::internal("command is not a gate")),
        }
    }
}

/// A reusable command list: either a user function or a compiled procedure
/// body. The gate tallies count gate commands only, with function calls
/// already expanded.
#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Function {
    pub xor_gates: u32,
    pub non_xor_gates: u32,
    pub commands: Vec<Command>,
}

impl Function {
    pub fn new() -> Self {
        Function::default()
    }

    /// Appends a command that is not a function call, keeping the gate
    /// tallies current.
    pub fn push_plain(&mut self, com: Command) {
        debug_assert!(
            !matches!(com.kind, CommandKind::FunctionCall | CommandKind::Empty),
            "push_plain received {:?}",
            com.kind
        );
        match com.kind {
            CommandKind::Gate(6) => self.xor_gates += 1,
            CommandKind::Gate(_) => self.non_xor_gates += 1,
            _ => {}
        }
        self.commands.push(com);
    }

    /// Appends a function-call command, folding the callee's tallies in
    /// (multiplied by the iteration count for procedures).
    pub fn push_call(&mut self, com: Command, xor: u32, non_xor: u32) {
        debug_assert!(matches!(com.kind, CommandKind::FunctionCall));
        let times = if com.y > 0 { com.y } else { 1 };
        self.xor_gates += times * xor;
        self.non_xor_gates += times * non_xor;
        self.commands.push(com);
    }
}

/// Input/output descriptor of one party: the declared type and the first
/// wire number of the variable's contiguous block. Absent slots carry the
/// void type.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct Var {
    pub ty: Type,
    pub wirebase: Num,
}

impl Var {
    pub fn void() -> Self {
        Var { ty: Type::Void, wirebase: 0 }
    }
}

/// A compiled circuit. Wires 0 and 1 are reserved for the constants and are
/// produced by the first two commands of the main function
/// (`Gate(0) 0,0→0` and `Gate(15) 0,0→1`).
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct Circuit {
    pub parties: u8,
    pub int_size: Num,
    pub total_wires: Num,
    pub inputs: Vec<Var>,
    pub outputs: Vec<Var>,
    pub main: Function,
    pub funcs: Vec<Function>,
}

impl Circuit {
    pub fn new(int_size: Num, parties: u8) -> Self {
        Circuit {
            parties,
            int_size,
            total_wires: 0,
            inputs: vec![Var::void(); parties as usize],
            outputs: vec![Var::void(); parties as usize],
            main: Function::new(),
            funcs: Vec::new(),
        }
    }

    /// Total gate commands under function-call expansion.
    pub fn xor_gates(&self) -> u32 {
        self.main.xor_gates
    }

    pub fn non_xor_gates(&self) -> u32 {
        self.main.non_xor_gates
    }

    /// Streams every command in execution order, inlining `FunctionCall`s
    /// (repeated `y` times for procedures). This is the single traversal
    /// shared by the garbler, the evaluator and the interpreter.
    pub fn commands(&self) -> CommandIter<'_> {
        CommandIter {
            funcs: &self.funcs,
            stack: vec![Frame { commands: &self.main.commands, pos: 0, reps: 1 }],
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| Error::io(format!("circuit encoding failed: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (c, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| Error::io(format!("circuit decoding failed: {e}")))?;
        Ok(c)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

struct Frame<'a> {
    commands: &'a [Command],
    pos: usize,
    reps: u32,
}

/// Iterator state machine over the expanded command stream.
pub struct CommandIter<'a> {
    funcs: &'a [Function],
    stack: Vec<Frame<'a>>,
}

impl Iterator for CommandIter<'_> {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        loop {
            let frame = self.stack.last_mut()?;
            if frame.pos == frame.commands.len() {
                if frame.reps > 1 {
                    frame.reps -= 1;
                    frame.pos = 0;
                } else {
                    self.stack.pop();
                }
                continue;
            }
            let com = frame.commands[frame.pos];
            frame.pos += 1;
            if let CommandKind::FunctionCall = com.kind {
                let reps = if com.y > 0 { com.y } else { 1 };
                let callee = &self.funcs[com.x as usize];
                self.stack.push(Frame { commands: &callee.commands, pos: 0, reps });
                continue;
            }
            return Some(com);
        }
    }
}

impl std::fmt::Debug for CommandIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandIter").field("depth", &self.stack.len()).finish()
    }
}

/// Clear input or output bits of one party, consumed front to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearBits {
    bits: VecDeque<bool>,
}

impl ClearBits {
    pub fn new() -> Self {
        ClearBits::default()
    }

    pub fn push(&mut self, b: bool) {
        self.bits.push_back(b);
    }

    /// Takes the next bit; errors when the stream is exhausted.
    pub fn pop(&mut self) -> Result<bool> {
        self.bits.pop_front().ok_or_else(|| Error::eval("input bit stream exhausted"))
    }

    pub fn get(&self, i: usize) -> Option<bool> {
        self.bits.get(i).copied()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().copied()
    }

    /// The sub-buffer `[start, start + len)`, used to slice aggregate
    /// outputs into their components.
    pub fn slice(&self, start: usize, len: usize) -> ClearBits {
        ClearBits { bits: self.bits.iter().copied().skip(start).take(len).collect() }
    }
}

impl FromIterator<bool> for ClearBits {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        ClearBits { bits: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(t: u8, x: Num, y: Num, to: Num) -> Command {
        Command { kind: CommandKind::Gate(t), x, y, to }
    }

    #[test]
    fn gate_tallies() {
        let mut f = Function::new();
        f.push_plain(gate(6, 0, 1, 2));
        f.push_plain(gate(8, 0, 1, 3));
        f.push_plain(Command { kind: CommandKind::Copy, x: 2, y: 0, to: 4 });
        assert_eq!(f.xor_gates, 1);
        assert_eq!(f.non_xor_gates, 1);

        let mut main = Function::new();
        main.push_call(Command { kind: CommandKind::FunctionCall, x: 0, y: 3, to: 0 }, f.xor_gates, f.non_xor_gates);
        assert_eq!(main.xor_gates, 3);
        assert_eq!(main.non_xor_gates, 3);
    }

    #[test]
    fn traversal_expands_calls_in_order() {
        let mut callee = Function::new();
        callee.push_plain(gate(8, 0, 1, 5));

        let mut c = Circuit::new(8, 2);
        c.main.push_plain(gate(6, 0, 1, 2));
        let call = Command { kind: CommandKind::FunctionCall, x: 0, y: 2, to: 0 };
        c.main.push_call(call, callee.xor_gates, callee.non_xor_gates);
        c.main.push_plain(Command { kind: CommandKind::Copy, x: 5, y: 0, to: 6 });
        c.funcs.push(callee);

        let kinds: Vec<Command> = c.commands().collect();
        assert_eq!(
            kinds,
            vec![
                gate(6, 0, 1, 2),
                gate(8, 0, 1, 5),
                gate(8, 0, 1, 5),
                Command { kind: CommandKind::Copy, x: 5, y: 0, to: 6 },
            ]
        );
        // Expanded gate counts match the tallies.
        let gates = c.commands().filter(Command::is_gate).count() as u32;
        assert_eq!(gates, c.xor_gates() + c.non_xor_gates());
    }

    #[test]
    fn file_round_trip() {
        let mut c = Circuit::new(8, 2);
        c.total_wires = 7;
        c.inputs[0] = Var { ty: Type::Int(8), wirebase: 2 };
        c.inputs[1] = Var { ty: Type::Int(8), wirebase: 10 };
        c.outputs[0] = Var { ty: Type::Int(8), wirebase: 18 };
        c.main.push_plain(gate(0, 0, 0, 0));
        c.main.push_plain(gate(15, 0, 0, 1));
        c.main.push_plain(Command { kind: CommandKind::MassInput, x: 0, y: 8, to: 2 });

        let mut callee = Function::new();
        callee.push_plain(gate(8, 2, 3, 20));
        c.funcs.push(callee);

        let file = tempfile::NamedTempFile::new().unwrap();
        c.save_to_file(file.path()).unwrap();
        let back = Circuit::load_from_file(file.path()).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn clear_bits_pop_and_slice() {
        let mut b: ClearBits = [true, false, true, true].into_iter().collect();
        assert_eq!(b.slice(1, 2).iter().collect::<Vec<_>>(), vec![false, true]);
        assert!(b.pop().unwrap());
        assert!(!b.pop().unwrap());
        assert_eq!(b.len(), 2);

        let mut empty = ClearBits::new();
        assert!(empty.pop().is_err());
    }
}
