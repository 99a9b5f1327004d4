//! Clear reference interpreter: runs the same command stream over plain
//! bits. Used to validate garbled evaluation and by the CLI `run` command.

use crate::circuit::{Circuit, ClearBits, CommandKind};
use crate::error::{Error, Result};

/// Interprets a circuit over each party's clear input bits and returns
/// each party's output bits.
pub fn interpret(circuit: &Circuit, inputs: &[ClearBits]) -> Result<Vec<ClearBits>> {
    if inputs.len() != circuit.parties as usize {
        return Err(Error::eval(format!(
            "{} input streams for {} parties",
            inputs.len(),
            circuit.parties
        )));
    }
    let mut inputs: Vec<ClearBits> = inputs.to_vec();
    let mut outputs: Vec<ClearBits> = vec![ClearBits::new(); circuit.parties as usize];
    let mut wires = vec![false; circuit.total_wires as usize];

    for com in circuit.commands() {
        match com.kind {
            CommandKind::Empty | CommandKind::FunctionCall => {
                return Err(Error::internal("unexpected command in interpret traversal"));
            }
            CommandKind::Copy => {
                wires[com.to as usize] = wires[com.x as usize];
            }
            CommandKind::MassCopy => {
                for i in 0..com.y {
                    wires[(com.to + i) as usize] = wires[(com.x + i) as usize];
                }
            }
            CommandKind::Replicate => {
                for i in 0..com.y {
                    wires[(com.to + i) as usize] = wires[com.x as usize];
                }
            }
            CommandKind::Input => {
                wires[com.to as usize] = inputs[com.x as usize].pop()?;
            }
            CommandKind::MassInput => {
                for i in 0..com.y {
                    wires[(com.to + i) as usize] = inputs[com.x as usize].pop()?;
                }
            }
            CommandKind::Output => {
                outputs[com.to as usize].push(wires[com.x as usize]);
            }
            CommandKind::MassOutput => {
                for i in 0..com.y {
                    outputs[com.to as usize].push(wires[(com.x + i) as usize]);
                }
            }
            CommandKind::Gate(g) => {
                let a = wires[com.x as usize] as u8;
                let b = wires[com.y as usize] as u8;
                wires[com.to as usize] = (g >> (2 * a + b)) & 1 == 1;
            }
        }
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Command, Var};
    use crate::types::Type;

    fn gate(t: u8, x: u32, y: u32, to: u32) -> Command {
        Command { kind: CommandKind::Gate(t), x, y, to }
    }

    #[test]
    fn gates_follow_their_truth_tables() {
        for op in 0..16u8 {
            for entry in 0..4u8 {
                let a = entry & 2 != 0;
                let b = entry & 1 != 0;

                let mut c = Circuit::new(1, 1);
                c.main.push_plain(Command { kind: CommandKind::Input, x: 0, y: 0, to: 2 });
                c.main.push_plain(Command { kind: CommandKind::Input, x: 0, y: 0, to: 3 });
                c.main.push_plain(gate(op, 2, 3, 4));
                c.main.push_plain(Command { kind: CommandKind::Output, x: 4, y: 0, to: 0 });
                c.total_wires = 5;
                c.inputs[0] = Var { ty: Type::UInt(2), wirebase: 2 };
                c.outputs[0] = Var { ty: Type::Bool, wirebase: 4 };

                let bits: ClearBits = [a, b].into_iter().collect();
                let outs = interpret(&c, &[bits]).unwrap();
                let want = (op >> (2 * (a as u8) + (b as u8))) & 1 == 1;
                assert_eq!(outs[0].get(0).unwrap(), want, "op {op} a {a} b {b}");
            }
        }
    }

    #[test]
    fn replicate_and_mass_copy() {
        let mut c = Circuit::new(1, 1);
        c.main.push_plain(Command { kind: CommandKind::Input, x: 0, y: 0, to: 2 });
        c.main.push_plain(Command { kind: CommandKind::Replicate, x: 2, y: 3, to: 3 });
        c.main.push_plain(Command { kind: CommandKind::MassCopy, x: 3, y: 3, to: 6 });
        c.main.push_plain(Command { kind: CommandKind::MassOutput, x: 6, y: 3, to: 0 });
        c.total_wires = 9;
        c.inputs[0] = Var { ty: Type::Bool, wirebase: 2 };
        c.outputs[0] = Var { ty: Type::UInt(3), wirebase: 6 };

        let bits: ClearBits = [true].into_iter().collect();
        let outs = interpret(&c, &[bits]).unwrap();
        assert_eq!(outs[0].iter().collect::<Vec<_>>(), vec![true, true, true]);
    }

    #[test]
    fn exhausted_inputs_error() {
        let mut c = Circuit::new(1, 1);
        c.main.push_plain(Command { kind: CommandKind::MassInput, x: 0, y: 4, to: 2 });
        c.total_wires = 6;
        let bits: ClearBits = [true, false].into_iter().collect();
        assert!(interpret(&c, &[bits]).is_err());
    }
}
