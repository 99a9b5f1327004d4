//! Evaluation of a garbled circuit: the mirror of the garbling traversal,
//! consuming one table per non-XOR gate and one label per input bit, and
//! producing one decoding key per output bit. The streams travel over
//! bounded channels so the whole pipeline runs with constant memory; each
//! party gets its own input-label sender and output-key receiver.

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::circuit::{Circuit, ClearBits, CommandKind};
use crate::error::{Error, Result};
use crate::garble::{
    DecodingKey, DecodingSet, GarbledTable, GarbledValue, TableSet, UserDecoder, UserEncoder,
    decode_bits, hash_gate, hash_out,
};

/// Channel capacity of every stream; any small fixed bound works, the
/// back-pressure keeps memory bounded.
pub const CHANNEL_CAPACITY: usize = 5;

/// Evaluates a garbled circuit. `tables` must yield the garbled tables in
/// gate-index order; `inputs[p]` yields party `p`'s labels in input order;
/// each output decoding key goes to `outputs[p]` in output order.
pub fn evaluate(
    circuit: &Circuit,
    n: u8,
    tables: &Receiver<GarbledTable>,
    inputs: &[Receiver<GarbledValue>],
    outputs: &[Sender<DecodingKey>],
) -> Result<()> {
    let mut wire_set = vec![GarbledValue::null(n); circuit.total_wires as usize];
    let mut gate_index: u32 = 0;
    let mut out_index: u32 = 0;

    let next_input = |party: usize, inputs: &[Receiver<GarbledValue>]| {
        inputs[party]
            .recv()
            .map_err(|_| Error::eval(format!("input label stream of party {party} exhausted")))
    };
    let send_output = |party: usize, key: DecodingKey, outputs: &[Sender<DecodingKey>]| {
        outputs[party]
            .send(key)
            .map_err(|_| Error::eval(format!("output receiver of party {party} is gone")))
    };

    for com in circuit.commands() {
        match com.kind {
            CommandKind::Empty | CommandKind::FunctionCall => {
                return Err(Error::internal("unexpected command in evaluate traversal"));
            }
            CommandKind::Input => {
                wire_set[com.to as usize] = next_input(com.x as usize, inputs)?;
            }
            CommandKind::MassInput => {
                for j in 0..com.y {
                    wire_set[(com.to + j) as usize] = next_input(com.x as usize, inputs)?;
                }
            }
            CommandKind::Copy => {
                wire_set[com.to as usize] = wire_set[com.x as usize].clone();
            }
            CommandKind::MassCopy => {
                for j in 0..com.y {
                    wire_set[(com.to + j) as usize] = wire_set[(com.x + j) as usize].clone();
                }
            }
            CommandKind::Replicate => {
                for j in 0..com.y {
                    wire_set[(com.to + j) as usize] = wire_set[com.x as usize].clone();
                }
            }
            CommandKind::Output => {
                let wa = &wire_set[com.x as usize];
                let key = [wa.p, hash_out(&wa.key, out_index)];
                send_output(com.to as usize, key, outputs)?;
                out_index += 1;
            }
            CommandKind::MassOutput => {
                for j in 0..com.y {
                    let wa = &wire_set[(com.x + j) as usize];
                    let key = [wa.p, hash_out(&wa.key, out_index)];
                    send_output(com.to as usize, key, outputs)?;
                    out_index += 1;
                }
            }
            CommandKind::Gate(6) => {
                wire_set[com.to as usize] =
                    wire_set[com.x as usize].xor(&wire_set[com.y as usize]);
            }
            CommandKind::Gate(_) => {
                let gt = tables
                    .recv()
                    .map_err(|_| Error::eval("garbled table stream exhausted"))?;
                let wa = &wire_set[com.x as usize];
                let wb = &wire_set[com.y as usize];
                let hashed = hash_gate(&wa.key, &wb.key, gate_index, n);
                wire_set[com.to as usize] = hashed.xor(&gt.get_value(wa.p, wb.p));
                gate_index += 1;
            }
        }
    }
    tracing::debug!(gates = gate_index, outputs = out_index, "evaluation finished");
    Ok(())
}

/// Streams a table set into a channel; stops silently when the evaluator
/// goes away (cancellation).
pub fn table_sender(ts: TableSet, ch: Sender<GarbledTable>) {
    for table in ts.0 {
        if ch.send(table).is_err() {
            return;
        }
    }
}

/// Streams one party's encoded input labels into a channel.
pub fn input_sender(labels: UserEncoder, ch: Sender<GarbledValue>) {
    for v in labels {
        if ch.send(v).is_err() {
            return;
        }
    }
}

/// Receives one party's decoding keys and decodes them to clear bits.
pub fn output_receiver(udec: &UserDecoder, ch: &Receiver<DecodingKey>) -> Result<Vec<bool>> {
    let mut outputs = Vec::with_capacity(udec.len());
    for _ in 0..udec.len() {
        outputs.push(
            ch.recv().map_err(|_| Error::eval("decoding key stream ended early"))?,
        );
    }
    Ok(decode_bits(udec, &outputs))
}

/// Runs the full evaluation pipeline: a table-sender task, one input-label
/// sender and one output-key receiver per party, and the evaluator itself,
/// all over bounded channels. Returns each party's clear output bits.
pub fn run_engine(
    circuit: &Circuit,
    n: u8,
    tables: TableSet,
    encoded_inputs: Vec<UserEncoder>,
    dec: &DecodingSet,
) -> Result<Vec<ClearBits>> {
    let parties = circuit.parties as usize;
    assert_eq!(encoded_inputs.len(), parties, "one input label list per party");

    let (tab_tx, tab_rx) = bounded(CHANNEL_CAPACITY);
    let mut in_rxs = Vec::with_capacity(parties);
    let mut in_txs = Vec::with_capacity(parties);
    let mut out_rxs = Vec::with_capacity(parties);
    let mut out_txs = Vec::with_capacity(parties);
    for _ in 0..parties {
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        in_txs.push(tx);
        in_rxs.push(rx);
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        out_txs.push(tx);
        out_rxs.push(rx);
    }

    std::thread::scope(|scope| {
        scope.spawn(move || table_sender(tables, tab_tx));
        for (labels, tx) in encoded_inputs.into_iter().zip(in_txs) {
            scope.spawn(move || input_sender(labels, tx));
        }

        let mut receivers = Vec::with_capacity(parties);
        for (party, rx) in out_rxs.into_iter().enumerate() {
            let udec = &dec.user[party];
            receivers.push(scope.spawn(move || output_receiver(udec, &rx)));
        }

        let eval_result = evaluate(circuit, n, &tab_rx, &in_rxs, &out_txs);
        // Dropping our channel ends closes every stream, so the sender and
        // receiver tasks terminate even when evaluation failed early.
        drop(out_txs);
        drop(in_rxs);
        drop(tab_rx);

        let mut out = Vec::with_capacity(parties);
        for handle in receivers {
            match handle.join() {
                Ok(Ok(bits)) => out.push(bits.into_iter().collect()),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::eval("output receiver panicked")),
            }
        }
        eval_result?;
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Command, Var};
    use crate::garble::garble;
    use crate::types::Type;

    const SEED: [u8; 32] = [0x42; 32];

    fn gate(t: u8, x: u32, y: u32, to: u32) -> Command {
        Command { kind: CommandKind::Gate(t), x, y, to }
    }

    /// in0 OP in1 -> out0 over single bits.
    fn tiny_circuit(op: u8) -> Circuit {
        let mut c = Circuit::new(1, 2);
        c.main.push_plain(gate(0, 0, 0, 0));
        c.main.push_plain(gate(15, 0, 0, 1));
        c.main.push_plain(Command { kind: CommandKind::Input, x: 0, y: 0, to: 2 });
        c.main.push_plain(Command { kind: CommandKind::Input, x: 1, y: 0, to: 3 });
        c.main.push_plain(gate(op, 2, 3, 4));
        c.main.push_plain(Command { kind: CommandKind::Output, x: 4, y: 0, to: 0 });
        c.total_wires = 5;
        c.inputs[0] = Var { ty: Type::Bool, wirebase: 2 };
        c.inputs[1] = Var { ty: Type::Bool, wirebase: 3 };
        c.outputs[0] = Var { ty: Type::Bool, wirebase: 4 };
        c
    }

    fn eval_gate(op: u8, a: bool, b: bool) -> bool {
        let c = tiny_circuit(op);
        let (ts, enc, dec) = garble(&c, 8, SEED).unwrap();
        let bits_a: ClearBits = [a].into_iter().collect();
        let bits_b: ClearBits = [b].into_iter().collect();
        let encoded = vec![
            enc.encode(0, &bits_a).unwrap(),
            enc.encode(1, &bits_b).unwrap(),
        ];
        let outs = run_engine(&c, 8, ts, encoded, &dec).unwrap();
        outs[0].get(0).unwrap()
    }

    #[test]
    fn every_gate_evaluates_its_truth_table() {
        for op in 0..16u8 {
            for entry in 0..4u8 {
                let a = entry & 2 != 0;
                let b = entry & 1 != 0;
                let want = (op >> (2 * (a as u8) + (b as u8))) & 1 == 1;
                assert_eq!(eval_gate(op, a, b), want, "op {op} a {a} b {b}");
            }
        }
    }

    #[test]
    fn missing_tables_abort_evaluation() {
        let c = tiny_circuit(8);
        let (_, enc, dec) = garble(&c, 8, SEED).unwrap();
        let bits: ClearBits = [true].into_iter().collect();
        let encoded = vec![enc.encode(0, &bits).unwrap(), enc.encode(1, &bits).unwrap()];
        let err = run_engine(&c, 8, TableSet::default(), encoded, &dec).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Eval);
    }

    #[test]
    fn missing_input_labels_abort_evaluation() {
        let c = tiny_circuit(8);
        let (ts, enc, dec) = garble(&c, 8, SEED).unwrap();
        let bits: ClearBits = [true].into_iter().collect();
        let encoded = vec![enc.encode(0, &bits).unwrap(), Vec::new()];
        let err = run_engine(&c, 8, ts, encoded, &dec).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Eval);
    }
}
