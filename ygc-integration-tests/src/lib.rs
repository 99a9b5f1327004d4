//! Helpers for the end-to-end tests: compile a source program, evaluate it
//! both in the clear and garbled, check the two agree bit for bit, and
//! marshal the outputs back to JSON.

use anyhow::{Context, Result, ensure};
use serde_json::Value;

use ygc::circuit::{Circuit, ClearBits};
use ygc::encode::{input_from_json, output_to_json};
use ygc::evaluate::run_engine;
use ygc::garble::garble;
use ygc::interpret::interpret;
use ygc::parser::parse_program;

/// Fixed seed so every run of the suite garbles identically.
pub const TEST_SEED: [u8; 32] = [0x42; 32];

/// Bytes per garbled label in the tests.
pub const TEST_LABEL_BYTES: u8 = 4;

pub fn compile_src(src: &str) -> Result<Circuit> {
    let prog = parse_program(src).context("parse")?;
    Ok(ygc::compiler::compile(&prog).context("compile")?)
}

/// Compiles and evaluates a program twice — clear interpreter and garbled
/// engine — asserts both agree, and returns each party's JSON output
/// (`None` for parties without outputs).
pub fn execute(src: &str, inputs: &[Value]) -> Result<(Circuit, Vec<Option<Value>>)> {
    let circuit = compile_src(src)?;
    execute_circuit(&circuit, inputs).map(|outs| (circuit, outs))
}

/// Like [`execute`] for an already compiled circuit.
pub fn execute_circuit(circuit: &Circuit, inputs: &[Value]) -> Result<Vec<Option<Value>>> {
    ensure!(
        inputs.len() == circuit.parties as usize,
        "one JSON input per party"
    );

    let mut bits: Vec<ClearBits> = Vec::with_capacity(inputs.len());
    for (party, value) in inputs.iter().enumerate() {
        let var = &circuit.inputs[party];
        if var.ty.is_void() {
            bits.push(ClearBits::new());
        } else {
            bits.push(input_from_json(value, &var.ty).with_context(|| format!("input {party}"))?);
        }
    }

    // Clear interpretation.
    let clear = interpret(circuit, &bits).context("interpret")?;

    // Garbled evaluation through the channel engine.
    let (tables, enc, dec) = garble(circuit, TEST_LABEL_BYTES, TEST_SEED).context("garble")?;
    let encoded: Vec<_> = (0..circuit.parties as usize)
        .map(|p| enc.encode(p, &bits[p]))
        .collect::<ygc::Result<_>>()
        .context("encode")?;
    let garbled = run_engine(circuit, TEST_LABEL_BYTES, tables, encoded, &dec).context("evaluate")?;

    // The two evaluations must agree on every output bit of every party.
    for party in 0..circuit.parties as usize {
        ensure!(
            clear[party] == garbled[party],
            "party {party}: clear {:?} != garbled {:?}",
            clear[party],
            garbled[party]
        );
    }

    let mut outputs = Vec::with_capacity(circuit.parties as usize);
    for (party, bits) in clear.iter().enumerate() {
        let var = &circuit.outputs[party];
        if var.ty.is_void() {
            outputs.push(None);
        } else {
            outputs.push(Some(
                output_to_json(bits, &var.ty).with_context(|| format!("output {party}"))?,
            ));
        }
    }
    Ok(outputs)
}
