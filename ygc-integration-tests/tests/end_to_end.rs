//! End-to-end scenarios: each program is compiled, interpreted in the
//! clear, garbled and evaluated through the channel engine, and the two
//! evaluations are compared bit for bit before the JSON outputs are
//! checked.

use anyhow::Result;
use serde_json::json;

use ygc::circuit::{Circuit, CommandKind};
use ygc_integration_tests::{TEST_LABEL_BYTES, TEST_SEED, compile_src, execute, execute_circuit};

const HEADER: &str = "var $intsize = 8;\nvar $parties = 2;\n";

#[test]
fn identity_addition_with_wraparound() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         out_0 = in_0 + in_1;\n"
    );

    let (_, outs) = execute(&src, &[json!(3), json!(4)])?;
    assert_eq!(outs[0], Some(json!(7)));
    assert_eq!(outs[1], None);

    // int8 arithmetic wraps.
    let (_, outs) = execute(&src, &[json!(127), json!(1)])?;
    assert_eq!(outs[0], Some(json!(-128)));
    Ok(())
}

#[test]
fn comparison_selects_the_minimum() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         if (in_0 < in_1) {{ out_0 = in_0; }} else {{ out_0 = in_1; }}\n"
    );

    let (_, outs) = execute(&src, &[json!(5), json!(9)])?;
    assert_eq!(outs[0], Some(json!(5)));

    let (_, outs) = execute(&src, &[json!(9), json!(5)])?;
    assert_eq!(outs[0], Some(json!(5)));

    let (_, outs) = execute(&src, &[json!(-1), json!(0)])?;
    assert_eq!(outs[0], Some(json!(-1)));
    Ok(())
}

#[test]
fn counted_loop_sums_an_array() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = [0, 0, 0, 0];\nvar in_1 = 0;\nvar out_0 = 0;\n\
         for (var $i = 0; $i < 4; $i = $i + 1) {{\n\
             out_0 = out_0 + in_0[$i];\n\
         }}\n"
    );

    let (_, outs) = execute(&src, &[json!([1, 2, 3, 4]), json!(0)])?;
    assert_eq!(outs[0], Some(json!(10)));
    Ok(())
}

#[test]
fn rotate_left_moves_the_low_bit() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         out_0 = RotateLeft(in_0, 3);\n"
    );

    let (_, outs) = execute(&src, &[json!(1), json!(0)])?;
    assert_eq!(outs[0], Some(json!(8)));

    // Rotation wraps the high bits around.
    let (_, outs) = execute(&src, &[json!(-127), json!(0)])?; // 0b1000_0001
    assert_eq!(outs[0], Some(json!(0b0000_1100)));
    Ok(())
}

#[test]
fn signed_division_and_modulus() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\nvar out_1 = 0;\n\
         out_0 = in_0 / in_1;\n\
         out_1 = in_0 % in_1;\n"
    );

    let (_, outs) = execute(&src, &[json!(17), json!(5)])?;
    assert_eq!(outs[0], Some(json!(3)));
    assert_eq!(outs[1], Some(json!(2)));

    let (_, outs) = execute(&src, &[json!(-17), json!(5)])?;
    assert_eq!(outs[0], Some(json!(-3)));
    assert_eq!(outs[1], Some(json!(-2)));

    let (_, outs) = execute(&src, &[json!(100), json!(7)])?;
    assert_eq!(outs[0], Some(json!(14)));
    assert_eq!(outs[1], Some(json!(2)));
    Ok(())
}

#[test]
fn unsigned_division_uses_the_full_range() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = uint8(0);\nvar in_1 = uint8(0);\n\
         var out_0 = uint8(0);\nvar out_1 = uint8(0);\n\
         out_0 = in_0 / in_1;\nout_1 = in_0 % in_1;\n"
    );

    // 200 has the top bit set; a signed divide would see -56.
    let (_, outs) = execute(&src, &[json!(200), json!(9)])?;
    assert_eq!(outs[0], Some(json!(22)));
    assert_eq!(outs[1], Some(json!(2)));
    Ok(())
}

#[test]
fn unsigned_multiplication_wraps_modulo_width() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = uint8(0);\nvar in_1 = uint8(0);\nvar out_0 = uint8(0);\n\
         out_0 = in_0 * in_1;\n"
    );

    let (_, outs) = execute(&src, &[json!(20), json!(13)])?;
    assert_eq!(outs[0], Some(json!(4))); // 260 mod 256
    let (_, outs) = execute(&src, &[json!(12), json!(11)])?;
    assert_eq!(outs[0], Some(json!(132)));
    Ok(())
}

#[test]
fn procedure_detection_compresses_the_loop() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         out_0 = in_1;\n\
         for (var $i = 0; $i < 5; $i = $i + 1) {{\n\
             out_0 = out_0 + in_0;\n\
         }}\n"
    );

    let (circuit, outs) = execute(&src, &[json!(3), json!(4)])?;
    assert_eq!(outs[0], Some(json!(19)));

    // The loop body lives in exactly one new function, replayed five times
    // by a single call command.
    assert_eq!(circuit.funcs.len(), 1);
    let proc_calls: Vec<_> = circuit
        .main
        .commands
        .iter()
        .filter(|c| c.kind == CommandKind::FunctionCall && c.y > 0)
        .collect();
    assert_eq!(proc_calls.len(), 1);
    assert_eq!(proc_calls[0].y, 5);
    Ok(())
}

#[test]
fn loop_reading_its_index_is_not_compressed() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         for (var $i = 0; $i < 3; $i = $i + 1) {{\n\
             out_0 = out_0 + in_0 + $i;\n\
         }}\n"
    );

    let (circuit, outs) = execute(&src, &[json!(5), json!(0)])?;
    assert_eq!(outs[0], Some(json!(18))); // 3*5 + (0 + 1 + 2)
    assert_eq!(circuit.funcs.len(), 0);
    Ok(())
}

#[test]
fn user_functions_compile_and_call() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         function mix(x, y) {{\n\
             var t = x + y;\n\
             return t * x;\n\
         }}\n\
         out_0 = mix(in_0, in_1);\n"
    );

    // (3 + 4) * 3 = 21
    let (circuit, outs) = execute(&src, &[json!(3), json!(4)])?;
    assert_eq!(outs[0], Some(json!(21)));
    assert_eq!(circuit.funcs.len(), 1);
    assert!(
        circuit
            .main
            .commands
            .iter()
            .any(|c| c.kind == CommandKind::FunctionCall)
    );
    Ok(())
}

#[test]
fn objects_lay_out_fields_in_order() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = {{a: 0, b: 0}};\nvar in_1 = 0;\nvar out_0 = 0;\n\
         out_0 = in_0.a + in_0.b;\n"
    );

    let (_, outs) = execute(&src, &[json!({"a": 3, "b": 4}), json!(0)])?;
    assert_eq!(outs[0], Some(json!(7)));
    Ok(())
}

#[test]
fn get_and_set_wire_move_single_bits() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         out_0 = in_0;\n\
         SetWire(out_0, 0, GetWire(in_1, 0));\n"
    );

    // Low bit of out_0 comes from in_1.
    let (_, outs) = execute(&src, &[json!(6), json!(1)])?;
    assert_eq!(outs[0], Some(json!(7)));

    let (_, outs) = execute(&src, &[json!(7), json!(0)])?;
    assert_eq!(outs[0], Some(json!(6)));
    Ok(())
}

#[test]
fn bitwise_and_logical_operators() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         out_0 = (in_0 & in_1) | (in_0 ^ in_1);\n"
    );

    // (a & b) | (a ^ b) == a | b
    let (_, outs) = execute(&src, &[json!(0b0101), json!(0b0011)])?;
    assert_eq!(outs[0], Some(json!(0b0111)));

    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = true;\n\
         out_0 = (in_0 < in_1) && !(in_1 < in_0);\n"
    );
    let (_, outs) = execute(&src, &[json!(2), json!(5)])?;
    assert_eq!(outs[0], Some(json!(true)));
    let (_, outs) = execute(&src, &[json!(5), json!(2)])?;
    assert_eq!(outs[0], Some(json!(false)));
    Ok(())
}

#[test]
fn nested_ifs_compose_conditions() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         if (in_0 < 10) {{\n\
             if (in_1 < 10) {{ out_0 = 1; }} else {{ out_0 = 2; }}\n\
         }} else {{\n\
             out_0 = 3;\n\
         }}\n"
    );

    let (_, outs) = execute(&src, &[json!(5), json!(5)])?;
    assert_eq!(outs[0], Some(json!(1)));
    let (_, outs) = execute(&src, &[json!(5), json!(15)])?;
    assert_eq!(outs[0], Some(json!(2)));
    let (_, outs) = execute(&src, &[json!(15), json!(5)])?;
    assert_eq!(outs[0], Some(json!(3)));
    Ok(())
}

#[test]
fn circuit_file_round_trips_through_disk() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         out_0 = in_0 * in_1;\n"
    );
    let circuit = compile_src(&src)?;

    let file = tempfile::NamedTempFile::new()?;
    circuit.save_to_file(file.path())?;
    let loaded = Circuit::load_from_file(file.path())?;
    assert_eq!(loaded, circuit);

    // The reloaded circuit evaluates identically.
    let outs = execute_circuit(&loaded, &[json!(6), json!(7)])?;
    assert_eq!(outs[0], Some(json!(42)));
    Ok(())
}

#[test]
fn ot_delivers_the_evaluator_labels() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         out_0 = in_0 + in_1;\n"
    );
    let circuit = compile_src(&src)?;

    let bits0 = ygc::encode::input_from_json(&json!(20), &circuit.inputs[0].ty)?;
    let bits1 = ygc::encode::input_from_json(&json!(22), &circuit.inputs[1].ty)?;

    let (tables, enc, dec) = ygc::garble::garble(&circuit, TEST_LABEL_BYTES, TEST_SEED)?;

    // The garbler encodes its own input; the evaluator's labels arrive via
    // one oblivious transfer per input wire, so the garbler never sees the
    // choice bits and the evaluator never sees the other labels.
    let encoded0 = enc.encode(0, &bits0)?;
    let offset = ygc::garble::GarbledValue::new(true, enc.secret_key.clone());
    let pairs: Vec<_> = enc.user[1]
        .iter()
        .map(|l0| (l0.clone(), l0.xor(&offset)))
        .collect();
    let choices: Vec<bool> = bits1.iter().collect();
    let encoded1 =
        ygc::ot::transfer_labels(TEST_LABEL_BYTES, &pairs, &choices, [3; 32], [4; 32])?;

    let outs = ygc::evaluate::run_engine(
        &circuit,
        TEST_LABEL_BYTES,
        tables,
        vec![encoded0, encoded1],
        &dec,
    )?;
    let value = ygc::encode::output_to_json(&outs[0], &circuit.outputs[0].ty)?;
    assert_eq!(value, json!(42));
    Ok(())
}

#[test]
fn garbling_twice_with_one_seed_is_identical() -> Result<()> {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         out_0 = in_0 - in_1;\n"
    );
    let circuit = compile_src(&src)?;

    let a = ygc::garble::garble(&circuit, TEST_LABEL_BYTES, TEST_SEED)?;
    let b = ygc::garble::garble(&circuit, TEST_LABEL_BYTES, TEST_SEED)?;
    assert_eq!(a.0, b.0);
    assert_eq!(a.1, b.1);
    assert_eq!(a.2, b.2);

    // Table count and decoding-key count follow the circuit.
    assert_eq!(a.0.0.len(), circuit.non_xor_gates() as usize);
    let width: usize = circuit.outputs.iter().map(|v| v.ty.size() as usize).sum();
    assert_eq!(a.2.user.iter().map(Vec::len).sum::<usize>(), width);
    Ok(())
}

#[test]
fn secret_dependent_loop_bound_is_rejected() {
    let src = format!(
        "{HEADER}var in_0 = 0;\nvar in_1 = 0;\nvar out_0 = 0;\n\
         for (var $i = 0; $i < in_0; $i = $i + 1) {{ out_0 = out_0 + 1; }}\n"
    );
    let err = compile_src(&src).unwrap_err();
    assert!(err.to_string().contains("input"), "got: {err}");
}
