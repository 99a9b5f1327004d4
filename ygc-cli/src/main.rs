//! Command-line front-end: `build` compiles a source program to a circuit
//! file, `garble` turns a circuit file into a garbled table-set file, and
//! `run` clear-evaluates a circuit against per-party JSON inputs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::RngCore;

use ygc::circuit::{Circuit, CommandKind};
use ygc::context::{Builtins, find_parameters, generate_context};
use ygc::garble::garble;

/// Security parameter: bytes per garbled label.
const LABEL_BYTES: u8 = 8;

#[derive(Parser, Debug)]
#[command(name = "ygc")]
#[command(about = "Compiler, garbler and evaluator for Yao-style secure computation")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Compile a source program to a circuit file.
    Build {
        /// Source program to compile
        file: PathBuf,
        /// Print the parsed AST
        #[arg(long)]
        ast: bool,
        /// Print the variable context before emission
        #[arg(long)]
        cont: bool,
        /// Print the compiled circuit commands
        #[arg(long)]
        circ: bool,
        /// Do not print compilation time
        #[arg(long = "no-time")]
        no_time: bool,
        /// Verbose compiler tracing
        #[arg(long)]
        debug: bool,
        /// Suppress warnings
        #[arg(long)]
        nowarn: bool,
    },
    /// Garble a compiled circuit, producing a table-set file.
    Garble {
        /// Compiled circuit file
        file: PathBuf,
        /// Print garbling details ("true" or "false")
        debug: Option<String>,
    },
    /// Clear-evaluate a circuit with one JSON input file per party.
    Run {
        /// Compiled circuit file
        circuit: PathBuf,
        /// JSON input files, one per party in party order
        inputs: Vec<PathBuf>,
    },
}

fn init_tracing(debug: bool, nowarn: bool) {
    let default = if debug {
        "debug"
    } else if nowarn {
        "error"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version are not usage errors.
            if e.use_stderr() {
                eprintln!("{e}");
                return ExitCode::from(1);
            }
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    let result = match args.command {
        Commands::Build { file, ast, cont, circ, no_time, debug, nowarn } => {
            init_tracing(debug, nowarn);
            build(&file, ast, cont, circ, no_time)
        }
        Commands::Garble { file, debug } => {
            let debug = match debug.as_deref() {
                None | Some("false") => false,
                Some("true") => true,
                Some(other) => {
                    eprintln!("second argument must be true or false, got {other}");
                    return ExitCode::from(1);
                }
            };
            init_tracing(debug, false);
            garble_file(&file, debug)
        }
        Commands::Run { circuit, inputs } => {
            init_tracing(false, false);
            run(&circuit, &inputs)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(64)
        }
    }
}

fn build(file: &Path, ast: bool, cont: bool, circ: bool, no_time: bool) -> ygc::Result<()> {
    let started = Instant::now();
    let src = std::fs::read_to_string(file)
        .map_err(|e| ygc::Error::io(format!("{}: {e}", file.display())))?;
    let prog = ygc::parser::parse_program(&src)?;

    if ast {
        println!("{prog:#?}");
    }
    if cont {
        print_context(&prog)?;
    }

    let circuit = ygc::compiler::compile(&prog)?;

    let out = file.with_extension("circ");
    circuit.save_to_file(&out)?;
    println!("Compiled circuit saved to {}", out.display());
    if !no_time {
        println!("Compilation achieved in {:.2?}", started.elapsed());
        println!("TotalWires   {}", circuit.total_wires);
        println!("XORgates     {}", circuit.xor_gates());
        println!("NonXORgates  {}", circuit.non_xor_gates());
    }
    if circ {
        print_circuit(&circuit);
    }
    Ok(())
}

fn print_context(prog: &ygc::ast::Program) -> ygc::Result<()> {
    let (int_size, _) = find_parameters(prog)?;
    let b = Builtins::new(int_size);
    let mut arena = ygc::wires::WireArena::new();
    let w0 = arena.alloc(0);
    let w1 = arena.alloc(1);
    let pc = generate_context(prog, &b, w0, w1)?;

    println!("Program context:");
    for (name, v) in &pc.globals {
        println!("  {name:24} {}", v.ty());
    }
    for (fname, fcx) in &pc.funcs {
        println!("  function {fname}:");
        for (name, v) in fcx {
            println!("    {name:22} {}", v.ty());
        }
    }
    Ok(())
}

fn print_circuit(circuit: &Circuit) {
    println!("main:");
    for f in std::iter::once(&circuit.main).chain(&circuit.funcs) {
        for com in &f.commands {
            match com.kind {
                CommandKind::Gate(t) => {
                    println!("  gate {t:2}  ({}, {}) -> {}", com.x, com.y, com.to)
                }
                kind => println!("  {kind:?} x={} y={} to={}", com.x, com.y, com.to),
            }
        }
        println!();
    }
}

fn garble_file(file: &Path, debug: bool) -> ygc::Result<()> {
    let started = Instant::now();
    let circuit = Circuit::load_from_file(file)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .expect("static template"),
    );
    pb.set_message("Garbling circuit...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    let (tables, enc, dec) = garble(&circuit, LABEL_BYTES, seed)?;

    pb.finish_with_message(format!(
        "✓ Garbled {} gates, {} tables generated",
        circuit.xor_gates() + circuit.non_xor_gates(),
        tables.0.len()
    ));

    let out = file.with_extension("tabs");
    tables.save_to_file(&out)?;
    println!("Garbled tables saved to {}", out.display());
    println!("Garbling achieved in {:.2?}", started.elapsed());

    if debug {
        for (party, user) in enc.user.iter().enumerate() {
            println!("party {party}: {} input labels", user.len());
        }
        for (party, user) in dec.user.iter().enumerate() {
            println!("party {party}: {} decoding keys", user.len());
        }
    }
    Ok(())
}

fn run(circuit_file: &Path, input_files: &[PathBuf]) -> ygc::Result<()> {
    let started = Instant::now();
    let circuit = Circuit::load_from_file(circuit_file)?;

    if input_files.len() != circuit.parties as usize {
        return Err(ygc::Error::io(format!(
            "{} input files for a {}-party circuit",
            input_files.len(),
            circuit.parties
        )));
    }

    let mut inputs = Vec::with_capacity(input_files.len());
    for (party, path) in input_files.iter().enumerate() {
        let var = &circuit.inputs[party];
        if var.ty.is_void() {
            inputs.push(ygc::circuit::ClearBits::new());
        } else {
            inputs.push(ygc::encode::read_input_file(path, &var.ty)?);
        }
    }

    let outputs = ygc::interpret::interpret(&circuit, &inputs)?;

    for (party, bits) in outputs.iter().enumerate() {
        let var = &circuit.outputs[party];
        if var.ty.is_void() {
            continue;
        }
        let value = ygc::encode::output_to_json(bits, &var.ty)?;
        println!("Output to party {party}: {value}");
    }
    println!("Interpretation achieved in {:.2?}", started.elapsed());
    Ok(())
}
