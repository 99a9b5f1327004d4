//! Toolchain for Yao-style secure multi-party computation over Boolean
//! circuits: a compiler from a restricted high-level dialect to a compact
//! circuit representation, a Free-XOR/row-reduction garbler, a streaming
//! evaluator with CDH-based oblivious transfer, and a clear reference
//! interpreter.

pub mod ast;
pub mod circuit;
pub mod compiler;
pub mod context;
pub mod encode;
pub mod error;
pub mod evaluate;
pub mod garble;
pub mod interpret;
pub mod ot;
pub mod parser;
pub mod pool;
pub mod shortcut;
pub mod typecheck;
pub mod types;
pub mod variables;
pub mod wires;
pub mod writer;

pub use circuit::{Circuit, Command, CommandKind};
pub use error::{Error, ErrorKind, Result};
pub use types::{Num, Type};
