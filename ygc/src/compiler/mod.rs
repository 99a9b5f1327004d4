//! Two-pass compiler from the source AST to a circuit. Pass 1 builds the
//! program context (types, variables, functions) and checks it; pass 2
//! walks the statements and emits commands through the packing writer,
//! allocating temporary wires from the pool and permanent wires densely
//! from 2 upward (wires 0 and 1 are the constants).

mod arith;
mod expr;
mod gates;
mod stmt;
mod wiring;

use indexmap::IndexMap;

use crate::ast::Program;
use crate::circuit::{Circuit, Var};
use crate::context::{self, Builtins, FunctionContext};
use crate::error::{Error, Result};
use crate::pool::WirePool;
use crate::typecheck;
use crate::types::{Num, Type};
use crate::variables::{BoolVariable, ExtInt, RETURN_VAR, VarMeta, Variable};
use crate::wires::{WireArena, WireId, WireState};
use crate::writer::FuncWriter;

/// Owns every piece of state of one compilation: the wire arena and pool,
/// the circuit under construction, the packing writer, and the contexts.
#[derive(Debug)]
pub struct Compiler {
    pub arena: WireArena,
    pub pool: WirePool,
    pub writer: FuncWriter,
    pub circuit: Circuit,
    pub builtins: Builtins,
    pub globals: FunctionContext,
    pub funcs_ctx: IndexMap<String, FunctionContext>,
    pub w0: WireId,
    pub w1: WireId,
    next_base_wire: Num,
}

/// Compiles a parsed program into a circuit.
pub fn compile(prog: &Program) -> Result<Circuit> {
    let (int_size, parties) = context::find_parameters(prog)?;
    let mut c = Compiler::new(int_size, parties);
    c.run(prog)?;
    Ok(c.circuit)
}

impl Compiler {
    fn new(int_size: Num, parties: u8) -> Self {
        let mut arena = WireArena::new();
        let mut writer = FuncWriter::new();
        let circuit = Circuit::new(int_size, parties);

        // The reserved constant wires. The 1-wire is built by a GATE_15
        // with both operands on the 0-wire; downstream stages rely on this
        // construction.
        let w0 = arena.alloc(0);
        writer.add_gate(&circuit.funcs, 0, 0, 0, 0);
        let w1 = arena.alloc(1);
        arena[w1].state = WireState::One;
        writer.add_gate(&circuit.funcs, 15, 1, 0, 0);

        Compiler {
            arena,
            pool: WirePool::new(2),
            writer,
            circuit,
            builtins: Builtins::new(int_size),
            globals: FunctionContext::new(),
            funcs_ctx: IndexMap::new(),
            w0,
            w1,
            next_base_wire: 2,
        }
    }

    fn run(&mut self, prog: &Program) -> Result<()> {
        let pc = context::generate_context(prog, &self.builtins, self.w0, self.w1)?;
        typecheck::check_program(prog, &pc, &self.builtins)?;
        self.globals = pc.globals;
        self.funcs_ctx = pc.funcs;

        self.set_up_variables()?;
        self.pool = WirePool::new(self.next_base_wire);

        // Input commands come first.
        for party in 0..self.circuit.parties as usize {
            let v = self.circuit.inputs[party].clone();
            if v.ty.is_void() {
                continue;
            }
            if v.ty.size() == 1 {
                self.writer.add_in(&self.circuit.funcs, v.wirebase, party as Num);
            } else {
                self.writer.add_mass_in(&self.circuit.funcs, v.wirebase, v.ty.size(), party as Num);
            }
        }

        // Auxiliary functions, in declaration order.
        for (idx, f) in prog.functions.iter().enumerate() {
            tracing::debug!(function = %f.name, "emitting function");
            self.writer.begin_function(&self.circuit.funcs);
            let mut fc = self
                .funcs_ctx
                .shift_remove(&f.name)
                .ok_or_else(|| Error::internal(format!("missing context for {}", f.name)))?;
            self.out_stmts(&f.body, &mut fc)?;
            self.pool.free_if_no_refs(&mut self.arena);
            if self.pool.used_sets() != 0 {
                tracing::debug!(
                    function = %f.name,
                    leaked = self.pool.used_sets(),
                    "pool sets still in use at end of function"
                );
            }
            self.funcs_ctx.insert(f.name.clone(), fc);

            let done = self.writer.end_function(&self.circuit.funcs);
            self.circuit.funcs[idx] = done;

            // Each function body gets a fresh pool over the wire numbers it
            // grew; global variables are reset to unknown for the next one.
            self.next_base_wire = self.pool.next_number;
            self.pool = WirePool::new(self.next_base_wire);
            self.reset_global_states();
        }

        // Main body: the global context is its scope.
        tracing::debug!("emitting main");
        let mut fc = std::mem::take(&mut self.globals);
        self.out_stmts(&prog.body, &mut fc)?;
        self.globals = fc;

        // Output commands close the circuit.
        for party in 0..self.circuit.parties as usize {
            let v = self.circuit.outputs[party].clone();
            if v.ty.is_void() {
                continue;
            }
            if v.ty.size() == 1 {
                self.writer.add_out(&self.circuit.funcs, v.wirebase, party as Num);
            } else {
                self.writer.add_mass_out(&self.circuit.funcs, v.wirebase, v.ty.size(), party as Num);
            }
        }

        self.circuit.main = self.writer.finish(&self.circuit.funcs);
        self.circuit.total_wires = self.pool.next_number;

        // The tallies counted at push time can undercount calls to
        // functions declared later; recount over the expanded stream so the
        // circuit-level invariants hold unconditionally.
        let (mut xor, mut non_xor) = (0u32, 0u32);
        for com in self.circuit.commands() {
            if let crate::circuit::CommandKind::Gate(t) = com.kind {
                if t == 6 {
                    xor += 1;
                } else {
                    non_xor += 1;
                }
            }
        }
        self.circuit.main.xor_gates = xor;
        self.circuit.main.non_xor_gates = non_xor;

        tracing::debug!(
            total_wires = self.circuit.total_wires,
            xor_gates = xor,
            non_xor_gates = non_xor,
            "compilation finished"
        );
        Ok(())
    }

    /// Allocates wires for every declared variable: permanent numbers for
    /// user variables, constant binding for `$` variables, and the function
    /// slots (return first, then arguments). Tags circuit inputs/outputs.
    fn set_up_variables(&mut self) -> Result<()> {
        let names: Vec<String> = self.globals.keys().cloned().collect();
        for name in names {
            let is_function = matches!(self.globals[&name], Variable::Function(_));
            if !is_function {
                let mut v = self.globals[&name].clone();
                v.fill_in_wires(&mut self.arena, None);
                if !name.starts_with('$') {
                    v.set_perm();
                    self.next_base_wire = v.assign_perm_wires(&mut self.arena, self.next_base_wire);
                    for i in 0..v.size() {
                        self.arena[v.get_wire(i)].state = WireState::Unknown;
                    }
                }
                if v.is_input() {
                    let party = party_of(&name, self.circuit.parties)?;
                    self.circuit.inputs[party] =
                        Var { ty: v.ty().clone(), wirebase: v.wirebase(&self.arena) };
                } else if v.is_output() {
                    let party = party_of(&name, self.circuit.parties)?;
                    self.circuit.outputs[party] =
                        Var { ty: v.ty().clone(), wirebase: v.wirebase(&self.arena) };
                }
                self.globals[&name] = v;
                continue;
            }

            // Function: fill its whole scope, then mirror the filled
            // parameter and return slots into the function variable.
            self.circuit.funcs.push(crate::circuit::Function::new());
            let mut fc = self
                .funcs_ctx
                .shift_remove(&name)
                .ok_or_else(|| Error::internal(format!("missing context for {name}")))?;
            for (vname, v) in fc.iter_mut() {
                v.fill_in_wires(&mut self.arena, None);
                if vname.starts_with('$') {
                    v.set_const();
                } else {
                    v.set_perm();
                    self.next_base_wire = v.assign_perm_wires(&mut self.arena, self.next_base_wire);
                }
            }

            let Variable::Function(fv) = &mut self.globals[&name] else {
                return Err(Error::internal("function variable changed kind"));
            };
            let params = fv.node.params.clone();
            fv.args = params
                .iter()
                .filter_map(|p| fc.get(p).cloned())
                .collect();
            fv.ret = fc.get(RETURN_VAR).cloned().map(Box::new);

            // Argument and return wires hold unknown values while the body
            // is compiled.
            let fv = fv.clone();
            for a in &fv.args {
                for i in 0..a.size() {
                    self.arena[a.get_wire(i)].state = WireState::Unknown;
                }
            }
            if let Some(ret) = &fv.ret {
                for i in 0..ret.size() {
                    self.arena[ret.get_wire(i)].state = WireState::Unknown;
                }
            }
            self.funcs_ctx.insert(name.clone(), fc);
        }
        Ok(())
    }

    /// After each function body, every permanent global goes back to the
    /// unknown state for the next emission.
    fn reset_global_states(&mut self) {
        let names: Vec<String> = self.globals.keys().cloned().collect();
        for name in names {
            if name.starts_with('$') {
                continue;
            }
            if matches!(self.globals[&name], Variable::Function(_)) {
                continue;
            }
            let v = self.globals[&name].clone();
            for i in 0..v.size() {
                self.arena[v.get_wire(i)].state = WireState::Unknown;
            }
        }
    }

    /// A fresh boolean variable over the constant-1 or constant-0 wire,
    /// used for folded comparison results.
    pub(crate) fn bool_const(&self, value: bool) -> Variable {
        Variable::Bool(BoolVariable {
            meta: VarMeta {
                name: if value { "true" } else { "false" }.to_string(),
                ty: Type::Bool,
                perm: false,
                konst: false,
            },
            wires: vec![if value { self.w1 } else { self.w0 }],
        })
    }

    /// A fresh extended int of the default width.
    pub(crate) fn simple_ext(&self, value: i64) -> Variable {
        Variable::Ext(ExtInt::new(self.builtins.int_t.clone(), "", value, self.w0, self.w1))
    }

    /// A wire sequence spelling `value` over `len` constant wires.
    pub(crate) fn const_wires(&self, value: u64, len: usize) -> Vec<WireId> {
        (0..len)
            .map(|i| if i < 64 && (value >> i) & 1 == 1 { self.w1 } else { self.w0 })
            .collect()
    }

    /// Looks a name up in the active scope, falling back to the globals.
    pub(crate) fn lookup<'a>(
        &'a self,
        fc: &'a FunctionContext,
        name: &str,
    ) -> Option<&'a Variable> {
        fc.get(name).or_else(|| self.globals.get(name))
    }

    /// Unlocks a variable's wires unless it is permanent or constant.
    /// Returns whether it was unlocked (and so may be released).
    pub(crate) fn unlock_var(&mut self, v: &Variable) -> bool {
        if !v.is_perm() && !v.is_const() && !matches!(v, Variable::Ext(_)) {
            v.unlock(&mut self.arena);
            return true;
        }
        false
    }

    /// Locks a variable's wires unless it is permanent or constant.
    pub(crate) fn lock_var(&mut self, v: &Variable) {
        if !v.is_perm() && !v.is_const() && !matches!(v, Variable::Ext(_)) {
            v.lock(&mut self.arena);
        }
    }
}

fn party_of(name: &str, parties: u8) -> Result<usize> {
    let idx = name
        .split('_')
        .nth(1)
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| {
            Error::new(
                crate::error::ErrorKind::Semantic,
                format!("variable {name} has no party index"),
            )
        })?;
    if idx >= parties as usize {
        return Err(Error::new(
            crate::error::ErrorKind::Semantic,
            format!("variable {name} names party {idx}, but $parties is {parties}"),
        ));
    }
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Command, CommandKind};
    use crate::parser::parse_program;

    fn compile_src(src: &str) -> Result<Circuit> {
        compile(&parse_program(src).unwrap())
    }

    const HEADER: &str = "var $intsize = 8; var $parties = 2;\n";

    #[test]
    fn constant_wires_are_emitted_first() {
        let c = compile_src(&format!(
            "{HEADER} var in_0 = 0; var in_1 = 0; var out_0 = 0; out_0 = in_0 + in_1;"
        ))
        .unwrap();
        let coms: Vec<Command> = c.commands().collect();
        assert_eq!(coms[0].kind, CommandKind::Gate(0));
        assert_eq!(coms[0].to, 0);
        assert_eq!(coms[1].kind, CommandKind::Gate(15));
        assert_eq!((coms[1].x, coms[1].y, coms[1].to), (0, 0, 1));
    }

    #[test]
    fn total_wires_covers_every_written_wire() {
        let c = compile_src(&format!(
            "{HEADER} var in_0 = 0; var in_1 = 0; var out_0 = 0; out_0 = in_0 + in_1;"
        ))
        .unwrap();
        let max_written = c
            .commands()
            .filter(|c| {
                !matches!(c.kind, CommandKind::Output | CommandKind::MassOutput)
            })
            .map(|c| match c.kind {
                CommandKind::MassCopy | CommandKind::MassInput | CommandKind::Replicate => {
                    c.to + c.y - 1
                }
                _ => c.to,
            })
            .max()
            .unwrap();
        assert_eq!(c.total_wires, max_written + 1);
    }

    #[test]
    fn gate_tallies_match_expanded_stream() {
        let c = compile_src(&format!(
            "{HEADER} var in_0 = 0; var in_1 = 0; var out_0 = 0;\n\
             out_0 = in_0 * in_1 + in_0;"
        ))
        .unwrap();
        let (mut xor, mut non_xor) = (0, 0);
        for com in c.commands() {
            match com.kind {
                CommandKind::Gate(6) => xor += 1,
                CommandKind::Gate(_) => non_xor += 1,
                _ => {}
            }
        }
        assert_eq!(c.xor_gates(), xor);
        assert_eq!(c.non_xor_gates(), non_xor);
        assert!(non_xor > 0);
    }

    #[test]
    fn inputs_become_mass_input_commands() {
        let c = compile_src(&format!(
            "{HEADER} var in_0 = 0; var in_1 = 0; var out_0 = 0; out_0 = in_0 + in_1;"
        ))
        .unwrap();
        let inputs: Vec<Command> = c
            .commands()
            .filter(|c| matches!(c.kind, CommandKind::Input | CommandKind::MassInput))
            .collect();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].kind, CommandKind::MassInput);
        assert_eq!(inputs[0].y, 8);
        assert_eq!(inputs[0].x, 0);
        assert_eq!(inputs[1].x, 1);
        assert_eq!(c.inputs[0].ty, Type::Int(8));
    }

    #[test]
    fn missing_parameters_is_an_error() {
        assert!(compile_src("var x = 1; x = x + 1;").is_err());
    }
}
