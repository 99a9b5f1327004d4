//! Statement lowering: declarations, conditional emission under the
//! implicit IFCOND conjunction, counted `for` loops with procedure
//! detection, and `return` with operator fast paths that write straight
//! into the function's return slot.

use super::Compiler;
use crate::ast::{self, BinaryOp, Expr, Loc, Stmt};
use crate::context::FunctionContext;
use crate::error::{Error, Result};
use crate::types::{self, Num};
use crate::variables::{BoolVariable, IFCOND_VAR, RETURN_VAR, VarMeta, Variable};
use crate::wires::WireState;

impl Compiler {
    pub(crate) fn out_stmts(&mut self, stmts: &[Stmt], fc: &mut FunctionContext) -> Result<()> {
        for s in stmts {
            self.out_stmt(s, fc)?;
        }
        Ok(())
    }

    fn out_stmt(&mut self, s: &Stmt, fc: &mut FunctionContext) -> Result<()> {
        match s {
            Stmt::Expr(e) => {
                self.out_expr(e, fc)?;
                Ok(())
            }
            Stmt::Var(inits) => {
                for init in inits {
                    self.out_var_init(&init.name, &init.init, init.loc, fc)?;
                }
                Ok(())
            }
            Stmt::If { test, consequent, alternate, .. } => {
                self.out_if(test, consequent, alternate.as_deref(), fc)
            }
            Stmt::For { init, test, update, body, loc } => {
                self.out_for(init, test, update, body, *loc, fc)
            }
            Stmt::Return(arg, loc) => self.out_return(arg.as_ref(), *loc, fc),
        }
    }

    /// A declaration assigns the initializer into the declared variable.
    /// Input variables keep their unknown wires untouched.
    fn out_var_init(
        &mut self,
        name: &str,
        init: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<()> {
        let Some(v) = self.lookup(fc, name).cloned() else {
            return Err(Error::semantic(format!("unknown variable {name}"), loc));
        };
        if v.is_input() {
            return Ok(());
        }
        let rv = self.out_value(init, fc)?;
        if v.is_ext() {
            let Variable::Ext(r) = &rv else {
                return Err(Error::semantic(
                    format!("{name} requires a compile-time constant initializer"),
                    loc,
                ));
            };
            let value = r.value;
            self.update_ext_value(fc, name, value, loc)?;
            return Ok(());
        }
        self.messy_assign_and_copy(&rv, &v)?;
        self.unlock_var(&rv);
        Ok(())
    }

    /// `if`: a compile-time condition selects a branch outright; otherwise
    /// both branches are emitted under IFCOND (the AND of all enclosing
    /// conditions, inverted for the alternate).
    fn out_if(
        &mut self,
        test: &Expr,
        consequent: &[Stmt],
        alternate: Option<&[Stmt]>,
        fc: &mut FunctionContext,
    ) -> Result<()> {
        let condv = self.out_value(test, fc)?;
        let mut cond = condv.get_wire(0);

        match self.arena[cond].state {
            WireState::One => self.out_stmts(consequent, fc)?,
            WireState::Zero => {
                if let Some(alt) = alternate {
                    self.out_stmts(alt, fc)?;
                }
            }
            _ => {
                let outer = fc.get(IFCOND_VAR).cloned();
                let orig_cond = cond;
                let mut ififcond = None;

                let iv_wire = match &outer {
                    Some(outer_v) => {
                        let prev = outer_v.get_wire(0);
                        let w = self.output_gate(8, prev, cond);
                        self.arena[w].locked = true;
                        ififcond = Some(w);
                        w
                    }
                    None => {
                        self.arena[cond].locked = true;
                        cond
                    }
                };
                fc.insert(IFCOND_VAR.to_string(), ifcond_var(iv_wire));

                self.out_stmts(consequent, fc)?;

                if let Some(alt) = alternate {
                    cond = self.invert_wire(cond);
                    self.arena[cond].locked = true;
                    let iv_wire = match &outer {
                        None => cond,
                        Some(outer_v) => {
                            let prev = outer_v.get_wire(0);
                            let w = self.output_gate(8, prev, cond);
                            self.arena[w].locked = true;
                            ififcond = Some(w);
                            w
                        }
                    };
                    fc.insert(IFCOND_VAR.to_string(), ifcond_var(iv_wire));
                    self.out_stmts(alt, fc)?;
                }

                if let Some(w) = ififcond {
                    self.arena[w].locked = false;
                }
                self.arena[cond].locked = false;
                self.arena[orig_cond].locked = false;
                match outer {
                    Some(v) => {
                        fc.insert(IFCOND_VAR.to_string(), v);
                    }
                    None => {
                        fc.shift_remove(IFCOND_VAR);
                    }
                }
            }
        }
        self.unlock_var(&condv);
        self.pool.free_if_no_refs(&mut self.arena);
        Ok(())
    }

    /// `for`: the test must reduce to a compile-time constant at every
    /// iteration. When the body never reads a variable assigned in the
    /// update expression, it is compiled once as a procedure and replayed
    /// with an iteration count.
    fn out_for(
        &mut self,
        init: &Stmt,
        test: &Expr,
        update: &Expr,
        body: &[Stmt],
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<()> {
        self.out_stmt(init, fc)?;
        let mut condv = self.out_value(test, fc)?;
        let mut cond_state = self.arena[condv.get_wire(0)].state;
        if !cond_state.is_const() {
            return Err(Error::semantic(
                "for condition must not depend on input values",
                loc,
            ));
        }

        let isproc = is_proc(update, body);
        if isproc {
            tracing::debug!("for loop compiled as a procedure");
            self.writer.begin_function(&self.circuit.funcs);
        }

        let mut itr: Num = 0;
        while cond_state == WireState::One {
            if !isproc || itr == 0 {
                self.out_stmts(body, fc)?;
            }
            itr += 1;
            self.out_expr(update, fc)?;
            condv = self.out_value(test, fc)?;
            cond_state = self.arena[condv.get_wire(0)].state;
            if !cond_state.is_const() {
                return Err(Error::semantic(
                    "for condition must not depend on input values",
                    loc,
                ));
            }
        }
        self.unlock_var(&condv);

        if isproc {
            let proc_fn = self.writer.end_function(&self.circuit.funcs);
            let proc_id = self.circuit.funcs.len() as Num;
            self.circuit.funcs.push(proc_fn);
            self.writer.add_proc_call(&self.circuit.funcs, proc_id, itr);
        }
        self.pool.free_if_no_refs(&mut self.arena);
        Ok(())
    }

    fn out_return(
        &mut self,
        arg: Option<&Expr>,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<()> {
        let Some(arg) = arg else {
            return Ok(());
        };
        let Some(returnv) = fc.get(RETURN_VAR).cloned() else {
            return Err(Error::semantic("return outside of a function", loc));
        };

        // Fast paths write the operator result straight into the return
        // slot instead of a temporary.
        if let Expr::Binary { op, left, right, .. } = arg {
            match op {
                BinaryOp::Or | BinaryOp::And | BinaryOp::Xor => {
                    let table = match op {
                        BinaryOp::Or => 14,
                        BinaryOp::And => 8,
                        _ => 6,
                    };
                    let leftv = self.out_value(left, fc)?;
                    let rightv = self.out_value(right, fc)?;
                    for i in 0..leftv.size() {
                        let w = returnv.get_wire(i);
                        let d = self.output_gate(table, leftv.get_wire(i), rightv.get_wire(i));
                        self.assign_wire(w, d);
                        self.make_wire_contain_value(w);
                    }
                    self.unlock_var(&leftv);
                    self.unlock_var(&rightv);
                    return Ok(());
                }
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                    let leftv = self.out_value(left, fc)?;
                    let rightv = self.out_value(right, fc)?;
                    if !leftv.is_int_kind() || !rightv.is_int_kind() {
                        return Err(Error::type_error("integer operands required", loc));
                    }
                    let t = types::max_type(leftv.ty(), rightv.ty(), loc)?;
                    let size = returnv.size() as usize;
                    let lw = pad_wires(self, &leftv, size);
                    let rw = pad_wires(self, &rightv, size);
                    let orig: Vec<_> = (0..returnv.size()).map(|i| returnv.get_wire(i)).collect();
                    let mut dw = orig.clone();
                    match op {
                        BinaryOp::Add => self.output_addition(&lw, &rw, &dw),
                        BinaryOp::Sub => self.output_subtract(&lw, &rw, &mut dw),
                        BinaryOp::Mul => {
                            if t.is_int() {
                                self.output_mult_signed(&lw, &rw, &dw);
                            } else {
                                self.output_mult_unsigned(&lw, &rw, &mut dw);
                            }
                        }
                        BinaryOp::Div => {
                            if t.is_int() {
                                self.output_divide_signed(&lw, &rw, &dw, false);
                            } else {
                                self.output_divide_unsigned(&lw, &rw, &dw, false);
                            }
                        }
                        _ => {
                            if t.is_int() {
                                self.output_divide_signed(&lw, &rw, &dw, true);
                            } else {
                                self.output_divide_unsigned(&lw, &rw, &dw, true);
                            }
                        }
                    }
                    self.unlock_var(&leftv);
                    self.unlock_var(&rightv);
                    // A substituted destination wire is folded back into
                    // the real return slot.
                    for (&o, &n) in orig.iter().zip(&dw) {
                        if o != n {
                            self.assign_wire(o, n);
                        }
                    }
                    for w in orig {
                        self.make_wire_contain_value(w);
                    }
                    return Ok(());
                }
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                    let table = if *op == BinaryOp::LogicalAnd { 8 } else { 14 };
                    let leftv = self.out_value(left, fc)?;
                    let rightv = self.out_value(right, fc)?;
                    let w = returnv.get_wire(0);
                    let d = self.output_gate(table, leftv.get_wire(0), rightv.get_wire(0));
                    self.assign_wire(w, d);
                    self.make_wire_contain_value(w);
                    self.unlock_var(&leftv);
                    self.unlock_var(&rightv);
                    return Ok(());
                }
                _ => {}
            }
        }

        let rv = self.out_value(arg, fc)?;
        if rv.is_int_kind() {
            let rsize = rv.size();
            for j in 0..returnv.size() {
                let w = returnv.get_wire(j);
                if j < rsize {
                    self.assign_wire(w, rv.get_wire(j));
                    self.make_wire_contain_value(w);
                } else {
                    self.assign_wire(w, self.w0);
                    self.make_wire_contain_value(w);
                }
            }
        } else {
            for j in 0..rv.size() {
                let w = returnv.get_wire(j);
                self.assign_wire(w, rv.get_wire(j));
                self.make_wire_contain_value(w);
            }
        }
        self.unlock_var(&rv);
        Ok(())
    }
}

fn ifcond_var(wire: crate::wires::WireId) -> Variable {
    Variable::Bool(BoolVariable {
        meta: VarMeta {
            name: IFCOND_VAR.to_string(),
            ty: crate::types::Type::Bool,
            perm: false,
            konst: false,
        },
        wires: vec![wire],
    })
}

fn pad_wires(c: &Compiler, v: &Variable, len: usize) -> Vec<crate::wires::WireId> {
    let mut ws: Vec<_> = v.wires().to_vec();
    while ws.len() < len {
        ws.push(c.w0);
    }
    ws
}

/// A loop is a procedure iff no identifier of the update expression occurs
/// in the body: replaying identical commands is then safe.
fn is_proc(update: &Expr, body: &[Stmt]) -> bool {
    let mut update_idents = Vec::new();
    ast::collect_idents_expr(update, &mut update_idents);

    let mut body_idents = Vec::new();
    ast::collect_idents_stmts(body, &mut body_idents);

    !body_idents.iter().any(|b| update_idents.contains(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn for_parts(src: &str) -> (Expr, Vec<Stmt>) {
        let prog = parse_program(src).unwrap();
        for s in prog.body {
            if let Stmt::For { update, body, .. } = s {
                return (update, body);
            }
        }
        panic!("no for loop in source");
    }

    #[test]
    fn loop_body_reading_induction_variable_is_not_a_procedure() {
        let (update, body) = for_parts("for (var i = 0; i < 4; i++) { x = x + i; }");
        assert!(!is_proc(&update, &body));
    }

    #[test]
    fn independent_body_is_a_procedure() {
        let (update, body) = for_parts("for (var i = 0; i < 4; i++) { x = x + 1; }");
        assert!(is_proc(&update, &body));
    }
}
