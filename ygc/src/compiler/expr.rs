//! Expression lowering. Each expression produces a [`Variable`] holding the
//! result; temporaries come from the pool and are unlocked and swept after
//! use. Two extended-int operands fold at compile time for every operator.

use super::Compiler;
use crate::ast::{BinaryOp, Expr, Loc, UnaryOp};
use crate::context::FunctionContext;
use crate::error::{Error, Result};
use crate::types::{self, Num, Type};
use crate::variables::{ArrayVariable, BoolVariable, ExtInt, IFCOND_VAR, ObjectVariable, VarMeta, Variable};
use crate::wires::WireId;

impl Compiler {
    pub(crate) fn out_expr(
        &mut self,
        e: &Expr,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        match e {
            Expr::Number(v, _) => Ok(Some(self.out_number_literal(*v, fc))),
            Expr::Bool(v, _) => Ok(Some(self.bool_const(*v))),
            Expr::Array(items, loc) => self.out_array_literal(items, *loc, fc),
            Expr::Object(props, loc) => self.out_object_literal(props, *loc, fc),
            Expr::Ident(name, loc) => self
                .lookup(fc, name)
                .cloned()
                .map(Some)
                .ok_or_else(|| Error::semantic(format!("unknown identifier {name}"), *loc)),
            Expr::Binary { op, left, right, loc } => self.out_binary(*op, left, right, *loc, fc),
            Expr::Unary { op, operand, loc } => self.out_unary(*op, operand, *loc, fc),
            Expr::Assign { target, value, loc } => {
                // A call to a user function on the right-hand side writes
                // the return slot straight into the target.
                if let Expr::Call { callee, args, .. } = value.as_ref() {
                    if matches!(self.lookup(fc, callee), Some(Variable::Function(_))) {
                        let callee = callee.clone();
                        let args = args.clone();
                        return self.out_call_and_assign(target, &callee, &args, *loc, fc);
                    }
                }
                self.out_assign(target, value, *loc, fc)
            }
            Expr::Call { callee, args, loc } => match callee.as_str() {
                "RotateLeft" => self.out_rotate_left(&args[0], &args[1], *loc, fc),
                "GetWire" => self.out_get_wire(&args[0], &args[1], *loc, fc),
                "SetWire" => self.out_set_wire(&args[0], &args[1], &args[2], *loc, fc),
                _ => {
                    if self.lookup(fc, callee).is_none() {
                        if let Some(target) = self.builtins.conversion(callee) {
                            if args.len() != 1 {
                                return Err(Error::semantic(
                                    format!("{callee} takes 1 argument, got {}", args.len()),
                                    *loc,
                                ));
                            }
                            return self.out_conversion(&target, &args[0], *loc, fc);
                        }
                    }
                    self.out_call(callee, args, *loc, fc)
                }
            },
            Expr::Index { base, index, loc } => self.out_index(base, index, *loc, fc),
            Expr::Member { base, key, loc } => self.out_member(base, key, *loc, fc),
        }
    }

    /// `out_expr` for positions where a value is required.
    pub(crate) fn out_value(&mut self, e: &Expr, fc: &mut FunctionContext) -> Result<Variable> {
        self.out_expr(e, fc)?
            .ok_or_else(|| Error::internal("expression produced no value"))
    }

    fn out_number_literal(&mut self, value: i64, fc: &mut FunctionContext) -> Variable {
        let key = format!("NUM_VAR_$$_{value}");
        if !fc.contains_key(&key) {
            let ext = ExtInt::new(self.builtins.int_t.clone(), &key, value, self.w0, self.w1);
            fc.insert(key.clone(), Variable::Ext(ext));
        }
        fc[&key].clone()
    }

    fn out_array_literal(
        &mut self,
        items: &[Expr],
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        if items.is_empty() {
            return Err(Error::type_error("empty array literal has no type", loc));
        }
        let mut vars = Vec::with_capacity(items.len());
        for item in items {
            vars.push(self.out_value(item, fc)?);
        }
        let ty = Type::Array(items.len() as Num, Box::new(vars[0].ty().clone()));
        Ok(Some(Variable::Array(ArrayVariable {
            meta: VarMeta { name: "GENERATED_ARRAY".into(), ty, perm: false, konst: false },
            items: vars,
        })))
    }

    fn out_object_literal(
        &mut self,
        props: &[(String, Expr)],
        _loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let mut fields = indexmap::IndexMap::new();
        let mut field_tys = Vec::with_capacity(props.len());
        for (k, v) in props {
            let var = self.out_value(v, fc)?;
            field_tys.push((k.clone(), var.ty().clone()));
            fields.insert(k.clone(), var);
        }
        Ok(Some(Variable::Object(ObjectVariable {
            meta: VarMeta {
                name: "GENERATED_OBJECT".into(),
                ty: Type::Object(field_tys),
                perm: false,
                konst: false,
            },
            fields,
        })))
    }

    /// Evaluates both operands of an integer operation and derives the
    /// destination type.
    fn aux_int_operands(
        &mut self,
        left: &Expr,
        right: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<(Type, Variable, Variable)> {
        let leftv = self.out_value(left, fc)?;
        let rightv = self.out_value(right, fc)?;
        if !leftv.is_int_kind() || !rightv.is_int_kind() {
            return Err(Error::type_error("integer operands required", loc));
        }
        let t = types::max_type(leftv.ty(), rightv.ty(), loc)?;
        Ok((t, leftv, rightv))
    }

    /// The operand's wires padded with the 0-wire up to the destination
    /// width (narrower operands zero-extend under max-type promotion).
    fn op_wires(&self, v: &Variable, len: usize) -> Vec<WireId> {
        let mut ws: Vec<WireId> = v.wires().to_vec();
        while ws.len() < len {
            ws.push(self.w0);
        }
        ws
    }

    fn cleanup_binary_int(&mut self, l: &Variable, r: &Variable, d: &Variable) {
        if self.unlock_var(l) {
            if let Variable::Int(iv) = l {
                let ws = iv.wires.clone();
                self.pool.free_set(&mut self.arena, &ws);
            }
        }
        if self.unlock_var(r) {
            if let Variable::Int(iv) = r {
                let ws = iv.wires.clone();
                self.pool.free_set(&mut self.arena, &ws);
            }
        }
        self.lock_var(d);
    }

    fn cleanup_any(&mut self, l: &Variable, r: &Variable, d: &Variable) {
        self.unlock_var(l);
        self.unlock_var(r);
        self.lock_var(d);
        self.pool.free_if_no_refs(&mut self.arena);
    }

    fn new_int_temp(&mut self, t: &Type, name: &str) -> Variable {
        let mut v = Variable::from_type(t, name, self.w0, self.w1)
            .expect("integer temporary from a sized type");
        v.fill_in_wires(&mut self.arena, Some(&mut self.pool));
        v
    }

    fn out_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                self.out_arith(op, left, right, loc, fc)
            }
            BinaryOp::Or | BinaryOp::And | BinaryOp::Xor => {
                self.out_bitwise(op, left, right, loc, fc)
            }
            BinaryOp::Shl | BinaryOp::Shr => self.out_shift(op, left, right, loc, fc),
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                self.out_logical(op, left, right, loc, fc)
            }
            BinaryOp::Less
            | BinaryOp::Greater
            | BinaryOp::LessEq
            | BinaryOp::GreaterEq
            | BinaryOp::Eq
            | BinaryOp::Ne => self.out_comparison(op, left, right, loc, fc),
        }
    }

    fn out_arith(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let (t, leftv, rightv) = self.aux_int_operands(left, right, loc, fc)?;
        tracing::trace!(op = op.symbol(), ty = %t, "arithmetic");

        if let (Variable::Ext(l), Variable::Ext(r)) = (&leftv, &rightv) {
            let folded = match op {
                BinaryOp::Add => l.value.wrapping_add(r.value),
                BinaryOp::Sub => l.value.wrapping_sub(r.value),
                BinaryOp::Mul => l.value.wrapping_mul(r.value),
                BinaryOp::Div | BinaryOp::Rem => {
                    if r.value == 0 {
                        return Err(Error::semantic("division by zero constant", loc));
                    }
                    if op == BinaryOp::Div {
                        l.value.wrapping_div(r.value)
                    } else {
                        l.value.wrapping_rem(r.value)
                    }
                }
                _ => unreachable!(),
            };
            return Ok(Some(self.simple_ext(folded)));
        }

        let destv = self.new_int_temp(&t, &format!("{}OP", op.symbol()));
        let size = t.size() as usize;
        let lw = self.op_wires(&leftv, size);
        let rw = self.op_wires(&rightv, size);
        let mut dw = destv.wires().to_vec();

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
            BinaryOp::Rem => {
                if t.is_int() {
                    self.output_divide_signed(&lw, &rw, &dw, true);
                } else {
                    self.output_divide_unsigned(&lw, &rw, &dw, true);
                }
            }
            _ => unreachable!(),
        }
        let mut destv = destv;
        destv.set_wires(dw);

        self.cleanup_binary_int(&leftv, &rightv, &destv);
        Ok(Some(destv))
    }

    fn out_bitwise(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let table = match op {
            BinaryOp::Or => 14,
            BinaryOp::And => 8,
            BinaryOp::Xor => 6,
            _ => unreachable!(),
        };
        let leftv = self.out_value(left, fc)?;
        let rightv = self.out_value(right, fc)?;

        if let (Variable::Ext(l), Variable::Ext(r)) = (&leftv, &rightv) {
            let folded = match op {
                BinaryOp::Or => l.value | r.value,
                BinaryOp::And => l.value & r.value,
                BinaryOp::Xor => l.value ^ r.value,
                _ => unreachable!(),
            };
            return Ok(Some(self.simple_ext(folded)));
        }
        if leftv.size() != rightv.size() {
            return Err(Error::type_error("bitwise operands must have equal sizes", loc));
        }

        let mut destv = Variable::from_type(leftv.ty(), &format!("{}OP", op.symbol()), self.w0, self.w1)
            .ok_or_else(|| Error::type_error("bitwise operation on void", loc))?;
        destv.fill_in_wires(&mut self.arena, Some(&mut self.pool));

        for i in 0..leftv.size() {
            let d = self.output_gate(table, leftv.get_wire(i), rightv.get_wire(i));
            self.assign_wire(destv.get_wire(i), d);
        }

        self.cleanup_any(&leftv, &rightv, &destv);
        Ok(Some(destv))
    }

    fn out_shift(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let leftv = self.out_value(left, fc)?;
        let rightv = self.out_value(right, fc)?;
        if !leftv.is_int_kind() || !rightv.is_int_kind() {
            return Err(Error::type_error("integer operands required for shift", loc));
        }
        let shift = self.wires_to_int(&rightv, "shift amount", loc)?;
        if shift < 0 {
            return Err(Error::semantic("negative shift amount", loc));
        }

        if let Variable::Ext(l) = &leftv {
            let folded = match op {
                BinaryOp::Shl => {
                    if shift >= 64 { 0 } else { l.value << shift }
                }
                _ => l.value >> shift.min(63),
            };
            return Ok(Some(self.simple_ext(folded)));
        }

        let destv = self.new_int_temp(&leftv.ty().clone(), &format!("{}OP", op.symbol()));
        let dw = destv.wires().to_vec();
        let lsize = leftv.size();
        let shift = shift as Num;

        match op {
            BinaryOp::Shl => {
                for i in 0..shift.min(lsize) {
                    self.assign_wire(dw[i as usize], self.w0);
                }
                let mut i = 0;
                while i + shift < lsize {
                    self.assign_wire(dw[(i + shift) as usize], leftv.get_wire(i));
                    self.make_wire_contain_value_no_const_copy(dw[(i + shift) as usize]);
                    i += 1;
                }
            }
            _ => {
                let mut i = 0;
                while i + shift < lsize {
                    self.assign_wire(dw[i as usize], leftv.get_wire(i + shift));
                    self.make_wire_contain_value(dw[i as usize]);
                    i += 1;
                }
                while i < lsize {
                    self.assign_wire(dw[i as usize], self.w0);
                    i += 1;
                }
            }
        }

        self.cleanup_any(&leftv, &rightv, &destv);
        Ok(Some(destv))
    }

    pub(crate) fn out_rotate_left(
        &mut self,
        left: &Expr,
        right: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let leftv = self.out_value(left, fc)?;
        let rightv = self.out_value(right, fc)?;
        if !leftv.is_int_kind() || !rightv.is_int_kind() {
            return Err(Error::type_error("integer operands required for RotateLeft", loc));
        }
        let amount = self.wires_to_int(&rightv, "rotation amount", loc)?;
        let lsize = leftv.size() as i64;
        let k = amount.rem_euclid(lsize) as Num;

        if let Variable::Ext(l) = &leftv {
            let size = l.meta.ty.size();
            let mask = if size >= 64 { u64::MAX } else { (1u64 << size) - 1 };
            let v = (l.value as u64) & mask;
            let rotated = if k == 0 { v } else { ((v << k) | (v >> (size - k))) & mask };
            return Ok(Some(self.simple_ext(rotated as i64)));
        }

        let destv = self.new_int_temp(&leftv.ty().clone(), "<<>OP");
        let dw = destv.wires().to_vec();
        let lsize = leftv.size();
        for i in 0..lsize {
            let target = dw[((i + k) % lsize) as usize];
            self.assign_wire(target, leftv.get_wire(i));
            if !leftv.is_const() {
                self.make_wire_contain_value_no_const_copy(target);
            }
        }

        self.cleanup_any(&leftv, &rightv, &destv);
        Ok(Some(destv))
    }

    fn out_logical(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let table = if op == BinaryOp::LogicalAnd { 8 } else { 14 };
        let leftv = self.out_value(left, fc)?;
        let rightv = self.out_value(right, fc)?;
        if !leftv.ty().is_bool() || !rightv.ty().is_bool() {
            return Err(Error::type_error("logical operator requires bool operands", loc));
        }

        let mut destv = Variable::from_type(&Type::Bool, &format!("{}OP", op.symbol()), self.w0, self.w1)
            .expect("bool temporary");
        destv.fill_in_wires(&mut self.arena, Some(&mut self.pool));

        let d = self.output_gate(table, leftv.get_wire(0), rightv.get_wire(0));
        self.assign_wire(destv.get_wire(0), d);

        self.cleanup_any(&leftv, &rightv, &destv);
        Ok(Some(destv))
    }

    fn out_comparison(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let (t, leftv, rightv) = self.aux_int_operands(left, right, loc, fc)?;

        if let (Variable::Ext(l), Variable::Ext(r)) = (&leftv, &rightv) {
            let folded = match op {
                BinaryOp::Less => l.value < r.value,
                BinaryOp::Greater => l.value > r.value,
                BinaryOp::LessEq => l.value <= r.value,
                BinaryOp::GreaterEq => l.value >= r.value,
                BinaryOp::Eq => l.value == r.value,
                BinaryOp::Ne => l.value != r.value,
                _ => unreachable!(),
            };
            return Ok(Some(self.bool_const(folded)));
        }

        let size = t.size() as usize;
        let lw = self.op_wires(&leftv, size);
        let rw = self.op_wires(&rightv, size);

        let w = match op {
            BinaryOp::Less => self.output_less_than(&lw, &rw),
            BinaryOp::Greater => self.output_less_than(&rw, &lw),
            BinaryOp::LessEq => {
                let w = self.output_less_than(&rw, &lw);
                self.invert_wire(w)
            }
            BinaryOp::GreaterEq => {
                let w = self.output_less_than(&lw, &rw);
                self.invert_wire(w)
            }
            BinaryOp::Eq => self.output_equals(&lw, &rw),
            BinaryOp::Ne => {
                let w = self.output_equals(&lw, &rw);
                self.invert_wire(w)
            }
            _ => unreachable!(),
        };

        let destv = Variable::Bool(BoolVariable {
            meta: VarMeta {
                name: format!("{}OP", op.symbol()),
                ty: Type::Bool,
                perm: false,
                konst: false,
            },
            wires: vec![w],
        });

        match op {
            BinaryOp::Eq | BinaryOp::Ne => self.cleanup_any(&leftv, &rightv, &destv),
            _ => self.cleanup_binary_int(&leftv, &rightv, &destv),
        }
        Ok(Some(destv))
    }

    fn out_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        match op {
            UnaryOp::Not => self.out_not(operand, loc, fc),
            UnaryOp::Neg => self.out_neg(operand, loc, fc),
            UnaryOp::PostIncrement => self.out_post_step(operand, 1, loc, fc),
            UnaryOp::PostDecrement => self.out_post_step(operand, -1, loc, fc),
        }
    }

    fn out_not(
        &mut self,
        operand: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let leftv = self.out_value(operand, fc)?;
        if let Variable::Ext(l) = &leftv {
            return Ok(Some(self.simple_ext(!l.value)));
        }

        let mut destv = Variable::from_type(leftv.ty(), "!OP", self.w0, self.w1)
            .ok_or_else(|| Error::type_error("cannot negate void", loc))?;
        destv.fill_in_wires(&mut self.arena, Some(&mut self.pool));

        for i in 0..leftv.size() {
            let d1 = leftv.get_wire(i);
            let d2 = destv.get_wire(i);
            let inv = self.invert_wire(d1);
            self.assign_wire(d2, inv);
            self.arena[d1].locked = false;
            self.arena[d2].locked = true;
        }
        self.pool.free_if_no_refs(&mut self.arena);
        Ok(Some(destv))
    }

    fn out_neg(
        &mut self,
        operand: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let leftv = self.out_value(operand, fc)?;
        if !leftv.is_int_kind() {
            return Err(Error::type_error("unary minus requires an integer", loc));
        }
        if let Variable::Ext(l) = &leftv {
            return Ok(Some(self.simple_ext(l.value.wrapping_neg())));
        }

        let mut destv = self.new_int_temp(&leftv.ty().clone(), "-OP");
        let zeros = vec![self.w0; leftv.size() as usize];
        let lw = leftv.wires().to_vec();
        let mut dw = destv.wires().to_vec();
        self.output_subtract(&zeros, &lw, &mut dw);
        destv.set_wires(dw);

        self.unlock_var(&leftv);
        self.lock_var(&destv);
        self.pool.free_if_no_refs(&mut self.arena);
        Ok(Some(destv))
    }

    /// Postfix increment/decrement: computes `x ± 1` and writes it back,
    /// conditionally under the current `if` condition.
    fn out_post_step(
        &mut self,
        operand: &Expr,
        step: i64,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let leftv = self.out_value(operand, fc)?;
        let ifvar = fc.get(IFCOND_VAR).cloned();

        if let Variable::Ext(l) = &leftv {
            if ifvar.is_some() {
                return Err(Error::semantic(
                    "cannot increment a compile-time constant inside an if",
                    loc,
                ));
            }
            let Expr::Ident(name, _) = operand else {
                return Err(Error::semantic("cannot increment this expression", loc));
            };
            let value = l.value.wrapping_add(step);
            return self.update_ext_value(fc, name, value, loc).map(Some);
        }
        let Variable::Int(_) = &leftv else {
            return Err(Error::type_error("increment requires an integer variable", loc));
        };

        let mut destv = self.new_int_temp(&leftv.ty().clone(), if step > 0 { "++" } else { "--" });
        let lw = leftv.wires().to_vec();
        let ones = self.const_wires(1, lw.len());
        let mut dw = destv.wires().to_vec();
        if step > 0 {
            self.output_addition(&lw, &ones, &dw);
        } else {
            self.output_subtract(&lw, &ones, &mut dw);
            destv.set_wires(dw.clone());
        }

        self.lock_var(&destv);
        self.pool.free_if_no_refs(&mut self.arena);

        match ifvar {
            None => {
                for (i, &d) in dw.iter().enumerate() {
                    self.assign_wire(lw[i], d);
                    self.arena[d].locked = false;
                    self.make_wire_contain_value_no_const_copy(lw[i]);
                }
            }
            Some(cond) => {
                let cw = cond.get_wire(0);
                for (i, &d) in dw.iter().enumerate() {
                    self.assign_wire_cond(lw[i], d, cw);
                    self.arena[d].locked = false;
                    self.make_wire_contain_value_no_const_copy(lw[i]);
                }
            }
        }
        self.pool.free_if_no_refs(&mut self.arena);
        Ok(Some(leftv))
    }

    /// Rebinds a `$`-constant to a new value, in whichever scope holds it.
    pub(crate) fn update_ext_value(
        &mut self,
        fc: &mut FunctionContext,
        name: &str,
        value: i64,
        loc: Loc,
    ) -> Result<Variable> {
        let (w0, w1) = (self.w0, self.w1);
        let slot = if fc.contains_key(name) {
            fc.get_mut(name)
        } else {
            self.globals.get_mut(name)
        };
        match slot {
            Some(Variable::Ext(e)) => {
                e.change_value(value, w0, w1);
                Ok(Variable::Ext(e.clone()))
            }
            _ => Err(Error::semantic(
                format!("{name} is not a compile-time constant"),
                loc,
            )),
        }
    }

    fn out_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let leftv = self.out_value(target, fc)?;
        let rightv = self.out_value(value, fc)?;
        let ifvar = fc.get(IFCOND_VAR).cloned();

        if leftv.is_ext() {
            if ifvar.is_some() {
                tracing::warn!("assignment to a $-constant inside an if has no condition");
            }
            let Variable::Ext(r) = &rightv else {
                return Err(Error::semantic(
                    "only a compile-time constant can be assigned to a $-constant",
                    loc,
                ));
            };
            let Expr::Ident(name, _) = target else {
                return Err(Error::semantic("cannot assign to this expression", loc));
            };
            let value = r.value;
            return self.update_ext_value(fc, name, value, loc).map(Some);
        }

        match ifvar {
            None => {
                for i in 0..leftv.size() {
                    let w1 = leftv.get_wire(i);
                    let w2 = rightv.get_wire(i);
                    self.assign_wire(w1, w2);
                    self.make_wire_contain_value(w1);
                }
            }
            Some(cond) => {
                let cw = cond.get_wire(0);
                for i in 0..leftv.size() {
                    let w1 = leftv.get_wire(i);
                    let w2 = rightv.get_wire(i);
                    self.assign_wire_cond(w1, w2, cw);
                    self.make_wire_contain_value_no_const_copy(w1);
                }
            }
        }
        self.unlock_var(&rightv);
        self.pool.free_if_no_refs(&mut self.arena);
        Ok(Some(leftv))
    }

    /// Copies argument variables into the callee's parameter slots (mass
    /// copy for permanent arguments, zero-extension via replicate from the
    /// 0-wire) and emits the call command.
    fn emit_call_prologue(
        &mut self,
        callee: &str,
        args: &[Expr],
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<crate::variables::FunctionVariable> {
        let Some(Variable::Function(fv)) = self.lookup(fc, callee).cloned() else {
            return Err(Error::semantic(format!("unknown function {callee}"), loc));
        };
        if args.len() != fv.args.len() {
            return Err(Error::semantic(
                format!("{callee} takes {} arguments, got {}", fv.args.len(), args.len()),
                loc,
            ));
        }

        for (arg, paramv) in args.iter().zip(fv.args.clone()) {
            let argv = self.out_value(arg, fc)?;
            let larg = argv.size();
            let lparam = paramv.size();

            if argv.is_perm() {
                let to = paramv.wirebase(&self.arena);
                let from = argv.wirebase(&self.arena);
                self.writer.add_mass_copy(&self.circuit.funcs, to, from, larg);
            } else {
                for j in 0..larg {
                    let w = paramv.get_wire(j);
                    self.assign_wire(w, argv.get_wire(j));
                    self.make_wire_contain_value(w);
                }
                if self.unlock_var(&argv) {
                    self.pool.free_if_no_refs(&mut self.arena);
                }
            }
            if larg < lparam {
                let to = self.arena[paramv.get_wire(larg)].number;
                let from = self.arena[self.w0].number;
                self.writer.add_replicate(&self.circuit.funcs, to, from, lparam - larg);
            }
        }

        self.writer.add_function_call(&self.circuit.funcs, fv.number);
        Ok(fv)
    }

    fn out_call(
        &mut self,
        callee: &str,
        args: &[Expr],
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        tracing::trace!(callee, "function call");
        let fv = self.emit_call_prologue(callee, args, loc, fc)?;
        let Some(returnv) = fv.ret else {
            return Ok(None);
        };

        // The return slot is copied into a fresh local; the numbered name
        // avoids reusing a temporary that is still locked.
        let mut counter = 0;
        let name = loop {
            let name = format!("{counter}-+r+{callee}");
            let existing = fc.get(&name).map(|rvar| self.arena[rvar.get_wire(0)].locked);
            match existing {
                None => {
                    let mut rvar = Variable::from_type(returnv.ty(), &name, self.w0, self.w1)
                        .ok_or_else(|| Error::internal("void return slot with a value"))?;
                    rvar.fill_in_wires(&mut self.arena, Some(&mut self.pool));
                    self.lock_var(&rvar);
                    fc.insert(name.clone(), rvar);
                    break name;
                }
                Some(false) => break name,
                Some(true) => counter += 1,
            }
        };
        let rvar = fc[&name].clone();
        self.messy_assign_and_copy(&returnv, &rvar)?;
        Ok(Some(rvar))
    }

    fn out_call_and_assign(
        &mut self,
        target: &Expr,
        callee: &str,
        args: &[Expr],
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let fv = self.emit_call_prologue(callee, args, loc, fc)?;
        let leftv = self.out_value(target, fc)?;

        if let Some(returnv) = fv.ret {
            let ifvar = fc.get(IFCOND_VAR).cloned();
            match ifvar {
                None => {
                    for i in 0..leftv.size() {
                        let w1 = leftv.get_wire(i);
                        let w2 = returnv.get_wire(i);
                        let keep_edge = self.arena[w2].other == Some(w1) && self.arena.refs(w1) == 1;
                        if self.arena.refs(w1) > 0 && !keep_edge {
                            self.clear_reffed_wire(w1);
                        }
                        self.assign_wire(w1, w2);
                        self.make_wire_contain_value_no_const_copy(w1);
                    }
                }
                Some(cond) => {
                    let cw = cond.get_wire(0);
                    for i in 0..leftv.size() {
                        let w1 = leftv.get_wire(i);
                        let w2 = returnv.get_wire(i);
                        if self.arena.refs(w1) > 0 {
                            self.clear_reffed_wire(w1);
                        }
                        self.assign_wire_cond(w1, w2, cw);
                        self.make_wire_contain_value_no_const_copy(w1);
                    }
                }
            }
        }
        Ok(Some(leftv))
    }

    /// Structure-directed assignment used for declarations and return-slot
    /// copies; narrower integers zero-extend.
    pub(crate) fn messy_assign_and_copy(
        &mut self,
        original: &Variable,
        copy: &Variable,
    ) -> Result<()> {
        match (original, copy) {
            (Variable::Bool(_), Variable::Bool(c)) => {
                self.assign_wire(c.wires[0], original.get_wire(0));
                self.make_wire_contain_value(c.wires[0]);
                Ok(())
            }
            (o, Variable::Int(c)) if o.is_int_kind() => {
                let osize = o.size();
                for (i, &dw) in c.wires.clone().iter().enumerate() {
                    if (i as Num) < osize {
                        self.assign_wire(dw, o.get_wire(i as Num));
                        self.make_wire_contain_value(dw);
                    } else {
                        self.assign_wire(dw, self.w0);
                    }
                }
                Ok(())
            }
            (Variable::Array(o), Variable::Array(c)) => {
                for (ov, cv) in o.items.iter().zip(&c.items) {
                    self.messy_assign_and_copy(ov, cv)?;
                }
                Ok(())
            }
            (Variable::Object(o), Variable::Object(c)) => {
                for (k, cv) in &c.fields {
                    let ov = o.fields.get(k).ok_or_else(|| {
                        Error::internal(format!("object assignment is missing field {k}"))
                    })?;
                    self.messy_assign_and_copy(ov, cv)?;
                }
                Ok(())
            }
            _ => Err(Error::internal("mismatched shapes in structured assignment")),
        }
    }

    /// `intN(x)` / `uintN(x)`: reinterpret an integer at a new width and
    /// signedness. Wire-backed values truncate or zero-extend; constants
    /// fold.
    fn out_conversion(
        &mut self,
        target: &Type,
        arg: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let argv = self.out_value(arg, fc)?;
        if !argv.is_int_kind() {
            return Err(Error::type_error("conversions apply to integers", loc));
        }

        if let Variable::Ext(e) = &argv {
            let size = target.size();
            let mut v = if size >= 64 {
                e.value
            } else {
                e.value & ((1i64 << size) - 1)
            };
            if target.is_int() && size < 64 && v >> (size - 1) & 1 == 1 {
                v -= 1i64 << size;
            }
            return Ok(Some(Variable::Ext(ExtInt::new(
                target.clone(),
                "",
                v,
                self.w0,
                self.w1,
            ))));
        }

        let destv = self.new_int_temp(target, "CONV");
        let dw = destv.wires().to_vec();
        let asize = argv.size();
        for (i, &d) in dw.iter().enumerate() {
            if (i as Num) < asize {
                self.assign_wire(d, argv.get_wire(i as Num));
                self.make_wire_contain_value_no_const_copy(d);
            } else {
                self.assign_wire(d, self.w0);
            }
        }

        self.unlock_var(&argv);
        self.lock_var(&destv);
        self.pool.free_if_no_refs(&mut self.arena);
        Ok(Some(destv))
    }

    fn out_index(
        &mut self,
        base: &Expr,
        index: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let arrv = self.out_value(base, fc)?;
        let indv = self.out_value(index, fc)?;
        let Variable::Array(arr) = &arrv else {
            return Err(Error::type_error("cannot index a non-array", loc));
        };
        let idx = self.wires_to_int(&indv, "array index", loc)?;
        if idx < 0 || idx as usize >= arr.items.len() {
            return Err(Error::semantic(
                format!("array index {idx} out of range for length {}", arr.items.len()),
                loc,
            ));
        }
        let picked = arr.items[idx as usize].clone();

        if self.unlock_var(&indv) {
            if let Variable::Int(iv) = &indv {
                let ws = iv.wires.clone();
                self.pool.free_set(&mut self.arena, &ws);
            }
        }
        if self.unlock_var(&arrv) {
            self.pool.free_if_no_refs(&mut self.arena);
        }
        Ok(Some(picked))
    }

    fn out_member(
        &mut self,
        base: &Expr,
        key: &str,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let objv = self.out_value(base, fc)?;
        let Variable::Object(obj) = &objv else {
            return Err(Error::type_error("member access on a non-object", loc));
        };
        obj.fields
            .get(key)
            .cloned()
            .map(Some)
            .ok_or_else(|| Error::type_error(format!("no field {key}"), loc))
    }

    fn out_get_wire(
        &mut self,
        left: &Expr,
        index: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let leftv = self.out_value(left, fc)?;
        let indv = self.out_value(index, fc)?;
        let ind = self.wires_to_int(&indv, "wire index", loc)?;
        if ind < 0 || ind as Num >= leftv.size() {
            return Err(Error::semantic(
                format!("wire index {ind} out of range for size {}", leftv.size()),
                loc,
            ));
        }

        let v = Variable::Bool(BoolVariable {
            meta: VarMeta {
                name: "GENERATED_WIRE_VAR".into(),
                ty: Type::Bool,
                perm: false,
                konst: false,
            },
            wires: vec![leftv.get_wire(ind as Num)],
        });
        self.unlock_var(&leftv);
        self.unlock_var(&indv);
        self.pool.free_if_no_refs(&mut self.arena);
        Ok(Some(v))
    }

    fn out_set_wire(
        &mut self,
        left: &Expr,
        index: &Expr,
        value: &Expr,
        loc: Loc,
        fc: &mut FunctionContext,
    ) -> Result<Option<Variable>> {
        let leftv = self.out_value(left, fc)?;
        let indv = self.out_value(index, fc)?;
        let valuev = self.out_value(value, fc)?;

        if leftv.is_ext() {
            return Err(Error::semantic(
                "cannot set a wire of a compile-time constant",
                loc,
            ));
        }
        let ind = self.wires_to_int(&indv, "wire index", loc)?;
        if ind < 0 || ind as Num >= leftv.size() {
            return Err(Error::semantic(
                format!("wire index {ind} out of range for size {}", leftv.size()),
                loc,
            ));
        }

        let w1 = leftv.get_wire(ind as Num);
        let w2 = valuev.get_wire(0);
        self.assign_wire(w1, w2);
        self.make_wire_contain_value(w1);

        self.unlock_var(&indv);
        self.unlock_var(&valuev);
        self.pool.free_if_no_refs(&mut self.arena);
        Ok(None)
    }
}
