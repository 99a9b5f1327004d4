//! Type checking. Walks every function body and the main block against the
//! program context, annotating nothing: the emitter re-derives types as it
//! goes, so the walk's only job is to reject ill-typed programs with a
//! located diagnostic before any wire is allocated.

use crate::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use crate::context::{Builtins, FunctionContext, ProgramContext};
use crate::error::{Error, Result};
use crate::types::{self, Type};

/// Checks a whole program: each function body in its own scope, then the
/// main block. The first error aborts.
pub fn check_program(prog: &Program, pc: &ProgramContext, b: &Builtins) -> Result<()> {
    for f in &prog.functions {
        let fc = &pc.funcs[&f.name];
        let mut ret = None;
        check_stmts(&f.body, fc, &pc.globals, b, &mut ret)?;
    }
    let empty = FunctionContext::new();
    let mut ret = None;
    check_stmts(&prog.body, &empty, &pc.globals, b, &mut ret)
}

fn check_stmts(
    stmts: &[Stmt],
    fc: &FunctionContext,
    globals: &FunctionContext,
    b: &Builtins,
    ret: &mut Option<Type>,
) -> Result<()> {
    for s in stmts {
        match s {
            Stmt::Expr(e) => {
                check_expr(e, fc, globals, b)?;
            }
            Stmt::Var(inits) => {
                for init in inits {
                    let declared = fc
                        .get(&init.name)
                        .or_else(|| globals.get(&init.name))
                        .map(|v| v.ty().clone());
                    let it = check_expr(&init.init, fc, globals, b)?;
                    if let Some(dt) = declared {
                        if !dt.is_void() && dt != it {
                            return Err(Error::type_error(
                                format!(
                                    "initializer of {} has type {it}, expected {dt}",
                                    init.name
                                ),
                                init.loc,
                            ));
                        }
                    }
                }
            }
            Stmt::If { test, consequent, alternate, loc } => {
                let tt = check_expr(test, fc, globals, b)?;
                if !tt.is_bool() {
                    return Err(Error::type_error(
                        format!("if condition must be bool, got {tt}"),
                        *loc,
                    ));
                }
                check_stmts(consequent, fc, globals, b, ret)?;
                if let Some(alt) = alternate {
                    check_stmts(alt, fc, globals, b, ret)?;
                }
            }
            Stmt::For { init, test, update, body, loc } => {
                check_stmts(std::slice::from_ref(init.as_ref()), fc, globals, b, ret)?;
                let tt = check_expr(test, fc, globals, b)?;
                if !tt.is_bool() {
                    return Err(Error::type_error(
                        format!("for condition must be bool, got {tt}"),
                        *loc,
                    ));
                }
                check_expr(update, fc, globals, b)?;
                check_stmts(body, fc, globals, b, ret)?;
            }
            Stmt::Return(arg, loc) => {
                let t = match arg {
                    Some(e) => check_expr(e, fc, globals, b)?,
                    None => Type::Void,
                };
                match ret {
                    Some(prev) if *prev != t => {
                        return Err(Error::type_error(
                            format!("conflicting return types {prev} and {t}"),
                            *loc,
                        ));
                    }
                    _ => *ret = Some(t),
                }
            }
        }
    }
    Ok(())
}

fn check_expr(
    e: &Expr,
    fc: &FunctionContext,
    globals: &FunctionContext,
    b: &Builtins,
) -> Result<Type> {
    match e {
        Expr::Number(..) => Ok(b.int_t.clone()),
        Expr::Bool(..) => Ok(Type::Bool),
        Expr::Array(items, loc) => {
            if items.is_empty() {
                return Err(Error::type_error("empty array literal has no type", *loc));
            }
            let t = check_expr(&items[0], fc, globals, b)?;
            for item in &items[1..] {
                let it = check_expr(item, fc, globals, b)?;
                if it != t {
                    return Err(Error::type_error(
                        format!("array elements mix {t} and {it}"),
                        item.loc(),
                    ));
                }
            }
            Ok(Type::Array(items.len() as crate::types::Num, Box::new(t)))
        }
        Expr::Object(props, _) => {
            let mut fields = Vec::with_capacity(props.len());
            for (k, v) in props {
                fields.push((k.clone(), check_expr(v, fc, globals, b)?));
            }
            Ok(Type::Object(fields))
        }
        Expr::Ident(name, loc) => {
            if let Some(v) = fc.get(name).or_else(|| globals.get(name)) {
                Ok(v.ty().clone())
            } else if let Some(t) = b.reserved(name) {
                Ok(t)
            } else {
                Err(Error::semantic(format!("unknown identifier {name}"), *loc))
            }
        }
        Expr::Binary { op, left, right, loc } => {
            let lt = check_expr(left, fc, globals, b)?;
            let rt = check_expr(right, fc, globals, b)?;
            match op {
                BinaryOp::Or | BinaryOp::And | BinaryOp::Xor => {
                    let both_numeric = lt.is_numeric() && rt.is_numeric();
                    let both_bool = lt.is_bool() && rt.is_bool();
                    if !(both_numeric || both_bool) || lt.size() != rt.size() {
                        return Err(Error::type_error(
                            format!("operator {} requires equally sized operands, got {lt} and {rt}", op.symbol()),
                            *loc,
                        ));
                    }
                    Ok(lt)
                }
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                    require_numeric(&lt, &rt, op.symbol(), *loc)?;
                    types::max_type(&lt, &rt, *loc)
                }
                BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessEq | BinaryOp::GreaterEq => {
                    require_numeric(&lt, &rt, op.symbol(), *loc)?;
                    types::max_type(&lt, &rt, *loc)?;
                    Ok(Type::Bool)
                }
                BinaryOp::Eq | BinaryOp::Ne => {
                    require_numeric(&lt, &rt, op.symbol(), *loc)?;
                    if lt.size() != rt.size() {
                        return Err(Error::type_error(
                            format!("operator {} requires equally sized operands, got {lt} and {rt}", op.symbol()),
                            *loc,
                        ));
                    }
                    Ok(Type::Bool)
                }
                BinaryOp::Shl | BinaryOp::Shr => {
                    require_numeric(&lt, &rt, op.symbol(), *loc)?;
                    Ok(lt)
                }
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                    if !lt.is_bool() || !rt.is_bool() {
                        return Err(Error::type_error(
                            format!("operator {} requires bool operands, got {lt} and {rt}", op.symbol()),
                            *loc,
                        ));
                    }
                    Ok(Type::Bool)
                }
            }
        }
        Expr::Unary { op, operand, loc } => {
            let t = check_expr(operand, fc, globals, b)?;
            match op {
                UnaryOp::Not => {
                    if !t.is_bool() && !t.is_numeric() {
                        return Err(Error::type_error(format!("cannot negate {t}"), *loc));
                    }
                    Ok(t)
                }
                UnaryOp::Neg | UnaryOp::PostIncrement | UnaryOp::PostDecrement => {
                    if !t.is_numeric() {
                        return Err(Error::type_error(
                            format!("operator requires an integer, got {t}"),
                            *loc,
                        ));
                    }
                    Ok(t)
                }
            }
        }
        Expr::Assign { target, value, loc } => {
            let lt = check_expr(target, fc, globals, b)?;
            let rt = check_expr(value, fc, globals, b)?;
            if lt != rt {
                return Err(Error::type_error(
                    format!("cannot assign {rt} to {lt}"),
                    *loc,
                ));
            }
            Ok(lt)
        }
        Expr::Call { callee, args, loc } => {
            // The built-ins take "any integer-shaped" first arguments; only
            // their fixed positions are checked.
            match callee.as_str() {
                "RotateLeft" | "GetWire" => {
                    expect_arity(callee, args.len(), 2, *loc)?;
                    let at = check_expr(&args[0], fc, globals, b)?;
                    let it = check_expr(&args[1], fc, globals, b)?;
                    if !it.is_numeric() {
                        return Err(Error::type_error(
                            format!("{callee} index must be an integer, got {it}"),
                            *loc,
                        ));
                    }
                    return Ok(if callee == "GetWire" { Type::Bool } else { at });
                }
                "SetWire" => {
                    expect_arity(callee, args.len(), 3, *loc)?;
                    check_expr(&args[0], fc, globals, b)?;
                    let it = check_expr(&args[1], fc, globals, b)?;
                    if !it.is_numeric() {
                        return Err(Error::type_error(
                            format!("SetWire index must be an integer, got {it}"),
                            *loc,
                        ));
                    }
                    let vt = check_expr(&args[2], fc, globals, b)?;
                    if !vt.is_bool() {
                        return Err(Error::type_error(
                            format!("SetWire value must be bool, got {vt}"),
                            *loc,
                        ));
                    }
                    return Ok(Type::Void);
                }
                _ => {}
            }

            if fc.get(callee).is_none() && globals.get(callee).is_none() {
                if let Some(target) = b.conversion(callee) {
                    expect_arity(callee, args.len(), 1, *loc)?;
                    let at = check_expr(&args[0], fc, globals, b)?;
                    if !at.is_numeric() {
                        return Err(Error::type_error(
                            format!("{callee} converts integers, got {at}"),
                            *loc,
                        ));
                    }
                    return Ok(target);
                }
            }

            let Some(v) = fc.get(callee).or_else(|| globals.get(callee)) else {
                return Err(Error::semantic(format!("unknown function {callee}"), *loc));
            };
            let Type::Function { ret, args: params } = v.ty().clone() else {
                return Err(Error::type_error(format!("{callee} is not a function"), *loc));
            };
            expect_arity(callee, args.len(), params.len(), *loc)?;
            for (arg, pt) in args.iter().zip(&params) {
                let at = check_expr(arg, fc, globals, b)?;
                if &at != pt {
                    return Err(Error::type_error(
                        format!("argument to {callee} has type {at}, expected {pt}"),
                        arg.loc(),
                    ));
                }
            }
            Ok(*ret)
        }
        Expr::Index { base, index, loc } => {
            let bt = check_expr(base, fc, globals, b)?;
            let it = check_expr(index, fc, globals, b)?;
            if !it.is_numeric() {
                return Err(Error::type_error(
                    format!("array index must be an integer, got {it}"),
                    *loc,
                ));
            }
            match bt {
                Type::Array(_, sub) => Ok(*sub),
                t => Err(Error::type_error(format!("cannot index into {t}"), *loc)),
            }
        }
        Expr::Member { base, key, loc } => {
            let bt = check_expr(base, fc, globals, b)?;
            match bt {
                Type::Object(fields) => fields
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, t)| t.clone())
                    .ok_or_else(|| Error::type_error(format!("no field {key}"), *loc)),
                t => Err(Error::type_error(format!("{t} has no fields"), *loc)),
            }
        }
    }
}

fn require_numeric(lt: &Type, rt: &Type, op: &str, loc: crate::ast::Loc) -> Result<()> {
    if !lt.is_numeric() || !rt.is_numeric() {
        return Err(Error::type_error(
            format!("operator {op} requires integer operands, got {lt} and {rt}"),
            loc,
        ));
    }
    Ok(())
}

fn expect_arity(name: &str, got: usize, want: usize, loc: crate::ast::Loc) -> Result<()> {
    if got != want {
        return Err(Error::semantic(
            format!("{name} takes {want} arguments, got {got}"),
            loc,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Builtins, find_parameters, generate_context};
    use crate::parser::parse_program;
    use crate::wires::WireArena;

    fn check(src: &str) -> Result<()> {
        let prog = parse_program(src).unwrap();
        let (int_size, _) = find_parameters(&prog).unwrap();
        let b = Builtins::new(int_size);
        let mut arena = WireArena::new();
        let w0 = arena.alloc(0);
        let w1 = arena.alloc(1);
        let pc = generate_context(&prog, &b, w0, w1)?;
        check_program(&prog, &pc, &b)
    }

    const HEADER: &str = "var $intsize = 8; var $parties = 2;\n";

    #[test]
    fn accepts_well_typed_programs() {
        check(&format!(
            "{HEADER} var in_0 = 0; var in_1 = 0; var out_0 = 0;\n\
             out_0 = in_0 + in_1 * 2;"
        ))
        .unwrap();

        check(&format!(
            "{HEADER} var in_0 = 0; var out_0 = true;\n\
             if (in_0 < 3) {{ out_0 = true; }} else {{ out_0 = false; }}"
        ))
        .unwrap();
    }

    #[test]
    fn rejects_bool_int_mix() {
        let err = check(&format!(
            "{HEADER} var x = 0; var y = true; x = x + y;"
        ))
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
    }

    #[test]
    fn rejects_non_bool_condition() {
        let err = check(&format!("{HEADER} var x = 0; if (x) {{ x = 1; }}")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
    }

    #[test]
    fn rejects_unknown_identifier() {
        let err = check(&format!("{HEADER} var x = 0; x = nope;")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Semantic);
        assert!(err.loc.is_some());
    }

    #[test]
    fn rejects_arity_mismatch() {
        let err = check(&format!(
            "{HEADER} var x = 0; function f(a, b) {{ return a + b; }} x = f(x, x); x = f(x);"
        ))
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Semantic);
    }

    #[test]
    fn rejects_conflicting_returns() {
        let err = check(&format!(
            "{HEADER} var x = 0; var y = true;\n\
             function f(a) {{ if (a < 1) {{ return a; }} return true; }}\n\
             x = f(x);"
        ))
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
    }

    #[test]
    fn builtins_are_typed() {
        check(&format!(
            "{HEADER} var in_0 = 0; var out_0 = 0; var f = true;\n\
             out_0 = RotateLeft(in_0, 3);\n\
             f = GetWire(in_0, 2);\n\
             SetWire(out_0, 0, f);"
        ))
        .unwrap();
    }
}
