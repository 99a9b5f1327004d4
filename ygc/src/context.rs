//! Compilation contexts: the map from names to variables at program scope
//! and per function, plus the type-inference helpers that populate them
//! (initializer-driven variable typing, function parameter inference from
//! the first call site, return-type discovery).

use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{self, Expr, Loc, Program, Stmt};
use crate::error::{Error, Result};
use crate::types::{self, Num, Type};
use crate::variables::{FunctionVariable, RETURN_VAR, VarMeta, Variable};
use crate::wires::WireId;

/// Name → variable map of one scope, in declaration order.
pub type FunctionContext = IndexMap<String, Variable>;

/// The built-in types derived from `$intsize`.
#[derive(Debug, Clone)]
pub struct Builtins {
    pub int_t: Type,
    pub uint_t: Type,
}

impl Builtins {
    pub fn new(int_size: Num) -> Self {
        Builtins { int_t: Type::Int(int_size), uint_t: Type::UInt(int_size) }
    }

    /// Types of the reserved built-in functions.
    pub fn reserved(&self, name: &str) -> Option<Type> {
        let int_t = self.int_t.clone();
        match name {
            "RotateLeft" => Some(Type::Function {
                ret: Box::new(int_t.clone()),
                args: vec![int_t.clone(), int_t],
            }),
            "GetWire" => Some(Type::Function {
                ret: Box::new(Type::Bool),
                args: vec![int_t.clone(), int_t],
            }),
            "SetWire" => Some(Type::Function {
                ret: Box::new(Type::Void),
                args: vec![int_t.clone(), int_t, Type::Bool],
            }),
            _ => None,
        }
    }

    /// Conversion functions `intN`/`uintN` (and bare `int`/`uint` for the
    /// default width) reinterpret an integer at the named width and
    /// signedness.
    pub fn conversion(&self, name: &str) -> Option<Type> {
        if let Some(rest) = name.strip_prefix("uint") {
            if rest.is_empty() {
                return Some(self.uint_t.clone());
            }
            return rest.parse::<Num>().ok().filter(|l| *l > 0).map(Type::UInt);
        }
        if let Some(rest) = name.strip_prefix("int") {
            if rest.is_empty() {
                return Some(self.int_t.clone());
            }
            return rest.parse::<Num>().ok().filter(|l| *l > 0).map(Type::Int);
        }
        None
    }
}

/// Variables and per-function scopes of a whole program.
#[derive(Debug, Default)]
pub struct ProgramContext {
    pub globals: FunctionContext,
    pub funcs: IndexMap<String, FunctionContext>,
}

/// Reads the two distinguished configuration globals `$intsize` and
/// `$parties` off the top-level declarations.
pub fn find_parameters(prog: &Program) -> Result<(Num, u8)> {
    let mut int_size = None;
    let mut parties = None;
    for init in ast::collect_var_inits(&prog.body) {
        let value = match init.init {
            Expr::Number(v, _) => v,
            _ => continue,
        };
        match init.name.as_str() {
            "$intsize" => int_size = Some(value as Num),
            "$parties" => parties = Some(value as u8),
            _ => {}
        }
    }
    match (int_size, parties) {
        (Some(i), Some(p)) if i > 0 && p > 0 => Ok((i, p)),
        _ => Err(Error::new(
            crate::error::ErrorKind::Semantic,
            "program must declare positive $intsize and $parties",
        )),
    }
}

/// Determines the type of the value an expression evaluates to, without
/// checking it (the full check runs afterwards).
pub fn node_type(
    e: &Expr,
    fc: &FunctionContext,
    globals: &FunctionContext,
    b: &Builtins,
) -> Result<Type> {
    use crate::ast::{BinaryOp, UnaryOp};
    match e {
        Expr::Number(..) => Ok(b.int_t.clone()),
        Expr::Bool(..) => Ok(Type::Bool),
        Expr::Array(items, loc) => {
            if items.is_empty() {
                return Err(Error::type_error("empty array literal has no type", *loc));
            }
            let t = node_type(&items[0], fc, globals, b)?;
            Ok(Type::Array(items.len() as Num, Box::new(t)))
        }
        Expr::Object(props, _) => {
            let mut fields = Vec::with_capacity(props.len());
            for (k, v) in props {
                fields.push((k.clone(), node_type(v, fc, globals, b)?));
            }
            Ok(Type::Object(fields))
        }
        Expr::Ident(name, loc) => lookup_type(name, *loc, fc, globals, b),
        Expr::Binary { op, left, right, loc } => match op {
            BinaryOp::Or | BinaryOp::And | BinaryOp::Xor | BinaryOp::Shl | BinaryOp::Shr => {
                node_type(left, fc, globals, b)
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let lt = node_type(left, fc, globals, b)?;
                let rt = node_type(right, fc, globals, b)?;
                types::max_type(&lt, &rt, *loc)
            }
            BinaryOp::Less
            | BinaryOp::Greater
            | BinaryOp::LessEq
            | BinaryOp::GreaterEq
            | BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::LogicalAnd
            | BinaryOp::LogicalOr => Ok(Type::Bool),
        },
        Expr::Unary { op, operand, .. } => match op {
            UnaryOp::Not => node_type(operand, fc, globals, b),
            _ => node_type(operand, fc, globals, b),
        },
        Expr::Assign { value, .. } => node_type(value, fc, globals, b),
        Expr::Call { callee, loc, .. } => {
            if fc.get(callee).is_none() && globals.get(callee).is_none() {
                if let Some(t) = b.conversion(callee) {
                    return Ok(t);
                }
            }
            match lookup_type(callee, *loc, fc, globals, b)? {
                Type::Function { ret, .. } => Ok(*ret),
                t => Err(Error::type_error(format!("{callee} of type {t} is not callable"), *loc)),
            }
        }
        Expr::Index { base, loc, .. } => match node_type(base, fc, globals, b)? {
            Type::Array(_, sub) => Ok(*sub),
            t => Err(Error::type_error(format!("cannot index into {t}"), *loc)),
        },
        Expr::Member { base, key, loc } => match node_type(base, fc, globals, b)? {
            Type::Object(fields) => fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, t)| t.clone())
                .ok_or_else(|| Error::type_error(format!("no field {key}"), *loc)),
            t => Err(Error::type_error(format!("{t} has no fields"), *loc)),
        },
    }
}

fn lookup_type(
    name: &str,
    loc: Loc,
    fc: &FunctionContext,
    globals: &FunctionContext,
    b: &Builtins,
) -> Result<Type> {
    if let Some(v) = fc.get(name).or_else(|| globals.get(name)) {
        return Ok(v.ty().clone());
    }
    if let Some(t) = b.reserved(name) {
        return Ok(t);
    }
    Err(Error::semantic(format!("unknown identifier {name}"), loc))
}

/// The declared return type of a function body: the type of its last
/// `return` expression, or void.
fn return_type(
    body: &[Stmt],
    fc: &FunctionContext,
    globals: &FunctionContext,
    b: &Builtins,
) -> Result<Type> {
    let mut t = Type::Void;
    fn walk(
        stmts: &[Stmt],
        t: &mut Type,
        fc: &FunctionContext,
        globals: &FunctionContext,
        b: &Builtins,
    ) -> Result<()> {
        for s in stmts {
            match s {
                Stmt::Return(Some(e), _) => *t = node_type(e, fc, globals, b)?,
                Stmt::Return(None, _) => {}
                Stmt::If { consequent, alternate, .. } => {
                    walk(consequent, t, fc, globals, b)?;
                    if let Some(alt) = alternate {
                        walk(alt, t, fc, globals, b)?;
                    }
                }
                Stmt::For { body, .. } => walk(body, t, fc, globals, b)?,
                _ => {}
            }
        }
        Ok(())
    }
    walk(body, &mut t, fc, globals, b)?;
    Ok(t)
}

/// Finds the first call to `fname` anywhere in the program and returns its
/// argument types (resolved against the global scope). Parameter types are
/// inferred from this call site.
fn infer_params(
    fname: &str,
    params: &[String],
    prog: &Program,
    globals: &FunctionContext,
    b: &Builtins,
) -> Result<Vec<Type>> {
    fn find_call<'a>(e: &'a Expr, fname: &str) -> Option<&'a Expr> {
        match e {
            Expr::Call { callee, args, .. } => {
                if callee == fname {
                    return Some(e);
                }
                args.iter().find_map(|a| find_call(a, fname))
            }
            Expr::Binary { left, right, .. } => {
                find_call(left, fname).or_else(|| find_call(right, fname))
            }
            Expr::Unary { operand, .. } => find_call(operand, fname),
            Expr::Assign { target, value, .. } => {
                find_call(target, fname).or_else(|| find_call(value, fname))
            }
            Expr::Index { base, index, .. } => {
                find_call(base, fname).or_else(|| find_call(index, fname))
            }
            Expr::Member { base, .. } => find_call(base, fname),
            Expr::Array(items, _) => items.iter().find_map(|i| find_call(i, fname)),
            Expr::Object(props, _) => props.iter().find_map(|(_, v)| find_call(v, fname)),
            _ => None,
        }
    }
    fn find_in_stmts<'a>(stmts: &'a [Stmt], fname: &str) -> Option<&'a Expr> {
        for s in stmts {
            let hit = match s {
                Stmt::Expr(e) => find_call(e, fname),
                Stmt::Var(inits) => inits.iter().find_map(|v| find_call(&v.init, fname)),
                Stmt::If { test, consequent, alternate, .. } => find_call(test, fname)
                    .or_else(|| find_in_stmts(consequent, fname))
                    .or_else(|| alternate.as_ref().and_then(|a| find_in_stmts(a, fname))),
                Stmt::For { init, test, update, body, .. } => {
                    find_in_stmts(std::slice::from_ref(init.as_ref()), fname)
                        .or_else(|| find_call(test, fname))
                        .or_else(|| find_call(update, fname))
                        .or_else(|| find_in_stmts(body, fname))
                }
                Stmt::Return(Some(e), _) => find_call(e, fname),
                Stmt::Return(None, _) => None,
            };
            if hit.is_some() {
                return hit;
            }
        }
        None
    }

    let call = find_in_stmts(&prog.body, fname).or_else(|| {
        prog.functions.iter().find_map(|f| find_in_stmts(&f.body, fname))
    });
    let Some(Expr::Call { args, loc, .. }) = call else {
        return Err(Error::new(
            crate::error::ErrorKind::Semantic,
            format!("no call site found for function {fname}; parameter types cannot be inferred"),
        ));
    };
    if args.len() != params.len() {
        return Err(Error::semantic(
            format!("call to {fname} has {} arguments, expected {}", args.len(), params.len()),
            *loc,
        ));
    }
    let empty = FunctionContext::new();
    args.iter().map(|a| node_type(a, &empty, globals, b)).collect()
}

/// Builds the program context: one variable per declared name, function
/// variables with inferred parameter and return types, input/output
/// tagging by name, and recursion checks. Wires are not yet allocated.
pub fn generate_context(
    prog: &Program,
    b: &Builtins,
    w0: WireId,
    w1: WireId,
) -> Result<ProgramContext> {
    let mut pc = ProgramContext::default();

    // Top-level variable declarations, in order.
    for init in ast::collect_var_inits(&prog.body) {
        if pc.globals.contains_key(&init.name) {
            return Err(Error::semantic(
                format!("variable {} is declared twice", init.name),
                init.loc,
            ));
        }
        let t = node_type(&init.init, &FunctionContext::new(), &pc.globals, b)?;
        types::check_recursive_object(&t, init.loc)?;
        if let Some(v) = Variable::from_type(&t, &init.name, w0, w1) {
            pc.globals.insert(init.name.clone(), v);
        }
    }

    // Function declarations, in order.
    for f in &prog.functions {
        let mut fc = FunctionContext::new();

        let param_types = infer_params(&f.name, &f.params, prog, &pc.globals, b)?;
        for (name, t) in f.params.iter().zip(&param_types) {
            if let Some(v) = Variable::from_type(t, name, w0, w1) {
                fc.insert(name.clone(), v);
            }
        }

        for init in ast::collect_var_inits(&f.body) {
            if fc.contains_key(&init.name) {
                return Err(Error::semantic(
                    format!("variable {} is declared twice in {}", init.name, f.name),
                    init.loc,
                ));
            }
            let t = node_type(&init.init, &fc, &pc.globals, b)?;
            types::check_recursive_object(&t, init.loc)?;
            if let Some(v) = Variable::from_type(&t, &init.name, w0, w1) {
                fc.insert(init.name.clone(), v);
            }
        }

        let ret_t = return_type(&f.body, &fc, &pc.globals, b)?;
        let ret = Variable::from_type(&ret_t, RETURN_VAR, w0, w1);
        if let Some(rv) = &ret {
            fc.insert(RETURN_VAR.to_string(), rv.clone());
        }

        let fv = FunctionVariable {
            meta: VarMeta {
                name: f.name.clone(),
                ty: Type::Function { ret: Box::new(ret_t), args: param_types },
                perm: false,
                konst: false,
            },
            args: Vec::new(),
            ret: None,
            number: pc.funcs.len() as Num,
            node: Rc::clone(f),
        };
        pc.funcs.insert(f.name.clone(), fc);
        pc.globals.insert(f.name.clone(), Variable::Function(fv));
    }

    Ok(pc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn build(src: &str) -> (Program, ProgramContext, Builtins) {
        let prog = parse_program(src).unwrap();
        let (int_size, _) = find_parameters(&prog).unwrap();
        let b = Builtins::new(int_size);
        let mut arena = crate::wires::WireArena::new();
        let w0 = arena.alloc(0);
        let w1 = arena.alloc(1);
        let pc = generate_context(&prog, &b, w0, w1).unwrap();
        (prog, pc, b)
    }

    #[test]
    fn globals_typed_from_initializers() {
        let (_, pc, _) = build(
            "var $intsize = 8; var $parties = 2;\n\
             var in_0 = 0; var flag = true; var a = [1, 2, 3];",
        );
        assert_eq!(pc.globals["in_0"].ty(), &Type::Int(8));
        assert_eq!(pc.globals["flag"].ty(), &Type::Bool);
        assert_eq!(pc.globals["a"].ty(), &Type::Array(3, Box::new(Type::Int(8))));
        assert!(pc.globals["$intsize"].is_ext());
        assert!(pc.globals["in_0"].is_input());
    }

    #[test]
    fn params_inferred_from_first_call_site() {
        let (_, pc, _) = build(
            "var $intsize = 8; var $parties = 2;\n\
             var in_0 = 0; var out_0 = 0;\n\
             function add(x, y) { return x + y; }\n\
             out_0 = add(in_0, 3);",
        );
        let Variable::Function(fv) = &pc.globals["add"] else {
            panic!("add is not a function variable");
        };
        assert_eq!(
            fv.meta.ty,
            Type::Function { ret: Box::new(Type::Int(8)), args: vec![Type::Int(8), Type::Int(8)] }
        );
        assert_eq!(pc.funcs["add"]["x"].ty(), &Type::Int(8));
        assert!(pc.funcs["add"].contains_key(RETURN_VAR));
    }

    #[test]
    fn uncalled_function_is_rejected() {
        let src = "var $intsize = 8; var $parties = 2;\n\
                   function lonely(x) { return x; }";
        let prog = parse_program(src).unwrap();
        let b = Builtins::new(8);
        let mut arena = crate::wires::WireArena::new();
        let w0 = arena.alloc(0);
        let w1 = arena.alloc(1);
        assert!(generate_context(&prog, &b, w0, w1).is_err());
    }

    #[test]
    fn parameters_found() {
        let prog = parse_program("var $intsize = 16; var $parties = 3; var x = 1;").unwrap();
        assert_eq!(find_parameters(&prog).unwrap(), (16, 3));

        let prog = parse_program("var x = 1;").unwrap();
        assert!(find_parameters(&prog).is_err());
    }
}
