//! Abstract syntax of the source dialect. The parser produces a [`Program`];
//! the type checker and the compiler walk it. Every node carries the source
//! position it started at, for diagnostics.

use std::rc::Rc;

/// Line/column source position (both 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Loc {
    pub line: u32,
    pub col: u32,
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Xor,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Eq,
    Ne,
    Shl,
    Shr,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "|",
            BinaryOp::And => "&",
            BinaryOp::Xor => "^",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEq => "<=",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Bitwise/logical negation `!`.
    Not,
    /// Arithmetic negation `-`.
    Neg,
    /// Postfix `++`.
    PostIncrement,
    /// Postfix `--`.
    PostDecrement,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(i64, Loc),
    Bool(bool, Loc),
    Array(Vec<Expr>, Loc),
    Object(Vec<(String, Expr)>, Loc),
    Ident(String, Loc),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        loc: Loc,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        loc: Loc,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        loc: Loc,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
        loc: Loc,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        loc: Loc,
    },
    Member {
        base: Box<Expr>,
        key: String,
        loc: Loc,
    },
}

impl Expr {
    pub fn loc(&self) -> Loc {
        match self {
            Expr::Number(_, loc)
            | Expr::Bool(_, loc)
            | Expr::Array(_, loc)
            | Expr::Object(_, loc)
            | Expr::Ident(_, loc)
            | Expr::Binary { loc, .. }
            | Expr::Unary { loc, .. }
            | Expr::Assign { loc, .. }
            | Expr::Call { loc, .. }
            | Expr::Index { loc, .. }
            | Expr::Member { loc, .. } => *loc,
        }
    }
}

/// One `name = initializer` clause of a `var` statement. Initializers are
/// mandatory in the dialect; they fix the variable's type.
#[derive(Debug, Clone)]
pub struct VarInit {
    pub name: String,
    pub init: Expr,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Var(Vec<VarInit>),
    If {
        test: Expr,
        consequent: Vec<Stmt>,
        alternate: Option<Vec<Stmt>>,
        loc: Loc,
    },
    For {
        init: Box<Stmt>,
        test: Expr,
        update: Expr,
        body: Vec<Stmt>,
        loc: Loc,
    },
    Return(Option<Expr>, Loc),
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub loc: Loc,
}

/// A parsed source program: function definitions plus the main body, in
/// source order. `var` declarations live inside the statement lists and are
/// hoisted to their enclosing scope during context construction.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: Vec<Rc<FunctionDecl>>,
    pub body: Vec<Stmt>,
}

/// Collects every `var` initializer clause in a statement list, recursing
/// into `if` and `for` bodies (declarations are scope-hoisted).
pub fn collect_var_inits(stmts: &[Stmt]) -> Vec<&VarInit> {
    let mut out = Vec::new();
    fn walk<'a>(stmts: &'a [Stmt], out: &mut Vec<&'a VarInit>) {
        for s in stmts {
            match s {
                Stmt::Var(inits) => out.extend(inits.iter()),
                Stmt::If { consequent, alternate, .. } => {
                    walk(consequent, out);
                    if let Some(alt) = alternate {
                        walk(alt, out);
                    }
                }
                Stmt::For { init, body, .. } => {
                    walk(std::slice::from_ref(init.as_ref()), out);
                    walk(body, out);
                }
                _ => {}
            }
        }
    }
    walk(stmts, &mut out);
    out
}

/// Collects every identifier name occurring in an expression.
pub fn collect_idents_expr(e: &Expr, out: &mut Vec<String>) {
    match e {
        Expr::Number(..) | Expr::Bool(..) => {}
        Expr::Array(items, _) => {
            for it in items {
                collect_idents_expr(it, out);
            }
        }
        Expr::Object(props, _) => {
            for (_, v) in props {
                collect_idents_expr(v, out);
            }
        }
        Expr::Ident(name, _) => out.push(name.clone()),
        Expr::Binary { left, right, .. } => {
            collect_idents_expr(left, out);
            collect_idents_expr(right, out);
        }
        Expr::Unary { operand, .. } => collect_idents_expr(operand, out),
        Expr::Assign { target, value, .. } => {
            collect_idents_expr(target, out);
            collect_idents_expr(value, out);
        }
        Expr::Call { callee, args, .. } => {
            out.push(callee.clone());
            for a in args {
                collect_idents_expr(a, out);
            }
        }
        Expr::Index { base, index, .. } => {
            collect_idents_expr(base, out);
            collect_idents_expr(index, out);
        }
        Expr::Member { base, .. } => collect_idents_expr(base, out),
    }
}

/// Collects every identifier name occurring in a statement list.
pub fn collect_idents_stmts(stmts: &[Stmt], out: &mut Vec<String>) {
    for s in stmts {
        match s {
            Stmt::Expr(e) => collect_idents_expr(e, out),
            Stmt::Var(inits) => {
                for v in inits {
                    out.push(v.name.clone());
                    collect_idents_expr(&v.init, out);
                }
            }
            Stmt::If { test, consequent, alternate, .. } => {
                collect_idents_expr(test, out);
                collect_idents_stmts(consequent, out);
                if let Some(alt) = alternate {
                    collect_idents_stmts(alt, out);
                }
            }
            Stmt::For { init, test, update, body, .. } => {
                collect_idents_stmts(std::slice::from_ref(init.as_ref()), out);
                collect_idents_expr(test, out);
                collect_idents_expr(update, out);
                collect_idents_stmts(body, out);
            }
            Stmt::Return(Some(e), _) => collect_idents_expr(e, out),
            Stmt::Return(None, _) => {}
        }
    }
}
