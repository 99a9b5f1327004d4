//! Polymorphic variables over the type lattice. A variable owns a flat
//! sequence of wires matching its type's bit size: a bool owns one wire, an
//! int a vector, arrays and objects own their children (flat layout, object
//! fields in declared key order), and a function variable aggregates a
//! return slot and argument slots. An extended int is a compile-time
//! integer whose wires are always bound to the constant 0/1 wires.
//!
//! Variables carry wire *ids* into the shared arena; all value mutation
//! happens through the arena, so cloning a variable aliases its wires.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::FunctionDecl;
use crate::pool::WirePool;
use crate::types::{Num, Type};
use crate::wires::{WireArena, WireId, int_to_wire_set};

/// Data shared by every variable kind. `perm` marks user-declared variables
/// backed by fixed wire numbers; `konst` marks compile-time constants.
#[derive(Debug, Clone)]
pub struct VarMeta {
    pub name: String,
    pub ty: Type,
    pub perm: bool,
    pub konst: bool,
}

impl VarMeta {
    fn new(name: impl Into<String>, ty: Type) -> Self {
        VarMeta { name: name.into(), ty, perm: false, konst: false }
    }
}

#[derive(Debug, Clone)]
pub struct BoolVariable {
    pub meta: VarMeta,
    pub wires: Vec<WireId>,
}

#[derive(Debug, Clone)]
pub struct IntVariable {
    pub meta: VarMeta,
    pub wires: Vec<WireId>,
}

/// Compile-time integer: a `$`-prefixed variable or a literal. Its wires
/// are rebuilt from the constant wires whenever the value changes.
#[derive(Debug, Clone)]
pub struct ExtInt {
    pub meta: VarMeta,
    pub value: i64,
    pub wires: Vec<WireId>,
}

#[derive(Debug, Clone)]
pub struct ArrayVariable {
    pub meta: VarMeta,
    pub items: Vec<Variable>,
}

#[derive(Debug, Clone)]
pub struct ObjectVariable {
    pub meta: VarMeta,
    pub fields: IndexMap<String, Variable>,
}

#[derive(Debug, Clone)]
pub struct FunctionVariable {
    pub meta: VarMeta,
    pub args: Vec<Variable>,
    pub ret: Option<Box<Variable>>,
    pub number: Num,
    pub node: Rc<FunctionDecl>,
}

#[derive(Debug, Clone)]
pub enum Variable {
    Bool(BoolVariable),
    Int(IntVariable),
    Ext(ExtInt),
    Array(ArrayVariable),
    Object(ObjectVariable),
    Function(FunctionVariable),
}

/// Name of the return slot inside a function's context.
pub const RETURN_VAR: &str = "@return";
/// Name of the implicit conjunction of enclosing `if` conditions.
pub const IFCOND_VAR: &str = "@ifcond";

impl ExtInt {
    pub fn new(ty: Type, name: impl Into<String>, value: i64, w0: WireId, w1: WireId) -> Self {
        let mut meta = VarMeta::new(name, ty);
        meta.konst = true;
        let mut ext = ExtInt { meta, value: 0, wires: Vec::new() };
        ext.change_value(value, w0, w1);
        ext
    }

    /// Rebinds the wires to represent `value` in two's complement over the
    /// type's width.
    pub fn change_value(&mut self, value: i64, w0: WireId, w1: WireId) {
        self.value = value;
        let size = self.meta.ty.size();
        let masked = if size >= 64 {
            value as u64
        } else {
            (value as u64) & ((1u64 << size) - 1)
        };
        self.wires = int_to_wire_set(masked, w0, w1);
        while (self.wires.len() as Num) < size {
            self.wires.push(w0);
        }
    }
}

impl Variable {
    /// Creates an unfilled variable of the given type. `$`-prefixed integer
    /// names become extended ints bound to the constant wires.
    pub fn from_type(
        ty: &Type,
        name: &str,
        w0: WireId,
        w1: WireId,
    ) -> Option<Variable> {
        match ty {
            Type::Void => None,
            Type::Bool => Some(Variable::Bool(BoolVariable {
                meta: VarMeta::new(name, ty.clone()),
                wires: Vec::new(),
            })),
            Type::Int(_) | Type::UInt(_) => {
                if name.starts_with('$') {
                    Some(Variable::Ext(ExtInt::new(ty.clone(), name, 0, w0, w1)))
                } else {
                    Some(Variable::Int(IntVariable {
                        meta: VarMeta::new(name, ty.clone()),
                        wires: Vec::new(),
                    }))
                }
            }
            Type::Array(l, sub) => {
                let items = (0..*l)
                    .filter_map(|i| Variable::from_type(sub, &format!("{name}[{i}]"), w0, w1))
                    .collect();
                Some(Variable::Array(ArrayVariable {
                    meta: VarMeta::new(name, ty.clone()),
                    items,
                }))
            }
            Type::Object(decl) => {
                let mut fields = IndexMap::new();
                for (k, ft) in decl {
                    if let Some(v) = Variable::from_type(ft, k, w0, w1) {
                        fields.insert(k.clone(), v);
                    }
                }
                Some(Variable::Object(ObjectVariable {
                    meta: VarMeta::new(name, ty.clone()),
                    fields,
                }))
            }
            Type::Function { .. } => None,
        }
    }

    pub fn meta(&self) -> &VarMeta {
        match self {
            Variable::Bool(v) => &v.meta,
            Variable::Int(v) => &v.meta,
            Variable::Ext(v) => &v.meta,
            Variable::Array(v) => &v.meta,
            Variable::Object(v) => &v.meta,
            Variable::Function(v) => &v.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut VarMeta {
        match self {
            Variable::Bool(v) => &mut v.meta,
            Variable::Int(v) => &mut v.meta,
            Variable::Ext(v) => &mut v.meta,
            Variable::Array(v) => &mut v.meta,
            Variable::Object(v) => &mut v.meta,
            Variable::Function(v) => &mut v.meta,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    pub fn ty(&self) -> &Type {
        &self.meta().ty
    }

    pub fn size(&self) -> Num {
        self.ty().size()
    }

    pub fn is_perm(&self) -> bool {
        self.meta().perm
    }

    pub fn is_const(&self) -> bool {
        self.meta().konst
    }

    pub fn set_const(&mut self) {
        self.meta_mut().konst = true;
        match self {
            Variable::Array(a) => a.items.iter_mut().for_each(Variable::set_const),
            Variable::Object(o) => o.fields.values_mut().for_each(Variable::set_const),
            _ => {}
        }
    }

    pub fn set_perm(&mut self) {
        self.meta_mut().perm = true;
        match self {
            Variable::Array(a) => a.items.iter_mut().for_each(Variable::set_perm),
            Variable::Object(o) => o.fields.values_mut().for_each(Variable::set_perm),
            _ => {}
        }
    }

    pub fn is_input(&self) -> bool {
        self.name().starts_with("in_")
    }

    pub fn is_output(&self) -> bool {
        self.name().starts_with("out_")
    }

    pub fn is_ext(&self) -> bool {
        matches!(self, Variable::Ext(_))
    }

    pub fn is_int_kind(&self) -> bool {
        matches!(self, Variable::Int(_) | Variable::Ext(_))
    }

    /// The `i`-th wire of the variable's flat layout.
    pub fn get_wire(&self, i: Num) -> WireId {
        match self {
            Variable::Bool(v) => {
                debug_assert_eq!(i, 0);
                v.wires[0]
            }
            Variable::Int(v) => v.wires[i as usize],
            Variable::Ext(v) => v.wires[i as usize],
            Variable::Array(v) => {
                let mut i = i;
                for item in &v.items {
                    let s = item.size();
                    if i < s {
                        return item.get_wire(i);
                    }
                    i -= s;
                }
                panic!("wire index {i} out of range for array {}", v.meta.name)
            }
            Variable::Object(v) => {
                let mut i = i;
                for item in v.fields.values() {
                    let s = item.size();
                    if i < s {
                        return item.get_wire(i);
                    }
                    i -= s;
                }
                panic!("wire index {i} out of range for object {}", v.meta.name)
            }
            Variable::Function(v) => {
                let mut i = i;
                if let Some(ret) = &v.ret {
                    if i < ret.size() {
                        return ret.get_wire(i);
                    }
                    i -= ret.size();
                }
                for a in &v.args {
                    if i < a.size() {
                        return a.get_wire(i);
                    }
                    i -= a.size();
                }
                panic!("wire index out of range for function {}", v.meta.name)
            }
        }
    }

    /// The wire sequence of an integer-kind or bool variable.
    pub fn wires(&self) -> &[WireId] {
        match self {
            Variable::Bool(v) => &v.wires,
            Variable::Int(v) => &v.wires,
            Variable::Ext(v) => &v.wires,
            _ => panic!("wires() on aggregate variable {}", self.name()),
        }
    }

    /// Replaces the wire sequence of a leaf variable (arithmetic routines
    /// sometimes substitute a freshly pooled wire for a destination).
    pub fn set_wires(&mut self, wires: Vec<WireId>) {
        match self {
            Variable::Bool(v) => v.wires = wires,
            Variable::Int(v) => v.wires = wires,
            Variable::Ext(v) => v.wires = wires,
            _ => panic!("set_wires on aggregate variable {}", self.name()),
        }
    }

    /// Smallest wire number of the variable (its wires are contiguous).
    pub fn wirebase(&self, arena: &WireArena) -> Num {
        arena[self.get_wire(0)].number
    }

    /// Allocates backing wires: fresh arena wires for permanent variables,
    /// pooled wires for temporaries. Extended ints keep their constant
    /// wires.
    pub fn fill_in_wires(&mut self, arena: &mut WireArena, mut pool: Option<&mut WirePool>) {
        match self {
            Variable::Bool(v) => {
                v.wires = match pool {
                    Some(p) => vec![p.get_wire(arena)],
                    None => vec![arena.alloc(0)],
                };
            }
            Variable::Int(v) => {
                let size = v.meta.ty.size();
                v.wires = match pool {
                    Some(p) => p.get_wires(arena, size),
                    None => (0..size).map(|_| arena.alloc(0)).collect(),
                };
            }
            Variable::Ext(_) => {}
            Variable::Array(v) => {
                for item in &mut v.items {
                    item.fill_in_wires(arena, pool.as_deref_mut());
                }
            }
            Variable::Object(v) => {
                for item in v.fields.values_mut() {
                    item.fill_in_wires(arena, pool.as_deref_mut());
                }
            }
            Variable::Function(v) => {
                if let Some(ret) = &mut v.ret {
                    ret.fill_in_wires(arena, pool.as_deref_mut());
                }
                for a in &mut v.args {
                    a.fill_in_wires(arena, pool.as_deref_mut());
                }
            }
        }
    }

    /// Renumbers the variable's wires densely starting at `next`; returns
    /// the next free number.
    pub fn assign_perm_wires(&self, arena: &mut WireArena, mut next: Num) -> Num {
        match self {
            Variable::Bool(_) | Variable::Int(_) => {
                for &w in self.wires() {
                    arena[w].number = next;
                    next += 1;
                }
                next
            }
            Variable::Ext(_) => next,
            Variable::Array(v) => {
                for item in &v.items {
                    next = item.assign_perm_wires(arena, next);
                }
                next
            }
            Variable::Object(v) => {
                for item in v.fields.values() {
                    next = item.assign_perm_wires(arena, next);
                }
                next
            }
            Variable::Function(v) => {
                if let Some(ret) = &v.ret {
                    next = ret.assign_perm_wires(arena, next);
                }
                for a in &v.args {
                    next = a.assign_perm_wires(arena, next);
                }
                next
            }
        }
    }

    pub fn lock(&self, arena: &mut WireArena) {
        self.set_locked(arena, true);
    }

    pub fn unlock(&self, arena: &mut WireArena) {
        self.set_locked(arena, false);
    }

    fn set_locked(&self, arena: &mut WireArena, locked: bool) {
        match self {
            Variable::Bool(_) | Variable::Int(_) => {
                for &w in self.wires() {
                    arena[w].locked = locked;
                }
            }
            Variable::Ext(_) => {}
            Variable::Array(v) => {
                for item in &v.items {
                    item.set_locked(arena, locked);
                }
            }
            Variable::Object(v) => {
                for item in v.fields.values() {
                    item.set_locked(arena, locked);
                }
            }
            Variable::Function(v) => {
                if let Some(ret) = &v.ret {
                    ret.set_locked(arena, locked);
                }
                for a in &v.args {
                    a.set_locked(arena, locked);
                }
            }
        }
    }

    /// The compile-time value of an integer variable: the stored value of
    /// an extended int, or the constant read off the wire states otherwise.
    /// `None` when any wire is not a known constant.
    pub fn const_int_value(&self, arena: &WireArena) -> Option<i64> {
        use crate::wires::WireState;
        match self {
            Variable::Ext(v) => Some(v.value),
            Variable::Int(v) => {
                let size = v.meta.ty.size();
                let mut x: i64 = 0;
                for (i, &w) in v.wires.iter().enumerate() {
                    let bit = match arena[w].state {
                        WireState::One => 1i64,
                        WireState::Zero => 0,
                        _ => return None,
                    };
                    if i as Num == size - 1 {
                        if v.meta.ty.is_int() {
                            x -= bit << i;
                        } else {
                            x += bit << i;
                        }
                    } else {
                        x += bit << i;
                    }
                }
                Some(x)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consts(arena: &mut WireArena) -> (WireId, WireId) {
        let w0 = arena.alloc(0);
        let w1 = arena.alloc(1);
        arena[w1].state = crate::wires::WireState::One;
        (w0, w1)
    }

    #[test]
    fn ext_int_two_complement_wires() {
        let mut arena = WireArena::new();
        let (w0, w1) = consts(&mut arena);

        let e = ExtInt::new(Type::Int(8), "$x", 5, w0, w1);
        assert_eq!(e.wires.len(), 8);
        assert_eq!(e.wires[0], w1);
        assert_eq!(e.wires[1], w0);
        assert_eq!(e.wires[2], w1);

        let e = ExtInt::new(Type::Int(8), "$x", -1, w0, w1);
        assert_eq!(e.wires, vec![w1; 8]);

        let e = ExtInt::new(Type::Int(8), "$x", -128, w0, w1);
        assert_eq!(&e.wires[..7], &[w0; 7]);
        assert_eq!(e.wires[7], w1);
    }

    #[test]
    fn flat_layout_spans_aggregates() {
        let mut arena = WireArena::new();
        let (w0, w1) = consts(&mut arena);
        let ty = Type::Array(2, Box::new(Type::Int(4)));
        let mut v = Variable::from_type(&ty, "a", w0, w1).unwrap();
        v.fill_in_wires(&mut arena, None);
        assert_eq!(v.size(), 8);

        let next = v.assign_perm_wires(&mut arena, 2);
        assert_eq!(next, 10);
        assert_eq!(arena[v.get_wire(0)].number, 2);
        assert_eq!(arena[v.get_wire(7)].number, 9);
    }

    #[test]
    fn object_fields_keep_declared_order() {
        let mut arena = WireArena::new();
        let (w0, w1) = consts(&mut arena);
        let ty = Type::Object(vec![
            ("b".into(), Type::Int(4)),
            ("a".into(), Type::Bool),
        ]);
        let mut v = Variable::from_type(&ty, "o", w0, w1).unwrap();
        v.fill_in_wires(&mut arena, None);
        let next = v.assign_perm_wires(&mut arena, 0);
        assert_eq!(next, 5);
        // Field "b" (declared first) owns the low wires.
        assert_eq!(arena[v.get_wire(0)].number, 0);
        assert_eq!(arena[v.get_wire(4)].number, 4);
    }

    #[test]
    fn lock_is_compositional() {
        let mut arena = WireArena::new();
        let (w0, w1) = consts(&mut arena);
        let ty = Type::Array(2, Box::new(Type::Bool));
        let mut v = Variable::from_type(&ty, "a", w0, w1).unwrap();
        v.fill_in_wires(&mut arena, None);

        v.lock(&mut arena);
        assert!(arena[v.get_wire(0)].locked && arena[v.get_wire(1)].locked);
        v.unlock(&mut arena);
        assert!(!arena[v.get_wire(0)].locked);
    }

    #[test]
    fn const_int_value_reads_wire_states() {
        let mut arena = WireArena::new();
        let (w0, w1) = consts(&mut arena);

        let e = Variable::Ext(ExtInt::new(Type::Int(8), "$x", -17, w0, w1));
        assert_eq!(e.const_int_value(&arena), Some(-17));

        let v = Variable::Int(IntVariable {
            meta: VarMeta::new("x", Type::Int(4)),
            wires: vec![w1, w0, w0, w1],
        });
        assert_eq!(v.const_int_value(&arena), Some(-7));

        let mut arena2 = WireArena::new();
        let u = arena2.alloc(0);
        arena2[u].state = crate::wires::WireState::Unknown;
        let v = Variable::Int(IntVariable {
            meta: VarMeta::new("x", Type::UInt(1)),
            wires: vec![u],
        });
        assert_eq!(v.const_int_value(&arena2), None);
    }
}
