use crate::ast::Loc;
use crate::error::{Error, Result};

/// Wire numbers, bit widths and iteration counts all share this width.
pub type Num = u32;

/// The type lattice of the source dialect. Integer widths are in bits;
/// object fields keep their declaration order, which also fixes the wire
/// layout of object variables.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum Type {
    Void,
    Bool,
    Int(Num),
    UInt(Num),
    Array(Num, Box<Type>),
    Object(Vec<(String, Type)>),
    Function { ret: Box<Type>, args: Vec<Type> },
}

impl Type {
    /// Size in bits of a value of this type. A function "value" aggregates
    /// its return slot and argument slots.
    pub fn size(&self) -> Num {
        match self {
            Type::Void => 0,
            Type::Bool => 1,
            Type::Int(l) | Type::UInt(l) => *l,
            Type::Array(l, t) => l * t.size(),
            Type::Object(fields) => fields.iter().map(|(_, t)| t.size()).sum(),
            Type::Function { ret, args } => {
                ret.size() + args.iter().map(Type::size).sum::<Num>()
            }
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Bool)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_uint(&self) -> bool {
        matches!(self, Type::UInt(_))
    }

    /// Signed or unsigned integer.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int(_) | Type::UInt(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(..))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Type::Object(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function { .. })
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Int(l) => write!(f, "int{l}"),
            Type::UInt(l) => write!(f, "uint{l}"),
            Type::Array(l, t) => write!(f, "[{l}]{t}"),
            Type::Object(fields) => {
                write!(f, "{{")?;
                for (i, (k, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {t}")?;
                }
                write!(f, "}}")
            }
            Type::Function { ret, args } => {
                write!(f, "fn(")?;
                for (i, t) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}

/// The smallest integer type able to carry the result of a binary operation
/// on both operand types. Signed absorbs an unsigned operand of the same or
/// smaller width; otherwise the wider type wins.
pub fn max_type(t1: &Type, t2: &Type, loc: Loc) -> Result<Type> {
    match (t1, t2) {
        (Type::Int(_), Type::Int(_)) | (Type::UInt(_), Type::UInt(_)) => {
            Ok(if t1.size() >= t2.size() { t1.clone() } else { t2.clone() })
        }
        (Type::UInt(_), Type::Int(_)) if t1.size() <= t2.size() => Ok(t2.clone()),
        (Type::Int(_), Type::UInt(_)) if t1.size() >= t2.size() => Ok(t1.clone()),
        _ => Err(Error::type_error(
            format!("no common integer type for {t1} and {t2}"),
            loc,
        )),
    }
}

/// Rejects object types that contain themselves. With tree-valued types a
/// cycle would have to be infinite, so this is a structural guard against
/// a malformed type built programmatically.
pub fn check_recursive_object(t: &Type, loc: Loc) -> Result<()> {
    fn walk<'a>(t: &'a Type, ancestors: &mut Vec<&'a Type>, loc: Loc) -> Result<()> {
        if let Type::Object(fields) = t {
            if ancestors.contains(&t) {
                return Err(Error::semantic("recursive object type", loc));
            }
            ancestors.push(t);
            for (_, ft) in fields {
                walk(ft, ancestors, loc)?;
            }
            ancestors.pop();
        }
        if let Type::Array(_, inner) = t {
            walk(inner, ancestors, loc)?;
        }
        Ok(())
    }
    walk(t, &mut Vec::new(), loc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(Type::Bool.size(), 1);
        assert_eq!(Type::Int(8).size(), 8);
        assert_eq!(Type::Array(4, Box::new(Type::Int(8))).size(), 32);
        let obj = Type::Object(vec![
            ("a".into(), Type::Bool),
            ("b".into(), Type::UInt(16)),
        ]);
        assert_eq!(obj.size(), 17);
        let f = Type::Function {
            ret: Box::new(Type::Int(8)),
            args: vec![Type::Int(8), Type::Bool],
        };
        assert_eq!(f.size(), 17);
    }

    #[test]
    fn max_type_promotion() {
        let loc = Loc::default();
        assert_eq!(
            max_type(&Type::Int(8), &Type::Int(16), loc).unwrap(),
            Type::Int(16)
        );
        assert_eq!(
            max_type(&Type::UInt(8), &Type::Int(8), loc).unwrap(),
            Type::Int(8)
        );
        assert_eq!(
            max_type(&Type::Int(16), &Type::UInt(8), loc).unwrap(),
            Type::Int(16)
        );
        // A wider unsigned against a narrower signed has no common type.
        assert!(max_type(&Type::UInt(16), &Type::Int(8), loc).is_err());
        assert!(max_type(&Type::Bool, &Type::Int(8), loc).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Type::Int(8).to_string(), "int8");
        assert_eq!(
            Type::Array(3, Box::new(Type::UInt(4))).to_string(),
            "[3]uint4"
        );
    }
}
