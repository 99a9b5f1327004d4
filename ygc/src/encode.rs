//! JSON marshalling of party inputs and outputs. Bits are laid out LSB
//! first; signed values use two's complement. Arrays must have exactly the
//! declared length and objects exactly the declared keys; output objects
//! keep the declared key order. Signed or unsigned widths beyond 64 bits
//! are emitted as floating point.

use std::path::Path;

use serde_json::Value;

use crate::circuit::ClearBits;
use crate::error::{Error, Result};
use crate::types::{Num, Type};

/// Reads one party's input file and flattens it into bits.
pub fn read_input_file<P: AsRef<Path>>(path: P, t: &Type) -> Result<ClearBits> {
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| Error::io(format!("{}: {e}", path.as_ref().display())))?;
    let value: Value = serde_json::from_str(&raw)?;
    input_from_json(&value, t)
}

/// Flattens a JSON value of the declared type into bits.
pub fn input_from_json(value: &Value, t: &Type) -> Result<ClearBits> {
    let mut bits = ClearBits::new();
    value_to_bits(value, t, &mut bits)?;
    Ok(bits)
}

fn value_to_bits(value: &Value, t: &Type, bits: &mut ClearBits) -> Result<()> {
    match t {
        Type::Void => Err(Error::io("input declared with void type")),
        Type::Bool => {
            let b = value
                .as_bool()
                .ok_or_else(|| Error::io(format!("expected a boolean, got {value}")))?;
            bits.push(b);
            Ok(())
        }
        Type::Int(l) | Type::UInt(l) => {
            let f = value
                .as_f64()
                .ok_or_else(|| Error::io(format!("expected a number, got {value}")))?;
            let v = f as i64;
            if t.is_uint() && v < 0 {
                return Err(Error::io(format!("negative value {v} for unsigned type")));
            }
            int_to_bits(v, *l, bits);
            Ok(())
        }
        Type::Array(l, sub) => {
            let arr = value
                .as_array()
                .ok_or_else(|| Error::io(format!("expected an array, got {value}")))?;
            if arr.len() != *l as usize {
                return Err(Error::io(format!(
                    "array has {} elements, declared length is {l}",
                    arr.len()
                )));
            }
            for item in arr {
                value_to_bits(item, sub, bits)?;
            }
            Ok(())
        }
        Type::Object(fields) => {
            let obj = value
                .as_object()
                .ok_or_else(|| Error::io(format!("expected an object, got {value}")))?;
            if obj.len() != fields.len() {
                return Err(Error::io(format!(
                    "object has {} keys, declared type has {}",
                    obj.len(),
                    fields.len()
                )));
            }
            for (key, sub) in fields {
                let item = obj
                    .get(key)
                    .ok_or_else(|| Error::io(format!("object is missing key {key}")))?;
                value_to_bits(item, sub, bits)?;
            }
            Ok(())
        }
        Type::Function { .. } => Err(Error::io("input declared with function type")),
    }
}

fn int_to_bits(v: i64, size: Num, bits: &mut ClearBits) {
    for i in 0..size {
        // Two's complement: the arithmetic shift sign-extends past bit 63.
        let bit = (v >> i.min(63)) & 1 == 1;
        bits.push(bit);
    }
}

/// Marshals one party's output bits back into JSON of the declared type.
pub fn output_to_json(bits: &ClearBits, t: &Type) -> Result<Value> {
    if bits.len() != t.size() as usize {
        return Err(Error::io(format!(
            "{} output bits for a type of {} bits",
            bits.len(),
            t.size()
        )));
    }
    bits_to_value(bits, t)
}

fn bits_to_value(bits: &ClearBits, t: &Type) -> Result<Value> {
    match t {
        Type::Void => Ok(Value::Null),
        Type::Bool => Ok(Value::Bool(bits.get(0).unwrap_or(false))),
        Type::Int(l) => {
            if *l > 64 {
                return Ok(signed_float(bits, *l).into());
            }
            let mut x: i64 = 0;
            for i in 0..l - 1 {
                if bits.get(i as usize).unwrap_or(false) {
                    x += 1 << i;
                }
            }
            if bits.get(*l as usize - 1).unwrap_or(false) {
                x -= 1 << (l - 1);
            }
            Ok(x.into())
        }
        Type::UInt(l) => {
            if *l > 64 {
                return Ok(unsigned_float(bits, *l).into());
            }
            let mut x: u64 = 0;
            for i in 0..*l {
                if bits.get(i as usize).unwrap_or(false) {
                    x += 1 << i;
                }
            }
            Ok(x.into())
        }
        Type::Array(l, sub) => {
            let item_len = sub.size() as usize;
            let mut out = Vec::with_capacity(*l as usize);
            for i in 0..*l as usize {
                out.push(bits_to_value(&bits.slice(i * item_len, item_len), sub)?);
            }
            Ok(Value::Array(out))
        }
        Type::Object(fields) => {
            let mut map = serde_json::Map::new();
            let mut offset = 0usize;
            for (key, sub) in fields {
                let len = sub.size() as usize;
                map.insert(key.clone(), bits_to_value(&bits.slice(offset, len), sub)?);
                offset += len;
            }
            Ok(Value::Object(map))
        }
        Type::Function { .. } => Err(Error::io("output declared with function type")),
    }
}

fn signed_float(bits: &ClearBits, size: Num) -> f64 {
    let mut x = 0.0f64;
    for i in 0..size - 1 {
        if bits.get(i as usize).unwrap_or(false) {
            x += (i as f64).exp2();
        }
    }
    if bits.get(size as usize - 1).unwrap_or(false) {
        x -= ((size - 1) as f64).exp2();
    }
    x
}

fn unsigned_float(bits: &ClearBits, size: Num) -> f64 {
    let mut x = 0.0f64;
    for i in 0..size {
        if bits.get(i as usize).unwrap_or(false) {
            x += (i as f64).exp2();
        }
    }
    x
}

/// Writes a party's output JSON file.
pub fn write_output_file<P: AsRef<Path>>(path: P, bits: &ClearBits, t: &Type) -> Result<()> {
    let value = output_to_json(bits, t)?;
    std::fs::write(path, serde_json::to_string(&value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ints_round_trip_lsb_first() {
        let t = Type::Int(8);
        let bits = input_from_json(&json!(5), &t).unwrap();
        assert_eq!(
            bits.iter().collect::<Vec<_>>(),
            vec![true, false, true, false, false, false, false, false]
        );
        assert_eq!(output_to_json(&bits, &t).unwrap(), json!(5));

        let bits = input_from_json(&json!(-17), &t).unwrap();
        assert_eq!(output_to_json(&bits, &t).unwrap(), json!(-17));

        let bits = input_from_json(&json!(-128), &t).unwrap();
        assert_eq!(output_to_json(&bits, &t).unwrap(), json!(-128));
    }

    #[test]
    fn unsigned_rejects_negative() {
        assert!(input_from_json(&json!(-1), &Type::UInt(8)).is_err());
        let bits = input_from_json(&json!(200), &Type::UInt(8)).unwrap();
        assert_eq!(output_to_json(&bits, &Type::UInt(8)).unwrap(), json!(200));
    }

    #[test]
    fn bools_and_arrays() {
        let t = Type::Array(3, Box::new(Type::Bool));
        let bits = input_from_json(&json!([true, false, true]), &t).unwrap();
        assert_eq!(bits.len(), 3);
        assert_eq!(output_to_json(&bits, &t).unwrap(), json!([true, false, true]));

        // Wrong length is rejected.
        assert!(input_from_json(&json!([true]), &t).is_err());
        assert!(input_from_json(&json!(3), &t).is_err());
    }

    #[test]
    fn objects_use_declared_key_order() {
        let t = Type::Object(vec![
            ("b".to_string(), Type::Int(4)),
            ("a".to_string(), Type::Bool),
        ]);
        let bits = input_from_json(&json!({"a": true, "b": 3}), &t).unwrap();
        // Field "b" is declared first, so its bits come first.
        assert_eq!(
            bits.iter().collect::<Vec<_>>(),
            vec![true, true, false, false, true]
        );
        let out = output_to_json(&bits, &t).unwrap();
        assert_eq!(out, json!({"b": 3, "a": true}));
        let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a"]);

        assert!(input_from_json(&json!({"a": true}), &t).is_err());
        assert!(input_from_json(&json!({"a": true, "c": 1}), &t).is_err());
    }

    #[test]
    fn truncates_json_floats() {
        let bits = input_from_json(&json!(7.9), &Type::Int(8)).unwrap();
        assert_eq!(output_to_json(&bits, &Type::Int(8)).unwrap(), json!(7));
    }

    #[test]
    fn wide_signed_outputs_are_floats() {
        let t = Type::Int(66);
        let mut bits = ClearBits::new();
        for i in 0..66 {
            bits.push(i == 1);
        }
        assert_eq!(output_to_json(&bits, &t).unwrap(), json!(2.0));
    }
}
