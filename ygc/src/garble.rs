//! Garbling. Free-XOR with a global offset `R`, point-and-permute, and
//! row-reduced three-entry tables: the zero row of every table is derived
//! from `H(k_x, k_y, gate_index)`, so the evaluator reconstructs it without
//! a ciphertext. Garbling is a deterministic function of (circuit, seed).

use std::path::Path;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;
use sha2::{Digest, Sha512};

use crate::circuit::{Circuit, CommandKind};
use crate::error::{Error, Result};

/// `n`-byte key of one garbled value.
pub type GarbledKey = Vec<u8>;

/// One possible value on a wire of the garbled circuit: a permute bit and
/// an `n`-byte key.
#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GarbledValue {
    pub p: bool,
    pub key: GarbledKey,
}

impl GarbledValue {
    pub fn new(p: bool, key: GarbledKey) -> Self {
        GarbledValue { p, key }
    }

    /// The all-zero value of `n` bytes (the fixed value of wire 0).
    pub fn null(n: u8) -> Self {
        GarbledValue { p: false, key: vec![0; n as usize] }
    }

    pub fn random(n: u8, rng: &mut ChaCha12Rng) -> Self {
        let mut key = vec![0u8; n as usize];
        rng.fill_bytes(&mut key);
        GarbledValue { p: rng.next_u32() & 1 == 1, key }
    }

    pub fn xor(&self, other: &GarbledValue) -> GarbledValue {
        debug_assert_eq!(self.key.len(), other.key.len(), "key length mismatch");
        GarbledValue {
            p: self.p != other.p,
            key: self.key.iter().zip(&other.key).map(|(a, b)| a ^ b).collect(),
        }
    }
}

pub fn xor_keys(k0: &[u8], k1: &[u8]) -> GarbledKey {
    debug_assert_eq!(k0.len(), k1.len(), "key length mismatch");
    k0.iter().zip(k1).map(|(a, b)| a ^ b).collect()
}

/// A row-reduced garbled gate: three entries, the zero row implicit. Entry
/// `r - 1` serves the point-and-permute row `r` for `r` in 1..=3.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GarbledTable(pub [GarbledValue; 3]);

impl GarbledTable {
    /// The table entry selected by the operand permute bits; the zero row
    /// is the all-zero value.
    pub fn get_value(&self, px: bool, py: bool) -> GarbledValue {
        let r = (px as usize) * 2 + (py as usize);
        if r == 0 {
            GarbledValue::null(self.0[0].key.len() as u8)
        } else {
            self.0[r - 1].clone()
        }
    }
}

/// The garbled part of a circuit: one table per non-XOR gate, in gate-index
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TableSet(pub Vec<GarbledTable>);

impl TableSet {
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| Error::io(format!("table-set encoding failed: {e}")))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let (ts, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| Error::io(format!("table-set decoding failed: {e}")))?;
        Ok(ts)
    }
}

/// The two booleans a party needs to decode one output bit; the garbler
/// swaps them under the permute bit so the decoder need not know it.
pub type DecodingKey = [bool; 2];

/// Labels for one party's inputs, in input order.
pub type UserEncoder = Vec<GarbledValue>;

/// Decoding keys for one party's outputs, in output order.
pub type UserDecoder = Vec<DecodingKey>;

/// Everything needed to encode all parties' inputs.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct EncodingSet {
    /// The free-XOR offset; XORed into the label of every 1-bit.
    pub secret_key: GarbledKey,
    pub user: Vec<UserEncoder>,
}

impl EncodingSet {
    pub fn new(r: GarbledKey, parties: u8) -> Self {
        EncodingSet { secret_key: r, user: vec![Vec::new(); parties as usize] }
    }

    /// Selects the labels for one party's clear input bits.
    pub fn encode(&self, party: usize, bits: &crate::circuit::ClearBits) -> Result<UserEncoder> {
        let labels = &self.user[party];
        if bits.len() != labels.len() {
            return Err(Error::eval(format!(
                "party {party} supplied {} input bits, circuit expects {}",
                bits.len(),
                labels.len()
            )));
        }
        let rv = GarbledValue::new(true, self.secret_key.clone());
        Ok(labels
            .iter()
            .zip(bits.iter())
            .map(|(l, bit)| if bit { l.xor(&rv) } else { l.clone() })
            .collect())
    }
}

/// Everything needed to decode all parties' outputs.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct DecodingSet {
    pub user: Vec<UserDecoder>,
}

impl DecodingSet {
    pub fn new(parties: u8) -> Self {
        DecodingSet { user: vec![Vec::new(); parties as usize] }
    }

    /// Decodes the evaluator's output stream for one party.
    pub fn decode(&self, party: usize, outputs: &[DecodingKey]) -> Result<Vec<bool>> {
        let ud = &self.user[party];
        if outputs.len() != ud.len() {
            return Err(Error::eval(format!(
                "party {party} received {} outputs, circuit produces {}",
                outputs.len(),
                ud.len()
            )));
        }
        Ok(decode_bits(ud, outputs))
    }
}

/// Decodes evaluator outputs against a party's decoding keys: the permute
/// bit in the output selects which key half to compare against.
pub fn decode_bits(udec: &UserDecoder, outputs: &[DecodingKey]) -> Vec<bool> {
    outputs
        .iter()
        .zip(udec)
        .map(|(x, d)| if !x[0] { x[1] != d[0] } else { x[1] != d[1] })
        .collect()
}

/// `H(k1, k2, index)`: SHA-512 over the keys and the little-endian gate
/// index; the first `n` bytes are the key, the next bit the permute bit.
pub fn hash_gate(k1: &[u8], k2: &[u8], index: u32, n: u8) -> GarbledValue {
    let mut hasher = Sha512::new();
    hasher.update(k1);
    hasher.update(k2);
    hasher.update(index.to_le_bytes());
    let h = hasher.finalize();
    GarbledValue { p: h[n as usize] & 1 == 1, key: h[..n as usize].to_vec() }
}

/// Output-decoding hash, domain-separated from the gate hash by the fixed
/// `"out"` tag.
pub fn hash_out(k: &[u8], index: u32) -> bool {
    let mut hasher = Sha512::new();
    hasher.update(k);
    hasher.update(b"out");
    hasher.update(index.to_le_bytes());
    hasher.finalize()[0] & 1 == 1
}

struct Garbler {
    n: u8,
    offset_r: GarbledKey,
    gate_index: u32,
    out_index: u32,
}

impl Garbler {
    /// The garbled value for the `a`-side of a wire: the stored zero-value
    /// or its offset complement.
    fn get_val(&self, gv: &GarbledValue, a: bool) -> GarbledValue {
        if a {
            GarbledValue::new(!gv.p, xor_keys(&gv.key, &self.offset_r))
        } else {
            gv.clone()
        }
    }

    /// The key whose permute bit is `b`.
    fn get_key(&self, gv: &GarbledValue, b: bool) -> GarbledKey {
        if b {
            xor_keys(&gv.key, &self.offset_r)
        } else {
            gv.key.clone()
        }
    }

    /// Decoding key for an output wire: hashes of both candidate keys,
    /// swapped under the permute bit.
    fn out_key(&self, gv: &GarbledValue) -> DecodingKey {
        let e0 = hash_out(&gv.key, self.out_index);
        let e1 = !hash_out(&xor_keys(&gv.key, &self.offset_r), self.out_index);
        if gv.p { [e1, e0] } else { [e0, e1] }
    }

    /// Builds the row-reduced table for truth table `op` and returns it
    /// with the output wire's zero-value.
    fn table_from_wires(
        &self,
        wx: &GarbledValue,
        wy: &GarbledValue,
        op: u8,
    ) -> (GarbledTable, GarbledValue) {
        // The zero row determines the output's zero-value: row reduction
        // means this row is never stored.
        let mut gvto = hash_gate(
            &self.get_key(wx, wx.p),
            &self.get_key(wy, wy.p),
            self.gate_index,
            self.n,
        );
        if bools_to_mask(wx.p, wy.p) & op != 0 {
            gvto.p = !gvto.p;
            gvto.key = xor_keys(&gvto.key, &self.offset_r);
        }

        let mut rows = Vec::with_capacity(3);
        for i in 1..4usize {
            let px = (i / 2 == 1) != wx.p;
            let py = (i % 2 == 1) != wy.p;
            let value = self.get_val(&gvto, bools_to_mask(px, py) & op != 0);
            let mask = hash_gate(
                &self.get_key(wx, px),
                &self.get_key(wy, py),
                self.gate_index,
                self.n,
            );
            rows.push(value.xor(&mask));
        }
        let table = GarbledTable(
            rows.try_into().expect("row-reduced table has exactly three rows"),
        );
        (table, gvto)
    }
}

/// Selects the truth-table bit for operand values `(a, b)` as a mask.
fn bools_to_mask(a: bool, b: bool) -> u8 {
    let mut r = 1u8;
    if a {
        r *= 4;
    }
    if b {
        r *= 2;
    }
    r
}

/// Garbles a circuit with security parameter `n` bytes per label. Returns
/// the garbled tables (one per non-XOR gate, in order), the encoding set
/// and the decoding set. For a fixed seed the result is deterministic.
pub fn garble(
    circuit: &Circuit,
    n: u8,
    seed: [u8; 32],
) -> Result<(TableSet, EncodingSet, DecodingSet)> {
    let mut rng = ChaCha12Rng::from_seed(seed);

    let mut offset_r = vec![0u8; n as usize];
    rng.fill_bytes(&mut offset_r);

    let mut g = Garbler { n, offset_r: offset_r.clone(), gate_index: 0, out_index: 0 };

    let mut wire_set = vec![GarbledValue::null(n); circuit.total_wires as usize];
    let mut tables = Vec::with_capacity(circuit.non_xor_gates() as usize);
    let mut enc = EncodingSet::new(offset_r, circuit.parties);
    let mut dec = DecodingSet::new(circuit.parties);

    for com in circuit.commands() {
        match com.kind {
            CommandKind::Empty | CommandKind::FunctionCall => {
                return Err(Error::internal("unexpected command in garble traversal"));
            }
            CommandKind::Input => {
                let gv = GarbledValue::random(n, &mut rng);
                wire_set[com.to as usize] = gv.clone();
                enc.user[com.x as usize].push(gv);
            }
            CommandKind::MassInput => {
                for j in 0..com.y {
                    let gv = GarbledValue::random(n, &mut rng);
                    wire_set[(com.to + j) as usize] = gv.clone();
                    enc.user[com.x as usize].push(gv);
                }
            }
            CommandKind::Copy => {
                wire_set[com.to as usize] = wire_set[com.x as usize].clone();
            }
            CommandKind::MassCopy => {
                for j in 0..com.y {
                    wire_set[(com.to + j) as usize] = wire_set[(com.x + j) as usize].clone();
                }
            }
            CommandKind::Replicate => {
                for j in 0..com.y {
                    wire_set[(com.to + j) as usize] = wire_set[com.x as usize].clone();
                }
            }
            CommandKind::Output => {
                dec.user[com.to as usize].push(g.out_key(&wire_set[com.x as usize]));
                g.out_index += 1;
            }
            CommandKind::MassOutput => {
                for j in 0..com.y {
                    dec.user[com.to as usize].push(g.out_key(&wire_set[(com.x + j) as usize]));
                    g.out_index += 1;
                }
            }
            CommandKind::Gate(6) => {
                wire_set[com.to as usize] =
                    wire_set[com.x as usize].xor(&wire_set[com.y as usize]);
            }
            CommandKind::Gate(op) => {
                let (table, gvto) = g.table_from_wires(
                    &wire_set[com.x as usize],
                    &wire_set[com.y as usize],
                    op,
                );
                tables.push(table);
                wire_set[com.to as usize] = gvto;
                g.gate_index += 1;
            }
        }
    }

    if tables.len() != circuit.non_xor_gates() as usize {
        return Err(Error::internal(format!(
            "garbled {} tables for {} non-XOR gates",
            tables.len(),
            circuit.non_xor_gates()
        )));
    }
    tracing::debug!(tables = tables.len(), outputs = g.out_index, "garbling finished");
    Ok((TableSet(tables), enc, dec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Command;
    use crate::types::Type;

    const SEED: [u8; 32] = [0x42; 32];

    fn gate(t: u8, x: u32, y: u32, to: u32) -> Command {
        Command { kind: CommandKind::Gate(t), x, y, to }
    }

    /// A two-party circuit with one bit from each party, one gate, one
    /// output: in0 OP in1 -> out0.
    fn tiny_circuit(op: u8) -> Circuit {
        let mut c = Circuit::new(1, 2);
        c.main.push_plain(gate(0, 0, 0, 0));
        c.main.push_plain(gate(15, 0, 0, 1));
        c.main.push_plain(Command { kind: CommandKind::Input, x: 0, y: 0, to: 2 });
        c.main.push_plain(Command { kind: CommandKind::Input, x: 1, y: 0, to: 3 });
        c.main.push_plain(gate(op, 2, 3, 4));
        c.main.push_plain(Command { kind: CommandKind::Output, x: 4, y: 0, to: 0 });
        c.total_wires = 5;
        c.inputs[0] = crate::circuit::Var { ty: Type::Bool, wirebase: 2 };
        c.inputs[1] = crate::circuit::Var { ty: Type::Bool, wirebase: 3 };
        c.outputs[0] = crate::circuit::Var { ty: Type::Bool, wirebase: 4 };
        c
    }

    #[test]
    fn garbled_value_xor() {
        let a = GarbledValue::new(true, vec![0x0f, 0xf0]);
        let b = GarbledValue::new(false, vec![0xff, 0x0f]);
        let x = a.xor(&b);
        assert!(x.p);
        assert_eq!(x.key, vec![0xf0, 0xff]);

        let zero = a.xor(&a);
        assert!(!zero.p);
        assert_eq!(zero.key, vec![0, 0]);
    }

    #[test]
    fn table_count_matches_non_xor_gates() {
        let c = tiny_circuit(8);
        let (ts, enc, dec) = garble(&c, 8, SEED).unwrap();
        assert_eq!(ts.0.len(), c.non_xor_gates() as usize);
        assert_eq!(enc.user[0].len(), 1);
        assert_eq!(enc.user[1].len(), 1);
        assert_eq!(dec.user[0].len(), 1);
        assert_eq!(dec.user[1].len(), 0);
    }

    #[test]
    fn xor_gates_are_free() {
        let c = tiny_circuit(6);
        let (ts, _, _) = garble(&c, 8, SEED).unwrap();
        // The constant gates still need tables; the XOR does not.
        assert_eq!(ts.0.len(), 2);
    }

    #[test]
    fn garbling_is_deterministic_for_a_seed() {
        let c = tiny_circuit(14);
        let a = garble(&c, 8, SEED).unwrap();
        let b = garble(&c, 8, SEED).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
        assert_eq!(a.2, b.2);

        let other = garble(&c, 8, [7; 32]).unwrap();
        assert_ne!(a.1.secret_key, other.1.secret_key);
    }

    #[test]
    fn free_xor_labels_differ_by_the_offset() {
        let c = tiny_circuit(6);
        let (_, enc, _) = garble(&c, 8, SEED).unwrap();
        let l0 = &enc.user[0][0];
        let l1 = l0.xor(&GarbledValue::new(true, enc.secret_key.clone()));
        assert_eq!(xor_keys(&l0.key, &l1.key), enc.secret_key);
        assert_ne!(l0.p, l1.p);
    }

    #[test]
    fn table_set_round_trip() {
        let c = tiny_circuit(8);
        let (ts, _, _) = garble(&c, 8, SEED).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        ts.save_to_file(file.path()).unwrap();
        let back = TableSet::load_from_file(file.path()).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn encode_selects_offset_labels_for_one_bits() {
        let c = tiny_circuit(8);
        let (_, enc, _) = garble(&c, 4, SEED).unwrap();

        let zero: crate::circuit::ClearBits = [false].into_iter().collect();
        let one: crate::circuit::ClearBits = [true].into_iter().collect();
        let e0 = enc.encode(0, &zero).unwrap();
        let e1 = enc.encode(0, &one).unwrap();
        assert_eq!(e0[0], enc.user[0][0]);
        assert_eq!(xor_keys(&e1[0].key, &e0[0].key), enc.secret_key);

        let too_many: crate::circuit::ClearBits = [true, false].into_iter().collect();
        assert!(enc.encode(0, &too_many).is_err());
    }
}
