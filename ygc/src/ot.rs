//! Endemic 1-out-of-2 oblivious transfer from the CDH assumption, after
//! "Efficient and Universally Composable Protocols for Oblivious Transfer
//! from the CDH Assumption". The group is secp256k1; points travel as
//! uncompressed SEC1 bytes, keys derive from SHAKE-256 in the random-oracle
//! style, and encryption is XOR. Used to deliver the evaluator's input
//! labels without revealing the choice bits.

use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::{AffinePoint, EncodedPoint, ProjectivePoint, Scalar, U256};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

use crate::error::{Error, Result};
use crate::garble::GarbledValue;

fn shake(data: &[u8], len: usize) -> Vec<u8> {
    let mut hasher = Shake256::default();
    hasher.update(data);
    let mut reader = hasher.finalize_xof();
    let mut out = vec![0u8; len];
    reader.read(&mut out);
    out
}

fn point_bytes(p: &ProjectivePoint) -> Vec<u8> {
    p.to_affine().to_encoded_point(false).as_bytes().to_vec()
}

fn point_from_bytes(data: &[u8]) -> Result<ProjectivePoint> {
    let ep = EncodedPoint::from_bytes(data)
        .map_err(|_| Error::crypto("malformed curve point encoding"))?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&ep).into();
    affine
        .map(ProjectivePoint::from)
        .ok_or_else(|| Error::crypto("bytes do not encode a curve point"))
}

fn random_scalar(rng: &mut ChaCha12Rng) -> Scalar {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    <Scalar as Reduce<U256>>::reduce(U256::from_be_slice(&bytes))
}

/// `H(base, e)`: a garbled value of `n + 1` hashed bytes, the last bit
/// being the permute bit.
fn h(n: u8, base: &[u8], e: &ProjectivePoint) -> GarbledValue {
    let mut data = base.to_vec();
    data.extend(point_bytes(e));
    let out = shake(&data, n as usize + 1);
    GarbledValue::new(out[n as usize] & 1 == 1, out[..n as usize].to_vec())
}

/// `G(p)`: the random-oracle point hash `[SHAKE256(p) mod N]·G`.
fn g_hash(p: &ProjectivePoint) -> ProjectivePoint {
    let digest = shake(&point_bytes(p), 64);
    let k = <Scalar as Reduce<U256>>::reduce(U256::from_be_slice(&digest[..32]));
    ProjectivePoint::GENERATOR * k
}

/// Sender side: holds both messages' keys. The sender is the garbler; the
/// two messages are the two labels of one evaluator input wire.
#[derive(Debug)]
pub struct OtSender {
    n: u8,
    rng: ChaCha12Rng,
    y: Scalar,
    hbase: Vec<u8>,
    t: ProjectivePoint,
}

impl OtSender {
    pub fn new(n: u8, seed: [u8; 32]) -> Self {
        OtSender {
            n,
            rng: ChaCha12Rng::from_seed(seed),
            y: Scalar::ZERO,
            hbase: Vec::new(),
            t: ProjectivePoint::IDENTITY,
        }
    }

    /// Picks the session secret and publishes `S = yG`.
    pub fn step0(&mut self) -> Vec<u8> {
        self.y = random_scalar(&mut self.rng);
        let s = ProjectivePoint::GENERATOR * self.y;
        self.t = g_hash(&s);
        self.hbase = point_bytes(&s);
        self.hbase.clone()
    }

    /// Encrypts both messages against the receiver's point: `e0 = yR`,
    /// `e1 = y(R - T)`, `v_i = m_i ⊕ H(S‖R, e_i)`.
    pub fn step2(
        &mut self,
        r_data: &[u8],
        m0: &GarbledValue,
        m1: &GarbledValue,
    ) -> Result<(GarbledValue, GarbledValue)> {
        let r = point_from_bytes(r_data)?;
        self.hbase.extend_from_slice(r_data);

        let e0 = r * self.y;
        let e1 = e0 - self.t * self.y;
        let k0 = h(self.n, &self.hbase, &e0);
        let k1 = h(self.n, &self.hbase, &e1);

        Ok((k0.xor(m0), k1.xor(m1)))
    }
}

/// Receiver side: obtains exactly the message selected by its choice bit.
#[derive(Debug)]
pub struct OtReceiver {
    n: u8,
    rng: ChaCha12Rng,
    c: bool,
    vr: GarbledValue,
}

impl OtReceiver {
    pub fn new(n: u8, seed: [u8; 32]) -> Self {
        OtReceiver {
            n,
            rng: ChaCha12Rng::from_seed(seed),
            c: false,
            vr: GarbledValue::default(),
        }
    }

    /// Commits to the choice bit: `R = xG` for 0, `R = xG + G(S)` for 1,
    /// and derives the decryption key `H(S‖R, xS)`.
    pub fn step1(&mut self, s_data: &[u8], c: bool) -> Result<Vec<u8>> {
        self.c = c;
        let s = point_from_bytes(s_data)?;
        let x = random_scalar(&mut self.rng);

        let mut r = ProjectivePoint::GENERATOR * x;
        if c {
            r += g_hash(&s);
        }
        let r_bytes = point_bytes(&r);

        let mut base = s_data.to_vec();
        base.extend_from_slice(&r_bytes);
        self.vr = h(self.n, &base, &(s * x));

        Ok(r_bytes)
    }

    /// Decrypts the chosen ciphertext.
    pub fn step3(&self, v0: &GarbledValue, v1: &GarbledValue) -> GarbledValue {
        if self.c {
            self.vr.xor(v1)
        } else {
            self.vr.xor(v0)
        }
    }
}

/// Runs the whole protocol for a list of label pairs: one OT session per
/// evaluator input wire. Convenience wrapper used by tests and demos;
/// deployments run the two sides over a transport.
pub fn transfer_labels(
    n: u8,
    pairs: &[(GarbledValue, GarbledValue)],
    choices: &[bool],
    sender_seed: [u8; 32],
    receiver_seed: [u8; 32],
) -> Result<Vec<GarbledValue>> {
    if pairs.len() != choices.len() {
        return Err(Error::crypto("one choice bit per label pair required"));
    }
    let mut sender = OtSender::new(n, sender_seed);
    let mut receiver = OtReceiver::new(n, receiver_seed);

    let mut out = Vec::with_capacity(pairs.len());
    for ((m0, m1), &c) in pairs.iter().zip(choices) {
        let s_data = sender.step0();
        let r_data = receiver.step1(&s_data, c)?;
        let (v0, v1) = sender.step2(&r_data, m0, m1)?;
        out.push(receiver.step3(&v0, &v1));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER_SEED: [u8; 32] = [1; 32];
    const RECEIVER_SEED: [u8; 32] = [2; 32];

    fn messages(n: u8) -> (GarbledValue, GarbledValue) {
        let mut rng = ChaCha12Rng::from_seed([9; 32]);
        (GarbledValue::random(n, &mut rng), GarbledValue::random(n, &mut rng))
    }

    #[test]
    fn receiver_gets_exactly_the_chosen_message() {
        for n in [4u8, 8, 16] {
            let (m0, m1) = messages(n);
            for c in [false, true] {
                let mut sender = OtSender::new(n, SENDER_SEED);
                let mut receiver = OtReceiver::new(n, RECEIVER_SEED);

                let s_data = sender.step0();
                let r_data = receiver.step1(&s_data, c).unwrap();
                let (v0, v1) = sender.step2(&r_data, &m0, &m1).unwrap();
                let m = receiver.step3(&v0, &v1);

                let want = if c { &m1 } else { &m0 };
                assert_eq!(&m, want, "n {n} choice {c}");
            }
        }
    }

    #[test]
    fn ciphertexts_differ_from_messages() {
        let (m0, m1) = messages(8);
        let mut sender = OtSender::new(8, SENDER_SEED);
        let mut receiver = OtReceiver::new(8, RECEIVER_SEED);

        let s_data = sender.step0();
        let r_data = receiver.step1(&s_data, false).unwrap();
        let (v0, v1) = sender.step2(&r_data, &m0, &m1).unwrap();
        assert_ne!(v0, m0);
        assert_ne!(v1, m1);
        // The unchosen ciphertext does not decrypt with the derived key.
        assert_ne!(receiver.vr.xor(&v1), m1);
    }

    #[test]
    fn malformed_points_are_rejected() {
        let mut receiver = OtReceiver::new(8, RECEIVER_SEED);
        assert!(receiver.step1(&[0u8; 7], false).is_err());

        let mut sender = OtSender::new(8, SENDER_SEED);
        sender.step0();
        let (m0, m1) = messages(8);
        assert!(sender.step2(&[0xffu8; 65], &m0, &m1).is_err());
    }

    #[test]
    fn batch_transfer_matches_choices() {
        let n = 8;
        let pairs: Vec<_> = (0..6).map(|_| messages(n)).collect();
        let choices = [true, false, true, true, false, false];
        let got = transfer_labels(n, &pairs, &choices, SENDER_SEED, RECEIVER_SEED).unwrap();
        for ((pair, &c), m) in pairs.iter().zip(&choices).zip(&got) {
            let want = if c { &pair.1 } else { &pair.0 };
            assert_eq!(m, want);
        }
    }
}
