//! Bit-vector and GF(2^n) arithmetic shared by the reconciler, verifier and
//! privacy amplifier.
//!
//! Field elements are represented as plain `u64`/`u128` under the fixed
//! primitive polynomials `x^64 + x^4 + x^3 + x + 1` and
//! `x^128 + x^7 + x^2 + x + 1`. Multiplication is carry-less (no
//! value-dependent branching beyond fixed-iteration-count loops), which keeps
//! it safe to use on secret-dependent data such as reconciled key material.

use bitvec::prelude::*;

/// Reducing polynomial for GF(2^64), with the degree-64 term implicit.
const POLY64: u64 = 0b1_1011; // x^4 + x^3 + x + 1
/// Reducing polynomial for GF(2^128), with the degree-128 term implicit.
const POLY128: u128 = 0b1000_0111; // x^7 + x^2 + x + 1

/// Width of a GF(2^n) verification tag, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldWidth {
    Gf64,
    Gf128,
}

impl FieldWidth {
    pub fn bits(self) -> usize {
        match self {
            FieldWidth::Gf64 => 64,
            FieldWidth::Gf128 => 128,
        }
    }
}

/// XOR-parity of a bit vector: 0 if an even number of bits are set, else 1.
pub fn parity(bits: &BitSlice) -> u8 {
    (bits.count_ones() % 2) as u8
}

/// XOR-parity over a subset of indices into `bits`. Out-of-range indices are
/// ignored (callers are expected to pass valid indices; this only guards
/// against the empty-set edge case, which is 0 by definition).
pub fn parity_over_indices(bits: &BitSlice, indices: &[usize]) -> u8 {
    let mut acc = 0u8;
    for &i in indices {
        if let Some(b) = bits.get(i) {
            acc ^= *b as u8;
        }
    }
    acc
}

/// Carry-less multiplication of two 64-bit values, modulo `x^64 + x^4 + x^3 + x + 1`.
pub fn gf64_mul(a: u64, b: u64) -> u64 {
    let mut result: u64 = 0;
    let mut a = a;
    let mut b = b;
    for _ in 0..64 {
        if b & 1 == 1 {
            result ^= a;
        }
        let carry = a & (1u64 << 63) != 0;
        a <<= 1;
        if carry {
            a ^= POLY64;
        }
        b >>= 1;
    }
    result
}

/// Carry-less multiplication of two 128-bit values, modulo `x^128 + x^7 + x^2 + x + 1`.
pub fn gf128_mul(a: u128, b: u128) -> u128 {
    let mut result: u128 = 0;
    let mut a = a;
    let mut b = b;
    for _ in 0..128 {
        if b & 1 == 1 {
            result ^= a;
        }
        let carry = a & (1u128 << 127) != 0;
        a <<= 1;
        if carry {
            a ^= POLY128;
        }
        b >>= 1;
    }
    result
}

/// A field element in either GF(2^64) or GF(2^128), tagged by width so
/// mismatched-width operations fail to compile rather than silently
/// truncating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldElement {
    Gf64(u64),
    Gf128(u128),
}

impl FieldElement {
    pub fn zero(width: FieldWidth) -> Self {
        match width {
            FieldWidth::Gf64 => FieldElement::Gf64(0),
            FieldWidth::Gf128 => FieldElement::Gf128(0),
        }
    }

    pub fn width(self) -> FieldWidth {
        match self {
            FieldElement::Gf64(_) => FieldWidth::Gf64,
            FieldElement::Gf128(_) => FieldWidth::Gf128,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            FieldElement::Gf64(v) => v == 0,
            FieldElement::Gf128(v) => v == 0,
        }
    }

    /// `self * other`, both operands must share a width.
    pub fn mul(self, other: FieldElement) -> FieldElement {
        match (self, other) {
            (FieldElement::Gf64(a), FieldElement::Gf64(b)) => FieldElement::Gf64(gf64_mul(a, b)),
            (FieldElement::Gf128(a), FieldElement::Gf128(b)) => {
                FieldElement::Gf128(gf128_mul(a, b))
            }
            _ => panic!("field width mismatch in FieldElement::mul"),
        }
    }

    /// `self + other` (XOR, since we are in characteristic 2).
    pub fn add(self, other: FieldElement) -> FieldElement {
        match (self, other) {
            (FieldElement::Gf64(a), FieldElement::Gf64(b)) => FieldElement::Gf64(a ^ b),
            (FieldElement::Gf128(a), FieldElement::Gf128(b)) => FieldElement::Gf128(a ^ b),
            _ => panic!("field width mismatch in FieldElement::add"),
        }
    }

    /// `self^exp` by repeated squaring. `power(_, 0) == 1` for all bases,
    /// including zero, matching the spec's guarantee.
    pub fn pow(self, exp: u128) -> FieldElement {
        let one = match self.width() {
            FieldWidth::Gf64 => FieldElement::Gf64(1),
            FieldWidth::Gf128 => FieldElement::Gf128(1),
        };
        if exp == 0 {
            return one;
        }
        let mut base = self;
        let mut exp = exp;
        let mut acc = one;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc.mul(base);
            }
            base = base.mul(base);
            exp >>= 1;
        }
        acc
    }

    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            FieldElement::Gf64(v) => v.to_be_bytes().to_vec(),
            FieldElement::Gf128(v) => v.to_be_bytes().to_vec(),
        }
    }

    pub fn from_bytes(width: FieldWidth, bytes: &[u8]) -> Self {
        match width {
            FieldWidth::Gf64 => {
                let mut buf = [0u8; 8];
                let n = bytes.len().min(8);
                buf[8 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
                FieldElement::Gf64(u64::from_be_bytes(buf))
            }
            FieldWidth::Gf128 => {
                let mut buf = [0u8; 16];
                let n = bytes.len().min(16);
                buf[16 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
                FieldElement::Gf128(u128::from_be_bytes(buf))
            }
        }
    }
}

/// Packs a bit vector into a sequence of field elements in big-endian order,
/// zero-padding the final chunk's low-order bits if `bits.len()` is not a
/// multiple of the field width.
pub fn pack_into_field(bits: &BitSlice, width: FieldWidth) -> Vec<FieldElement> {
    let n = width.bits();
    let mut out = Vec::with_capacity(bits.len().div_ceil(n));
    let mut chunk_start = 0;
    while chunk_start < bits.len() {
        let chunk_end = (chunk_start + n).min(bits.len());
        let mut byte_buf = vec![0u8; n / 8];
        let chunk = &bits[chunk_start..chunk_end];
        for (i, bit) in chunk.iter().enumerate() {
            if *bit {
                let byte_idx = i / 8;
                let bit_idx = 7 - (i % 8);
                byte_buf[byte_idx] |= 1 << bit_idx;
            }
        }
        out.push(FieldElement::from_bytes(width, &byte_buf));
        chunk_start = chunk_end;
    }
    out
}

/// Unpacks field elements back into a bit vector of exactly `original_len`
/// bits, inverting [`pack_into_field`].
pub fn unpack_from_field(elements: &[FieldElement], original_len: usize) -> BitVec<u8, Msb0> {
    let mut out = BitVec::<u8, Msb0>::with_capacity(original_len);
    for el in elements {
        let bytes = el.to_bytes();
        let bits = BitVec::<u8, Msb0>::from_vec(bytes);
        for b in bits.iter() {
            if out.len() >= original_len {
                break;
            }
            out.push(*b);
        }
    }
    out.truncate(original_len);
    out
}

/// Horner-form evaluation `H_r(m_1, ..., m_L) = (...((m_1*r + m_2)*r + m_3)*r...) + m_L`
/// over GF(2^n).
pub fn horner_eval(elements: &[FieldElement], r: FieldElement) -> FieldElement {
    let mut acc = FieldElement::zero(r.width());
    for &m in elements {
        acc = acc.mul(r).add(m);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_of_empty_is_zero() {
        let bits = bitvec![u8, Msb0;];
        assert_eq!(parity(&bits), 0);
    }

    #[test]
    fn parity_self_concat_is_zero() {
        let mut bits = bitvec![u8, Msb0; 1, 0, 1, 1, 0];
        let copy = bits.clone();
        bits.extend_from_bitslice(&copy);
        assert_eq!(parity(&bits), 0);
    }

    #[test]
    fn gf64_mul_is_commutative() {
        let a = 0xdead_beef_1234_5678u64;
        let b = 0x0bad_c0de_f00d_baadu64;
        assert_eq!(gf64_mul(a, b), gf64_mul(b, a));
    }

    #[test]
    fn gf64_pow_zero_is_one() {
        let a = FieldElement::Gf64(0);
        assert_eq!(a.pow(0), FieldElement::Gf64(1));
        let b = FieldElement::Gf64(12345);
        assert_eq!(b.pow(0), FieldElement::Gf64(1));
    }

    #[test]
    fn gf64_inverse_via_fermat() {
        let r = FieldElement::Gf64(0x1234_5678_9abc_def1);
        let inv = r.pow((1u128 << 64) - 2);
        assert_eq!(r.mul(inv), FieldElement::Gf64(1));
    }

    #[test]
    fn gf128_inverse_via_fermat() {
        let r = FieldElement::Gf128(0x1234_5678_9abc_def1_0011_2233_4455_6677);
        let exp = u128::MAX - 1; // 2^128 - 2
        assert_eq!(r.mul(r.pow(exp)), FieldElement::Gf128(1));
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let bits = bitvec![u8, Msb0; 1, 0, 1, 1, 0, 0, 1, 0, 1, 1, 1];
        let packed = pack_into_field(&bits, FieldWidth::Gf64);
        let unpacked = unpack_from_field(&packed, bits.len());
        assert_eq!(bits, unpacked);
    }

    #[test]
    fn pack_unpack_roundtrip_exact_multiple() {
        let bits: BitVec<u8, Msb0> = BitVec::repeat(true, 128);
        let packed = pack_into_field(&bits, FieldWidth::Gf64);
        assert_eq!(packed.len(), 2);
        let unpacked = unpack_from_field(&packed, bits.len());
        assert_eq!(bits, unpacked);
    }
}
