//! Shamir secret sharing of 32-byte keys over GF(2^8).
//!
//! Each byte of the secret is the constant term of its own random polynomial
//! of degree `threshold - 1`; share `i` is every polynomial evaluated at
//! `x = i` (1-based). Any `threshold` distinct shares recover the secret by
//! Lagrange interpolation at zero. Field arithmetic uses the AES polynomial.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};

/// Length of the shared secret.
pub const SECRET_LEN: usize = 32;

/// One share: its evaluation point and the 32 evaluated bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub index: u8,
    pub value: [u8; SECRET_LEN],
}

impl Share {
    /// `index || value`
    pub fn to_bytes(&self) -> [u8; SECRET_LEN + 1] {
        let mut out = [0u8; SECRET_LEN + 1];
        out[0] = self.index;
        out[1..].copy_from_slice(&self.value);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_LEN + 1 {
            return Err(CryptoError::InvalidShare(format!(
                "expected {} bytes, got {}",
                SECRET_LEN + 1,
                bytes.len()
            )));
        }
        if bytes[0] == 0 {
            return Err(CryptoError::InvalidShare("share index 0".into()));
        }
        let mut value = [0u8; SECRET_LEN];
        value.copy_from_slice(&bytes[1..]);
        Ok(Self {
            index: bytes[0],
            value,
        })
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Share({})", self.index)
    }
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

/// Multiplicative inverse as `a^254`. Zero maps to zero.
fn gf_inv(a: u8) -> u8 {
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u8;
    while exp > 0 {
        if exp & 1 == 1 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

/// Split `secret` into `count` shares, any `threshold` of which recover it.
pub fn split(secret: &[u8; SECRET_LEN], threshold: u8, count: u8) -> Result<Vec<Share>> {
    if threshold == 0 || threshold > count {
        return Err(CryptoError::Config(format!(
            "cannot split {}-of-{}",
            threshold, count
        )));
    }

    let mut rng = rand::thread_rng();
    let degree = threshold as usize - 1;
    // coefficients[b][k] is the k-th coefficient of byte b's polynomial
    let mut coefficients = vec![[0u8; 256]; SECRET_LEN];
    for (b, poly) in coefficients.iter_mut().enumerate() {
        poly[0] = secret[b];
        rng.fill_bytes(&mut poly[1..=degree]);
    }

    let shares = (1..=count)
        .map(|x| {
            let mut value = [0u8; SECRET_LEN];
            for (b, poly) in coefficients.iter().enumerate() {
                // Horner
                let mut acc = 0u8;
                for k in (0..=degree).rev() {
                    acc = gf_mul(acc, x) ^ poly[k];
                }
                value[b] = acc;
            }
            Share { index: x, value }
        })
        .collect();

    Ok(shares)
}

/// Recover the secret from shares with distinct, non-zero indices.
///
/// With fewer than the original threshold the output is garbage, not an
/// error; callers authenticate the result.
pub fn combine(shares: &[Share]) -> Result<[u8; SECRET_LEN]> {
    if shares.is_empty() {
        return Err(CryptoError::InvalidShare("no shares".into()));
    }
    for (i, share) in shares.iter().enumerate() {
        if share.index == 0 {
            return Err(CryptoError::InvalidShare("share index 0".into()));
        }
        if shares[..i].iter().any(|s| s.index == share.index) {
            return Err(CryptoError::InvalidShare(format!(
                "duplicate share index {}",
                share.index
            )));
        }
    }

    let mut secret = [0u8; SECRET_LEN];
    for (j, share_j) in shares.iter().enumerate() {
        // Lagrange basis at x = 0; subtraction is xor
        let mut basis = 1u8;
        for (m, share_m) in shares.iter().enumerate() {
            if m != j {
                let denom = share_m.index ^ share_j.index;
                basis = gf_mul(basis, gf_mul(share_m.index, gf_inv(denom)));
            }
        }
        for (out, y) in secret.iter_mut().zip(share_j.value.iter()) {
            *out ^= gf_mul(*y, basis);
        }
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gf_inverse() {
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, gf_inv(a)), 1, "inverse of {}", a);
        }
    }

    #[test]
    fn test_any_threshold_subset_recovers() {
        let secret = [0x5a; SECRET_LEN];
        let shares = split(&secret, 2, 3).unwrap();

        for pair in [[0, 1], [0, 2], [1, 2]] {
            let subset = vec![shares[pair[0]].clone(), shares[pair[1]].clone()];
            assert_eq!(combine(&subset).unwrap(), secret);
        }
    }

    #[test]
    fn test_below_threshold_does_not_recover() {
        let secret = [0x11; SECRET_LEN];
        let shares = split(&secret, 3, 5).unwrap();
        assert_ne!(combine(&shares[..2]).unwrap(), secret);
    }

    #[test]
    fn test_one_of_n_shares_are_the_secret() {
        let secret = [7; SECRET_LEN];
        let shares = split(&secret, 1, 2).unwrap();
        assert!(shares.iter().all(|s| s.value == secret));
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(split(&[0; SECRET_LEN], 0, 3).is_err());
        assert!(split(&[0; SECRET_LEN], 4, 3).is_err());

        let shares = split(&[1; SECRET_LEN], 2, 3).unwrap();
        let dup = vec![shares[0].clone(), shares[0].clone()];
        assert!(combine(&dup).is_err());
        assert!(combine(&[]).is_err());
    }

    #[test]
    fn test_share_bytes() {
        let share = Share {
            index: 3,
            value: [9; SECRET_LEN],
        };
        assert_eq!(Share::from_bytes(&share.to_bytes()).unwrap(), share);
        assert!(Share::from_bytes(&[0; SECRET_LEN + 1]).is_err());
        assert!(Share::from_bytes(&[1; 5]).is_err());
    }

    proptest! {
        #[test]
        fn threshold_shares_recover_secret(
            secret in any::<[u8; SECRET_LEN]>(),
            (threshold, count) in (1u8..=6).prop_flat_map(|t| (Just(t), t..=8)),
            offset in 0usize..8,
        ) {
            let shares = split(&secret, threshold, count).unwrap();
            let start = offset % (count as usize - threshold as usize + 1);
            let subset = &shares[start..start + threshold as usize];
            prop_assert_eq!(combine(subset).unwrap(), secret);
        }
    }
}
