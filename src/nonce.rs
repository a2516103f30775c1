//! Bounded allocator of presentation nonces.

use alloc::{vec, vec::Vec};

use num_bigint::BigUint;
use rand_core::CryptoRngCore;

use crate::codec::{Decode, DecodeError, Encode, Reader};

/// Set of nonces in `[0, limit)` already spent by a presentation state.
///
/// The bitfield is an integer in which bit `i` marks nonce `i` as used. It is encoded big-endian
/// over `ceil((limit + 1) / 8)` bytes, so the encoding stays fixed for the lifetime of the set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NonceSet {
    limit: u16,
    available: u16,
    bits: BigUint,
}

fn bitfield_len(limit: u16) -> usize {
    (usize::from(limit) + 8) / 8
}

impl NonceSet {
    /// Creates an empty set for nonces in `[0, limit)`.
    ///
    /// Returns `None` for a limit of zero, or of `u16::MAX` since the encoding could not represent
    /// every count.
    pub fn new(limit: u16) -> Option<Self> {
        if limit == 0 || limit == u16::MAX {
            return None;
        }
        Some(Self {
            limit,
            available: limit,
            bits: BigUint::default(),
        })
    }

    pub fn limit(&self) -> u16 {
        self.limit
    }

    /// Number of nonces not yet handed out.
    pub fn available(&self) -> u16 {
        self.available
    }

    pub fn contains(&self, nonce: u16) -> bool {
        nonce < self.limit && self.bits.bit(u64::from(nonce))
    }

    /// Draws a uniformly random unused nonce and marks it used, or returns `None` once every nonce
    /// in `[0, limit)` has been spent.
    pub fn add_random<R>(&mut self, rng: &mut R) -> Option<u16>
    where
        R: CryptoRngCore + ?Sized,
    {
        if self.available == 0 {
            return None;
        }
        // Sample under the smallest power-of-two mask covering the range, then reject.
        let mask = u32::from(self.limit).next_power_of_two() - 1;
        loop {
            let candidate = (rng.next_u32() & mask) as u16;
            if candidate < self.limit && !self.contains(candidate) {
                self.bits.set_bit(u64::from(candidate), true);
                self.available -= 1;
                return Some(candidate);
            }
        }
    }
}

impl Encode for NonceSet {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&u64::from(self.limit).to_be_bytes());
        out.extend_from_slice(&self.available.to_be_bytes());

        // Left-pad the minimal big-endian form. No bit at or above `limit` is ever set, so it
        // always fits.
        let bits = self.bits.to_bytes_be();
        let mut field = vec![0u8; bitfield_len(self.limit)];
        let start = field.len() - bits.len();
        field[start..].copy_from_slice(&bits);
        out.extend_from_slice(&field);
    }
}

impl Decode for NonceSet {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let limit = reader.u64()?;
        let limit = match u16::try_from(limit) {
            Ok(limit) if limit != 0 && limit != u16::MAX => limit,
            _ => return Err(DecodeError::InvalidNonceSet),
        };
        let available = reader.u16()?;
        let bits = BigUint::from_bytes_be(reader.take(bitfield_len(limit))?);

        // No bit may be set at or above the limit, and the count must match.
        if bits.bits() > u64::from(limit)
            || u64::from(available) + bits.count_ones() != u64::from(limit)
        {
            return Err(DecodeError::InvalidNonceSet);
        }
        Ok(Self {
            limit,
            available,
            bits,
        })
    }
}

#[cfg(test)]
mod test {
    use alloc::collections::BTreeSet;

    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::NonceSet;
    use crate::codec::{Decode, DecodeError, Encode};

    #[test]
    fn invalid_limits() {
        assert!(NonceSet::new(0).is_none());
        assert!(NonceSet::new(u16::MAX).is_none());
        assert!(NonceSet::new(u16::MAX - 1).is_some());
    }

    #[test]
    fn budget_is_exact() {
        let mut rng = rand::thread_rng();
        for limit in [1u16, 3, 7, 8, 9, 100] {
            let mut set = NonceSet::new(limit).unwrap();
            let mut seen = BTreeSet::new();
            for spent in 0..limit {
                assert_eq!(set.available(), limit - spent);
                let nonce = set.add_random(&mut rng).unwrap();
                assert!(nonce < limit);
                assert!(seen.insert(nonce), "nonce {nonce} handed out twice");
                assert!(set.contains(nonce));
            }
            assert_eq!(set.available(), 0);
            assert!(set.add_random(&mut rng).is_none());
            assert_eq!(seen.len(), usize::from(limit));
        }
    }

    #[test]
    fn contains_out_of_range() {
        let set = NonceSet::new(4).unwrap();
        assert!(!set.contains(4));
        assert!(!set.contains(u16::MAX));
    }

    #[test]
    fn deterministic_under_seed() {
        let draw = || {
            let mut rng = ChaCha20Rng::seed_from_u64(7);
            let mut set = NonceSet::new(50).unwrap();
            (0..10)
                .map(|_| set.add_random(&mut rng).unwrap())
                .collect::<alloc::vec::Vec<_>>()
        };
        assert_eq!(draw(), draw());
    }

    #[test]
    fn encoding_layout() {
        let mut set = NonceSet::new(9).unwrap();
        // Mark nonces 0 and 8 by hand to pin the bit order.
        for nonce in [0u64, 8] {
            set.bits.set_bit(nonce, true);
            set.available -= 1;
        }
        let bytes = set.to_bytes();
        assert_eq!(
            bytes,
            [0, 0, 0, 0, 0, 0, 0, 9, 0, 7, 0b0000_0001, 0b0000_0001]
        );
        assert_eq!(NonceSet::from_bytes(&bytes).unwrap(), set);
    }

    #[test]
    fn encoding_width_is_fixed() {
        // limit 16 needs three bytes even though bit 15 alone fits in two.
        let mut set = NonceSet::new(16).unwrap();
        assert_eq!(set.to_bytes()[10..], [0, 0, 0]);
        set.bits.set_bit(15, true);
        set.available -= 1;
        let bytes = set.to_bytes();
        assert_eq!(bytes.len(), 8 + 2 + 3);
        assert_eq!(bytes[10..], [0, 0b1000_0000, 0]);
        assert!(NonceSet::from_bytes(&bytes).unwrap().contains(15));
    }

    #[test]
    fn round_trip_after_use() {
        let mut rng = rand::thread_rng();
        let mut set = NonceSet::new(20).unwrap();
        for _ in 0..5 {
            set.add_random(&mut rng).unwrap();
        }
        let decoded = NonceSet::from_bytes(&set.to_bytes()).unwrap();
        assert_eq!(decoded, set);
        assert_eq!(decoded.available(), 15);
    }

    #[test]
    fn decode_rejects_inconsistent_sets() {
        let set = NonceSet::new(9).unwrap();
        let good = set.to_bytes();

        let mut zero_limit = good.clone();
        zero_limit[7] = 0;
        let Err(DecodeError::InvalidNonceSet) = NonceSet::from_bytes(&zero_limit) else {
            panic!("zero limit decoded");
        };

        let mut huge_limit = good.clone();
        huge_limit[5] = 1;
        let Err(DecodeError::InvalidNonceSet) = NonceSet::from_bytes(&huge_limit) else {
            panic!("limit above u16 range decoded");
        };

        let mut wrong_count = good.clone();
        wrong_count[9] = 8;
        let Err(DecodeError::InvalidNonceSet) = NonceSet::from_bytes(&wrong_count) else {
            panic!("inconsistent available count decoded");
        };

        // Bit 9 is outside [0, 9).
        let mut stray_bit = good.clone();
        stray_bit[9] = 8;
        stray_bit[10] = 0b0000_0010;
        let Err(DecodeError::InvalidNonceSet) = NonceSet::from_bytes(&stray_bit) else {
            panic!("bit above the limit decoded");
        };

        let Err(DecodeError::Truncated) = NonceSet::from_bytes(&good[..good.len() - 1]) else {
            panic!("truncated set decoded");
        };
    }
}
