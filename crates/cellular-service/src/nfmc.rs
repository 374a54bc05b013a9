//! Network-friendly backoff (NFMC).
//!
//! Each device derives its 7 retry delays from its IMSI, so a fleet that
//! loses the network at the same moment does not reconnect in lockstep. The
//! derivation is deterministic: the same SIM and base values always give the
//! same schedule.

use cellular_datacache::cellular::{NFMC_TEMPO_COUNT, NfmcParams};

/// Digits of the IMSI that feed the derivation.
const IMSI_DIGITS: usize = 15;

/// `(high:low) mod div` over the 64-bit value split into two 32-bit halves.
///
/// `div` must be non-zero.
pub fn modulo64(div: u32, high: u32, low: u32) -> u32 {
    let value = ((high as u64) << 32) | low as u64;
    (value % div as u64) as u32
}

/// Reads the IMSI as hexadecimal nibbles into a 64-bit value.
///
/// Only the first 15 characters count. Anything that is not a hex digit
/// makes the whole value 0.
pub fn imsi_value(imsi: &str) -> u64 {
    let digits: String = imsi.chars().take(IMSI_DIGITS).collect();
    u64::from_str_radix(&digits, 16).unwrap_or(0)
}

/// Splits into (high, low) 32-bit halves.
pub fn split_u64(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

/// Tempo for each base: `imsi mod base + base`, or `imsi_low + base` when
/// the base is 0. Both sums wrap at 2^32.
pub fn derive_tempos(imsi: u64, base: &[u32; NFMC_TEMPO_COUNT]) -> [u32; NFMC_TEMPO_COUNT] {
    let (high, low) = split_u64(imsi);
    let mut tempo = [0u32; NFMC_TEMPO_COUNT];
    for (out, &b) in tempo.iter_mut().zip(base) {
        *out = if b != 0 {
            modulo64(b, high, low).wrapping_add(b)
        } else {
            low.wrapping_add(b)
        };
    }
    tempo
}

/// Activation flag plus the tempos computed for the current SIM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NfmcContext {
    pub active: bool,
    pub tempo: [u32; NFMC_TEMPO_COUNT],
}

impl NfmcContext {
    /// Recomputes from a freshly read IMSI. Inactive NFMC keeps zero tempos.
    pub fn from_imsi(params: &NfmcParams, imsi: &str) -> Self {
        if !params.active {
            return Self::default();
        }
        Self {
            active: true,
            tempo: derive_tempos(imsi_value(imsi), &params.base_tempo_ms),
        }
    }

    pub fn tempo_at(&self, cursor: TempoCursor) -> u32 {
        self.tempo[cursor.index()]
    }
}

/// Round-robin position in the tempo table. Always in `0..7`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TempoCursor(u8);

impl TempoCursor {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the current position and moves to the next one.
    pub fn advance(&mut self) -> TempoCursor {
        let current = *self;
        self.0 = ((self.0 as usize + 1) % NFMC_TEMPO_COUNT) as u8;
        current
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BASE: [u32; 7] = [1000, 2000, 3000, 4000, 5000, 6000, 7000];

    #[test]
    fn zero_imsi_yields_base_values() {
        assert_eq!(derive_tempos(0, &BASE), BASE);
    }

    #[test]
    fn zero_base_uses_low_half() {
        let mut base = BASE;
        base[3] = 0;
        let imsi = 0x0000_0002_0000_0005;
        let tempo = derive_tempos(imsi, &base);
        assert_eq!(tempo[3], 5);
        assert_eq!(tempo[0], (imsi % 1000) as u32 + 1000);
    }

    #[test]
    fn imsi_parsed_as_hex() {
        assert_eq!(imsi_value("208"), 0x208);
        assert_eq!(imsi_value("001010123456789"), 0x001010123456789);
        assert_eq!(imsi_value("0010101234567891234"), 0x001010123456789);
        assert_eq!(imsi_value("20x"), 0);
        assert_eq!(imsi_value(""), 0);
    }

    #[test]
    fn inactive_context_has_no_tempos() {
        let params = NfmcParams {
            active: false,
            base_tempo_ms: BASE,
        };
        let ctx = NfmcContext::from_imsi(&params, "208101234567890");
        assert!(!ctx.active);
        assert_eq!(ctx.tempo, [0; 7]);
    }

    #[test]
    fn cursor_wraps_after_seven() {
        let mut cursor = TempoCursor::default();
        for expected in 0..7 {
            assert_eq!(cursor.advance().index(), expected);
        }
        assert_eq!(cursor.index(), 0);
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(imsi in any::<u64>(), base in proptest::array::uniform7(any::<u32>())) {
            prop_assert_eq!(derive_tempos(imsi, &base), derive_tempos(imsi, &base));
        }

        #[test]
        fn derivation_matches_closed_form(imsi in any::<u64>(), base in proptest::array::uniform7(any::<u32>())) {
            let tempo = derive_tempos(imsi, &base);
            for i in 0..7 {
                let expected = if base[i] != 0 {
                    ((imsi % base[i] as u64) + base[i] as u64) as u32
                } else {
                    (imsi as u32).wrapping_add(base[i])
                };
                prop_assert_eq!(tempo[i], expected);
            }
        }

        #[test]
        fn cursor_never_leaves_range(steps in 0usize..500) {
            let mut cursor = TempoCursor::default();
            for _ in 0..steps {
                cursor.advance();
                prop_assert!(cursor.index() < 7);
            }
            prop_assert_eq!(cursor.index(), steps % 7);
        }
    }
}
