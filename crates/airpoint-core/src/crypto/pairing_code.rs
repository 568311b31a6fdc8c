//! Pairing code generation.
//!
//! A pairing code is a random 30-bit value written in base 32 (digits `0-9`
//! then `a-v`), with each letter independently upper-cased on a coin flip.
//! Codes are at most six characters, short enough to read off a screen and
//! type on a phone.  Case is significant: the code is hashed as-is into the
//! session nonce.

use rand::Rng;

use super::context::CryptoContext;

/// Number of random bits in a pairing code.
pub const PAIRING_CODE_BITS: u32 = 30;

const RADIX: u32 = 32;

/// Generates a fresh pairing code from `ctx`'s random source.
pub fn generate_pairing_code(ctx: &CryptoContext) -> String {
    ctx.with_random(|rng| {
        let value: u32 = rng.gen_range(0..1u32 << PAIRING_CODE_BITS);
        to_base32(value)
            .chars()
            .map(|c| {
                if c.is_ascii_lowercase() && rng.gen_bool(0.5) {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect()
    })
}

/// Lower-case base-32 rendering without leading zeros.
fn to_base32(mut value: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        // RADIX is 32, so the digit is always representable.
        if let Some(c) = char::from_digit(value % RADIX, RADIX) {
            digits.push(c);
        }
        value /= RADIX;
    }
    digits.iter().rev().collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_to_base32_zero() {
        assert_eq!(to_base32(0), "0");
    }

    #[test]
    fn test_to_base32_known_values() {
        assert_eq!(to_base32(31), "v");
        assert_eq!(to_base32(32), "10");
        assert_eq!(to_base32((1 << 30) - 1), "vvvvvv");
    }

    #[test]
    fn test_code_uses_only_base32_alphabet() {
        // Arrange
        let ctx = CryptoContext::new();

        for _ in 0..200 {
            // Act
            let code = generate_pairing_code(&ctx);

            // Assert
            assert!(!code.is_empty() && code.len() <= 6, "bad length: {code}");
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='v').contains(&c.to_ascii_lowercase())),
                "bad character in {code}"
            );
        }
    }

    #[test]
    fn test_code_value_round_trips_through_radix() {
        let ctx = CryptoContext::new();
        let code = generate_pairing_code(&ctx);
        let value = u32::from_str_radix(&code.to_ascii_lowercase(), 32).unwrap();
        assert!(value < 1 << PAIRING_CODE_BITS);
    }

    #[test]
    fn test_seeded_context_reproduces_code() {
        let a = CryptoContext::with_rng(StdRng::seed_from_u64(42));
        let b = CryptoContext::with_rng(StdRng::seed_from_u64(42));
        assert_eq!(generate_pairing_code(&a), generate_pairing_code(&b));
    }

    #[test]
    fn test_codes_mix_letter_case() {
        // Over many codes both cases must appear among the letters.
        let ctx = CryptoContext::with_rng(StdRng::seed_from_u64(1));
        let joined: String = (0..100).map(|_| generate_pairing_code(&ctx)).collect();
        assert!(joined.chars().any(|c| c.is_ascii_uppercase()));
        assert!(joined.chars().any(|c| c.is_ascii_lowercase()));
    }
}
