//! Public tracking codes, e.g. `SR-2026-7K4QX9PM`.
//!
//! Codes are random rather than time-derived so they reveal nothing about
//! report volume or ordering. Uniqueness is enforced by the store; the
//! submission path regenerates on collision.

use chrono::{Datelike, Utc};
use rand::Rng;

pub const PREFIX: &str = "SR";
pub const SUFFIX_LEN: usize = 8;

/// Upper-case alphanumerics minus the look-alikes `0 O 1 I`.
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// How many fresh codes to try before giving up on a submission.
pub const MAX_ATTEMPTS: usize = 5;

pub fn generate() -> String {
    generate_with(&mut rand::thread_rng(), Utc::now().year())
}

pub fn generate_with<R: Rng + ?Sized>(rng: &mut R, year: i32) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{PREFIX}-{year}-{suffix}")
}

/// Cheap shape check so lookups for garbage never reach the store.
pub fn is_well_formed(code: &str) -> bool {
    let mut parts = code.split('-');
    let (Some(prefix), Some(year), Some(suffix), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    prefix == PREFIX
        && year.len() == 4
        && year.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(|b| ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn generated_codes_are_well_formed() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let code = generate_with(&mut rng, 2026);
            assert!(code.starts_with("SR-2026-"), "{code}");
            assert!(is_well_formed(&code), "{code}");
        }
        assert!(is_well_formed(&generate()));
    }

    #[test]
    fn alphabet_has_32_distinct_unambiguous_symbols() {
        let symbols: HashSet<u8> = ALPHABET.iter().copied().collect();
        assert_eq!(ALPHABET.len(), 32);
        assert_eq!(symbols.len(), 32);
        for look_alike in *b"0O1I" {
            assert!(!symbols.contains(&look_alike));
        }
    }

    #[test]
    fn codes_do_not_repeat_in_practice() {
        let mut rng = StdRng::seed_from_u64(42);
        let codes: HashSet<String> = (0..10_000).map(|_| generate_with(&mut rng, 2026)).collect();
        assert_eq!(codes.len(), 10_000);
    }

    #[test]
    fn rejects_malformed_codes() {
        for bad in ["", "SR-2026", "SR-2026-ABC", "XX-2026-ABCDEFGH", "SR-26-ABCDEFGH", "SR-2026-ABCDEFG0", "SR-2026-abcdefgh", "SR-2026-ABCDEFGH-1"] {
            assert!(!is_well_formed(bad), "{bad}");
        }
        assert!(is_well_formed("SR-2024-ABCDEFGH"));
    }
}
