use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tokens live in a 9-digit decimal window so they always fit an unsigned 32-bit
/// protocol field. 7 days of milliseconds (604,800,000) fit inside it.
const TOKEN_WINDOW: u64 = 1_000_000_000;

/// Correlation token generator scoped to one device connection.
///
/// Each token is seeded from the wall clock (milliseconds, truncated to the 9-digit
/// window). A single shared "last issued" cell is advanced with compare-and-swap; the
/// installed value is `max(seed, last + 1)`, so concurrent callers never receive the
/// same token and a clock rollback never re-issues a recently handed out value.
#[derive(Debug, Default)]
pub struct TokenGenerator {
    last: AtomicU64,
}

impl TokenGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next token as its decimal string form.
    pub fn next(&self) -> String {
        self.next_value().to_string()
    }

    /// Issue the next token as a number in `[0, 10^9)`.
    pub fn next_value(&self) -> u32 {
        let seed = Self::seed();
        let previous = match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(Self::advance(last, seed))
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        Self::advance(previous, seed) as u32
    }

    #[inline]
    fn seed() -> u64 {
        (Utc::now().timestamp_millis().max(0) as u64) % TOKEN_WINDOW
    }

    #[inline]
    fn advance(last: u64, seed: u64) -> u64 {
        if seed > last {
            return seed;
        }
        let next = last + 1;
        if next >= TOKEN_WINDOW {
            // Window exhausted: fall back to the clock seed (or zero if the clock sits
            // at the very edge as well).
            if seed == last {
                0
            } else {
                seed
            }
        } else {
            next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread};

    #[test]
    fn test_tokens_fit_nine_digits() {
        let generator = TokenGenerator::new();
        for _ in 0..1000 {
            let token = generator.next();
            assert!(token.len() <= 9, "token {token} exceeds the window");
            assert!(token.parse::<u32>().is_ok());
        }
    }

    #[test]
    fn test_tokens_unique_under_concurrency() {
        let generator = Arc::new(TokenGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                thread::spawn(move || (0..5_000).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for token in handle.join().unwrap() {
                assert!(seen.insert(token.clone()), "duplicate token {token}");
            }
        }
        assert_eq!(seen.len(), 40_000);
    }

    #[test]
    fn test_advance_never_reissues_after_rollback() {
        // Clock went backwards: the seed is behind the last issued value.
        assert_eq!(TokenGenerator::advance(5_000, 1_000), 5_001);
        // Normal forward progress takes the seed.
        assert_eq!(TokenGenerator::advance(5_000, 9_000), 9_000);
        // Same millisecond: bump by one.
        assert_eq!(TokenGenerator::advance(9_000, 9_000), 9_001);
    }

    #[test]
    fn test_advance_wraps_at_window_edge() {
        assert_eq!(TokenGenerator::advance(TOKEN_WINDOW - 1, 42), 42);
        assert_eq!(TokenGenerator::advance(TOKEN_WINDOW - 1, TOKEN_WINDOW - 1), 0);
    }
}
