//! Unique token generation for inboxes and request correlation.
//!
//! The generator is injectable through [`TokenSource`]; each
//! [`Client`](crate::Client) owns one instance so no process-wide mutable
//! state is involved. The default [`Nuid`] combines a random prefix chosen at
//! construction with a monotonically increasing sequence.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const PREFIX_LEN: usize = 12;
const SEQUENCE_LEN: usize = 11;

/// Source of unique subject-safe tokens.
pub trait TokenSource: Send + Sync + 'static {
    /// Return a token never returned before by this source.
    fn next_token(&self) -> String;
}

/// Default [`TokenSource`]: random prefix plus base-62 sequence.
///
/// # Examples
///
/// ```
/// use natwire::nuid::{Nuid, TokenSource};
///
/// let nuid = Nuid::new();
/// let first = nuid.next_token();
/// let second = nuid.next_token();
/// assert_ne!(first, second);
/// assert_eq!(first.len(), second.len());
/// ```
#[derive(Debug)]
pub struct Nuid {
    prefix: String,
    sequence: AtomicU64,
}

impl Default for Nuid {
    fn default() -> Self { Self::new() }
}

impl Nuid {
    /// Create a generator with a fresh random prefix.
    #[must_use]
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let prefix = (0..PREFIX_LEN)
            .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
            .collect();
        Self {
            prefix,
            sequence: AtomicU64::new(rng.random_range(0..1_000_000)),
        }
    }
}

impl TokenSource for Nuid {
    fn next_token(&self) -> String {
        let mut value = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut digits = [b'0'; SEQUENCE_LEN];
        for slot in digits.iter_mut().rev() {
            *slot = ALPHABET[usize::try_from(value % 62).unwrap_or_default()];
            value /= 62;
        }
        let mut token = String::with_capacity(PREFIX_LEN + SEQUENCE_LEN);
        token.push_str(&self.prefix);
        token.extend(digits.iter().map(|b| char::from(*b)));
        token
    }
}

impl<F> TokenSource for F
where
    F: Fn() -> String + Send + Sync + 'static,
{
    fn next_token(&self) -> String { self() }
}
