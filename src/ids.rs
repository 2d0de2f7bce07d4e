use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Opaque participant identifier. Allocated once on connect, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
impl ParticipantId {
    pub fn for_test(n: u64) -> Self {
        ParticipantId(n)
    }
}

/// Hands out monotonically increasing ids, shared across connections.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    pub fn next(&self) -> ParticipantId {
        ParticipantId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// `fm` followed by 4-5 decimal digits, e.g. `fm4821`, `fm73940`.
pub fn generate_label() -> String {
    let n: u32 = rand::thread_rng().gen_range(1000..100_000);
    format!("fm{}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_never_reused() {
        let alloc = IdAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        let c = alloc.next();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn labels_have_the_fm_prefix_and_4_to_5_digits() {
        for _ in 0..200 {
            let label = generate_label();
            assert!(label.starts_with("fm"));
            let digits = &label[2..];
            assert!(digits.len() == 4 || digits.len() == 5, "unexpected label {}", label);
            assert!(digits.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
