//! Arena generation counter.

use std::fmt;

/// Monotonic counter that changes every time the arena's backing store is
/// resized.
///
/// A handle captures the generation current at the moment it was produced.
/// Once the arena grows, the backing store may have been relocated and every
/// handle from an earlier generation must be treated as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u32);

impl Generation {
    /// The generation of a freshly instantiated arena.
    pub const INITIAL: Self = Self(1);

    /// Create a generation from its raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// The generation that follows this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl Default for Generation {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_advances() {
        let g = Generation::INITIAL;
        assert_eq!(g.as_u32(), 1);
        assert_eq!(g.next().as_u32(), 2);
        assert!(g.next() > g);
    }

    #[test]
    fn generation_display() {
        assert_eq!(Generation::new(7).to_string(), "gen7");
    }
}
