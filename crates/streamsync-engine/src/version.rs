//! Emitter versions.
//!
//! Every emitter instance for a stream carries a version. Subscribers are
//! bucketed by the version that served their backfill, so a DOWN from a
//! replaced emitter only clears the subscribers it actually served.

use std::fmt;

/// Tag identifying an emitter instance, or one of two routing sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EmitterVersion {
    /// Bucket of subscribers waiting for their first backfill.
    Pending,
    /// Delivery to every bucket of a stream.
    Broadcast,
    /// A concrete emitter instance.
    Emitter(u64),
}

impl EmitterVersion {
    /// Version of the first emitter a registry creates.
    pub const fn initial() -> Self {
        EmitterVersion::Emitter(0)
    }

    pub const fn pending() -> Self {
        EmitterVersion::Pending
    }

    pub const fn broadcast() -> Self {
        EmitterVersion::Broadcast
    }

    /// The version following this one. Sentinels have no successor.
    pub fn next(self) -> Option<Self> {
        match self {
            EmitterVersion::Emitter(v) => v.checked_add(1).map(EmitterVersion::Emitter),
            _ => None,
        }
    }

    pub fn is_emitter(self) -> bool {
        matches!(self, EmitterVersion::Emitter(_))
    }
}

impl fmt::Display for EmitterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitterVersion::Pending => f.write_str("pending"),
            EmitterVersion::Broadcast => f.write_str("broadcast"),
            EmitterVersion::Emitter(v) => write!(f, "v{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_increments() {
        assert_eq!(EmitterVersion::initial().next(), Some(EmitterVersion::Emitter(1)));
        assert_eq!(EmitterVersion::pending().next(), None);
        assert_eq!(EmitterVersion::broadcast().next(), None);
    }

    #[test]
    fn test_sentinels_are_not_emitters() {
        assert!(EmitterVersion::initial().is_emitter());
        assert!(!EmitterVersion::pending().is_emitter());
        assert_ne!(EmitterVersion::pending(), EmitterVersion::broadcast());
    }

    #[test]
    fn test_display() {
        assert_eq!(EmitterVersion::Emitter(3).to_string(), "v3");
        assert_eq!(EmitterVersion::pending().to_string(), "pending");
    }
}
