//! Protocol version packing and negotiation.
//!
//! A version is one `u32`: major in the upper 16 bits, minor in the lower 16.
//! Compatibility requires equal majors and a remote minor no newer than ours;
//! minor revisions only ever add optional messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version of the protocol this crate implements.
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion::new(1, 2);

/// Packed protocol version (`major << 16 | minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    /// Combine major and minor into the packed representation.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | minor as u32)
    }

    /// Reinterpret a raw wire value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The packed wire value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Major component (upper 16 bits).
    #[must_use]
    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Minor component (lower 16 bits).
    #[must_use]
    pub const fn minor(self) -> u16 {
        self.0 as u16
    }

    /// Whether a peer at `remote` can interoperate with us.
    ///
    /// True iff the majors are equal and the remote minor is not newer than
    /// ours.
    #[must_use]
    pub const fn accepts(self, remote: Self) -> bool {
        self.major() == remote.major() && remote.minor() <= self.minor()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn combine_then_split(major in any::<u16>(), minor in any::<u16>()) {
            let v = ProtocolVersion::new(major, minor);
            prop_assert_eq!(v.major(), major);
            prop_assert_eq!(v.minor(), minor);
            prop_assert_eq!(ProtocolVersion::from_raw(v.as_raw()), v);
        }

        #[test]
        fn acceptance_rule(
            lmaj in 0u16..4, lmin in 0u16..4,
            rmaj in 0u16..4, rmin in 0u16..4,
        ) {
            let local = ProtocolVersion::new(lmaj, lmin);
            let remote = ProtocolVersion::new(rmaj, rmin);
            prop_assert_eq!(local.accepts(remote), lmaj == rmaj && rmin <= lmin);
        }
    }

    #[test]
    fn same_version_is_compatible() {
        assert!(CURRENT_VERSION.accepts(CURRENT_VERSION));
    }

    #[test]
    fn older_guest_minor_is_compatible() {
        let host = ProtocolVersion::new(1, 2);
        assert!(host.accepts(ProtocolVersion::new(1, 0)));
        assert!(host.accepts(ProtocolVersion::new(1, 2)));
        assert!(!host.accepts(ProtocolVersion::new(1, 3)));
        assert!(!host.accepts(ProtocolVersion::new(2, 0)));
        assert!(!host.accepts(ProtocolVersion::new(0, 2)));
    }
}
