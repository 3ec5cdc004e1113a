//! Compact entity identifier.
//!
//! Format: `(site_id, entity_id)`, both `u32`. `(0, 0)` is the sentinel
//! "default"/invalid id; site `0` alone means "use the requester's site"
//! and is resolved at call boundaries (see [`Id::is_site_default`]).

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// A 64-bit compound identifier: `(site_id, entity_id)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Id {
    site_id: u32,
    entity_id: u32,
}

impl Id {
    /// The sentinel default/invalid id: `(0, 0)`.
    pub const DEFAULT: Id = Id { site_id: 0, entity_id: 0 };

    /// Construct an id from its two halves.
    pub const fn new(site_id: u32, entity_id: u32) -> Self {
        Id { site_id, entity_id }
    }

    /// The site half.
    #[inline]
    pub fn site_id(&self) -> u32 {
        self.site_id
    }

    /// The entity half.
    #[inline]
    pub fn entity_id(&self) -> u32 {
        self.entity_id
    }

    /// True iff both halves are zero.
    #[inline]
    pub fn is_default(&self) -> bool {
        self.site_id == 0 && self.entity_id == 0
    }

    /// True iff the site half is zero (and the entity half is not), meaning
    /// "use the requester's site" — resolved by the caller before use.
    #[inline]
    pub fn is_site_default(&self) -> bool {
        self.site_id == 0
    }

    /// Resolve a site-default id against a concrete site, leaving any other
    /// id untouched.
    pub fn resolved_in_site(&self, site_id: u32) -> Id {
        if self.is_site_default() {
            Id::new(site_id, self.entity_id)
        } else {
            *self
        }
    }

    /// Encode as 8 big-endian bytes: site half, then entity half.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0..4].copy_from_slice(&self.site_id.to_be_bytes());
        out[4..8].copy_from_slice(&self.entity_id.to_be_bytes());
        out
    }

    /// Decode from the 8-byte form produced by [`Id::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Id> {
        if bytes.len() != 8 {
            return Err(Error::BadArguments(format!(
                "id must be 8 bytes, got {}",
                bytes.len()
            )));
        }
        let site_id = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let entity_id = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        Ok(Id::new(site_id, entity_id))
    }

    /// Parse the canonical `#<site>-<entity>` form, or the within-site
    /// shorthand `#<entity>` when `default_site` is supplied.
    pub fn parse(s: &str, default_site: Option<u32>) -> Result<Id> {
        let body = s
            .strip_prefix('#')
            .ok_or_else(|| Error::BadArguments(format!("id must start with '#': {s}")))?;

        if let Some((site_part, entity_part)) = body.split_once('-') {
            let site_id: u32 = site_part
                .parse()
                .map_err(|_| Error::BadArguments(format!("bad site id in {s}")))?;
            let entity_id: u32 = entity_part
                .parse()
                .map_err(|_| Error::BadArguments(format!("bad entity id in {s}")))?;
            Ok(Id::new(site_id, entity_id))
        } else {
            let entity_id: u32 = body
                .parse()
                .map_err(|_| Error::BadArguments(format!("bad entity id in {s}")))?;
            let site_id = default_site
                .ok_or_else(|| Error::BadArguments(format!("shorthand id {s} needs a default site")))?;
            Ok(Id::new(site_id, entity_id))
        }
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Id {
    /// Site-major ordering. Multi-entity locks are always acquired in
    /// ascending `Id` order to avoid deadlock.
    fn cmp(&self, other: &Self) -> Ordering {
        self.site_id
            .cmp(&other.site_id)
            .then(self.entity_id.cmp(&other.entity_id))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}-{}", self.site_id, self.entity_id)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}, {})", self.site_id, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_both_zero() {
        assert!(Id::DEFAULT.is_default());
        assert!(Id::new(0, 0).is_default());
        assert!(!Id::new(1, 0).is_default());
    }

    #[test]
    fn site_default_means_use_requester_site() {
        assert!(Id::new(0, 5).is_site_default());
        assert!(!Id::new(1, 5).is_site_default());
        assert_eq!(Id::new(0, 5).resolved_in_site(3), Id::new(3, 5));
        assert_eq!(Id::new(2, 5).resolved_in_site(3), Id::new(2, 5));
    }

    #[test]
    fn ordering_is_site_major() {
        assert!(Id::new(1, 100) < Id::new(2, 1));
        assert!(Id::new(1, 1) < Id::new(1, 2));
    }

    #[test]
    fn display_and_parse_roundtrip() {
        let id = Id::new(1, 42);
        assert_eq!(id.to_string(), "#1-42");
        assert_eq!(Id::parse("#1-42", None).unwrap(), id);
    }

    #[test]
    fn shorthand_parse_needs_default_site() {
        assert!(Id::parse("#42", None).is_err());
        assert_eq!(Id::parse("#42", Some(1)).unwrap(), Id::new(1, 42));
    }

    #[test]
    fn parse_rejects_missing_hash() {
        assert!(Id::parse("1-42", None).is_err());
    }
}
