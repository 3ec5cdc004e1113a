//! `Lock`: a boolean predicate evaluated against a requester, used to gate
//! actions like exits and puppet control independently of `Security`.

use crate::id::Id;
use crate::property::data::PropertyData;

/// What a `Lock` checks before `negate` is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockKind {
    /// Passes iff the requester's id is exactly `id`.
    ById(Id),
    /// Passes iff the requester is a (direct) member of the group `id`.
    ByGroup(Id),
    /// Passes iff the requester's property at `path` equals `value`.
    ByProperty { path: String, value: PropertyData },
}

/// A single predicate, optionally negated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    kind: LockKind,
    negate: bool,
}

/// Anything that can answer the questions a `Lock` needs to evaluate,
/// without this module depending on the entity/cache layers directly.
pub trait LockContext {
    fn is_id(&self, requester: &Id, id: &Id) -> bool {
        requester == id
    }
    fn is_member_of_group(&self, requester: &Id, group: &Id) -> bool;
    fn property_of(&self, requester: &Id, path: &str) -> Option<PropertyData>;
}

impl Lock {
    /// Serialize to a tagged byte buffer, matching the dispatch style of
    /// [`crate::property::data::PropertyData::serialize`].
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.kind {
            LockKind::ById(id) => {
                out.push(0);
                out.extend_from_slice(&id.to_bytes());
            }
            LockKind::ByGroup(id) => {
                out.push(1);
                out.extend_from_slice(&id.to_bytes());
            }
            LockKind::ByProperty { path, value } => {
                out.push(2);
                let path_bytes = path.as_bytes();
                out.extend_from_slice(&(path_bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(path_bytes);
                let value_bytes = value.serialize();
                out.extend_from_slice(&(value_bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(&value_bytes);
            }
        }
        out.push(self.negate as u8);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> crate::error::Result<Lock> {
        use crate::error::Error;
        let (&tag, rest) = bytes.split_first().ok_or_else(|| Error::DatabaseError("empty Lock buffer".into()))?;
        let (kind, rest) = match tag {
            0 => {
                let id = Id::from_bytes(&rest[0..8])?;
                (LockKind::ById(id), &rest[8..])
            }
            1 => {
                let id = Id::from_bytes(&rest[0..8])?;
                (LockKind::ByGroup(id), &rest[8..])
            }
            2 => {
                let path_len = u32::from_be_bytes(rest[0..4].try_into().unwrap()) as usize;
                let path = String::from_utf8(rest[4..4 + path_len].to_vec())
                    .map_err(|e| Error::DatabaseError(e.to_string()))?;
                let mut offset = 4 + path_len;
                let value_len = u32::from_be_bytes(rest[offset..offset + 4].try_into().unwrap()) as usize;
                offset += 4;
                let value = PropertyData::deserialize(&rest[offset..offset + value_len])?;
                offset += value_len;
                (LockKind::ByProperty { path, value }, &rest[offset..])
            }
            other => return Err(Error::DatabaseError(format!("unknown Lock tag {other}"))),
        };
        let negate = rest.first().copied().unwrap_or(0) != 0;
        Ok(Lock { kind, negate })
    }

    pub fn by_id(id: Id) -> Self {
        Lock { kind: LockKind::ById(id), negate: false }
    }

    pub fn by_group(id: Id) -> Self {
        Lock { kind: LockKind::ByGroup(id), negate: false }
    }

    pub fn by_property(path: impl Into<String>, value: PropertyData) -> Self {
        Lock { kind: LockKind::ByProperty { path: path.into(), value }, negate: false }
    }

    /// Return a negated copy of this lock.
    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    pub fn kind(&self) -> &LockKind {
        &self.kind
    }

    /// Evaluate the predicate against `requester`, applying negation last.
    pub fn evaluate(&self, requester: &Id, ctx: &dyn LockContext) -> bool {
        let base = match &self.kind {
            LockKind::ById(id) => ctx.is_id(requester, id),
            LockKind::ByGroup(group) => ctx.is_member_of_group(requester, group),
            LockKind::ByProperty { path, value } => {
                ctx.property_of(requester, path).as_ref() == Some(value)
            }
        };
        base != self.negate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeContext {
        groups: HashMap<Id, Vec<Id>>,
        properties: HashMap<Id, HashMap<String, PropertyData>>,
    }

    impl LockContext for FakeContext {
        fn is_member_of_group(&self, requester: &Id, group: &Id) -> bool {
            self.groups.get(group).is_some_and(|members| members.contains(requester))
        }

        fn property_of(&self, requester: &Id, path: &str) -> Option<PropertyData> {
            self.properties.get(requester)?.get(path).cloned()
        }
    }

    #[test]
    fn by_id_matches_exact_id_only() {
        let ctx = FakeContext { groups: HashMap::new(), properties: HashMap::new() };
        let lock = Lock::by_id(Id::new(1, 5));
        assert!(lock.evaluate(&Id::new(1, 5), &ctx));
        assert!(!lock.evaluate(&Id::new(1, 6), &ctx));
    }

    #[test]
    fn negation_flips_the_result() {
        let ctx = FakeContext { groups: HashMap::new(), properties: HashMap::new() };
        let lock = Lock::by_id(Id::new(1, 5)).negated();
        assert!(!lock.evaluate(&Id::new(1, 5), &ctx));
        assert!(lock.evaluate(&Id::new(1, 6), &ctx));
    }

    #[test]
    fn by_group_checks_direct_membership() {
        let mut groups = HashMap::new();
        groups.insert(Id::new(1, 100), vec![Id::new(1, 5)]);
        let ctx = FakeContext { groups, properties: HashMap::new() };
        let lock = Lock::by_group(Id::new(1, 100));
        assert!(lock.evaluate(&Id::new(1, 5), &ctx));
        assert!(!lock.evaluate(&Id::new(1, 6), &ctx));
    }

    #[test]
    fn serialize_roundtrips_every_kind() {
        let locks = vec![
            Lock::by_id(Id::new(1, 5)),
            Lock::by_group(Id::new(1, 9)).negated(),
            Lock::by_property("key", PropertyData::String("gold".into())),
        ];
        for lock in locks {
            let bytes = lock.serialize();
            assert_eq!(Lock::deserialize(&bytes).unwrap(), lock);
        }
    }

    #[test]
    fn by_property_compares_equality() {
        let mut properties = HashMap::new();
        let mut props = HashMap::new();
        props.insert("key".to_string(), PropertyData::String("gold".into()));
        properties.insert(Id::new(1, 5), props);
        let ctx = FakeContext { groups: HashMap::new(), properties };
        let lock = Lock::by_property("key", PropertyData::String("gold".into()));
        assert!(lock.evaluate(&Id::new(1, 5), &ctx));
        assert!(!lock.evaluate(&Id::new(1, 6), &ctx));
    }
}
