//! `PropertyData`: a tagged value that can sit at a `PropertyDirectory` leaf.
//!
//! One enum, one `serialize`/`deserialize` pair keyed by a leading
//! discriminant byte, so a single `heed` value column can hold any variant.

use std::fmt;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::id::Id;

/// The discriminant tag used by the serializer and by total ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Variant {
    String = 0,
    Integer = 1,
    Float = 2,
    Boolean = 3,
    Id = 4,
    Document = 5,
    Set = 6,
}

/// A typed property leaf value.
#[derive(Debug, Clone)]
pub enum PropertyData {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Id(Id),
    /// An ordered list of lines, capped by [`Limits::max_document_lines`]
    /// and [`Limits::max_document_line_length`].
    Document(Vec<String>),
    /// A homogeneous collection; the element variant is locked on first
    /// insertion and may never hold `Document` elements.
    Set(Vec<PropertyData>),
}

impl PropertyData {
    pub fn variant(&self) -> Variant {
        match self {
            PropertyData::String(_) => Variant::String,
            PropertyData::Integer(_) => Variant::Integer,
            PropertyData::Float(_) => Variant::Float,
            PropertyData::Boolean(_) => Variant::Boolean,
            PropertyData::Id(_) => Variant::Id,
            PropertyData::Document(_) => Variant::Document,
            PropertyData::Set(_) => Variant::Set,
        }
    }

    /// Build a `Document` from a newline-split string, enforcing the
    /// configured line count and line-length caps.
    pub fn document_from_str(s: &str, limits: &Limits) -> Result<PropertyData> {
        let lines: Vec<String> = s.split('\n').map(|l| l.to_string()).collect();
        if lines.len() > limits.max_document_lines {
            return Err(Error::BadArguments(format!(
                "document has {} lines, max is {}",
                lines.len(),
                limits.max_document_lines
            )));
        }
        for line in &lines {
            if line.len() > limits.max_document_line_length {
                return Err(Error::BadArguments(format!(
                    "document line is {} bytes, max is {}",
                    line.len(),
                    limits.max_document_line_length
                )));
            }
        }
        Ok(PropertyData::Document(lines))
    }

    /// Build an empty `Set`. Elements are locked to the first variant
    /// inserted via [`PropertyData::set_insert`].
    pub fn empty_set() -> PropertyData {
        PropertyData::Set(Vec::new())
    }

    /// Insert `element` into a `Set`, enforcing homogeneity and size.
    /// Errors if `self` is not a `Set`, if `element` is a `Document`
    /// (documents may never nest in a set), if `element`'s variant differs
    /// from the set's locked variant, or if the set is already at
    /// `limits.max_set_size`.
    pub fn set_insert(&mut self, element: PropertyData, limits: &Limits) -> Result<()> {
        let PropertyData::Set(items) = self else {
            return Err(Error::BadEntityType("set_insert called on a non-Set PropertyData".into()));
        };
        if element.variant() == Variant::Document {
            return Err(Error::BadArguments("a Set may not contain a Document".into()));
        }
        if let Some(first) = items.first() {
            if first.variant() != element.variant() {
                return Err(Error::BadArguments(format!(
                    "set is locked to variant {:?}, got {:?}",
                    first.variant(),
                    element.variant()
                )));
            }
        }
        if items.len() >= limits.max_set_size {
            return Err(Error::BadArguments(format!("set already at max size {}", limits.max_set_size)));
        }
        if !items.iter().any(|i| i == &element) {
            items.push(element);
        }
        Ok(())
    }

    /// Parse from a string for the given variant. `Id` and `Set` have no
    /// defined string parse (they are reference-only / structural); `Document`
    /// is parsed with [`PropertyData::document_from_str`] instead, since it
    /// needs `Limits`.
    pub fn set_from_string(variant: Variant, s: &str) -> Result<PropertyData> {
        match variant {
            Variant::String => Ok(PropertyData::String(s.to_string())),
            Variant::Integer => s
                .parse::<i64>()
                .map(PropertyData::Integer)
                .map_err(|_| Error::BadArguments(format!("not an integer: {s}"))),
            Variant::Float => s
                .parse::<f64>()
                .map(PropertyData::Float)
                .map_err(|_| Error::BadArguments(format!("not a float: {s}"))),
            Variant::Boolean => match s.to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" => Ok(PropertyData::Boolean(true)),
                "f" | "false" | "n" | "no" => Ok(PropertyData::Boolean(false)),
                _ => Err(Error::BadArguments(format!("not a boolean: {s}"))),
            },
            Variant::Id => Err(Error::BadArguments("Id properties are not parsed from free text".into())),
            Variant::Document => Err(Error::BadArguments("use document_from_str for Document".into())),
            Variant::Set => Err(Error::BadArguments("Set properties are not parsed from free text".into())),
        }
    }

    /// Full textual rendering.
    pub fn to_display_string(&self) -> String {
        match self {
            PropertyData::String(s) => s.clone(),
            PropertyData::Integer(i) => i.to_string(),
            PropertyData::Float(f) => f.to_string(),
            PropertyData::Boolean(b) => b.to_string(),
            PropertyData::Id(id) => id.to_string(),
            PropertyData::Document(lines) => lines.join("\n"),
            PropertyData::Set(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_display_string()).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }

    /// Truncated rendering, capped at roughly `max_len` bytes (default 60),
    /// with a `"..."` marker when elided.
    pub fn to_short_string(&self, max_len: usize) -> String {
        let full = self.to_display_string();
        if full.len() <= max_len {
            full
        } else {
            let mut cutoff = max_len.min(full.len());
            while cutoff > 0 && !full.is_char_boundary(cutoff) {
                cutoff -= 1;
            }
            let mut truncated = full[..cutoff].to_string();
            truncated.push_str("...");
            truncated
        }
    }

    /// Approximate memory usage in bytes.
    pub fn mem_used(&self) -> usize {
        let base = std::mem::size_of::<PropertyData>();
        base + match self {
            PropertyData::String(s) => s.len(),
            PropertyData::Document(lines) => lines.iter().map(|l| l.len()).sum(),
            PropertyData::Set(items) => items.iter().map(|i| i.mem_used()).sum(),
            _ => 0,
        }
    }

    /// Serialize to a tagged byte buffer: one discriminant byte, then a
    /// variant-specific payload.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.variant() as u8];
        match self {
            PropertyData::String(s) => out.extend_from_slice(s.as_bytes()),
            PropertyData::Integer(i) => out.extend_from_slice(&i.to_be_bytes()),
            PropertyData::Float(f) => out.extend_from_slice(&f.to_be_bytes()),
            PropertyData::Boolean(b) => out.push(*b as u8),
            PropertyData::Id(id) => out.extend_from_slice(&id.to_bytes()),
            PropertyData::Document(lines) => {
                out.extend_from_slice(&(lines.len() as u32).to_be_bytes());
                for line in lines {
                    out.extend_from_slice(&(line.len() as u32).to_be_bytes());
                    out.extend_from_slice(line.as_bytes());
                }
            }
            PropertyData::Set(items) => {
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    let encoded = item.serialize();
                    out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
                    out.extend_from_slice(&encoded);
                }
            }
        }
        out
    }

    /// Inverse of [`PropertyData::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<PropertyData> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::DatabaseError("empty PropertyData buffer".into()))?;
        match tag {
            0 => Ok(PropertyData::String(
                String::from_utf8(rest.to_vec()).map_err(|e| Error::DatabaseError(e.to_string()))?,
            )),
            1 => {
                let arr: [u8; 8] = rest.try_into().map_err(|_| Error::DatabaseError("bad integer payload".into()))?;
                Ok(PropertyData::Integer(i64::from_be_bytes(arr)))
            }
            2 => {
                let arr: [u8; 8] = rest.try_into().map_err(|_| Error::DatabaseError("bad float payload".into()))?;
                Ok(PropertyData::Float(f64::from_be_bytes(arr)))
            }
            3 => Ok(PropertyData::Boolean(rest.first().copied().unwrap_or(0) != 0)),
            4 => Ok(PropertyData::Id(Id::from_bytes(rest)?)),
            5 => {
                let count = read_u32(rest, 0)?;
                let mut lines = Vec::with_capacity(count as usize);
                let mut offset = 4;
                for _ in 0..count {
                    let len = read_u32(rest, offset)? as usize;
                    offset += 4;
                    let line = String::from_utf8(rest[offset..offset + len].to_vec())
                        .map_err(|e| Error::DatabaseError(e.to_string()))?;
                    offset += len;
                    lines.push(line);
                }
                Ok(PropertyData::Document(lines))
            }
            6 => {
                let count = read_u32(rest, 0)?;
                let mut items = Vec::with_capacity(count as usize);
                let mut offset = 4;
                for _ in 0..count {
                    let len = read_u32(rest, offset)? as usize;
                    offset += 4;
                    items.push(PropertyData::deserialize(&rest[offset..offset + len])?);
                    offset += len;
                }
                Ok(PropertyData::Set(items))
            }
            other => Err(Error::DatabaseError(format!("unknown PropertyData tag {other}"))),
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| Error::DatabaseError("truncated PropertyData buffer".into()))
}

impl PartialEq for PropertyData {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for PropertyData {}

impl PartialOrd for PropertyData {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PropertyData {
    /// Total ordering by variant tag first, then payload.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        let tag_order = self.variant().cmp(&other.variant());
        if tag_order != Ordering::Equal {
            return tag_order;
        }
        match (self, other) {
            (PropertyData::String(a), PropertyData::String(b)) => a.cmp(b),
            (PropertyData::Integer(a), PropertyData::Integer(b)) => a.cmp(b),
            (PropertyData::Float(a), PropertyData::Float(b)) => a.total_cmp(b),
            (PropertyData::Boolean(a), PropertyData::Boolean(b)) => a.cmp(b),
            (PropertyData::Id(a), PropertyData::Id(b)) => a.cmp(b),
            (PropertyData::Document(a), PropertyData::Document(b)) => a.cmp(b),
            (PropertyData::Set(a), PropertyData::Set(b)) => a.cmp(b),
            _ => unreachable!("tag_order already distinguished differing variants"),
        }
    }
}

impl fmt::Display for PropertyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_parses_case_insensitively() {
        for s in ["t", "TRUE", "y", "Yes"] {
            assert_eq!(PropertyData::set_from_string(Variant::Boolean, s).unwrap(), PropertyData::Boolean(true));
        }
        for s in ["f", "FALSE", "n", "No"] {
            assert_eq!(PropertyData::set_from_string(Variant::Boolean, s).unwrap(), PropertyData::Boolean(false));
        }
    }

    #[test]
    fn set_locks_variant_on_first_insert() {
        let limits = Limits::default();
        let mut set = PropertyData::empty_set();
        set.set_insert(PropertyData::Integer(1), &limits).unwrap();
        let err = set.set_insert(PropertyData::String("x".into()), &limits).unwrap_err();
        assert!(matches!(err, Error::BadArguments(_)));
    }

    #[test]
    fn set_rejects_document_elements() {
        let limits = Limits::default();
        let mut set = PropertyData::empty_set();
        let err = set
            .set_insert(PropertyData::Document(vec!["a".into()]), &limits)
            .unwrap_err();
        assert!(matches!(err, Error::BadArguments(_)));
    }

    #[test]
    fn serialize_roundtrips_every_variant() {
        let limits = Limits::default();
        let mut set = PropertyData::empty_set();
        set.set_insert(PropertyData::Integer(7), &limits).unwrap();

        let values = vec![
            PropertyData::String("hello".into()),
            PropertyData::Integer(-42),
            PropertyData::Float(3.5),
            PropertyData::Boolean(true),
            PropertyData::Id(Id::new(1, 2)),
            PropertyData::Document(vec!["a".into(), "b".into()]),
            set,
        ];
        for v in values {
            let bytes = v.serialize();
            let back = PropertyData::deserialize(&bytes).unwrap();
            assert_eq!(v, back);
        }
    }

    #[test]
    fn ordering_is_tag_major() {
        assert!(PropertyData::String("z".into()) < PropertyData::Integer(0));
        assert!(PropertyData::Integer(5) < PropertyData::Integer(10));
    }

    #[test]
    fn short_string_truncates_with_marker() {
        let long = PropertyData::String("x".repeat(100));
        let short = long.to_short_string(60);
        assert!(short.ends_with("..."));
        assert_eq!(short.len(), 63);
    }

    #[test]
    fn short_string_truncation_does_not_split_a_multi_byte_char() {
        // Each "é" is 2 bytes, so a 60-byte cutoff lands mid-character;
        // the truncation point must back off to the nearest char boundary.
        let long = PropertyData::String("é".repeat(100));
        let short = long.to_short_string(60);
        assert!(short.ends_with("..."));
        let kept = &short[..short.len() - 3];
        assert!(kept.len() % 2 == 0 && kept.len() <= 60);
        assert!(kept.chars().all(|c| c == 'é'));
    }

    #[test]
    fn document_from_str_enforces_line_cap() {
        let limits = Limits { max_document_lines: 2, ..Limits::default() };
        assert!(PropertyData::document_from_str("a\nb", &limits).is_ok());
        assert!(PropertyData::document_from_str("a\nb\nc", &limits).is_err());
    }
}
