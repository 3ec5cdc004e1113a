//! `PropertyDirectory`: a recursive ordered map forming the property tree.
//!
//! Paths are `/`-separated; a leading or doubled separator is tolerated by
//! simply discarding empty path components, so `"//foo//bar"` and
//! `"/foo/bar"` normalize to the same two-component path.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::property::data::PropertyData;

#[derive(Clone, Debug)]
struct Entry {
    value: Option<PropertyData>,
    subdir: Option<Box<PropertyDirectory>>,
}

impl Entry {
    fn empty() -> Self {
        Entry { value: None, subdir: None }
    }

    fn is_empty(&self) -> bool {
        self.value.is_none() && self.subdir.is_none()
    }
}

/// A recursive ordered map: path component → `(optional value, optional
/// child directory)`.
#[derive(Clone, Debug)]
pub struct PropertyDirectory {
    entries: BTreeMap<String, Entry>,
    /// Name of the last segment looked up at this level — a hint, not a
    /// correctness requirement; mirrors the original's single-entry cache of
    /// the last accessed child.
    last_access: RefCell<Option<String>>,
}

fn normalize(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

impl PropertyDirectory {
    pub fn new() -> Self {
        PropertyDirectory { entries: BTreeMap::new(), last_access: RefCell::new(None) }
    }

    fn touch_cache(&self, name: &str) {
        *self.last_access.borrow_mut() = Some(name.to_string());
    }

    /// Fetch the value at `path`, or `None` if no value is set there.
    pub fn get(&self, path: &str) -> Option<PropertyData> {
        let segments = normalize(path);
        self.get_segments(&segments)
    }

    fn get_segments(&self, segments: &[String]) -> Option<PropertyData> {
        let (head, rest) = segments.split_first()?;
        let entry = self.entries.get(head)?;
        self.touch_cache(head);
        if rest.is_empty() {
            entry.value.clone()
        } else {
            entry.subdir.as_ref()?.get_segments(rest)
        }
    }

    /// Set the value at `path`, creating intermediate directories as needed.
    pub fn set(&mut self, path: &str, value: PropertyData) -> Result<()> {
        let segments = normalize(path);
        if segments.is_empty() {
            return Err(Error::BadArguments("property path has no segments".into()));
        }
        self.set_segments(&segments, value);
        Ok(())
    }

    fn set_segments(&mut self, segments: &[String], value: PropertyData) {
        let (head, rest) = segments.split_first().expect("non-empty by construction");
        self.touch_cache(head);
        let entry = self.entries.entry(head.clone()).or_insert_with(Entry::empty);
        if rest.is_empty() {
            entry.value = Some(value);
        } else {
            let subdir = entry.subdir.get_or_insert_with(|| Box::new(PropertyDirectory::new()));
            subdir.set_segments(rest, value);
        }
    }

    /// Remove the value at `path`, leaving any child directory intact. If
    /// the entry then has neither a value nor a subdirectory, the entry
    /// itself is removed.
    pub fn delete_value(&mut self, path: &str) -> bool {
        let segments = normalize(path);
        self.delete_value_segments(&segments)
    }

    fn delete_value_segments(&mut self, segments: &[String]) -> bool {
        let Some((head, rest)) = segments.split_first() else { return false };
        let Some(entry) = self.entries.get_mut(head) else { return false };
        let removed = if rest.is_empty() {
            let had = entry.value.take().is_some();
            had
        } else {
            match entry.subdir.as_deref_mut() {
                Some(subdir) => subdir.delete_value_segments(rest),
                None => false,
            }
        };
        if self.entries.get(head).is_some_and(Entry::is_empty) {
            self.entries.remove(head);
        }
        removed
    }

    /// Remove the subdirectory rooted at `path`, and everything under it.
    /// If the entry then has no value, the entry itself is removed.
    pub fn delete_dir(&mut self, path: &str) -> bool {
        let segments = normalize(path);
        self.delete_dir_segments(&segments)
    }

    fn delete_dir_segments(&mut self, segments: &[String]) -> bool {
        let Some((head, rest)) = segments.split_first() else { return false };
        let Some(entry) = self.entries.get_mut(head) else { return false };
        let removed = if rest.is_empty() {
            entry.subdir.take().is_some()
        } else {
            match entry.subdir.as_deref_mut() {
                Some(subdir) => subdir.delete_dir_segments(rest),
                None => false,
            }
        };
        if self.entries.get(head).is_some_and(Entry::is_empty) {
            self.entries.remove(head);
        }
        removed
    }

    /// Remove everything at and under `path` — both value and subdirectory.
    pub fn delete(&mut self, path: &str) -> bool {
        let had_value = self.delete_value(path);
        let had_dir = self.delete_dir(path);
        had_value || had_dir
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        *self.last_access.borrow_mut() = None;
    }

    /// The directory node at `path`, if it exists (used internally and by
    /// next/previous/first/last helpers).
    fn subdir_at(&self, path: &str) -> Option<&PropertyDirectory> {
        let segments = normalize(path);
        self.subdir_at_segments(&segments)
    }

    fn subdir_at_segments(&self, segments: &[String]) -> Option<&PropertyDirectory> {
        match segments.split_first() {
            None => Some(self),
            Some((head, rest)) => {
                let entry = self.entries.get(head)?;
                let subdir = entry.subdir.as_deref()?;
                subdir.subdir_at_segments(rest)
            }
        }
    }

    /// The first entry (by ordered key) directly under `dir_path`.
    pub fn first(&self, dir_path: &str) -> Option<(String, Option<PropertyData>)> {
        let dir = self.subdir_at(dir_path)?;
        dir.entries.iter().next().map(|(k, e)| (k.clone(), e.value.clone()))
    }

    /// The last entry (by ordered key) directly under `dir_path`.
    pub fn last(&self, dir_path: &str) -> Option<(String, Option<PropertyData>)> {
        let dir = self.subdir_at(dir_path)?;
        dir.entries.iter().next_back().map(|(k, e)| (k.clone(), e.value.clone()))
    }

    /// The sibling entry immediately after `path`'s leaf segment, within
    /// the same parent directory. `None` at the end of the map.
    pub fn next(&self, path: &str) -> Option<(String, Option<PropertyData>)> {
        let segments = normalize(path);
        let (last, parent_segments) = segments.split_last()?;
        let parent = self.subdir_at_segments(parent_segments)?;
        self.touch_cache(last);
        parent
            .entries
            .range((std::ops::Bound::Excluded(last.clone()), std::ops::Bound::Unbounded))
            .next()
            .map(|(k, e)| (k.clone(), e.value.clone()))
    }

    /// The sibling entry immediately before `path`'s leaf segment.
    pub fn previous(&self, path: &str) -> Option<(String, Option<PropertyData>)> {
        let segments = normalize(path);
        let (last, parent_segments) = segments.split_last()?;
        let parent = self.subdir_at_segments(parent_segments)?;
        self.touch_cache(last);
        parent
            .entries
            .range((std::ops::Bound::Unbounded, std::ops::Bound::Excluded(last.clone())))
            .next_back()
            .map(|(k, e)| (k.clone(), e.value.clone()))
    }

    /// A breadth-limited recursive listing, capped at
    /// `limits.max_dump_string_bytes`; excess is elided with `"..."`.
    pub fn to_string_display(&self, limits: &Limits) -> String {
        let mut out = String::new();
        self.write_display(&mut out, 0, limits);
        out
    }

    fn write_display(&self, out: &mut String, depth: usize, limits: &Limits) {
        let indent = "  ".repeat(depth);
        for (name, entry) in &self.entries {
            if out.len() >= limits.max_dump_string_bytes {
                out.push_str("...");
                return;
            }
            match &entry.value {
                Some(v) => out.push_str(&format!("{indent}{name} = {}\n", v.to_display_string())),
                None => out.push_str(&format!("{indent}{name}\n")),
            }
            if let Some(subdir) = &entry.subdir {
                subdir.write_display(out, depth + 1, limits);
            }
        }
    }

    /// Iterate `(full_path, value)` pairs for every leaf that holds a
    /// value, depth-first in key order. Used by the dump exporter and by
    /// tests.
    pub fn iter_values(&self) -> Vec<(String, PropertyData)> {
        let mut out = Vec::new();
        self.collect_values(String::new(), &mut out);
        out
    }

    fn collect_values(&self, prefix: String, out: &mut Vec<(String, PropertyData)>) {
        for (name, entry) in &self.entries {
            let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}/{name}") };
            if let Some(v) = &entry.value {
                out.push((path.clone(), v.clone()));
            }
            if let Some(subdir) = &entry.subdir {
                subdir.collect_values(path, out);
            }
        }
    }
}

impl Default for PropertyDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_and_leading_separators_normalize() {
        let mut dir = PropertyDirectory::new();
        dir.set("/foo/bar", PropertyData::Integer(1)).unwrap();
        assert_eq!(dir.get("//foo//bar"), Some(PropertyData::Integer(1)));
    }

    #[test]
    fn set_creates_intermediate_directories() {
        let mut dir = PropertyDirectory::new();
        dir.set("a/b/c", PropertyData::Boolean(true)).unwrap();
        assert_eq!(dir.get("a/b/c"), Some(PropertyData::Boolean(true)));
        assert_eq!(dir.get("a/b"), None);
    }

    #[test]
    fn delete_value_removes_empty_entry() {
        let mut dir = PropertyDirectory::new();
        dir.set("a", PropertyData::Integer(1)).unwrap();
        assert!(dir.delete_value("a"));
        assert_eq!(dir.get("a"), None);
        assert!(dir.entries.is_empty());
    }

    #[test]
    fn delete_value_keeps_entry_with_subdir() {
        let mut dir = PropertyDirectory::new();
        dir.set("a", PropertyData::Integer(1)).unwrap();
        dir.set("a/b", PropertyData::Integer(2)).unwrap();
        assert!(dir.delete_value("a"));
        assert_eq!(dir.get("a"), None);
        assert_eq!(dir.get("a/b"), Some(PropertyData::Integer(2)));
    }

    #[test]
    fn delete_dir_removes_subtree() {
        let mut dir = PropertyDirectory::new();
        dir.set("a/b", PropertyData::Integer(2)).unwrap();
        assert!(dir.delete_dir("a"));
        assert_eq!(dir.get("a/b"), None);
    }

    #[test]
    fn first_last_next_previous() {
        let mut dir = PropertyDirectory::new();
        dir.set("alpha", PropertyData::Integer(1)).unwrap();
        dir.set("beta", PropertyData::Integer(2)).unwrap();
        dir.set("gamma", PropertyData::Integer(3)).unwrap();

        assert_eq!(dir.first("").unwrap().0, "alpha");
        assert_eq!(dir.last("").unwrap().0, "gamma");
        assert_eq!(dir.next("alpha").unwrap().0, "beta");
        assert_eq!(dir.previous("gamma").unwrap().0, "beta");
        assert!(dir.next("gamma").is_none());
        assert!(dir.previous("alpha").is_none());
    }

    #[test]
    fn iter_values_is_depth_first_in_key_order() {
        let mut dir = PropertyDirectory::new();
        dir.set("b", PropertyData::Integer(2)).unwrap();
        dir.set("a/x", PropertyData::Integer(1)).unwrap();
        let values = dir.iter_values();
        let paths: Vec<_> = values.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["a/x", "b"]);
    }
}
