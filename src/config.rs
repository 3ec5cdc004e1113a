//! Tunable limits for the database core.
//!
//! The original implementation scatters these as preprocessor constants
//! across `dbtype_*`; this crate collects them into one record passed to
//! [`crate::database_access::DatabaseAccess::startup`].

/// Bounds enforced while building and rendering property data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of lines a `Document` property may hold.
    pub max_document_lines: usize,
    /// Maximum length, in bytes, of a single `Document` line.
    pub max_document_line_length: usize,
    /// Maximum number of elements a `Set` property may hold.
    pub max_set_size: usize,
    /// Approximate cap, in bytes, on `PropertyDirectory::to_string` output
    /// before it is elided with a trailing `"..."` marker.
    pub max_dump_string_bytes: usize,
    /// Maximum length, in bytes, of an Entity name.
    pub max_name_length: usize,
    /// Maximum length, in bytes, of an application or property path segment.
    pub max_path_segment_length: usize,
    /// Cycle-detection bound when walking a `contained_by` chain to its
    /// root Region.
    pub max_contained_by_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_document_lines: 10_000,
            max_document_line_length: 4096,
            max_set_size: 10_000,
            max_dump_string_bytes: 1024 * 1024,
            max_name_length: 255,
            max_path_segment_length: 255,
            max_contained_by_depth: 256,
        }
    }
}
