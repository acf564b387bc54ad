//! Extension-driven handling policy.

use std::path::Path;

/// What the transform stage does with a landed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    /// Copy the landed bytes unchanged; the crawl checksum is the fingerprint.
    PassThrough,
    /// Keep only the content region and fingerprint the result.
    ExtractAndHash,
    /// Unsupported type; the file is skipped.
    Reject,
}

/// One row of the policy table.
#[derive(Debug, Clone, Copy)]
pub struct PolicyRow {
    pub ext: &'static str,
    pub handling: Handling,
    pub content_type: &'static str,
}

/// Supported file types. Anything not listed is rejected.
pub const POLICY: &[PolicyRow] = &[
    PolicyRow {
        ext: "pdf",
        handling: Handling::PassThrough,
        content_type: "application/pdf",
    },
    PolicyRow {
        ext: "html",
        handling: Handling::ExtractAndHash,
        content_type: "text/html",
    },
];

fn lookup(ext: &str) -> Option<&'static PolicyRow> {
    POLICY.iter().find(|row| row.ext == ext)
}

/// Handling for a normalized extension.
pub fn classify(ext: &str) -> Handling {
    lookup(ext).map_or(Handling::Reject, |row| row.handling)
}

/// Content type to store a canonical artifact under, if the type is supported.
pub fn content_type(ext: &str) -> Option<&'static str> {
    lookup(ext).map(|row| row.content_type)
}

/// Lowercased suffix after the last `.` of the file name, without the dot.
/// Empty when the file name has no extension.
pub fn normalize_ext(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}
