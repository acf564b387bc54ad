//! Core domain types for decision records.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw records (crawler output)
// ---------------------------------------------------------------------------

/// A source file attached to a raw decision, as landed by the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFile {
    /// Location of the file in the blob store's landing area.
    pub path: String,
    /// Content hash computed at crawl time.
    pub checksum: String,
}

/// A decision as scraped from the registry, one per decision per partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDecisionRecord {
    /// Decision identifier (e.g. `ADJ-00012345`).
    #[serde(alias = "_id")]
    pub id: String,
    /// Partition key this record was crawled under.
    pub partition_date: String,
    /// Registry page for the decision.
    pub link: String,
    /// Decision date as published (free-form).
    pub date: String,
    /// Reference number, if published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_no: Option<String>,
    /// Parties description, if published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parties: Option<String>,
    /// Attachments in the order the crawler listed them.
    #[serde(default)]
    pub files: Vec<RawFile>,
}

// ---------------------------------------------------------------------------
// Transformed records
// ---------------------------------------------------------------------------

/// The canonical record for a decision within a partition.
///
/// Keyed by `(id, partition_date)`; the transform stage upserts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformedDecisionRecord {
    pub id: String,
    pub partition_date: String,
    pub link: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parties: Option<String>,
    /// Canonical blob key of the stored artifact.
    pub file_path: String,
    /// Hex-encoded fingerprint of the stored artifact.
    pub file_hash: String,
    /// Normalized lowercase extension.
    pub file_ext: String,
}

impl TransformedDecisionRecord {
    /// Build a transformed record from its raw source and the produced artifact.
    pub fn from_raw(
        raw: &RawDecisionRecord,
        id: &str,
        file_path: String,
        file_hash: String,
        file_ext: String,
    ) -> Self {
        Self {
            id: id.to_string(),
            partition_date: raw.partition_date.clone(),
            link: raw.link.clone(),
            date: raw.date.clone(),
            ref_no: raw.ref_no.clone(),
            parties: raw.parties.clone(),
            file_path,
            file_hash,
            file_ext,
        }
    }
}
