//! Core data types for the slice index and retrieval engine.
//!
//! A `*Location` row maps one canonical document identifier to the exact
//! byte range inside a bulk archive file that holds its payload. Location
//! rows are written only by the offline scanner; the retrieval path treats
//! them as read-only. Descriptive metadata (title, authors, ...) is attached
//! by a separate import and is always optional; its absence never blocks
//! retrieval of the byte payload.

use serde::Serialize;

use crate::sniff::ConcreteFormat;

/// Location of one paper's payload inside a bulk tar archive.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperLocation {
    /// Canonical paper id (normalized, versionless).
    pub paper_id: String,
    /// Archive path relative to the configured papers root.
    pub archive_file: String,
    /// Byte offset of the member's data within the raw tar file.
    pub offset: i64,
    /// Exact byte length of the member's data.
    pub size: i64,
    /// Coarse classification recorded at index time: pdf, gzip, tar, unknown.
    pub payload_kind: String,
    /// Year derived from the archive's directory.
    pub year: i64,
    /// Version suffix found in the tar member name, if any (e.g. "v3").
    /// Bulk archives retain a single version per paper.
    pub latest_version: Option<String>,
}

/// Descriptive metadata attached to a paper row by the metadata import.
/// Every field is independently optional; `None` means "never imported",
/// which is distinct from an imported empty string.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PaperMetadata {
    pub title: Option<String>,
    pub authors: Option<String>,
    pub abstract_text: Option<String>,
    /// Space-separated category labels, e.g. "astro-ph.CO hep-ph".
    pub categories: Option<String>,
    pub doi: Option<String>,
}

/// Location of one patent document inside a bulk USPTO zip archive.
///
/// Offsets are recorded against the *decompressed* inner XML stream, not
/// the zip file itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PatentLocation {
    /// Bare document number, e.g. "11123456" or "D0987654".
    pub patent_id: String,
    /// Archive path relative to the configured patents root.
    pub archive_file: String,
    /// Byte offset within the decompressed inner XML stream.
    pub offset: i64,
    /// Byte length of this patent's XML block.
    pub size: i64,
    /// "grant", "application", or "unknown".
    pub doc_type: String,
    /// Kind code from the publication reference, e.g. "B2", "A1".
    pub kind_code: Option<String>,
    /// Publication year from the publication reference date.
    pub year: Option<i64>,
}

/// Fingerprint of one archive file, written after its contents have been
/// fully indexed. An unchanged hash gates skipping the archive on re-scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveFingerprint {
    pub file_path: String,
    pub content_hash: String,
    pub scanned_at: i64,
}

/// Where a served payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    /// Disk cache hit, no archive I/O.
    Cache,
    /// Sliced directly out of a local archive.
    Archive,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::Cache => "cache",
            SourceTier::Archive => "local",
        }
    }
}

/// Payload returned by a successful retrieval, with its metadata envelope.
#[derive(Debug, Clone)]
pub struct DocumentBytes {
    pub content: Vec<u8>,
    /// Concrete format sniffed from the returned bytes.
    pub format: ConcreteFormat,
    /// Content-type label for the concrete format.
    pub content_type: &'static str,
    pub normalized_id: String,
    pub year: Option<i64>,
    /// Version actually held (papers only).
    pub version: Option<String>,
    /// Kind code (patents only).
    pub kind_code: Option<String>,
    /// "grant" / "application" (patents only).
    pub doc_type: Option<String>,
    pub source: SourceTier,
}

/// The four expected, recoverable request-path outcomes. These are ordinary
/// values, not errors: callers decide how to react per kind. Only a broken
/// index store surfaces as an `anyhow::Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Miss {
    /// Canonical key has no location row. The hint names the archive file
    /// pattern that would be expected to hold this identifier.
    NotIndexed { hint: Option<String> },
    /// Key exists but the requested version is not the one retained.
    VersionNotHeld { requested: String, held: Option<String> },
    /// Key exists but not in the requested payload kind.
    FormatUnavailable { requested: String, held: String },
    /// The archive referenced by the index cannot be read. The document is
    /// known to exist, so this is distinct from a miss.
    ArchiveUnavailable { reason: String },
}

impl Miss {
    /// Stable short name for logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Miss::NotIndexed { .. } => "not_found",
            Miss::VersionNotHeld { .. } => "version_not_found",
            Miss::FormatUnavailable { .. } => "format_unavailable",
            Miss::ArchiveUnavailable { .. } => "archive_unavailable",
        }
    }
}

impl std::fmt::Display for Miss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Miss::NotIndexed { hint: Some(h) } => {
                write!(f, "not found in index (expected archive: {})", h)
            }
            Miss::NotIndexed { hint: None } => write!(f, "not found in index"),
            Miss::VersionNotHeld {
                requested,
                held: Some(v),
            } => {
                write!(f, "version {} not held (archive retains {})", requested, v)
            }
            Miss::VersionNotHeld {
                requested,
                held: None,
            } => {
                write!(f, "version {} not held", requested)
            }
            Miss::FormatUnavailable { requested, held } => {
                write!(f, "not available as {} (indexed as {})", requested, held)
            }
            Miss::ArchiveUnavailable { reason } => write!(f, "archive unavailable: {}", reason),
        }
    }
}

/// Result of one retrieval call.
#[derive(Debug)]
pub enum Outcome {
    Found(DocumentBytes),
    Miss(Miss),
}

/// Outcome counters for one scanner run. `archives_scanned` counts archives
/// whose contents were actually opened; a re-run over unchanged inputs must
/// leave it at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub archives_seen: usize,
    pub archives_scanned: usize,
    pub archives_skipped: usize,
    pub archives_failed: usize,
    pub rows_written: u64,
}

/// Format filter for paper retrieval: a hard constraint, not a preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFilter {
    /// PDF payloads only.
    Pdf,
    /// LaTeX source payloads only (gzip or tar).
    Source,
}

impl FormatFilter {
    pub fn matches(&self, payload_kind: &str) -> bool {
        match self {
            FormatFilter::Pdf => payload_kind == "pdf",
            FormatFilter::Source => payload_kind == "gzip" || payload_kind == "tar",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatFilter::Pdf => "pdf",
            FormatFilter::Source => "source",
        }
    }
}

impl std::str::FromStr for FormatFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(FormatFilter::Pdf),
            "source" => Ok(FormatFilter::Source),
            other => anyhow::bail!("unknown format filter: '{}' (expected pdf or source)", other),
        }
    }
}
