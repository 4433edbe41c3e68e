//! arXiv identifier normalization.
//!
//! Maps every accepted spelling of a paper id (bare modern form, legacy
//! category form with or without a slash, `arXiv:` prefixes, full arxiv.org
//! URLs, trailing version suffixes) onto the single canonical key used by
//! the slice index. Normalization is total: any non-empty input produces a
//! best-effort key; whether a row exists for it is the lookup's problem.

use once_cell::sync::Lazy;
use regex::Regex;

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://(?:export\.)?arxiv\.org/(?:abs|pdf)/(.+?)(?:\.pdf)?(?:\?.*)?$")
        .expect("url regex")
});

static SCHEME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^arxiv:\s*").expect("scheme regex"));

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"v(\d+)$").expect("version regex"));

static MODERN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2})(\d{2})\.\d{4,6}$").expect("modern id regex"));

static LEGACY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z-]+(?:\.[A-Z]{2})?(\d{2})(\d{2})\d{3}$").expect("legacy id regex"));

/// A paper id split into its canonical key and auxiliary version field.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPaperId {
    /// Canonical lookup key, e.g. "2103.06497" or "astro-ph0412561".
    pub key: String,
    /// Version suffix if the input carried one, e.g. "v2". Not part of the
    /// key: bulk archives retain only one version per paper.
    pub version: Option<String>,
}

/// Decompose a raw paper identifier. Never fails; unrecognized inputs pass
/// through trimmed.
pub fn parse(raw: &str) -> ParsedPaperId {
    let mut id = raw.trim().to_string();

    if let Some(caps) = URL_RE.captures(&id) {
        id = caps[1].to_string();
    }

    id = SCHEME_RE.replace(&id, "").into_owned();

    let mut version = None;
    if let Some(m) = VERSION_RE.find(&id) {
        // Only treat vN as a version suffix when something precedes it.
        if m.start() > 0 {
            version = Some(id[m.start()..].to_string());
            id.truncate(m.start());
        }
    }

    // Legacy form: astro-ph/0412561 -> astro-ph0412561. The category prefix
    // stays part of the key.
    if let Some((category, number)) = id.split_once('/') {
        if !category.is_empty() && !number.is_empty() {
            id = format!("{}{}", category, number);
        }
    }

    ParsedPaperId { key: id, version }
}

/// Canonical key only.
pub fn normalize(raw: &str) -> String {
    parse(raw).key
}

/// Parse a tar member name into (canonical key, version). Member names look
/// like "2103.06497v1.pdf", "astro-ph0412561.gz", or carry a directory
/// prefix. Returns `None` when no identifier can be derived.
pub fn parse_member_name(name: &str) -> Option<ParsedPaperId> {
    let base = name.rsplit('/').next().unwrap_or(name);
    let mut stem = base;
    for ext in [".pdf", ".gz", ".tar", ".zip"] {
        if let Some(s) = stem.strip_suffix(ext) {
            stem = s;
        }
    }
    if stem.is_empty() {
        return None;
    }
    Some(parse(stem))
}

/// Derive the bulk-archive naming pattern expected to hold this identifier,
/// from the id's own temporal structure. Used as a hint on lookup misses so
/// a caller knows which archive to fetch out of band.
pub fn expected_archive_pattern(key: &str) -> Option<String> {
    let caps = MODERN_RE
        .captures(key)
        .or_else(|| LEGACY_RE.captures(key))?;
    let yy: i64 = caps[1].parse().ok()?;
    let mm = &caps[2];
    // arXiv started in 1991: 91-99 are 19xx, everything else 20xx.
    let year = if yy >= 91 { 1900 + yy } else { 2000 + yy };
    Some(format!("{}/arXiv_pdf_{:02}{}_*.tar", year, yy, mm))
}
