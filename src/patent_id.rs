//! Patent identifier decomposition.
//!
//! A patent id is a bare document number with an optional country-code
//! prefix and an optional trailing kind code (one uppercase letter,
//! optionally followed by one digit). Design (`D`), reissue (`RE`) and
//! plant (`PP`) prefixes are letters that belong to the number itself, so
//! the kind-code rule must not consume them.

use once_cell::sync::Lazy;
use regex::Regex;

static KIND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Z]\d?)$").expect("kind regex"));

// What may precede a kind code: a plain number, or a design/reissue/plant
// prefix followed by digits.
static BODY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+|(?:D|RE|PP)\d+)$").expect("body regex"));

/// Split a raw patent id into (bare document number, kind code).
///
/// ```
/// use paperstack::patent_id::parse;
/// assert_eq!(parse("US11123456B2"), ("11123456".into(), Some("B2".into())));
/// assert_eq!(parse("D0987654S"), ("D0987654".into(), Some("S".into())));
/// ```
pub fn parse(raw: &str) -> (String, Option<String>) {
    let mut pid = raw.trim().to_string();

    if pid.len() >= 2 && pid[..2].eq_ignore_ascii_case("us") {
        pid = pid[2..].to_string();
    }

    let mut kind = None;
    if let Some(m) = KIND_RE.find(&pid) {
        let bare = &pid[..m.start()];
        if !bare.is_empty() && BODY_RE.is_match(bare) {
            kind = Some(m.as_str().to_string());
            pid.truncate(m.start());
        }
    }

    (pid, kind)
}

/// Canonical lookup key: the bare document number.
pub fn normalize(raw: &str) -> String {
    parse(raw).0
}
