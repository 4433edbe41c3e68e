//! Magic-byte format detection.
//!
//! The scanner records a coarse payload kind per document at index time;
//! the retrieval engine re-sniffs the returned bytes to pick the concrete
//! content-type label. Both go through [`classify`].

/// Concrete format of a byte payload, determined from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcreteFormat {
    Pdf,
    Gzip,
    Tar,
    Xml,
    Unknown,
}

impl ConcreteFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ConcreteFormat::Pdf => "application/pdf",
            ConcreteFormat::Gzip => "application/gzip",
            ConcreteFormat::Tar => "application/x-tar",
            ConcreteFormat::Xml => "application/xml",
            ConcreteFormat::Unknown => "application/octet-stream",
        }
    }

    /// File extension for saved payloads.
    pub fn extension(&self) -> &'static str {
        match self {
            ConcreteFormat::Pdf => "pdf",
            ConcreteFormat::Gzip => "gz",
            ConcreteFormat::Tar => "tar",
            ConcreteFormat::Xml => "xml",
            ConcreteFormat::Unknown => "bin",
        }
    }

    /// Coarse kind string stored in the index.
    pub fn payload_kind(&self) -> &'static str {
        match self {
            ConcreteFormat::Pdf => "pdf",
            ConcreteFormat::Gzip => "gzip",
            ConcreteFormat::Tar => "tar",
            ConcreteFormat::Xml => "xml",
            ConcreteFormat::Unknown => "unknown",
        }
    }
}

/// Classify a payload from its leading bytes. Tar detection needs the
/// "ustar" magic at offset 257, so callers should pass at least the first
/// 262 bytes when available; shorter slices degrade gracefully.
pub fn classify(bytes: &[u8]) -> ConcreteFormat {
    if bytes.starts_with(b"%PDF") {
        return ConcreteFormat::Pdf;
    }
    if bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        return ConcreteFormat::Gzip;
    }
    if bytes.len() >= 262 && &bytes[257..262] == b"ustar" {
        return ConcreteFormat::Tar;
    }
    if bytes.starts_with(b"<?xml") {
        return ConcreteFormat::Xml;
    }
    ConcreteFormat::Unknown
}

/// Classify a tar member for the index, preferring magic bytes and falling
/// back to the member name's extension when the leading bytes are ambiguous.
pub fn classify_member(name: &str, leading: &[u8]) -> &'static str {
    let sniffed = classify(leading);
    if sniffed != ConcreteFormat::Unknown {
        return sniffed.payload_kind();
    }
    if name.ends_with(".pdf") {
        "pdf"
    } else if name.ends_with(".gz") {
        "gzip"
    } else if name.ends_with(".tar") {
        "tar"
    } else {
        "unknown"
    }
}
