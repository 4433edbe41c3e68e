//! # Paperstack
//!
//! An indexed archive-slice retrieval engine for bulk document archives.
//!
//! Paperstack serves individual documents (arXiv papers, USPTO patents) out
//! of very large immutable bulk archives without decompressing or scanning
//! an archive at request time. An offline scanner walks the archives once
//! and records, per document, the exact byte range that holds its payload;
//! the request path is then one index lookup plus one seek+read.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Bulk archives │──▶│   Scanner    │──▶│ Slice index  │
//! │ tar / zip-XML │   │ offline, par.│   │   (SQLite)   │
//! └──────┬───────┘   └──────────────┘   └──────┬───────┘
//!        │                                     │
//!        │ seek+read            lookup (O(1))  │
//!        ▼                                     ▼
//!   ┌─────────────────────────────────────────────┐
//!   │        Retrieval engine (cache → slice)     │
//!   └─────────────────────────────────────────────┘
//! ```
//!
//! The paper and patent pipelines are two instantiations of the same
//! pattern, deliberately not abstracted over each other: they differ in
//! identifier grammar, archive container, and row schema, and share only
//! the cache, pool, and fallback utilities.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`paper_id`] / [`patent_id`] | Identifier normalization |
//! | [`scan_papers`] / [`scan_patents`] | Offline archive scanners |
//! | [`paper_index`] / [`patent_index`] | Slice index query surfaces |
//! | [`retrieve_paper`] / [`retrieve_patent`] | Request-path retrieval |
//! | [`cache`] | Bounded on-disk LRU payload cache |
//! | [`pool`] | Archive handle pool and XML stream cache |
//! | [`import_metadata`] | Descriptive metadata import |
//! | [`db`] / [`migrate`] | Database connection and schema |

pub mod cache;
pub mod config;
pub mod db;
pub mod fallback;
pub mod fingerprint;
pub mod import_metadata;
pub mod migrate;
pub mod models;
pub mod paper_id;
pub mod paper_index;
pub mod patent_id;
pub mod patent_index;
pub mod pool;
pub mod retrieve_paper;
pub mod retrieve_patent;
pub mod scan_papers;
pub mod scan_patents;
pub mod sniff;
pub mod stats;
