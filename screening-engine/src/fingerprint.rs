//! Deterministic cache keys for screening requests
//!
//! Fields are written in a fixed order with length prefixes, then hashed with SHA-256.
//! Two queries that differ only in casing, punctuation, diacritics or alias order
//! share a fingerprint.

use crate::normalizer::Normalizer;
use crate::types::ScreeningQuery;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

struct CanonicalWriter {
    buffer: Vec<u8>,
}

impl CanonicalWriter {
    fn new() -> Self {
        Self { buffer: Vec::with_capacity(128) }
    }

    fn write_str(&mut self, value: &str) {
        self.buffer.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buffer.extend_from_slice(value.as_bytes());
    }

    fn write_opt(&mut self, value: Option<&str>) {
        match value {
            Some(v) => {
                self.buffer.push(1);
                self.write_str(v);
            }
            None => self.buffer.push(0),
        }
    }

    fn write_list<'a>(&mut self, values: impl ExactSizeIterator<Item = &'a str>) {
        self.buffer.extend_from_slice(&(values.len() as u32).to_be_bytes());
        for v in values {
            self.write_str(v);
        }
    }

    fn hex_digest(self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.buffer);
        format!("{:x}", hasher.finalize())
    }
}

fn write_subject(w: &mut CanonicalWriter, query: &ScreeningQuery, normalizer: &Normalizer) {
    w.write_str(query.subject_type().as_str());
    w.write_str(&normalizer.normalize(query.subject_name()).ordered_form());
    w.write_opt(query.date_of_birth().map(|d| d.to_string()).as_deref());
    w.write_opt(query.nationality());

    let aliases: BTreeSet<String> = query
        .aliases()
        .iter()
        .map(|a| normalizer.normalize(a).ordered_form())
        .filter(|a| !a.is_empty())
        .collect();
    w.write_list(aliases.iter().map(String::as_str));
}

/// Identifies the screened subject regardless of request options.
/// Used to invalidate every cached result for one subject.
pub fn subject_fingerprint(query: &ScreeningQuery, normalizer: &Normalizer) -> String {
    let mut w = CanonicalWriter::new();
    write_subject(&mut w, query, normalizer);
    w.hex_digest()
}

/// Cache key for one request: the subject plus the effective source set and threshold
pub fn query_fingerprint(
    query: &ScreeningQuery,
    normalizer: &Normalizer,
    sources: &BTreeSet<String>,
    min_score: f64,
) -> String {
    let mut w = CanonicalWriter::new();
    write_subject(&mut w, query, normalizer);
    w.write_list(sources.iter().map(String::as_str));
    w.write_str(&format!("{:.4}", min_score));
    w.hex_digest()
}
