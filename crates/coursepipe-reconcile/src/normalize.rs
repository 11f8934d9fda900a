//! Key normalization and candidate generation.
//!
//! Recorded storage keys have accumulated several encodings over time: full
//! public URLs pasted into the column, proxy path prefixes leaked by the
//! storage CDN, and keys written with a redundant leading bucket name. The
//! audit reduces each recorded value to a canonical key, then derives the
//! ordered list of `(bucket, key)` pairs where the bytes could plausibly live.

use coursepipe_storage::ObjectLocation;

/// Reduce a recorded key to its canonical object key.
///
/// Strips, in order: surrounding whitespace, a `scheme://host` prefix when a
/// full URL leaked into the field, a leading slash, and any known proxy path
/// prefix.
pub fn normalize_key(raw: &str, proxy_prefixes: &[String]) -> String {
    let mut key = raw.trim();

    if let Some(scheme_end) = key.find("://") {
        let after_scheme = &key[scheme_end + 3..];
        key = match after_scheme.find('/') {
            Some(host_end) => &after_scheme[host_end + 1..],
            None => "",
        };
    }

    key = key.trim_start_matches('/');

    for prefix in proxy_prefixes {
        if let Some(rest) = key.strip_prefix(prefix.as_str()) {
            key = rest.trim_start_matches('/');
            break;
        }
    }

    key.to_string()
}

/// Remove a redundant `{bucket}/` prefix from a key, if present.
pub fn strip_bucket_prefix(key: &str, bucket: &str) -> Option<String> {
    key.strip_prefix(bucket)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// Leading path segment of a key, if it has more than one segment.
fn leading_segment(key: &str) -> Option<(&str, &str)> {
    let (head, rest) = key.split_once('/')?;
    if head.is_empty() || rest.is_empty() {
        return None;
    }
    Some((head, rest))
}

/// Where a candidate location came from; classification depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Same bucket, key with a redundant self-bucket prefix removed.
    StrippedSelfPrefix,
    /// Same bucket, the normalized key as-is.
    Normalized,
    /// A different known bucket named by the key's leading segment.
    AlternateBucket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub location: ObjectLocation,
}

/// Ordered candidate `(bucket, key)` pairs for one recorded value.
///
/// Order encodes preference: a self-prefix-stripped hit wins over a raw hit,
/// which wins over an alternate-bucket hit.
pub fn candidates(bucket: &str, normalized_key: &str, known_buckets: &[String]) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(3);

    if let Some(stripped) = strip_bucket_prefix(normalized_key, bucket) {
        out.push(Candidate {
            kind: CandidateKind::StrippedSelfPrefix,
            location: ObjectLocation::new(bucket, stripped),
        });
    }

    if !normalized_key.is_empty() {
        out.push(Candidate {
            kind: CandidateKind::Normalized,
            location: ObjectLocation::new(bucket, normalized_key),
        });
    }

    if let Some((head, rest)) = leading_segment(normalized_key) {
        if head != bucket && known_buckets.iter().any(|b| b == head) {
            out.push(Candidate {
                kind: CandidateKind::AlternateBucket,
                location: ObjectLocation::new(head, rest),
            });
        }
    }

    out
}
