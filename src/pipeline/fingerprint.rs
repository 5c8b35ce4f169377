//! Codebase fingerprinting for external-artifact staleness checks.
//!
//! An artifact imported via `implement --from-spec` claims to describe a
//! codebase as it stood at capture time. Before admitting it, the pipeline
//! controller recomputes this fingerprint over the current tree and compares
//! it against the one recorded alongside the artifact.

use crate::state::hash_bytes;

/// Digest over an ordered file listing: each entry contributes its relative
/// path and content hash, so renames, additions, removals, and content edits
/// all change the result. Order matters — callers must pass paths sorted the
/// same way on both sides of a comparison, typically via a stable directory
/// walk.
pub fn fingerprint(files: &[(String, Vec<u8>)]) -> String {
    let mut sorted: Vec<&(String, Vec<u8>)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut buf = Vec::new();
    for (path, contents) in sorted {
        buf.extend_from_slice(path.as_bytes());
        buf.push(0);
        buf.extend_from_slice(hash_bytes(contents).as_bytes());
        buf.push(0);
    }
    hash_bytes(&buf)
}
