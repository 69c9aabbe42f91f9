use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("invalid escape sequence in segment '{0}'")]
    InvalidEscape(String),

    #[error("segment '{0}' is not valid utf-8 after decoding")]
    InvalidUtf8(String),
}

/// Percent-decodes a single path segment. Unlike [`urlencoding::decode`], a
/// `%` that is not followed by two hex digits is rejected instead of being
/// passed through, so that a malformed request never matches a stored path.
pub fn decode_segment(segment: &str) -> Result<String, SegmentError> {
    let bytes = segment.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let valid = bytes.len() > idx + 2
                && bytes[idx + 1].is_ascii_hexdigit()
                && bytes[idx + 2].is_ascii_hexdigit();
            if !valid {
                return Err(SegmentError::InvalidEscape(segment.to_string()));
            }
            idx += 3;
            continue;
        }
        idx += 1;
    }

    match urlencoding::decode(segment) {
        Ok(decoded) => Ok(decoded.into_owned()),
        Err(_) => Err(SegmentError::InvalidUtf8(segment.to_string())),
    }
}

/// Reports whether `path` holds a `.` or `..` segment, raw or
/// percent-encoded, or a segment that decodes to something containing a
/// separator. The upstream resolves such paths to a different resource than
/// the one the trie was asked about.
pub fn has_traversal(path: &str) -> bool {
    path.split(['/', '\\']).any(|raw| match decode_segment(raw) {
        Ok(segment) => segment == "." || segment == ".." || segment.contains(['/', '\\']),
        Err(_) => false,
    })
}

/// One decoded path segment in a repository namespace.
#[derive(Debug, Default)]
pub struct PathNode {
    /// Only used in log messages.
    name: String,
    children: HashMap<String, PathNode>,
    entry_ids: HashSet<u64>,
}

impl PathNode {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Attaches `entry_id` to the node addressed by `path`, creating missing
    /// nodes on the way. Empty segments are ignored, so `a//b` and `/a/b/`
    /// resolve to the same node. A path with an undecodable segment is
    /// skipped as a whole.
    pub fn insert(&mut self, path: &str, entry_id: u64) {
        let mut segments = Vec::new();
        for raw in path.split('/').filter(|s| !s.is_empty()) {
            match decode_segment(raw) {
                Ok(segment) => segments.push(segment),
                Err(e) => {
                    warn!("Skip invalid path '{path}' for entry {entry_id}: {e}");
                    return;
                }
            }
        }

        let mut node = self;
        for segment in segments {
            node = node
                .children
                .entry(segment)
                .or_insert_with_key(|name| PathNode::new(name));
        }
        node.entry_ids.insert(entry_id);
    }

    /// Collects the entry ids declared along the longest stored prefix of
    /// `path`. Ids declared at an ancestor apply to every descendant, so the
    /// walk keeps accumulating until the path or the tree runs out.
    ///
    /// Returns `None` when a segment cannot be decoded.
    pub fn lookup(&self, path: &str) -> Option<HashSet<u64>> {
        let mut node = self;
        let mut ids = HashSet::new();
        for raw in path.split('/') {
            let segment = match decode_segment(raw) {
                Ok(segment) => segment,
                Err(e) => {
                    debug!("Lookup aborted on '{path}': {e}");
                    return None;
                }
            };

            if node.children.is_empty() {
                break;
            }

            let child = match node.children.get(&segment) {
                Some(child) => child,
                None => {
                    debug!("Segment '{segment}' not found under '{}'", node.name);
                    break;
                }
            };
            ids.extend(child.entry_ids.iter().copied());
            node = child;
        }

        Some(ids)
    }
}
