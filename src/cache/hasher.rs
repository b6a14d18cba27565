//! Content fingerprints.
//!
//! Fingerprints are SHA-256 digests of a source's bytes, rendered as lowercase
//! hex. Content-based rather than mtime-based so they survive `git checkout`
//! (which resets modification times) and CI cache restores.
//!
//! A source that cannot be read gets the [`Fingerprint::absent`] sentinel
//! instead of an error. The planner treats an absent fingerprint as a change,
//! so a missing source forces a rebuild attempt and the renderer reports the
//! real problem.

use super::SourceRef;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

const ABSENT: &str = "absent";

/// Opaque, comparable digest of a source's content.
///
/// Deserializing accepts only a 64-char lowercase hex digest or the absent
/// sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 of `bytes`, as a 64-char hex string.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Sentinel for sources that could not be read. Never equal to a digest.
    pub fn absent() -> Self {
        Self(ABSENT.to_string())
    }

    pub fn is_absent(&self) -> bool {
        self.0 == ABSENT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, enough to tell digests apart in log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

fn is_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl TryFrom<String> for Fingerprint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == ABSENT || is_digest(&value) {
            Ok(Self(value))
        } else {
            Err(format!("invalid fingerprint {value:?}"))
        }
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Where source bytes come from.
///
/// The cache never mutates sources; it only reads them to fingerprint.
pub trait ContentSource: Send + Sync {
    fn read(&self, source: &SourceRef) -> io::Result<Vec<u8>>;
}

/// Sources resolved as paths under a content root directory.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, source: &SourceRef) -> PathBuf {
        self.root.join(source.as_str())
    }
}

impl ContentSource for DirSource {
    fn read(&self, source: &SourceRef) -> io::Result<Vec<u8>> {
        std::fs::read(self.path_of(source))
    }
}

fn fingerprint_source(content: &dyn ContentSource, source: &SourceRef) -> Fingerprint {
    match content.read(source) {
        Ok(bytes) => Fingerprint::of_bytes(&bytes),
        Err(err) => {
            tracing::debug!(source = %source, error = %err, "source unreadable");
            Fingerprint::absent()
        }
    }
}

/// Fingerprints sources through a [`ContentSource`], hashing each source at
/// most once per run.
pub struct Hasher<'a> {
    content: &'a dyn ContentSource,
    memo: HashMap<SourceRef, Fingerprint>,
}

impl<'a> Hasher<'a> {
    pub fn new(content: &'a dyn ContentSource) -> Self {
        Self {
            content,
            memo: HashMap::new(),
        }
    }

    pub fn fingerprint(&mut self, source: &SourceRef) -> Fingerprint {
        if let Some(fp) = self.memo.get(source) {
            return fp.clone();
        }
        let fp = fingerprint_source(self.content, source);
        self.memo.insert(source.clone(), fp.clone());
        fp
    }

    /// Hash every not-yet-seen source in parallel on the current rayon pool.
    pub fn prefetch<'s>(&mut self, sources: impl IntoIterator<Item = &'s SourceRef>) {
        let pending: BTreeSet<&SourceRef> = sources
            .into_iter()
            .filter(|s| !self.memo.contains_key(*s))
            .collect();
        if pending.is_empty() {
            return;
        }
        let content = self.content;
        let computed: Vec<(SourceRef, Fingerprint)> = pending
            .into_par_iter()
            .map(|s| (s.clone(), fingerprint_source(content, s)))
            .collect();
        tracing::debug!(count = computed.len(), "hashed sources");
        self.memo.extend(computed);
    }

    pub fn hashed_count(&self) -> usize {
        self.memo.len()
    }

    /// Hand the memo over, e.g. to record fingerprints after rendering.
    pub fn into_fingerprints(self) -> HashMap<SourceRef, Fingerprint> {
        self.memo
    }
}
