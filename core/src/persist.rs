//! Artifact layout and wire format.
//!
//! ```text
//! manifest.json                      Manifest (JSON)
//! index/shard-NNN-<hash>.bin         ShardIndex (bincode, varint, deltas)
//! filter/<key>.bin                   FilterIndex (bincode, varint)
//! fragment/<id>.json                 Fragment (JSON)
//! ```
//!
//! Shards and filters refer to documents by number: the position of the document in
//! `Manifest::documents`, which is sorted by id.

use bincode::Options;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::DecodeError;

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST_PATH: &str = "manifest.json";
/// How words map to shards; recorded in the manifest for loaders.
pub const SHARD_HASH: &str = "sha1-be32-mod";

const MAX_ESCAPED_LEN: usize = 180;

/// A named, immutable output file. Where it ends up is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    relative_path: String,
    bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(relative_path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { relative_path: relative_path.into(), bytes }
    }

    pub fn relative_path(&self) -> &str { &self.relative_path }

    pub fn bytes(&self) -> &[u8] { &self.bytes }

    pub fn into_parts(self) -> (String, Vec<u8>) { (self.relative_path, self.bytes) }
}

pub struct ArtifactPaths;

impl ArtifactPaths {
    pub fn manifest() -> &'static str { MANIFEST_PATH }

    /// Shard files are named by number and content, so unchanged shards keep their names.
    pub fn shard(number: u32, bytes: &[u8]) -> String {
        format!("index/shard-{number:03}-{}.bin", &hex_digest(bytes)[..12])
    }

    pub fn filter(key: &str) -> String { format!("filter/{}.bin", escape_component(key)) }

    pub fn fragment(document_id: &str) -> String {
        format!("fragment/{}.json", escape_component(document_id))
    }
}

/// Percent-encodes everything outside `[A-Za-z0-9._~-]`. Very long names are cut and
/// suffixed with a digest of the full value to stay within filename limits.
pub fn escape_component(value: &str) -> String {
    let escaped = urlencoding::encode(value).into_owned();
    if escaped.len() <= MAX_ESCAPED_LEN {
        return escaped;
    }
    // never cut inside a %XX triplet
    let mut cut = MAX_ESCAPED_LEN - 20;
    while escaped[..cut].ends_with('%') || escaped[..cut - 1].ends_with('%') {
        cut -= 1;
    }
    format!("{}~{}", &escaped[..cut], &hex_digest(value.as_bytes())[..16])
}

pub fn hex_digest(bytes: &[u8]) -> String { format!("{:x}", Sha1::digest(bytes)) }

/// Shard a word belongs to: first four bytes of its SHA-1, big endian, modulo the count.
pub fn shard_for(word: &str, shard_count: u32) -> u32 {
    let digest = Sha1::digest(word.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % shard_count.max(1)
}

fn codec() -> impl Options { bincode::DefaultOptions::new() }

fn malformed(artifact: &'static str, err: impl std::fmt::Display) -> DecodeError {
    DecodeError::Malformed { artifact, message: err.to_string() }
}

fn check_version(artifact: &'static str, found: u32) -> Result<(), DecodeError> {
    if found == FORMAT_VERSION {
        Ok(())
    } else {
        Err(DecodeError::Version { artifact, found, expected: FORMAT_VERSION })
    }
}

/// One word's occurrences in one document, with absolute values.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardPosting {
    pub document: u32,
    pub weight: f32,
    pub positions: Vec<u32>,
}

/// Decoded contents of one shard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardIndex {
    pub shard: u32,
    pub shard_count: u32,
    /// Postings are sorted by document number.
    pub words: BTreeMap<String, Vec<ShardPosting>>,
}

#[derive(Serialize, Deserialize)]
struct ShardFile {
    version: u32,
    shard: u32,
    shard_count: u32,
    words: Vec<EncodedWord>,
}

#[derive(Serialize, Deserialize)]
struct EncodedWord {
    word: String,
    postings: Vec<EncodedPosting>,
}

#[derive(Serialize, Deserialize)]
struct EncodedPosting {
    document_delta: u32,
    weight: f32,
    position_deltas: Vec<u32>,
}

fn deltas(values: &[u32]) -> Vec<u32> {
    let mut prev = 0;
    values
        .iter()
        .map(|v| {
            let d = v - prev;
            prev = *v;
            d
        })
        .collect()
}

fn undeltas(deltas: &[u32]) -> Option<Vec<u32>> {
    let mut acc = 0u32;
    deltas
        .iter()
        .map(|d| {
            acc = acc.checked_add(*d)?;
            Some(acc)
        })
        .collect()
}

impl ShardIndex {
    pub fn new(shard: u32, shard_count: u32) -> Self {
        Self { shard, shard_count, words: BTreeMap::new() }
    }

    pub fn get(&self, word: &str) -> Option<&[ShardPosting]> {
        self.words.get(word).map(Vec::as_slice)
    }

    /// Postings must be sorted by document and positions strictly increasing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        let words = self
            .words
            .iter()
            .map(|(word, postings)| {
                let documents: Vec<u32> = postings.iter().map(|p| p.document).collect();
                let postings = postings
                    .iter()
                    .zip(deltas(&documents))
                    .map(|(p, document_delta)| EncodedPosting {
                        document_delta,
                        weight: p.weight,
                        position_deltas: deltas(&p.positions),
                    })
                    .collect();
                EncodedWord { word: word.clone(), postings }
            })
            .collect();
        let file = ShardFile {
            version: FORMAT_VERSION,
            shard: self.shard,
            shard_count: self.shard_count,
            words,
        };
        codec().serialize(&file)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let file: ShardFile = codec().deserialize(bytes).map_err(|e| malformed("shard", e))?;
        check_version("shard", file.version)?;
        let mut words = BTreeMap::new();
        for encoded in file.words {
            let mut document = 0u32;
            let mut postings = Vec::with_capacity(encoded.postings.len());
            for p in encoded.postings {
                document = document
                    .checked_add(p.document_delta)
                    .ok_or_else(|| malformed("shard", "document overflow"))?;
                let positions = undeltas(&p.position_deltas)
                    .ok_or_else(|| malformed("shard", "position overflow"))?;
                postings.push(ShardPosting { document, weight: p.weight, positions });
            }
            words.insert(encoded.word, postings);
        }
        Ok(Self { shard: file.shard, shard_count: file.shard_count, words })
    }
}

/// Filter values of one key and the documents carrying each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterIndex {
    pub version: u32,
    pub key: String,
    pub values: BTreeMap<String, Vec<u32>>,
}

impl FilterIndex {
    pub fn new(key: impl Into<String>) -> Self {
        Self { version: FORMAT_VERSION, key: key.into(), values: BTreeMap::new() }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> { codec().serialize(self) }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let filter: Self = codec().deserialize(bytes).map_err(|e| malformed("filter", e))?;
        check_version("filter", filter.version)?;
        Ok(filter)
    }
}

/// Per-document data shown in results: excerpt, content, filters and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub word_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl Fragment {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> { serde_json::to_vec(self) }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| malformed("fragment", e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub number: u32,
    pub path: String,
    pub words: usize,
    pub bytes: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub over_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterEntry {
    pub key: String,
    pub path: String,
    pub values: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub number: u32,
    pub id: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub generator: String,
    pub shard_count: u32,
    pub shard_hash: String,
    pub document_count: usize,
    pub word_count: usize,
    /// SHA-1 over every other artifact, in output order.
    pub corpus_hash: String,
    pub shards: Vec<ShardEntry>,
    pub filters: Vec<FilterEntry>,
    pub documents: Vec<DocumentEntry>,
}

impl Manifest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> { serde_json::to_vec_pretty(self) }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let manifest: Self = serde_json::from_slice(bytes).map_err(|e| malformed("manifest", e))?;
        check_version("manifest", manifest.version)?;
        Ok(manifest)
    }

    /// Shard path holding `word`, if the word could be present at all.
    pub fn shard_path_for(&self, word: &str) -> Option<&str> {
        let number = shard_for(word, self.shard_count);
        self.shards.iter().find(|s| s.number == number).map(|s| s.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_assignment_is_stable() {
        assert_eq!(shard_for("rust", 32), shard_for("rust", 32));
        assert!((0..1000).all(|i| shard_for(&format!("w{i}"), 7) < 7));
        assert_eq!(shard_for("anything", 1), 0);
    }

    #[test]
    fn shard_bytes_decode_to_absolute_values() {
        let mut shard = ShardIndex::new(2, 4);
        shard.words.insert(
            "search".into(),
            vec![
                ShardPosting { document: 3, weight: 1.0, positions: vec![1, 5, 40] },
                ShardPosting { document: 10, weight: 9.0, positions: vec![0] },
            ],
        );
        let bytes = shard.to_bytes().unwrap();
        let decoded = ShardIndex::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, shard);
        assert_eq!(decoded.get("search").unwrap()[1].document, 10);
    }

    #[test]
    fn deltas_shrink_encoding() {
        let mut near = ShardIndex::new(0, 1);
        let positions = (1_000_000..1_000_100).collect();
        near.words.insert("w".into(), vec![ShardPosting { document: 0, weight: 1.0, positions }]);
        // 100 positions around one million: each delta is one varint byte
        assert!(near.to_bytes().unwrap().len() < 150);
    }

    #[test]
    fn rejects_garbage_and_future_versions() {
        let garbage = ShardIndex::from_bytes(&[0xff, 0xff]);
        assert!(matches!(garbage, Err(DecodeError::Malformed { .. })));
        let mut filter = FilterIndex::new("tag");
        filter.version = FORMAT_VERSION + 1;
        let bytes = filter.to_bytes().unwrap();
        assert!(matches!(FilterIndex::from_bytes(&bytes), Err(DecodeError::Version { .. })));
    }

    #[test]
    fn escaping_is_path_safe() {
        assert_eq!(escape_component("docs/a b.html"), "docs%2Fa%20b.html");
        assert_eq!(ArtifactPaths::fragment("x/../y"), "fragment/x%2F..%2Fy.json");
        let long = "é".repeat(200);
        let escaped = escape_component(&long);
        assert!(escaped.len() <= MAX_ESCAPED_LEN);
        assert!(!escaped.contains('/'));
        assert_ne!(escape_component(&"é".repeat(201)), escaped);
    }
}
