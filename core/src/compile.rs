//! Turns a finished index into the artifact set.
//!
//! Output depends only on the set of documents, never on the order or threads they were
//! added from: documents are numbered by sorted id, words are placed by hash, and every map
//! that reaches the wire is ordered.

use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, MAX_SHARDS};
use crate::error::{CompileError, CompileResult, ConfigError};
use crate::index::{DocSeq, InvertedIndex, StoredDocument};
use crate::persist::{
    shard_for, Artifact, ArtifactPaths, DocumentEntry, FilterEntry, FilterIndex, Fragment, Manifest,
    ShardEntry, ShardIndex, ShardPosting, FORMAT_VERSION, SHARD_HASH,
};

/// Compiles `documents` and their postings in `index` into: manifest, shards, filter
/// indexes, fragments, in that order.
pub fn compile(
    index: &InvertedIndex,
    documents: &[StoredDocument],
    config: &SessionConfig,
) -> CompileResult<Vec<Artifact>> {
    let shard_count = config.shard_count;
    if shard_count == 0 || shard_count > MAX_SHARDS {
        return Err(ConfigError::ShardCount(shard_count).into());
    }
    if config.shard_byte_budget == 0 {
        return Err(ConfigError::Zero { field: "shard_byte_budget" }.into());
    }

    let mut ordered: Vec<&StoredDocument> = documents.iter().collect();
    ordered.sort_by(|a, b| a.extracted.document_id.cmp(&b.extracted.document_id));
    u32::try_from(ordered.len()).map_err(|_| CompileError::TooManyDocuments(ordered.len()))?;
    let numbers: HashMap<DocSeq, u32> =
        ordered.iter().enumerate().map(|(n, d)| (d.seq, n as u32)).collect();

    let mut shards: Vec<ShardIndex> =
        (0..shard_count).map(|n| ShardIndex::new(n, shard_count)).collect();
    for (word, list) in index.iter() {
        let mut postings: Vec<ShardPosting> = list
            .entries()
            .iter()
            .filter_map(|p| {
                numbers.get(&p.seq).map(|&document| ShardPosting {
                    document,
                    weight: p.weight_sum,
                    positions: p.positions.clone(),
                })
            })
            .collect();
        if postings.is_empty() { continue; }
        postings.sort_by_key(|p| p.document);
        shards[shard_for(word, shard_count) as usize].words.insert(word.to_string(), postings);
    }

    let mut body = Vec::with_capacity(shards.len() + ordered.len());
    let mut shard_entries = Vec::with_capacity(shards.len());
    for shard in &shards {
        let bytes = shard
            .to_bytes()
            .map_err(|e| CompileError::encode(format!("shard {}", shard.shard), e))?;
        let path = ArtifactPaths::shard(shard.shard, &bytes);
        let over_budget = bytes.len() > config.shard_byte_budget;
        if over_budget {
            warn!(
                shard = shard.shard,
                bytes = bytes.len(),
                budget = config.shard_byte_budget,
                "shard exceeds byte budget"
            );
        }
        shard_entries.push(ShardEntry {
            number: shard.shard,
            path: path.clone(),
            words: shard.words.len(),
            bytes: bytes.len(),
            over_budget,
        });
        body.push(Artifact::new(path, bytes));
    }

    let mut filters: BTreeMap<&str, FilterIndex> = BTreeMap::new();
    for (number, doc) in ordered.iter().enumerate() {
        for (key, values) in &doc.extracted.filters {
            let filter =
                filters.entry(key.as_str()).or_insert_with(|| FilterIndex::new(key.as_str()));
            for value in values {
                filter.values.entry(value.clone()).or_default().push(number as u32);
            }
        }
    }
    let mut filter_entries = Vec::with_capacity(filters.len());
    for (key, filter) in &filters {
        let bytes =
            filter.to_bytes().map_err(|e| CompileError::encode(format!("filter '{key}'"), e))?;
        let path = ArtifactPaths::filter(key);
        filter_entries.push(FilterEntry {
            key: key.to_string(),
            path: path.clone(),
            values: filter.values.len(),
        });
        body.push(Artifact::new(path, bytes));
    }

    let mut document_entries = Vec::with_capacity(ordered.len());
    for (number, doc) in ordered.iter().enumerate() {
        let extracted = &doc.extracted;
        let fragment = Fragment {
            id: extracted.document_id.clone(),
            url: extracted.url.clone(),
            title: extracted.title.clone(),
            excerpt: extracted.excerpt.clone(),
            content: extracted.body_text.clone(),
            word_count: doc.word_count,
            language: extracted.language.clone(),
            filters: extracted.filters.clone(),
            meta: extracted.meta.clone(),
        };
        let bytes = fragment
            .to_bytes()
            .map_err(|e| CompileError::encode(format!("fragment '{}'", fragment.id), e))?;
        let path = ArtifactPaths::fragment(&fragment.id);
        document_entries.push(DocumentEntry {
            number: number as u32,
            id: fragment.id,
            path: path.clone(),
        });
        body.push(Artifact::new(path, bytes));
    }

    let manifest = Manifest {
        version: FORMAT_VERSION,
        generator: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")).to_string(),
        shard_count,
        shard_hash: SHARD_HASH.to_string(),
        document_count: ordered.len(),
        word_count: index.len(),
        corpus_hash: corpus_hash(&body),
        shards: shard_entries,
        filters: filter_entries,
        documents: document_entries,
    };
    let manifest_bytes = manifest
        .to_bytes()
        .map_err(|e| CompileError::encode(ArtifactPaths::manifest(), e))?;
    debug!(corpus_hash = %manifest.corpus_hash, "encoded manifest");

    info!(
        documents = manifest.document_count,
        words = manifest.word_count,
        shards = shard_count,
        filters = manifest.filters.len(),
        "compiled artifacts"
    );

    let mut artifacts = Vec::with_capacity(body.len() + 1);
    artifacts.push(Artifact::new(ArtifactPaths::manifest(), manifest_bytes));
    artifacts.extend(body);
    Ok(artifacts)
}

fn corpus_hash(artifacts: &[Artifact]) -> String {
    let mut hasher = Sha1::new();
    for artifact in artifacts {
        hasher.update(artifact.relative_path().as_bytes());
        hasher.update([0u8]);
        hasher.update((artifact.bytes().len() as u64).to_le_bytes());
        hasher.update(artifact.bytes());
    }
    format!("{:x}", hasher.finalize())
}
