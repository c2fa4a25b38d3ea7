use std::collections::{BTreeMap, HashMap};

use crate::error::DocumentError;
use crate::extract::ExtractedDocument;
use crate::tokenizer::Tokenizer;

/// Insertion sequence number, assigned when a document is applied to the index.
pub type DocSeq = usize;

/// Occurrences of one word in one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub seq: DocSeq,
    /// Strictly increasing.
    pub positions: Vec<u32>,
    pub weight_sum: f32,
}

/// Postings for one word, at most one per document, ordered by insertion sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostingList {
    entries: Vec<Posting>,
}

impl PostingList {
    pub fn entries(&self) -> &[Posting] { &self.entries }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    fn merge(&mut self, seq: DocSeq, occurrences: WordOccurrences) {
        match self.entries.binary_search_by_key(&seq, |p| p.seq) {
            Ok(i) => {
                let entry = &mut self.entries[i];
                entry.positions.extend(occurrences.positions);
                entry.positions.sort_unstable();
                entry.positions.dedup();
                entry.weight_sum += occurrences.weight_sum;
            }
            Err(i) => self.entries.insert(
                i,
                Posting {
                    seq,
                    positions: occurrences.positions,
                    weight_sum: occurrences.weight_sum,
                },
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct InvertedIndex {
    words: HashMap<String, PostingList>,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, word: &str) -> Option<&PostingList> { self.words.get(word) }

    pub fn len(&self) -> usize { self.words.len() }

    pub fn is_empty(&self) -> bool { self.words.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PostingList)> {
        self.words.iter().map(|(w, p)| (w.as_str(), p))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct WordOccurrences {
    positions: Vec<u32>,
    weight_sum: f32,
}

/// A document tokenized and grouped per word, ready to be applied in one step.
///
/// Preparing needs no shared state, so it runs on whatever thread extracted the page;
/// only [`IndexBuilder::ingest`] touches the shared index.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub extracted: ExtractedDocument,
    /// Length of the document's word stream, stop words included.
    pub word_count: u32,
    words: BTreeMap<String, WordOccurrences>,
}

impl PreparedDocument {
    pub fn prepare(extracted: ExtractedDocument, tokenizer: &Tokenizer) -> Self {
        let mut words: BTreeMap<String, WordOccurrences> = BTreeMap::new();
        let mut word_count = 0;
        for token in tokenizer.tokenize_weighted(&extracted.body_text, &extracted.spans) {
            word_count = token.position + 1;
            let entry = words.entry(token.word).or_default();
            entry.positions.push(token.position);
            entry.weight_sum += token.weight;
        }
        Self { extracted, word_count, words }
    }

    pub fn id(&self) -> &str { &self.extracted.document_id }

    pub fn unique_words(&self) -> usize { self.words.len() }
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub seq: DocSeq,
    pub extracted: ExtractedDocument,
    pub word_count: u32,
}

/// Owns the documents and the inverted index of one session. Callers serialize access
/// (the session keeps it behind a lock), so every `ingest` is applied whole.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    documents: Vec<StoredDocument>,
    ids: HashMap<String, DocSeq>,
    index: InvertedIndex,
}

impl IndexBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn contains(&self, id: &str) -> bool { self.ids.contains_key(id) }

    pub fn document(&self, id: &str) -> Option<&StoredDocument> {
        self.ids.get(id).map(|seq| &self.documents[*seq])
    }

    /// Documents in insertion order.
    pub fn documents(&self) -> &[StoredDocument] { &self.documents }

    pub fn index(&self) -> &InvertedIndex { &self.index }

    /// Assigns the next sequence number and applies every word of the document.
    /// A duplicate id leaves the index untouched.
    pub fn ingest(&mut self, prepared: PreparedDocument) -> Result<DocSeq, DocumentError> {
        if self.contains(prepared.id()) {
            return Err(DocumentError::DuplicateId(prepared.id().to_string()));
        }
        let seq = self.documents.len();
        let PreparedDocument { extracted, word_count, words } = prepared;
        for (word, occurrences) in words {
            self.index.words.entry(word).or_default().merge(seq, occurrences);
        }
        self.ids.insert(extracted.document_id.clone(), seq);
        self.documents.push(StoredDocument { seq, extracted, word_count });
        Ok(seq)
    }
}
