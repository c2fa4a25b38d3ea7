use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

use crate::extract::WeightedSpan;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}][\p{L}\p{M}\p{N}_]*(?:['’][\p{L}\p{M}\p{N}_]+)*").expect("valid regex");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Weight of text outside any weighted span.
pub const BASE_WEIGHT: f32 = 1.0;

/// One normalized word and where it sits in the document's word stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub word: String,
    /// Zero-based index in the logical word stream, counting dropped stop words.
    pub position: u32,
    pub weight: f32,
}

/// Reduces a normalized word to its stem. Implement this to plug in stemming that
/// `rust-stemmers` does not cover.
pub trait WordStemmer: Send + Sync {
    fn stem<'a>(&self, word: &'a str) -> Cow<'a, str>;
}

impl WordStemmer for Stemmer {
    fn stem<'a>(&self, word: &'a str) -> Cow<'a, str> { Stemmer::stem(self, word) }
}

#[derive(Clone, Default)]
pub struct Tokenizer {
    stemmer: Option<Arc<dyn WordStemmer>>,
    drop_stopwords: bool,
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("stemming", &self.stemmer.is_some())
            .field("drop_stopwords", &self.drop_stopwords)
            .finish()
    }
}

impl Tokenizer {
    pub fn new() -> Self { Self::default() }

    pub fn with_algorithm(algorithm: Option<Algorithm>, drop_stopwords: bool) -> Self {
        let stemmer = algorithm.map(|a| Arc::new(Stemmer::create(a)) as Arc<dyn WordStemmer>);
        Self { stemmer, drop_stopwords }
    }

    pub fn with_stemmer(stemmer: Arc<dyn WordStemmer>, drop_stopwords: bool) -> Self {
        Self { stemmer: Some(stemmer), drop_stopwords }
    }

    /// Tokenize plain text, every word at [`BASE_WEIGHT`].
    pub fn tokenize<'a>(&'a self, text: &'a str) -> TokenStream<'a> {
        self.tokenize_weighted(text, &[])
    }

    /// Tokenize text whose weighted regions were recorded during extraction.
    /// `spans` must be sorted and non-overlapping, as the extractor produces them.
    pub fn tokenize_weighted<'a>(
        &'a self,
        text: &'a str,
        spans: &'a [WeightedSpan],
    ) -> TokenStream<'a> {
        TokenStream { tokenizer: self, text, spans, offset: 0, span: 0, position: 0 }
    }

    /// NFKC, lowercase, apostrophes removed, then optional stemming. Returns `None` for stop words.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let lowered = raw.nfkc().collect::<String>().to_lowercase();
        let lowered = lowered.replace('’', "'");
        if self.drop_stopwords && is_stopword(&lowered) { return None; }
        let bare: String = lowered.chars().filter(|c| *c != '\'').collect();
        let word = match &self.stemmer {
            Some(stemmer) => stemmer.stem(&bare).into_owned(),
            None => bare,
        };
        (!word.is_empty()).then_some(word)
    }
}

/// Lazy token sequence over one document. A clone continues from the same point;
/// [`TokenStream::restart`] rewinds to the first word.
#[derive(Clone)]
pub struct TokenStream<'a> {
    tokenizer: &'a Tokenizer,
    text: &'a str,
    spans: &'a [WeightedSpan],
    offset: usize,
    span: usize,
    position: u32,
}

impl<'a> TokenStream<'a> {
    pub fn restart(&mut self) {
        self.offset = 0;
        self.span = 0;
        self.position = 0;
    }

    fn weight_at(&mut self, start: usize) -> f32 {
        while self.span < self.spans.len() && self.spans[self.span].end <= start {
            self.span += 1;
        }
        match self.spans.get(self.span) {
            Some(span) if span.start <= start => span.weight,
            _ => BASE_WEIGHT,
        }
    }
}

impl<'a> Iterator for TokenStream<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        while let Some(mat) = WORD.find_at(self.text, self.offset) {
            self.offset = mat.end();
            let position = self.position;
            self.position += 1;
            let Some(word) = self.tokenizer.normalize(mat.as_str()) else { continue };
            let weight = self.weight_at(mat.start());
            return Some(Token { word, position, weight });
        }
        self.offset = self.text.len();
        None
    }
}

impl<'a> std::iter::FusedIterator for TokenStream<'a> {}
