//! HTML → [`ExtractedDocument`].
//!
//! The page is parsed once with `scraper` (html5ever underneath, which recovers from any
//! malformed markup) and walked without recursion. Text from excluded subtrees is dropped,
//! whitespace is collapsed, block elements separate words, and heading/emphasis regions are
//! recorded as byte spans over the final body text so the tokenizer can weight words without
//! the markup.

use ego_tree::iter::Edge;
use ego_tree::NodeId;
use lazy_static::lazy_static;
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::{ExtractionLimits, ExtractionPolicy, SessionConfig};
use crate::error::{ConfigError, ExtractionError};
use crate::tokenizer::BASE_WEIGHT;

const TITLE_FALLBACK_CHARS: usize = 80;
const EMPHASIS_WEIGHT: f32 = 2.0;

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "caption", "dd", "details", "dialog", "div",
    "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5",
    "h6", "header", "hr", "li", "main", "ol", "p", "pre", "section", "summary", "table", "tbody",
    "td", "tfoot", "th", "thead", "tr", "ul",
];

/// Elements the parser keeps in its list of active formatting elements.
const FORMATTING_ELEMENTS: &[&str] = &[
    "a", "b", "big", "code", "em", "font", "i", "nobr", "s", "small", "strike", "strong", "tt", "u",
];

/// Elements whose content is not parsed as markup.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "textarea", "title", "xmp", "iframe", "noembed", "noframes",
];

lazy_static! {
    static ref TITLE: Selector = Selector::parse("title").expect("valid selector");
}

/// A byte range of `body_text` whose words carry `weight` instead of [`BASE_WEIGHT`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightedSpan {
    pub start: usize,
    pub end: usize,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedDocument {
    pub document_id: String,
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub body_text: String,
    /// Sorted, non-overlapping.
    pub spans: Vec<WeightedSpan>,
    pub language: Option<String>,
    pub filters: BTreeMap<String, BTreeSet<String>>,
    pub meta: BTreeMap<String, String>,
}

/// Stateless extractor built once per session from its configuration.
#[derive(Debug)]
pub struct Extractor {
    keep_url: bool,
    excerpt_length: usize,
    limits: ExtractionLimits,
    policy: ExtractionPolicy,
    ignored_tags: HashSet<String>,
    exclude: Vec<Selector>,
    body: Selector,
    filter: Selector,
    meta: Selector,
}

impl Extractor {
    pub fn new(config: &SessionConfig) -> Result<Self, ConfigError> {
        let policy = config.extraction.clone();
        policy.validate()?;
        let marker = |field: &'static str, attr: &str| {
            Selector::parse(&format!("[{attr}]"))
                .map_err(|_| ConfigError::Attribute { field, value: attr.to_string() })
        };
        Ok(Self {
            keep_url: config.keep_url,
            excerpt_length: config.excerpt_length,
            limits: config.limits,
            ignored_tags: policy.ignored_tags.iter().map(|t| t.to_ascii_lowercase()).collect(),
            exclude: policy.selectors()?,
            body: marker("body_attribute", &policy.body_attribute)?,
            filter: marker("filter_attribute", &policy.filter_attribute)?,
            meta: marker("meta_attribute", &policy.meta_attribute)?,
            policy,
        })
    }

    pub fn extract(
        &self,
        raw_html: &[u8],
        document_id: &str,
        url: Option<&str>,
    ) -> Result<ExtractedDocument, ExtractionError> {
        let limits = &self.limits;
        if raw_html.len() > limits.max_html_bytes {
            let limit = limits.max_html_bytes;
            return Err(ExtractionError::TooLarge { size: raw_html.len(), limit });
        }
        let scan = scan_markup(raw_html);
        if scan.start_tags > limits.max_nodes {
            let limit = limits.max_nodes;
            return Err(ExtractionError::TooManyNodes { nodes: scan.start_tags, limit });
        }
        if scan.formatting_depth > limits.max_formatting_depth {
            return Err(ExtractionError::TooDeeplyNested {
                depth: scan.formatting_depth,
                limit: limits.max_formatting_depth,
            });
        }

        let source = String::from_utf8_lossy(raw_html);
        let html = Html::parse_document(&source);
        let nodes = html.tree.root().descendants().count();
        if nodes > limits.max_nodes {
            return Err(ExtractionError::TooManyNodes { nodes, limit: limits.max_nodes });
        }

        let walk = self.walk(&html);
        let mut meta = self.collect_meta(&html);
        let filters = self.collect_filters(&html);

        let title = meta
            .get("title")
            .cloned()
            .or(walk.first_h1)
            .or_else(|| html.select(&TITLE).next().map(|t| element_text(&t)))
            .filter(|t| !t.is_empty())
            .or(walk.first_heading)
            .unwrap_or_else(|| truncate_words(&walk.text.text, TITLE_FALLBACK_CHARS));
        if !title.is_empty() {
            meta.entry("title".into()).or_insert_with(|| title.clone());
        }
        if let Some(image) = walk.image {
            meta.entry("image".into()).or_insert(image);
        }

        let language = html
            .root_element()
            .value()
            .attr("lang")
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        let (body_text, spans) = walk.text.finish();

        Ok(ExtractedDocument {
            document_id: document_id.to_string(),
            url: canonical_url(url, document_id, self.keep_url),
            excerpt: truncate_words(&body_text, self.excerpt_length),
            title,
            body_text,
            spans,
            language,
            filters,
            meta,
        })
    }

    fn is_excluded(&self, node: ego_tree::NodeRef<'_, Node>, element: &Element) -> bool {
        let name = element.name();
        if name == "head"
            || self.ignored_tags.contains(name)
            || element.attr(&self.policy.ignore_attribute).is_some()
        {
            return true;
        }
        !self.exclude.is_empty()
            && ElementRef::wrap(node)
                .map_or(false, |el| self.exclude.iter().any(|s| s.matches(&el)))
    }

    /// Weight for text inside `element`, given the weight already in effect.
    fn element_weight(&self, element: &Element, current: f32) -> Option<f32> {
        if let Some(explicit) = element.attr(&self.policy.weight_attribute) {
            if let Ok(w) = explicit.trim().parse::<f32>() {
                if w.is_finite() && w >= 0.0 {
                    return Some(w);
                }
            }
        }
        let builtin = match element.name() {
            "h1" => 7.0,
            "h2" => 6.0,
            "h3" => 5.0,
            "h4" => 4.0,
            "h5" => 3.0,
            "h6" => 2.0,
            "strong" | "b" | "em" | "mark" => EMPHASIS_WEIGHT,
            _ => return None,
        };
        Some(current.max(builtin))
    }

    fn walk(&self, html: &Html) -> Walk {
        let body_only = html.select(&self.body).next().is_some();
        let mut walk = Walk::default();
        let mut skip: Option<NodeId> = None;
        let mut body_depth = 0usize;
        let mut weights: Vec<(NodeId, f32)> = Vec::new();
        let mut heading: Option<(NodeId, bool, String)> = None;

        for edge in html.tree.root().traverse() {
            match edge {
                Edge::Open(node) => {
                    if skip.is_some() { continue; }
                    match node.value() {
                        Node::Element(el) => {
                            if self.is_excluded(node, el) {
                                skip = Some(node.id());
                                continue;
                            }
                            if el.attr(&self.policy.body_attribute).is_some() { body_depth += 1; }
                            let name = el.name();
                            if BLOCK_ELEMENTS.contains(&name) { walk.text.boundary(); }
                            let current = weights.last().map_or(BASE_WEIGHT, |(_, w)| *w);
                            if let Some(w) = self.element_weight(el, current) {
                                weights.push((node.id(), w));
                            }
                            if body_only && body_depth == 0 { continue; }
                            if let Some(level) = heading_level(name) {
                                let wants = walk.first_heading.is_none()
                                || (level == 1 && walk.first_h1.is_none());
                                if heading.is_none() && wants {
                                    heading = Some((node.id(), level == 1, String::new()));
                                }
                            }
                            if name == "img" && walk.image.is_none() {
                                walk.image = el
                                    .attr("src")
                                    .map(str::trim)
                                    .filter(|s| !s.is_empty())
                                    .map(str::to_string);
                            }
                        }
                        Node::Text(text) => {
                            if body_only && body_depth == 0 { continue; }
                            let weight = weights.last().map_or(BASE_WEIGHT, |(_, w)| *w);
                            walk.text.push(text, weight);
                            if let Some((_, _, captured)) = heading.as_mut() {
                                captured.push_str(text);
                            }
                        }
                        _ => {}
                    }
                }
                Edge::Close(node) => {
                    if let Some(id) = skip {
                        if id == node.id() { skip = None; }
                        continue;
                    }
                    let Node::Element(el) = node.value() else { continue };
                    if BLOCK_ELEMENTS.contains(&el.name()) { walk.text.boundary(); }
                    if weights.last().map(|(id, _)| *id) == Some(node.id()) { weights.pop(); }
                    if heading.as_ref().map(|(id, _, _)| *id) == Some(node.id()) {
                        if let Some((_, is_h1, captured)) = heading.take() {
                            let captured = collapse_whitespace(&captured);
                            if !captured.is_empty() {
                                if is_h1 && walk.first_h1.is_none() {
                                    walk.first_h1 = Some(captured.clone());
                                }
                                if walk.first_heading.is_none() {
                                    walk.first_heading = Some(captured);
                                }
                            }
                        }
                    }
                    if el.attr(&self.policy.body_attribute).is_some() {
                        body_depth = body_depth.saturating_sub(1);
                    }
                }
            }
        }
        walk
    }

    /// Filters and metadata are skipped inside ignored tags and inside regions marked
    /// `data-index-ignore="all"`. A bare ignore marker only drops body text.
    fn in_dropped_region(&self, el: &ElementRef<'_>) -> bool {
        std::iter::once(**el)
            .chain(el.ancestors())
            .filter_map(|node| node.value().as_element())
            .any(|e| {
                self.ignored_tags.contains(e.name())
                    || e.attr(&self.policy.ignore_attribute)
                        .map_or(false, |v| v.trim().eq_ignore_ascii_case("all"))
            })
    }

    fn collect_filters(&self, html: &Html) -> BTreeMap<String, BTreeSet<String>> {
        let mut filters: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for el in html.select(&self.filter) {
            if self.in_dropped_region(&el) { continue; }
            let Some(entries) = el.value().attr(&self.policy.filter_attribute) else { continue };
            for (key, value) in parse_entries(entries, el, false) {
                filters.entry(key).or_default().insert(value);
            }
        }
        filters
    }

    /// First value wins per key, in document order.
    fn collect_meta(&self, html: &Html) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        for el in html.select(&self.meta) {
            if self.in_dropped_region(&el) { continue; }
            let Some(entries) = el.value().attr(&self.policy.meta_attribute) else { continue };
            for (key, value) in parse_entries(entries, el, true) {
                pairs.entry(key).or_insert(value);
            }
        }
        pairs
    }
}

#[derive(Default)]
struct Walk {
    text: TextCollector,
    first_h1: Option<String>,
    first_heading: Option<String>,
    image: Option<String>,
}

fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Parses `key`, `key:value` and (meta only) `key[attr]` entries, comma separated.
fn parse_entries(
    entries: &str,
    el: ElementRef<'_>,
    allow_attribute: bool,
) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let from_attribute = entry.strip_suffix(']').and_then(|e| e.split_once('['));
        let (key, value) = if let Some((key, value)) = entry.split_once(':') {
            (key.trim(), collapse_whitespace(value))
        } else if let (true, Some((key, attr))) = (allow_attribute, from_attribute) {
            let value = el.value().attr(attr.trim()).map(collapse_whitespace);
            (key.trim(), value.unwrap_or_default())
        } else {
            (entry, element_text(&el))
        };
        if !key.is_empty() && !value.is_empty() {
            out.push((key.to_string(), value));
        }
    }
    out
}

/// Accumulates normalized body text plus the spans of non-base weight.
#[derive(Default)]
struct TextCollector {
    text: String,
    pending_space: bool,
    spans: Vec<WeightedSpan>,
    open: Option<(usize, f32)>,
}

impl TextCollector {
    fn boundary(&mut self) { self.pending_space = true; }

    fn push(&mut self, raw: &str, weight: f32) {
        for c in raw.chars() {
            if c.is_whitespace() {
                self.pending_space = true;
                continue;
            }
            if self.pending_space && !self.text.is_empty() {
                self.text.push(' ');
            }
            self.pending_space = false;
            self.mark(weight);
            self.text.push(c);
        }
    }

    fn mark(&mut self, weight: f32) {
        let at = self.text.len();
        match self.open {
            Some((_, w)) if w == weight => return,
            Some((start, w)) => self.spans.push(WeightedSpan { start, end: at, weight: w }),
            None => {}
        }
        self.open = (weight != BASE_WEIGHT).then_some((at, weight));
    }

    fn finish(mut self) -> (String, Vec<WeightedSpan>) {
        if let Some((start, weight)) = self.open.take() {
            self.spans.push(WeightedSpan { start, end: self.text.len(), weight });
        }
        (self.text, self.spans)
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: &ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct MarkupScan {
    start_tags: usize,
    /// Peak count of formatting elements opened and not yet closed.
    formatting_depth: usize,
}

/// Counts tags in the raw bytes without building a tree, so oversized or pathologically
/// nested markup is refused before the parser sees it. Comments and raw-text element
/// content are skipped.
fn scan_markup(html: &[u8]) -> MarkupScan {
    let mut scan = MarkupScan::default();
    let mut open_formatting = 0usize;
    let mut raw_text: Option<&'static str> = None;
    let mut i = 0;
    while let Some(found) = html[i..].iter().position(|&b| b == b'<') {
        let start = i + found + 1;
        if raw_text.is_none() && html[start..].starts_with(b"!--") {
            i = find_bytes(&html[start..], b"-->").map_or(html.len(), |end| start + end + 3);
            continue;
        }
        let closing = html.get(start) == Some(&b'/');
        let name_start = if closing { start + 1 } else { start };
        let name_len = html[name_start..].iter().take_while(|b| b.is_ascii_alphanumeric()).count();
        i = name_start + name_len;
        if name_len == 0 || !html[name_start].is_ascii_alphabetic() {
            continue;
        }
        let name = &html[name_start..i];
        if let Some(element) = raw_text {
            if closing && name.eq_ignore_ascii_case(element.as_bytes()) {
                raw_text = None;
            }
            continue;
        }
        let formatting = one_of(name, FORMATTING_ELEMENTS).is_some();
        if closing {
            if formatting {
                open_formatting = open_formatting.saturating_sub(1);
            }
            continue;
        }
        scan.start_tags += 1;
        if formatting {
            open_formatting += 1;
            scan.formatting_depth = scan.formatting_depth.max(open_formatting);
        }
        raw_text = one_of(name, RAW_TEXT_ELEMENTS);
    }
    scan
}

fn one_of(name: &[u8], elements: &[&'static str]) -> Option<&'static str> {
    elements.iter().copied().find(|e| name.eq_ignore_ascii_case(e.as_bytes()))
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Cuts `text` to at most `max_chars` characters without splitting a word.
pub fn truncate_words(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else { return text.trim().to_string() };
    let head = &text[..cut];
    let head = if text[cut..].starts_with(char::is_whitespace) {
        head
    } else {
        head.rsplit_once(char::is_whitespace).map_or(head, |(h, _)| h)
    };
    head.trim_end().to_string()
}

/// Applies the session's URL policy. Without `keep_url`, `/dir/index.html` becomes `/dir/`;
/// a query or fragment after the file name is kept.
/// A missing URL is derived from the document id.
pub fn canonical_url(url: Option<&str>, document_id: &str, keep_url: bool) -> String {
    let supplied = url.map(str::trim).filter(|u| !u.is_empty());
    if let (Some(u), true) = (supplied, keep_url) {
        return u.to_string();
    }
    let mut url = supplied.unwrap_or(document_id.trim()).replace('\\', "/");
    if !url.starts_with('/') && !url.contains("://") {
        url.insert(0, '/');
    }
    if !keep_url {
        let suffix = url.find(['?', '#']).map(|at| url.split_off(at)).unwrap_or_default();
        for index in ["index.html", "index.htm"] {
            if let Some(dir) = url.strip_suffix(index) {
                if dir.ends_with('/') {
                    let keep = dir.len();
                    url.truncate(keep);
                    break;
                }
            }
        }
        url.push_str(&suffix);
    }
    url
}
