use std::collections::HashSet;

use sitefind_core::persist::ArtifactPaths;
use sitefind_core::{
    Artifact, BuildSession, DocumentError, ExtractionError, FilterIndex, Fragment, Manifest, NewDocument,
    SessionConfig, SessionState, ShardIndex, Tokenizer,
};
use tracing_subscriber::EnvFilter;

const SAMPLES: [&str; 3] = [
    include_str!("fixtures/getting-started.html"),
    include_str!("fixtures/configuration.html"),
    include_str!("fixtures/changelog.html"),
];

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
}

/// `n` distinct pages cycling through the three samples.
fn corpus(n: usize) -> Vec<NewDocument> {
    (0..n)
        .map(|i| {
            let html = SAMPLES[i % SAMPLES.len()].replace("</body>", &format!("<p>page number {i}</p></body>"));
            NewDocument::new(format!("pages/{i:05}/index.html"), None, html)
        })
        .collect()
}

fn session() -> BuildSession { BuildSession::new(SessionConfig::default()).expect("default config is valid") }

fn find<'a>(artifacts: &'a [Artifact], path: &str) -> &'a Artifact {
    artifacts.iter().find(|a| a.relative_path() == path).expect("artifact listed in manifest")
}

#[test]
fn finalize_is_idempotent() -> anyhow::Result<()> {
    init_tracing();
    let session = session();
    for doc in corpus(12) {
        assert!(session.add_document(&doc.id, doc.url.as_deref(), &doc.html)?.success);
    }
    let first = session.finalize()?;
    let second = session.finalize()?;
    assert_eq!(first, second);
    assert_eq!(session.state(), SessionState::Finalized);
    Ok(())
}

#[test]
fn output_is_independent_of_add_order() -> anyhow::Result<()> {
    let forward = session();
    for doc in corpus(30) {
        forward.add_document(&doc.id, doc.url.as_deref(), &doc.html)?;
    }
    let backward = session();
    for doc in corpus(30).into_iter().rev() {
        backward.add_document(&doc.id, doc.url.as_deref(), &doc.html)?;
    }
    assert_eq!(forward.finalize()?, backward.finalize()?);
    Ok(())
}

#[test]
fn concurrent_workers_match_single_worker() -> anyhow::Result<()> {
    init_tracing();
    let docs = corpus(100);

    let single = session();
    for doc in &docs {
        single.add_document(&doc.id, doc.url.as_deref(), &doc.html)?;
    }

    let parallel = session();
    std::thread::scope(|scope| {
        for chunk in docs.chunks(docs.len().div_ceil(8)) {
            let parallel = &parallel;
            scope.spawn(move || {
                for doc in chunk.iter().rev() {
                    let response = parallel.add_document(&doc.id, doc.url.as_deref(), &doc.html).unwrap();
                    assert!(response.success, "{}", response.message);
                }
            });
        }
    });

    assert_eq!(parallel.document_count(), 100);
    assert_eq!(single.finalize()?, parallel.finalize()?);

    let batched = session();
    assert!(batched.add_many(docs).into_iter().all(|r| r.map(|r| r.success).unwrap_or(false)));
    assert_eq!(single.finalize()?, batched.finalize()?);
    Ok(())
}

#[test]
fn every_word_round_trips_through_shards() -> anyhow::Result<()> {
    let session = session();
    for doc in corpus(3) {
        session.add_document(&doc.id, doc.url.as_deref(), &doc.html)?;
    }
    let artifacts = session.finalize()?;
    let manifest = Manifest::from_bytes(artifacts[0].bytes())?;
    let tokenizer = Tokenizer::new();

    for entry in &manifest.documents {
        let extracted = session.extracted(&entry.id).expect("document was added");
        assert!(!extracted.body_text.is_empty());

        let fragment = Fragment::from_bytes(find(&artifacts, &entry.path).bytes())?;
        assert_eq!(fragment.content, extracted.body_text);

        for token in tokenizer.tokenize(&extracted.body_text) {
            let shard_path = manifest.shard_path_for(&token.word).expect("every shard is listed");
            let shard = ShardIndex::from_bytes(find(&artifacts, shard_path).bytes())?;
            let postings = shard.get(&token.word).unwrap_or_else(|| panic!("'{}' missing", token.word));
            let posting = postings
                .iter()
                .find(|p| p.document == entry.number)
                .unwrap_or_else(|| panic!("'{}' has no posting for {}", token.word, entry.id));
            assert!(posting.positions.contains(&token.position));
            assert!(posting.positions.windows(2).all(|w| w[0] < w[1]));
        }
    }
    Ok(())
}

#[test]
fn headings_outweigh_body_text() -> anyhow::Result<()> {
    let session = session();
    session.add_document("a", None, b"<h1>orbit</h1><p>other words</p>")?;
    session.add_document("b", None, b"<p>orbit and other words</p>")?;
    let artifacts = session.finalize()?;
    let manifest = Manifest::from_bytes(artifacts[0].bytes())?;
    let shard = ShardIndex::from_bytes(find(&artifacts, manifest.shard_path_for("orbit").unwrap()).bytes())?;
    let postings = shard.get("orbit").unwrap();
    assert!(postings[0].weight > postings[1].weight);
    Ok(())
}

#[test]
fn duplicate_id_is_rejected_and_ignored() -> anyhow::Result<()> {
    let session = session();
    assert!(session.add_document("same", None, b"<p>original words</p>")?.success);
    let response = session.add_document("same", None, b"<p>replacement text</p>")?;
    assert!(!response.success);
    assert_eq!(response.error, Some(DocumentError::DuplicateId("same".into())));

    let reference = self::session();
    reference.add_document("same", None, b"<p>original words</p>")?;
    assert_eq!(session.finalize()?, reference.finalize()?);
    assert!(session.extracted("same").unwrap().body_text.contains("original"));
    Ok(())
}

#[test]
fn malformed_html_never_aborts_the_build() -> anyhow::Result<()> {
    let session = session();
    let response = session.add_document("broken", None, b"<div><p><span <a href=\"x <b <i")?;
    assert!(response.success, "{}", response.message);
    let extracted = session.extracted("broken").unwrap();
    assert!(extracted.body_text.len() < 40);

    assert!(session.add_document("empty", None, b"")?.success);
    assert!(session.add_document("changelog", None, SAMPLES[2].as_bytes())?.success);
    let changelog = session.extracted("changelog").unwrap();
    assert_eq!(changelog.title, "Changelog");
    assert!(changelog.body_text.contains("unclosed tags"));
    assert!(!changelog.body_text.contains("unterminated"));

    let artifacts = session.finalize()?;
    let manifest = Manifest::from_bytes(artifacts[0].bytes())?;
    assert_eq!(manifest.document_count, 3);
    Ok(())
}

#[test]
fn one_bad_item_does_not_abort_a_batch() -> anyhow::Result<()> {
    let mut config = SessionConfig::default();
    config.limits.max_html_bytes = 4096;
    let session = BuildSession::new(config)?;
    let outcomes = session.add_many(vec![
        NewDocument::new("ok-1", None, "<p>fine</p>"),
        NewDocument::new("", None, "<p>no id</p>"),
        NewDocument::new("huge", None, "<p>x</p>".repeat(1000)),
        NewDocument::new("ok-1", None, "<p>duplicate</p>"),
        NewDocument::new("ok-2", None, "<p>also fine</p>"),
    ]);
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes[0].as_ref().unwrap().success);
    assert!(outcomes[1].is_err());
    assert!(matches!(outcomes[2].as_ref().unwrap().error, Some(DocumentError::Extraction(_))));
    assert!(matches!(outcomes[3].as_ref().unwrap().error, Some(DocumentError::DuplicateId(_))));
    assert!(outcomes[4].as_ref().unwrap().success);
    assert_eq!(session.document_count(), 2);
    Ok(())
}

#[test]
fn shard_count_is_bounded_as_corpus_grows() -> anyhow::Result<()> {
    init_tracing();
    let config = SessionConfig::default();
    for n in [10, 100, 10_000] {
        let session = BuildSession::new(config.clone())?;
        let outcomes = session.add_many(corpus(n));
        assert!(outcomes.iter().all(|r| r.as_ref().map(|r| r.success).unwrap_or(false)));

        let artifacts = session.finalize()?;
        let manifest = Manifest::from_bytes(artifacts[0].bytes())?;
        assert_eq!(manifest.documents.len(), n);
        assert_eq!(manifest.shards.len(), config.shard_count as usize);

        let fragments = artifacts.iter().filter(|a| a.relative_path().starts_with("fragment/")).count();
        assert_eq!(fragments, n);
        let shards = artifacts.iter().filter(|a| a.relative_path().starts_with("index/")).count();
        assert_eq!(shards, config.shard_count as usize);

        let paths: HashSet<&str> = artifacts.iter().map(Artifact::relative_path).collect();
        assert_eq!(paths.len(), artifacts.len());
    }
    Ok(())
}

#[test]
fn fragments_carry_metadata_and_urls() -> anyhow::Result<()> {
    let session = session();
    session.add_document("guide/getting-started/index.html", None, SAMPLES[0].as_bytes())?;
    session.add_document("reference/configuration.html", Some("/ref/config/index.html"), SAMPLES[1].as_bytes())?;
    let artifacts = session.finalize()?;

    let fragment = |id: &str| Fragment::from_bytes(find(&artifacts, &ArtifactPaths::fragment(id)).bytes());

    let started = fragment("guide/getting-started/index.html")?;
    assert_eq!(started.url, "/guide/getting-started/");
    assert_eq!(started.title, "Getting started");
    assert_eq!(started.language.as_deref(), Some("en"));
    assert_eq!(started.meta["description"], "Install the tool and build your first site.");
    assert!(started.filters["level"].contains("beginner"));
    assert!(!started.content.contains("Home"));
    assert!(!started.content.contains("Copyright"));
    assert!(!started.content.contains("analytics"));
    assert!(started.excerpt.starts_with("Getting started Install the command line tool"));

    let config = fragment("reference/configuration.html")?;
    assert_eq!(config.url, "/ref/config/");
    assert_eq!(config.title, "Configuration reference");
    assert_eq!(config.meta["image"], "/img/shards.png");
    assert!(!config.content.contains("Related pages"));
    assert!(!config.content.contains("Example Docs"));
    Ok(())
}

#[test]
fn keep_url_preserves_caller_urls() -> anyhow::Result<()> {
    let session = BuildSession::new(SessionConfig::builder().keep_url(true).build())?;
    session.add_document("a", Some("/docs/index.html"), b"<p>x</p>")?;
    assert_eq!(session.extracted("a").unwrap().url, "/docs/index.html");
    Ok(())
}

#[test]
fn sessions_share_nothing() -> anyhow::Result<()> {
    let first = session();
    let second = session();
    first.add_document("a", None, b"<p>alpha</p>")?;
    assert!(second.add_document("a", None, b"<p>alpha</p>")?.success);
    assert_eq!(second.document_count(), 1);
    Ok(())
}

#[test]
fn corpus_hash_tracks_content() -> anyhow::Result<()> {
    let hash = |html: &str| -> anyhow::Result<String> {
        let session = session();
        session.add_document("page", None, html.as_bytes())?;
        let artifacts = session.finalize()?;
        Ok(Manifest::from_bytes(artifacts[0].bytes())?.corpus_hash)
    };
    assert_eq!(hash("<p>same</p>")?, hash("<p>same</p>")?);
    assert_ne!(hash("<p>same</p>")?, hash("<p>different</p>")?);
    Ok(())
}

#[test]
fn misnested_formatting_is_rejected_quickly() -> anyhow::Result<()> {
    let session = session();
    let n = 20_000;
    let mut html: String = (0..n).map(|i| format!("<font x={i}>")).collect();
    html.push_str(&"<p>x".repeat(n));

    let started = std::time::Instant::now();
    let response = session.add_document("nested", None, html.as_bytes())?;
    assert!(started.elapsed() < std::time::Duration::from_secs(2), "{:?}", started.elapsed());
    assert!(!response.success);
    assert!(matches!(
        response.error,
        Some(DocumentError::Extraction(ExtractionError::TooDeeplyNested { .. }))
    ));

    assert!(session.add_document("fine", None, b"<p><b>one</b> <i>two</i></p>")?.success);
    assert_eq!(session.document_count(), 1);
    Ok(())
}

#[test]
fn navigation_filters_stay_out_of_filter_indexes() -> anyhow::Result<()> {
    let session = session();
    session.add_document(
        "page",
        None,
        br#"<nav><a data-index-filter="section:Nav">Home</a></nav>
        <p data-index-filter="section:Guide">body</p>"#,
    )?;
    let artifacts = session.finalize()?;
    let manifest = Manifest::from_bytes(artifacts[0].bytes())?;
    assert_eq!(manifest.filters.len(), 1);
    let filter = FilterIndex::from_bytes(find(&artifacts, &manifest.filters[0].path).bytes())?;
    assert_eq!(filter.values.keys().collect::<Vec<_>>(), ["Guide"]);
    Ok(())
}
