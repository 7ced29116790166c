// tests/keyword_reload.rs
//
// Keyword list lifecycle: load from the shipped file, pick up edits through
// the periodic refresh, fall back to the built-in list when the file is gone.

use std::sync::Arc;
use std::time::Duration;

use brand_pulse::config::keywords::{FileKeywordSource, KeywordSource};
use brand_pulse::relevance::{KeywordFilter, ReloadOutcome, RelevanceHandle};

#[tokio::test]
async fn shipped_keyword_file_loads() {
    let source = FileKeywordSource::new("config/keywords.toml");
    let entries = source.load().await.unwrap();
    assert!(entries.iter().any(|e| e.keyword == "labubu" && e.enabled));
    assert!(entries.iter().any(|e| e.keyword == "kaws" && !e.enabled));

    let handle = RelevanceHandle::from_keywords(Vec::<String>::new());
    assert_eq!(handle.reload(&source).await, ReloadOutcome::Loaded);
    assert!(handle.matches("新款泡泡玛特盲盒上市"));
    assert!(!handle.matches("KAWS companion restock"));
}

#[tokio::test]
async fn missing_file_falls_back_to_builtin() {
    let dir = tempfile::tempdir().unwrap();
    let source = FileKeywordSource::new(dir.path().join("nope.toml"));
    let handle = RelevanceHandle::from_keywords(["only-this"]);

    assert_eq!(handle.reload(&source).await, ReloadOutcome::FellBackToBuiltin);
    assert_eq!(
        handle.enabled_keywords(),
        KeywordFilter::builtin().enabled_keywords()
    );
    assert!(!handle.matches("only-this"));
}

#[tokio::test]
async fn refresh_picks_up_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keywords.toml");
    std::fs::write(&path, "keywords = [\"labubu\"]\n").unwrap();

    let handle = RelevanceHandle::from_keywords(Vec::<String>::new());
    let source: Arc<dyn KeywordSource> = Arc::new(FileKeywordSource::new(&path));
    let task = brand_pulse::relevance::spawn_keyword_refresh(
        handle.clone(),
        source,
        Duration::from_millis(50),
    );

    wait_until(|| handle.matches("labubu drop")).await;
    assert!(!handle.matches("crybaby drop"));

    std::fs::write(
        &path,
        "keywords = [{ keyword = \"labubu\", enabled = false }, \"crybaby\"]\n",
    )
    .unwrap();
    wait_until(|| handle.matches("crybaby drop")).await;
    assert!(!handle.matches("labubu drop"));

    task.abort();
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 2s");
}
