//! End-to-end tests for the wiki core over a directory-backed page store.
//!
//! Each test lays out pages in its own TempDir, starts a [`WikiEngine`] over
//! them and checks rendering, reference queries and renames. Tests that
//! restart the engine check that the reference snapshot carries the graph
//! across restarts and catches up with pages edited in between.
//!
//! # Sample Data
//!
//! `sample_wiki()` writes four pages:
//! - `Main`: links to `About`, `Guide` (labelled) and the missing `Roadmap`
//! - `About`: links back to `Main`
//! - `Guide`: a heading, a list and a code block hiding a link
//! - `Scratch`: linked from nowhere

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use wikiforge::config::WikiSettings;
use wikiforge::engine::WikiEngine;
use wikiforge::error::WikiError;
use wikiforge::snapshot;
use wikiforge::store::{FilePageStore, PageStore};

fn names(list: &[&str]) -> std::collections::BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn sample_wiki(dir: &Path) -> Arc<FilePageStore> {
    let store = Arc::new(FilePageStore::open(dir).unwrap());
    store
        .save_text("Main", "Welcome! See [About], [the guide|Guide] and [Roadmap].", None)
        .unwrap();
    store.save_text("About", "Back to [Main].", None).unwrap();
    store
        .save_text(
            "Guide",
            "!! Getting started\n*install\n**configure\n*run\n{{{\n[NotALink]\n}}}",
            None,
        )
        .unwrap();
    store.save_text("Scratch", "nothing here", None).unwrap();
    store
}

fn start(store: &Arc<FilePageStore>, work_dir: &Path, settings: WikiSettings) -> WikiEngine {
    let store: Arc<dyn PageStore> = store.clone();
    WikiEngine::new(store, settings, Some(work_dir)).unwrap()
}

#[test]
fn test_queries_over_directory_store() {
    let dir = TempDir::new().unwrap();
    let store = sample_wiki(dir.path());
    let engine = start(&store, dir.path(), WikiSettings::default());

    assert_eq!(engine.find_referrers("Main"), names(&["About"]));
    assert_eq!(engine.find_referrers("Guide"), names(&["Main"]));
    assert_eq!(engine.find_uncreated(), names(&["Roadmap"]));
    assert_eq!(engine.find_unreferenced(), names(&["Scratch"]));
    assert_eq!(
        engine.find_created(),
        names(&["About", "Guide", "Main", "Scratch"])
    );
    assert!(engine.find_refers_to("Guide").is_empty());
    assert!(snapshot::snapshot_path(dir.path()).exists());
}

#[test]
fn test_render_guide_page() {
    let dir = TempDir::new().unwrap();
    let store = sample_wiki(dir.path());
    let engine = start(&store, dir.path(), WikiSettings::default());

    let page = engine.render_page("Guide").unwrap();

    assert!(page
        .html
        .contains(r#"<h3 id="section-Guide-GettingStarted">Getting started</h3>"#));
    assert!(page.html.contains(
        "<ul>\n<li>install</li>\n<ul>\n<li>configure</li>\n</ul>\n<li>run</li>\n</ul>\n"
    ));
    assert!(page.html.contains("[NotALink]"));
    assert!(!page.html.contains("NotALink</a>"));
    assert_eq!(page.headings.len(), 1);
    assert!(page.toc_html.contains("#section-Guide-GettingStarted"));
}

#[test]
fn test_render_marks_missing_pages() {
    let dir = TempDir::new().unwrap();
    let store = sample_wiki(dir.path());
    let engine = start(&store, dir.path(), WikiSettings::default());

    let html = engine.render_page("Main").unwrap().html;

    assert!(html.contains(r#"<a class="wikipage" href="Wiki.jsp?page=Guide">the guide</a>"#));
    assert!(html.contains(r#"<a class="editpage" href="Edit.jsp?page=Roadmap" title="Create Roadmap">?</a>"#));
    assert!(!html.contains(r#"title="Create About""#));
}

#[test]
fn test_snapshot_survives_restart_and_catches_up() {
    let dir = TempDir::new().unwrap();
    let store = sample_wiki(dir.path());
    drop(start(&store, dir.path(), WikiSettings::default()));

    // Edits made while the engine is down
    thread::sleep(Duration::from_millis(20));
    store.save_text("Scratch", "now linking [Main]", None).unwrap();
    store.delete_page("About").unwrap();

    let engine = start(&store, dir.path(), WikiSettings::default());

    assert_eq!(engine.find_referrers("Main"), names(&["Scratch"]));
    assert_eq!(engine.find_uncreated(), names(&["About", "Roadmap"]));
    assert!(!engine.find_created().contains("About"));
    assert_eq!(engine.find_referrers("About"), names(&["Main"]));
}

#[test]
fn test_corrupt_snapshot_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    let store = sample_wiki(dir.path());
    fs::write(snapshot::snapshot_path(dir.path()), b"\x00\x01garbage").unwrap();

    let engine = start(&store, dir.path(), WikiSettings::default());

    assert_eq!(engine.find_uncreated(), names(&["Roadmap"]));
    assert!(snapshot::try_load(&snapshot::snapshot_path(dir.path()))
        .unwrap()
        .is_some());
}

#[test]
fn test_rename_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = sample_wiki(dir.path());
    store.put_attachment("Guide", "diagram.png", b"png").unwrap();
    store.save_text("Guide", "!! Getting started\nsecond version", None).unwrap();
    let engine = start(&store, dir.path(), WikiSettings::default());

    let renamed = engine.rename_page("Guide", "user guide", true).unwrap();

    assert_eq!(renamed, "UserGuide");
    assert!(!store.page_exists("Guide"));
    assert_eq!(store.page_info("UserGuide").unwrap().version, 2);
    assert!(store.page_text("UserGuide", Some(1)).unwrap().contains("[NotALink]"));
    assert!(store.attachment_exists("UserGuide/diagram.png"));
    assert!(store
        .page_text("Main", None)
        .unwrap()
        .contains("[the guide|UserGuide]"));
    assert_eq!(engine.find_referrers("UserGuide"), names(&["Main"]));
    assert!(engine.find_referrers("Guide").is_empty());

    // The rename is in the snapshot too
    drop(engine);
    let engine = start(&store, dir.path(), WikiSettings::default());
    assert_eq!(engine.find_referrers("UserGuide"), names(&["Main"]));
    assert!(engine.find_refers_to("UserGuide").contains("UserGuide/diagram.png"));
}

#[test]
fn test_rename_onto_existing_page_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    let store = sample_wiki(dir.path());
    let engine = start(&store, dir.path(), WikiSettings::default());

    let err = engine.rename_page("Guide", "About", true).unwrap_err();

    assert!(matches!(err, WikiError::PageExists(_)));
    assert!(store.page_exists("Guide"));
    assert_eq!(
        store.page_text("Main", None).unwrap(),
        "Welcome! See [About], [the guide|Guide] and [Roadmap]."
    );
    assert_eq!(engine.find_referrers("Guide"), names(&["Main"]));
}

#[test]
fn test_settings_file_enables_camel_case_and_plurals() {
    let dir = TempDir::new().unwrap();
    let pages = dir.path().join("pages");
    let settings_path = dir.path().join("wiki.json");
    fs::write(
        &settings_path,
        r#"{ "camel_case_links": true, "match_plurals": true }"#,
    )
    .unwrap();
    let settings = WikiSettings::load(&settings_path).unwrap();

    let store = Arc::new(FilePageStore::open(&pages).unwrap());
    store.save_text("FrontPage", "Read about RustCrates and ~NotLinked.", None).unwrap();
    store.save_text("RustCrate", "One crate.", None).unwrap();
    let engine = start(&store, &pages, settings);

    assert_eq!(engine.find_referrers("RustCrates"), names(&["FrontPage"]));
    assert_eq!(engine.find_referrers("RustCrate"), names(&["FrontPage"]));
    let html = engine.render_page("FrontPage").unwrap().html;
    assert!(html.contains(r#"<a class="wikipage" href="Wiki.jsp?page=RustCrate">RustCrates</a>"#));
    assert!(html.contains("and NotLinked."));
    assert!(!html.contains("page=NotLinked"));
}

#[test]
fn test_save_through_engine_updates_graph_and_history() {
    let dir = TempDir::new().unwrap();
    let store = sample_wiki(dir.path());
    let engine = start(&store, dir.path(), WikiSettings::default());

    engine
        .save_page("Roadmap", "Planned: [Main] and [Scratch]", Some("carol"))
        .unwrap();

    assert!(engine.find_uncreated().is_empty());
    assert_eq!(engine.find_referrers("Scratch"), names(&["Roadmap"]));
    assert!(engine.find_unreferenced().is_empty());
}
