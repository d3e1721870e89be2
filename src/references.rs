//! Bidirectional page link graph.
//!
//! Two maps are kept in step under one mutex:
//!
//! - `refers_to` -- for every page scanned so far, the names it links to
//! - `referred_by` -- for every existing or referenced name, the pages linking to it
//!
//! A name that is referenced but has no page is "uncreated"; an existing page
//! nobody links to is "unreferenced". Entries for names that neither exist nor
//! are linked from anywhere are dropped as soon as their last referrer goes.
//!
//! After every mutation the graph is written to a snapshot so the next start
//! only rescans pages modified since then. Failing to write it is logged and
//! otherwise ignored; the in-memory graph stays authoritative.

use crate::config::WikiSettings;
use crate::error::Result;
use crate::links::{is_attachment, scan_references};
use crate::models::{now_millis, PageInfo};
use crate::snapshot::{self, LinkMap};
use crate::store::PageStore;
use crate::text::plural_variant;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Default)]
struct GraphState {
    refers_to: LinkMap,
    referred_by: LinkMap,
}

pub struct ReferenceGraph {
    state: Mutex<GraphState>,
    store: Arc<dyn PageStore>,
    settings: WikiSettings,
    snapshot_path: Option<PathBuf>,
}

impl ReferenceGraph {
    /// `snapshot_path` of `None` keeps the graph purely in memory.
    pub fn new(
        store: Arc<dyn PageStore>,
        settings: WikiSettings,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
            store,
            settings,
            snapshot_path,
        }
    }

    fn guard(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Restores the graph from the snapshot and rescans pages changed since,
    /// or rebuilds it from every page when there is no usable snapshot.
    pub fn initialize(&self) -> Result<()> {
        let start = Instant::now();
        let pages = self.store.all_pages()?;

        let restored = match &self.snapshot_path {
            Some(path) => snapshot::try_load(path).unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read reference snapshot");
                None
            }),
            None => None,
        };

        let Some(restored) = restored else {
            self.rebuild(&pages);
            info!(
                pages = pages.len(),
                duration_secs = start.elapsed().as_secs_f64(),
                "Reference graph rebuilt from page content"
            );
            return Ok(());
        };

        let stale: Vec<&PageInfo> = pages
            .iter()
            .filter(|p| {
                p.last_modified > restored.timestamp || !restored.refers_to.contains_key(&p.name)
            })
            .collect();
        let rescanned = self.scan_pages(&stale);

        let known: FxHashSet<&str> = pages.iter().map(|p| p.name.as_str()).collect();
        let mut state = self.guard();
        state.refers_to = restored.refers_to;
        state.referred_by = restored.referred_by;

        let vanished: Vec<String> = state
            .refers_to
            .keys()
            .filter(|name| !known.contains(name.as_str()))
            .cloned()
            .collect();
        for name in &vanished {
            self.remove_locked(&mut state, name);
        }
        for info in &pages {
            state.referred_by.entry(info.name.clone()).or_default();
        }
        for (name, references) in rescanned {
            self.update_locked(&mut state, &name, references);
        }

        info!(
            pages = pages.len(),
            rescanned = stale.len(),
            vanished = vanished.len(),
            duration_secs = start.elapsed().as_secs_f64(),
            "Reference graph restored from snapshot"
        );
        self.persist(&state);
        Ok(())
    }

    fn rebuild(&self, pages: &[PageInfo]) {
        let all: Vec<&PageInfo> = pages.iter().collect();
        let scanned = self.scan_pages(&all);

        let mut state = self.guard();
        *state = GraphState::default();
        for info in pages {
            state.referred_by.entry(info.name.clone()).or_default();
        }
        for (name, references) in scanned {
            self.update_locked(&mut state, &name, references);
        }
        self.persist(&state);
    }

    /// Scans pages in parallel; pages that vanished meanwhile are skipped.
    fn scan_pages(&self, pages: &[&PageInfo]) -> Vec<(String, FxHashSet<String>)> {
        pages
            .par_iter()
            .filter_map(|info| {
                let text = self.store.page_text(&info.name, None)?;
                Some((info.name.clone(), self.outbound_references(&info.name, &text)))
            })
            .collect()
    }

    /// Everything `page` refers to: the links in its markup plus its attachments.
    pub fn outbound_references(&self, page: &str, text: &str) -> FxHashSet<String> {
        let mut references: FxHashSet<String> =
            scan_references(text, &self.settings).into_iter().collect();
        references.extend(self.store.attachments(page));
        references
    }

    /// Rescans `text` and replaces the outbound set of `page` with the result.
    pub fn update_from_text(&self, page: &str, text: &str) {
        let references = self.outbound_references(page, text);
        self.update_references(page, references);
    }

    /// Re-reads the stored text of `page` and refreshes its outbound set.
    ///
    /// The read happens under the graph lock, so after concurrent saves of
    /// one page the last refresh always reflects the last stored version.
    pub fn refresh_page(&self, page: &str) {
        let mut state = self.guard();
        match self.store.page_text(page, None) {
            Some(text) => {
                let references = self.outbound_references(page, &text);
                self.update_locked(&mut state, page, references);
            }
            None => self.remove_locked(&mut state, page),
        }
        self.persist(&state);
    }

    /// Replaces the outbound set of `page` and fixes up the inbound sets.
    ///
    /// Calling this twice with the same arguments leaves the same state as
    /// calling it once.
    pub fn update_references<I>(&self, page: &str, references: I)
    where
        I: IntoIterator<Item = String>,
    {
        let references: FxHashSet<String> = references.into_iter().collect();
        let mut state = self.guard();
        self.update_locked(&mut state, page, references);
        self.persist(&state);
    }

    fn update_locked(&self, state: &mut GraphState, page: &str, references: FxHashSet<String>) {
        let previous = state
            .refers_to
            .insert(page.to_string(), references.clone());
        state.referred_by.entry(page.to_string()).or_default();

        if let Some(previous) = previous {
            for name in previous.iter().filter(|n| n.as_str() != page) {
                self.unlink_locked(state, page, name);
            }
        }

        for name in references.into_iter().filter(|n| n != page) {
            state
                .referred_by
                .entry(name)
                .or_default()
                .insert(page.to_string());
        }
        debug!(page = page, "References updated");
    }

    /// Drops `referrer` from the inbound set of `name`, forgetting `name`
    /// entirely once nothing links to it and it does not exist.
    fn unlink_locked(&self, state: &mut GraphState, referrer: &str, name: &str) {
        let Some(inbound) = state.referred_by.get_mut(name) else {
            return;
        };
        inbound.remove(referrer);
        if inbound.is_empty() && !self.exists(name) {
            state.referred_by.remove(name);
        }
    }

    fn remove_locked(&self, state: &mut GraphState, page: &str) {
        if let Some(previous) = state.refers_to.remove(page) {
            for name in previous.iter().filter(|n| n.as_str() != page) {
                self.unlink_locked(state, page, name);
            }
        }
        let unreferenced = state.referred_by.get(page).is_none_or(|s| s.is_empty());
        if unreferenced && !self.exists(page) {
            state.referred_by.remove(page);
        }
    }

    /// Forgets the outbound references of a page that was deleted or moved
    /// away. Its inbound entry survives while other pages still link to it.
    pub fn page_removed(&self, page: &str) {
        let mut state = self.guard();
        self.remove_locked(&mut state, page);
        debug!(page = page, "Page removed from reference graph");
        self.persist(&state);
    }

    fn exists(&self, name: &str) -> bool {
        if is_attachment(name) {
            self.store.attachment_exists(name)
        } else {
            self.store.page_exists(name)
        }
    }

    fn persist(&self, state: &GraphState) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        if let Err(e) = snapshot::save(path, now_millis(), &state.refers_to, &state.referred_by) {
            warn!(error = %e, "Failed to save reference snapshot");
        }
    }

    /// Pages linking to `page`. With plural matching on, a miss retries the
    /// singular/plural variant of the name.
    pub fn find_referrers(&self, page: &str) -> BTreeSet<String> {
        let state = self.guard();
        if let Some(found) = state.referred_by.get(page).filter(|s| !s.is_empty()) {
            return found.iter().cloned().collect();
        }
        if self.settings.match_plurals {
            if let Some(found) = plural_variant(page).and_then(|v| state.referred_by.get(&v)) {
                return found.iter().cloned().collect();
            }
        }
        BTreeSet::new()
    }

    /// Names `page` links to, as of its last scan.
    pub fn find_refers_to(&self, page: &str) -> BTreeSet<String> {
        self.guard()
            .refers_to
            .get(page)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn find_unreferenced(&self) -> BTreeSet<String> {
        self.guard()
            .referred_by
            .iter()
            .filter(|(_, inbound)| inbound.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn find_uncreated(&self) -> BTreeSet<String> {
        let state = self.guard();
        let mut uncreated = BTreeSet::new();
        for name in state.refers_to.values().flatten() {
            if !uncreated.contains(name) && !self.exists(name) {
                uncreated.insert(name.clone());
            }
        }
        uncreated
    }

    pub fn find_created(&self) -> BTreeSet<String> {
        self.guard().refers_to.keys().cloned().collect()
    }

    /// Copies of both maps, for consistency checks and diagnostics.
    pub fn export(&self) -> (FxHashMap<String, FxHashSet<String>>, FxHashMap<String, FxHashSet<String>>) {
        let state = self.guard();
        (state.refers_to.clone(), state.referred_by.clone())
    }
}
