//! The wiki core wired together: one store, one reference graph, one lock
//! table and the plugins, shared by every request.

use crate::config::{WikiSettings, LOCK_REAPER_INTERVAL_SECS};
use crate::error::{Result, WikiError};
use crate::locks::{PageLockManager, ReaperHandle};
use crate::models::{Heading, PageLock};
use crate::plugins::PluginHost;
use crate::references::ReferenceGraph;
use crate::rename::PageRenamer;
use crate::snapshot::snapshot_path;
use crate::store::PageStore;
use crate::text::clean_link;
use crate::translator::{translate, RenderContext, TocBuilder};
use crate::urls::DefaultUrlBuilder;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// HTML of a rendered page plus the headings met along the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedPage {
    pub html: String,
    pub headings: Vec<Heading>,
    pub toc_html: String,
}

pub struct WikiEngine {
    store: Arc<dyn PageStore>,
    graph: Arc<ReferenceGraph>,
    locks: Arc<PageLockManager>,
    plugins: PluginHost,
    urls: DefaultUrlBuilder,
    renamer: PageRenamer,
    settings: WikiSettings,
    reaper: Option<ReaperHandle>,
}

impl WikiEngine {
    /// Builds the engine and initializes the reference graph, restoring it
    /// from `work_dir` when a snapshot is there.
    pub fn new(
        store: Arc<dyn PageStore>,
        settings: WikiSettings,
        work_dir: Option<&Path>,
    ) -> Result<Self> {
        let graph = Arc::new(ReferenceGraph::new(
            Arc::clone(&store),
            settings.clone(),
            work_dir.map(snapshot_path),
        ));
        graph.initialize()?;

        let locks = Arc::new(PageLockManager::new(Duration::from_secs(
            settings.lock_expiry_minutes * 60,
        )));
        let renamer = PageRenamer::new(
            Arc::clone(&store),
            Arc::clone(&graph),
            Arc::clone(&locks),
            settings.clone(),
        );

        Ok(Self {
            plugins: PluginHost::with_builtins(Arc::clone(&graph)),
            urls: DefaultUrlBuilder::new(&settings.base_url),
            store,
            graph,
            locks,
            renamer,
            settings,
            reaper: None,
        })
    }

    /// Starts sweeping expired edit locks in the background.
    pub fn start_lock_reaper(&mut self) {
        if self.reaper.is_none() {
            let interval = Duration::from_secs(LOCK_REAPER_INTERVAL_SECS);
            self.reaper = Some(self.locks.spawn_reaper(interval));
            debug!(interval_secs = LOCK_REAPER_INTERVAL_SECS, "Lock reaper started");
        }
    }

    /// Stores a new version of `name` and refreshes its references from
    /// whatever version is current once the graph lock is held.
    pub fn save_page(&self, name: &str, text: &str, author: Option<&str>) -> Result<()> {
        self.store.save_text(name, text, author)?;
        self.graph.refresh_page(name);
        info!(page = name, bytes = text.len(), "Page saved");
        Ok(())
    }

    pub fn render_page(&self, name: &str) -> Result<RenderedPage> {
        let text = self
            .store
            .page_text(name, None)
            .ok_or_else(|| WikiError::PageNotFound(name.to_string()))?;
        Ok(self.render_text(name, &text))
    }

    /// Renders `text` as if it were the content of `page`, e.g. for previews.
    pub fn render_text(&self, page: &str, text: &str) -> RenderedPage {
        let ctx = RenderContext::new(page, &self.settings, &self.urls)
            .with_store(self.store.as_ref())
            .with_plugins(&self.plugins);
        let mut toc = TocBuilder::default();
        let html = translate(&ctx, text, &mut [&mut toc]);
        RenderedPage {
            html,
            toc_html: toc.render_html(),
            headings: toc.headings().to_vec(),
        }
    }

    /// Deletes the page and its outbound references. Links to it remain and
    /// make it show up as uncreated.
    pub fn delete_page(&self, name: &str) -> Result<()> {
        self.store.delete_page(name)?;
        self.graph.page_removed(name);
        self.locks.force_unlock(name);
        info!(page = name, "Page deleted");
        Ok(())
    }

    pub fn rename_page(&self, old: &str, new: &str, rewrite_referrers: bool) -> Result<String> {
        self.renamer.rename(old, new, rewrite_referrers)
    }

    pub fn lock_page(&self, page: &str, user: &str) -> Option<PageLock> {
        self.locks.lock_page(page, user)
    }

    pub fn unlock_page(&self, lock: &PageLock) -> bool {
        self.locks.unlock_page(lock)
    }

    pub fn current_lock(&self, page: &str) -> Option<PageLock> {
        self.locks.current_lock(page)
    }

    pub fn active_locks(&self) -> Vec<PageLock> {
        self.locks.active_locks()
    }

    /// Referrers of the page a piece of link text points at.
    pub fn find_referrers(&self, link: &str) -> BTreeSet<String> {
        self.graph.find_referrers(&clean_link(link))
    }

    pub fn find_refers_to(&self, page: &str) -> BTreeSet<String> {
        self.graph.find_refers_to(page)
    }

    pub fn find_uncreated(&self) -> BTreeSet<String> {
        self.graph.find_uncreated()
    }

    pub fn find_unreferenced(&self) -> BTreeSet<String> {
        self.graph.find_unreferenced()
    }

    pub fn find_created(&self) -> BTreeSet<String> {
        self.graph.find_created()
    }
}
