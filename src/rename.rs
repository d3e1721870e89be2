//! Page renaming: moves a page and keeps its referrers and the reference
//! graph pointing at the new name.
//!
//! A rename is a sequence of independent steps, not a transaction. Storage
//! failures while moving abort it; trouble with an individual referrer is
//! logged and that referrer is left as it was.

use crate::config::{RenameLockPolicy, WikiSettings};
use crate::error::{Result, WikiError};
use crate::links::{is_attachment, is_external, link_spans, split_fragment, LinkSpan, CAMEL_WORD_REGEX};
use crate::locks::PageLockManager;
use crate::references::ReferenceGraph;
use crate::store::PageStore;
use crate::text::{clean_link, is_camel_case, plural_variant};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const CODE_OPEN: &str = "{{{";
const CODE_CLOSE: &str = "}}}";

/// Author recorded on referrer versions rewritten by a rename
const RENAME_AUTHOR: &str = "PageRenamer";

pub struct PageRenamer {
    store: Arc<dyn PageStore>,
    graph: Arc<ReferenceGraph>,
    locks: Arc<PageLockManager>,
    settings: WikiSettings,
}

impl PageRenamer {
    pub fn new(
        store: Arc<dyn PageStore>,
        graph: Arc<ReferenceGraph>,
        locks: Arc<PageLockManager>,
        settings: WikiSettings,
    ) -> Self {
        Self {
            store,
            graph,
            locks,
            settings,
        }
    }

    /// Renames `old` to the clean form of `new` and returns that clean name.
    ///
    /// With `rewrite_referrers`, every page linking to `old` gets its links
    /// rewritten to the new name.
    pub fn rename(&self, old: &str, new: &str, rewrite_referrers: bool) -> Result<String> {
        let start = Instant::now();
        let requested = new;
        let new = clean_link(requested);
        if new.is_empty() {
            return Err(WikiError::InvalidName(requested.to_string()));
        }
        if !self.store.page_exists(old) {
            return Err(WikiError::PageNotFound(old.to_string()));
        }
        if self.store.page_exists(&new) {
            return Err(WikiError::PageExists(new));
        }

        // Links to the page's attachments are filed under the attachment
        // paths, so their referrers must be gathered before anything moves.
        let mut referrers = BTreeSet::new();
        for attachment in self.store.attachments(old) {
            referrers.extend(self.graph.find_referrers(&attachment));
        }

        self.store.move_page(old, &new)?;
        self.store.move_attachments(old, &new)?;
        self.graph.page_removed(old);

        referrers.extend(self.graph.find_referrers(old));
        referrers.remove(old);
        let mut rewritten = 0usize;
        for referrer in &referrers {
            match self.update_referrer(referrer, old, &new, rewrite_referrers) {
                Ok(true) => rewritten += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(referrer = %referrer, error = %e, "Failed to update referrer; skipping");
                }
            }
        }

        if rewrite_referrers {
            if let Err(e) = self.rewrite_own_links(old, &new) {
                warn!(page = %new, error = %e, "Failed to rewrite links of renamed page");
            }
        }
        self.graph.refresh_page(&new);

        info!(
            from = old,
            to = %new,
            referrers = referrers.len(),
            rewritten = rewritten,
            duration_secs = start.elapsed().as_secs_f64(),
            "Page renamed"
        );
        Ok(new)
    }

    /// Points the renamed page's links to itself at its new name.
    fn rewrite_own_links(&self, old: &str, new: &str) -> Result<()> {
        let text = self
            .store
            .page_text(new, None)
            .ok_or_else(|| WikiError::PageNotFound(new.to_string()))?;
        let store = &self.store;
        let updated = rewrite_references(&text, old, new, &self.settings, &|name| {
            store.page_exists(name)
        });
        if updated != text {
            self.store.save_text(new, &updated, Some(RENAME_AUTHOR))?;
            debug!(page = new, "Own links rewritten");
        }
        Ok(())
    }

    /// Rewrites and saves one referrer, then refreshes its outbound set.
    /// Returns whether its text was changed.
    fn update_referrer(&self, referrer: &str, old: &str, new: &str, rewrite: bool) -> Result<bool> {
        let text = self
            .store
            .page_text(referrer, None)
            .ok_or_else(|| WikiError::PageNotFound(referrer.to_string()))?;

        if !rewrite {
            self.graph.refresh_page(referrer);
            return Ok(false);
        }

        let store = &self.store;
        let updated = rewrite_references(&text, old, new, &self.settings, &|name| {
            store.page_exists(name)
        });
        if updated == text {
            self.graph.refresh_page(referrer);
            return Ok(false);
        }

        if self.locks.current_lock(referrer).is_some() {
            match self.settings.rename_lock_policy {
                RenameLockPolicy::BreakLocks => {
                    self.locks.force_unlock(referrer);
                }
                RenameLockPolicy::SkipLocked => {
                    info!(referrer = referrer, "Referrer is locked for editing; not rewritten");
                    self.graph.refresh_page(referrer);
                    return Ok(false);
                }
            }
        }

        self.store.save_text(referrer, &updated, Some(RENAME_AUTHOR))?;
        self.graph.refresh_page(referrer);
        debug!(referrer = referrer, "Referrer rewritten");
        Ok(true)
    }
}

/// Returns `text` with every link to `old` pointing at `new` instead.
///
/// Handles `[target]`, `[label|target]`, `#fragment` suffixes, attachment
/// paths under `old` and, when enabled, bare CamelCase words. Code blocks,
/// plugin spans and `~`-escaped words are left alone. `exists` decides
/// whether plural folding applies to a name.
pub fn rewrite_references(
    text: &str,
    old: &str,
    new: &str,
    settings: &WikiSettings,
    exists: &dyn Fn(&str) -> bool,
) -> String {
    let rewriter = Rewriter {
        old,
        new,
        settings,
        exists,
    };
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_code = false;
    for line in text.split_inclusive('\n') {
        let mut rest = line;
        loop {
            let marker = if in_code { CODE_CLOSE } else { CODE_OPEN };
            let Some(pos) = rest.find(marker) else {
                if in_code {
                    out.push_str(rest);
                } else {
                    rewriter.segment(rest, &mut out);
                }
                break;
            };
            if in_code {
                out.push_str(&rest[..pos]);
            } else {
                rewriter.segment(&rest[..pos], &mut out);
            }
            out.push_str(marker);
            in_code = !in_code;
            rest = &rest[pos + marker.len()..];
        }
    }
    out
}

struct Rewriter<'r> {
    old: &'r str,
    new: &'r str,
    settings: &'r WikiSettings,
    exists: &'r dyn Fn(&str) -> bool,
}

impl Rewriter<'_> {
    /// Whether a link target written as `name` resolves to the old page.
    fn matches(&self, name: &str) -> bool {
        let name = clean_link(name);
        if name == self.old {
            return true;
        }
        self.settings.match_plurals
            && !(self.exists)(&name)
            && plural_variant(&name).is_some_and(|v| v == self.old)
    }

    fn segment(&self, segment: &str, out: &mut String) {
        let mut last = 0;
        for (start, end, inner) in link_spans(segment) {
            self.words(&segment[last..start], out);
            match self.span(inner) {
                Some(replacement) => out.push_str(&replacement),
                None => out.push_str(&segment[start..end]),
            }
            last = end;
        }
        self.words(&segment[last..], out);
    }

    /// The replacement for a `[...]` span, or `None` to keep it.
    fn span(&self, inner: &str) -> Option<String> {
        if inner.starts_with('{') || inner.trim().is_empty() {
            return None;
        }
        let link = LinkSpan::parse(inner);
        if is_external(link.target) {
            return None;
        }

        let (page_part, fragment) = split_fragment(link.target);
        let target = if is_attachment(page_part) {
            let (page, file) = page_part.split_once('/')?;
            if !self.matches(page) {
                return None;
            }
            format!("{}/{}", self.new, file)
        } else {
            if page_part.trim().is_empty() || !self.matches(page_part) {
                return None;
            }
            match fragment {
                Some(fragment) => format!("{}#{}", self.new, fragment),
                None => self.new.to_string(),
            }
        };

        Some(match link.label {
            Some(label) => format!("[{}|{}]", label, target),
            None => format!("[{}]", target),
        })
    }

    /// Rewrites bare CamelCase words in text outside of `[...]` spans.
    fn words(&self, text: &str, out: &mut String) {
        if !self.settings.camel_case_links {
            out.push_str(text);
            return;
        }
        let mut last = 0;
        for caps in CAMEL_WORD_REGEX.captures_iter(text) {
            let (Some(whole), Some(word)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            if caps.get(1).is_some() || !self.matches(word.as_str()) {
                continue;
            }
            out.push_str(&text[last..whole.start()]);
            if is_camel_case(self.new) {
                out.push_str(self.new);
            } else {
                out.push('[');
                out.push_str(self.new);
                out.push(']');
            }
            last = whole.end();
        }
        out.push_str(&text[last..]);
    }
}
