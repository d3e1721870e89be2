//! Link syntax shared by the translator, the reference scanner and the renamer.

use crate::config::{WikiSettings, EXTERNAL_SCHEMES};
use crate::translator::{translate, LinkEvent, LinkKind, RenderContext, TranslatorListener};
use crate::urls::DefaultUrlBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;

/// A bare CamelCase word, optionally escaped with a leading `~`.
pub static CAMEL_WORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(~)?\b([A-Z]+[a-z]+[A-Z]+[A-Za-z0-9]*)\b").unwrap());

/// The inside of a `[...]` span, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpan<'a> {
    pub label: Option<&'a str>,
    pub target: &'a str,
}

impl<'a> LinkSpan<'a> {
    /// `label|target` or just `target`.
    pub fn parse(inner: &'a str) -> Self {
        match inner.split_once('|') {
            Some((label, target)) => LinkSpan {
                label: Some(label.trim()),
                target: target.trim(),
            },
            None => LinkSpan {
                label: None,
                target: inner.trim(),
            },
        }
    }

    pub fn display(&self) -> &'a str {
        self.label.unwrap_or(self.target)
    }
}

pub fn is_external(target: &str) -> bool {
    EXTERNAL_SCHEMES.iter().any(|scheme| {
        target
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// Attachment links name a file filed under a page: `Page/file.ext`.
pub fn is_attachment(target: &str) -> bool {
    target.contains('/') && !is_external(target)
}

/// Splits `Page#section` into the page part and the optional fragment.
pub fn split_fragment(target: &str) -> (&str, Option<&str>) {
    match target.split_once('#') {
        Some((page, fragment)) => (page, Some(fragment)),
        None => (target, None),
    }
}

/// The `[...]` spans of a single line, plus where an unterminated `[` starts.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LineSpans<'a> {
    pub spans: Vec<(usize, usize, &'a str)>,
    pub unterminated: Option<usize>,
}

/// Scans a line for `[...]` spans.
///
/// Each span is `(start, end, inner)` with `start..end` covering the
/// brackets, plugin spans (`[{...}]`) included. `[[` escapes are skipped.
/// Scanning stops at a `[` with no closing `]`.
pub fn scan_line(line: &str) -> LineSpans<'_> {
    let bytes = line.as_bytes();
    let mut found = LineSpans::default();
    let mut pos = 0;
    while let Some(off) = memchr::memchr(b'[', &bytes[pos..]) {
        let start = pos + off;
        if bytes.get(start + 1) == Some(&b'[') {
            pos = start + 2;
            continue;
        }
        let Some(len) = memchr::memchr(b']', &bytes[start + 1..]) else {
            found.unterminated = Some(start);
            break;
        };
        let end = start + 1 + len + 1;
        found.spans.push((start, end, &line[start + 1..end - 1]));
        pos = end;
    }
    found
}

/// The terminated `[...]` spans of a line, as found by [`scan_line`].
pub fn link_spans(line: &str) -> Vec<(usize, usize, &str)> {
    scan_line(line).spans
}

/// Collects the internal link targets reported while translating a page.
#[derive(Default)]
pub struct ReferenceCollector {
    seen: FxHashSet<String>,
    references: Vec<String>,
}

impl ReferenceCollector {
    pub fn into_references(self) -> Vec<String> {
        self.references
    }
}

impl TranslatorListener for ReferenceCollector {
    fn on_link(&mut self, link: &LinkEvent) {
        if matches!(link.kind, LinkKind::External) {
            return;
        }
        if self.seen.insert(link.target.clone()) {
            self.references.push(link.target.clone());
        }
    }
}

/// Page names a page's markup links to, in order of first appearance.
///
/// Runs the translator itself so that what counts as a link here is always
/// what renders as one.
pub fn scan_references(text: &str, settings: &WikiSettings) -> Vec<String> {
    let urls = DefaultUrlBuilder::new(&settings.base_url);
    let ctx = RenderContext::new("", settings, &urls);
    let mut collector = ReferenceCollector::default();
    translate(&ctx, text, &mut [&mut collector]);
    collector.into_references()
}
