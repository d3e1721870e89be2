//! Wiki markup to HTML, one line at a time.
//!
//! The translator keeps three pieces of state while it walks a page: the
//! current `<ul>` depth, the current `<ol>` depth and whether it is inside a
//! `{{{ ... }}}` code block. Inside a code block only HTML escaping applies.
//! Outside it, each line goes through, in order:
//!
//! 1. list markers (`*`, `#`), headings (`!!!`, `!!`, `!`) and rules (`----`)
//! 2. HTML escaping and hyperlink detection (`[label|target]`)
//! 3. bold (`__`), italic (`''`), teletype (`{{ }}`) and line breaks (`\\`)
//!
//! Listeners see every heading and every link as the page is walked, which
//! is how tables of contents and page references are built without a second
//! parse.

use crate::config::{WikiSettings, MAX_INCLUDE_DEPTH};
use crate::error::{Result, WikiError};
use crate::links::{
    is_attachment, is_external, scan_line, split_fragment, LinkSpan, CAMEL_WORD_REGEX,
};
use crate::models::{Heading, HeadingLevel};
use crate::plugins::PluginHost;
use crate::store::PageStore;
use crate::text::{clean_link, escape_attribute, escape_html, normalize_line_endings, plural_variant};
use crate::urls::UrlBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::fmt::Write;
use tracing::debug;

static BOLD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.+?)__").unwrap());

static ITALIC_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"''(.+?)''").unwrap());

static TELETYPE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(.+?)\}\}").unwrap());

/// Private-use placeholder for generated markup inside a segment.
const ANCHOR: char = '\u{E000}';

const CODE_OPEN: &str = "{{{";
const CODE_CLOSE: &str = "}}}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Internal { exists: bool },
    Attachment { exists: bool },
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    /// Clean page name for internal links, the raw target otherwise
    pub target: String,
    pub kind: LinkKind,
}

/// Callbacks fired while a page is translated.
pub trait TranslatorListener {
    fn on_heading(&mut self, _heading: &Heading) {}
    fn on_link(&mut self, _link: &LinkEvent) {}
}

/// Everything the translator needs to know about the page being rendered.
pub struct RenderContext<'a> {
    pub page: String,
    pub settings: &'a WikiSettings,
    pub urls: &'a dyn UrlBuilder,
    /// Without a store every link is treated as pointing at an existing page.
    pub store: Option<&'a dyn PageStore>,
    pub plugins: Option<&'a PluginHost>,
    /// Pages whose rendering led to this one, outermost first
    pub include_chain: Vec<String>,
}

impl<'a> RenderContext<'a> {
    pub fn new(page: &str, settings: &'a WikiSettings, urls: &'a dyn UrlBuilder) -> Self {
        Self {
            page: page.to_string(),
            settings,
            urls,
            store: None,
            plugins: None,
            include_chain: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: &'a dyn PageStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_plugins(mut self, plugins: &'a PluginHost) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Context for rendering `page` inside the current one.
    pub fn nested(&self, page: &str) -> Result<RenderContext<'a>> {
        if page == self.page
            || self.include_chain.iter().any(|p| p == page)
            || self.include_chain.len() >= MAX_INCLUDE_DEPTH
        {
            return Err(WikiError::CircularInclusion(page.to_string()));
        }
        let mut include_chain = self.include_chain.clone();
        include_chain.push(self.page.clone());
        Ok(RenderContext {
            page: page.to_string(),
            include_chain,
            ..*self
        })
    }

    /// Whether `name` exists, and the name a link to it should point at.
    fn resolve_page(&self, name: &str) -> (bool, String) {
        let Some(store) = self.store else {
            return (true, name.to_string());
        };
        if store.page_exists(name) {
            return (true, name.to_string());
        }
        if self.settings.match_plurals {
            if let Some(variant) = plural_variant(name).filter(|v| store.page_exists(v)) {
                return (true, variant);
            }
        }
        (false, name.to_string())
    }

    fn attachment_exists(&self, path: &str) -> bool {
        self.store.is_none_or(|store| store.attachment_exists(path))
    }
}

/// Anchor id of a heading titled `title` on `page`.
pub fn heading_anchor(page: &str, title: &str) -> String {
    let page = clean_link(page);
    if page.is_empty() {
        format!("section-{}", clean_link(title))
    } else {
        format!("section-{}-{}", page, clean_link(title))
    }
}

/// Translates one page of wiki markup into HTML.
pub fn translate(
    ctx: &RenderContext<'_>,
    text: &str,
    listeners: &mut [&mut dyn TranslatorListener],
) -> String {
    let text = normalize_line_endings(text);
    let mut translator = Translator {
        ctx,
        out: String::with_capacity(text.len() + text.len() / 4),
        ul_depth: 0,
        ol_depth: 0,
        in_code: false,
    };
    for line in text.lines() {
        translator.line(line, listeners);
    }
    translator.finish()
}

#[derive(Clone, Copy)]
enum ListKind {
    Unordered,
    Ordered,
}

impl ListKind {
    fn tag(self) -> &'static str {
        match self {
            ListKind::Unordered => "ul",
            ListKind::Ordered => "ol",
        }
    }
}

struct Translator<'c, 'a> {
    ctx: &'c RenderContext<'a>,
    out: String,
    ul_depth: usize,
    ol_depth: usize,
    in_code: bool,
}

impl Translator<'_, '_> {
    fn finish(mut self) -> String {
        self.set_list_depth(ListKind::Unordered, 0);
        self.set_list_depth(ListKind::Ordered, 0);
        if self.in_code {
            debug!(page = %self.ctx.page, "Unterminated code block closed at end of page");
            self.out.push_str("</pre>\n");
        }
        self.out
    }

    fn line(&mut self, line: &str, listeners: &mut [&mut dyn TranslatorListener]) {
        let mut rest = line;
        let mut at_start = true;
        loop {
            if self.in_code {
                match rest.find(CODE_CLOSE) {
                    Some(pos) => {
                        self.out.push_str(&escape_html(&rest[..pos]));
                        self.out.push_str("</pre>");
                        self.in_code = false;
                        rest = &rest[pos + CODE_CLOSE.len()..];
                    }
                    None => {
                        self.out.push_str(&escape_html(rest));
                        self.out.push('\n');
                        return;
                    }
                }
            } else {
                match rest.find(CODE_OPEN) {
                    Some(pos) => {
                        self.block(&rest[..pos], at_start, false, listeners);
                        self.out.push_str("<pre>");
                        self.in_code = true;
                        rest = &rest[pos + CODE_OPEN.len()..];
                    }
                    None => {
                        self.block(rest, at_start, at_start, listeners);
                        self.out.push('\n');
                        return;
                    }
                }
            }
            at_start = false;
        }
    }

    /// Handles one stretch of markup outside code; block-level syntax only
    /// counts when the stretch begins the line.
    fn block(
        &mut self,
        segment: &str,
        at_start: bool,
        whole_line: bool,
        listeners: &mut [&mut dyn TranslatorListener],
    ) {
        if !at_start {
            let html = self.inline(segment, listeners);
            self.out.push_str(&html);
            return;
        }

        if let Some((kind, depth)) = list_marker(segment) {
            match kind {
                ListKind::Unordered => self.set_list_depth(ListKind::Ordered, 0),
                ListKind::Ordered => self.set_list_depth(ListKind::Unordered, 0),
            }
            self.set_list_depth(kind, depth);
            let html = self.inline(segment[depth..].trim_start(), listeners);
            let _ = write!(self.out, "<li>{}</li>", html);
            return;
        }
        self.set_list_depth(ListKind::Unordered, 0);
        self.set_list_depth(ListKind::Ordered, 0);

        if whole_line && segment.trim().is_empty() {
            self.out.push_str("<p />");
            return;
        }

        if let Some((level, title)) = heading_marker(segment) {
            let heading = Heading {
                level,
                title: title.to_string(),
                anchor: heading_anchor(&self.ctx.page, title),
            };
            for listener in listeners.iter_mut() {
                listener.on_heading(&heading);
            }
            let html = self.inline(title, listeners);
            let tag = level.html_tag();
            let _ = write!(
                self.out,
                r#"<{} id="{}">{}</{}>"#,
                tag,
                escape_attribute(&heading.anchor),
                html,
                tag
            );
            return;
        }

        if segment.starts_with("----") {
            self.out.push_str("<hr />");
            let html = self.inline(segment.trim_start_matches('-'), listeners);
            self.out.push_str(&html);
            return;
        }

        let html = self.inline(segment, listeners);
        self.out.push_str(&html);
    }

    fn set_list_depth(&mut self, kind: ListKind, target: usize) {
        let depth = match kind {
            ListKind::Unordered => &mut self.ul_depth,
            ListKind::Ordered => &mut self.ol_depth,
        };
        while *depth < target {
            let _ = writeln!(self.out, "<{}>", kind.tag());
            *depth += 1;
        }
        while *depth > target {
            let _ = writeln!(self.out, "</{}>", kind.tag());
            *depth -= 1;
        }
    }

    /// Inline markup of one segment.
    ///
    /// Generated anchors and plugin output stand in as [`ANCHOR`] while the
    /// formatting regexes run, so they never touch hrefs.
    fn inline(&self, raw: &str, listeners: &mut [&mut dyn TranslatorListener]) -> String {
        let mut anchors = Vec::new();
        let text = self.hyperlinks(raw, &mut anchors, listeners);
        splice_anchors(&format_inline(&text), anchors)
    }

    /// Escapes `raw` and turns its `[...]` spans into anchor placeholders.
    fn hyperlinks(
        &self,
        raw: &str,
        anchors: &mut Vec<String>,
        listeners: &mut [&mut dyn TranslatorListener],
    ) -> String {
        let found = scan_line(raw);
        let mut out = String::with_capacity(raw.len() + 32);
        let mut last = 0;
        for (start, end, inner) in found.spans {
            self.plain_text(&raw[last..start], &mut out, anchors, listeners);
            let mut html = String::new();
            self.link_span(inner, &mut html, listeners);
            push_anchor(&mut out, anchors, html);
            last = end;
        }
        match found.unterminated {
            Some(start) => {
                self.plain_text(&raw[last..start], &mut out, anchors, listeners);
                debug!(page = %self.ctx.page, text = &raw[start..], "Unterminated link span");
                out.push_str(&escape_html(&without_anchors(&raw[start..])));
            }
            None => self.plain_text(&raw[last..], &mut out, anchors, listeners),
        }
        out
    }

    /// Text between spans. `[[` stands for a literal `[`.
    fn plain_text(
        &self,
        raw: &str,
        out: &mut String,
        anchors: &mut Vec<String>,
        listeners: &mut [&mut dyn TranslatorListener],
    ) {
        let raw = without_anchors(raw).replace("[[", "[");
        if !self.ctx.settings.camel_case_links {
            out.push_str(&escape_html(&raw));
            return;
        }
        let mut last = 0;
        for caps in CAMEL_WORD_REGEX.captures_iter(&raw) {
            let (Some(whole), Some(word)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            out.push_str(&escape_html(&raw[last..whole.start()]));
            if caps.get(1).is_some() {
                out.push_str(&escape_html(word.as_str()));
            } else {
                let mut html = String::new();
                self.internal_link(word.as_str(), word.as_str(), None, &mut html, listeners);
                push_anchor(out, anchors, html);
            }
            last = whole.end();
        }
        out.push_str(&escape_html(&raw[last..]));
    }

    fn link_span(&self, inner: &str, out: &mut String, listeners: &mut [&mut dyn TranslatorListener]) {
        if let Some(body) = inner.strip_prefix('{') {
            self.plugin(inner, body.strip_suffix('}').unwrap_or(body), out);
            return;
        }
        if inner.trim().is_empty() {
            let _ = write!(out, "[{}]", escape_html(inner));
            return;
        }

        let link = LinkSpan::parse(inner);
        let label = link.display();

        if is_external(link.target) {
            notify_link(listeners, link.target.to_string(), LinkKind::External);
            let _ = write!(
                out,
                r#"<a class="external" href="{}">{}</a>"#,
                escape_attribute(link.target),
                format_inline(&escape_html(label))
            );
            return;
        }

        let (page_part, fragment) = split_fragment(link.target);
        if is_attachment(page_part) {
            let exists = self.ctx.attachment_exists(page_part);
            notify_link(listeners, page_part.to_string(), LinkKind::Attachment { exists });
            let class = if exists { "attachment" } else { "missingattachment" };
            let _ = write!(
                out,
                r#"<a class="{}" href="{}">{}</a>"#,
                class,
                escape_attribute(&self.ctx.urls.attachment_url(page_part)),
                format_inline(&escape_html(label))
            );
            return;
        }

        if page_part.trim().is_empty() {
            if let Some(fragment) = fragment {
                let _ = write!(
                    out,
                    r##"<a class="wikipage" href="#{}">{}</a>"##,
                    escape_attribute(&heading_anchor(&self.ctx.page, fragment)),
                    format_inline(&escape_html(label))
                );
                return;
            }
        }

        self.internal_link(label, page_part, fragment, out, listeners);
    }

    fn internal_link(
        &self,
        label: &str,
        target: &str,
        fragment: Option<&str>,
        out: &mut String,
        listeners: &mut [&mut dyn TranslatorListener],
    ) {
        let name = clean_link(target);
        if name.is_empty() {
            debug!(page = %self.ctx.page, target = target, "Link target folds to an empty name");
            let _ = write!(out, "[{}]", escape_html(label));
            return;
        }
        let (exists, href_name) = self.ctx.resolve_page(&name);
        notify_link(listeners, name.clone(), LinkKind::Internal { exists });

        let mut href = self.ctx.urls.view_url(&href_name);
        if let Some(fragment) = fragment {
            href.push('#');
            href.push_str(&heading_anchor(&href_name, fragment));
        }
        let _ = write!(
            out,
            r#"<a class="wikipage" href="{}">{}</a>"#,
            escape_attribute(&href),
            format_inline(&escape_html(label))
        );
        if !exists {
            let _ = write!(
                out,
                r#"<a class="editpage" href="{}" title="Create {}">?</a>"#,
                escape_attribute(&self.ctx.urls.edit_url(&name)),
                escape_attribute(&name)
            );
        }
    }

    fn plugin(&self, span: &str, body: &str, out: &mut String) {
        match self.ctx.plugins {
            Some(host) => out.push_str(&host.execute(self.ctx, body.trim())),
            None => {
                let _ = write!(out, "[{}]", escape_html(span));
            }
        }
    }
}

/// Bold, italic, teletype and `\\` breaks over already escaped text.
fn format_inline(html: &str) -> String {
    let html = BOLD_REGEX.replace_all(html, "<b>${1}</b>");
    let html = ITALIC_REGEX.replace_all(&html, "<i>${1}</i>");
    let html = TELETYPE_REGEX.replace_all(&html, "<tt>${1}</tt>");
    html.replace(r"\\", "<br />")
}

fn push_anchor(out: &mut String, anchors: &mut Vec<String>, html: String) {
    out.push(ANCHOR);
    anchors.push(html);
}

/// Replaces each [`ANCHOR`] with the next stored anchor, in order.
fn splice_anchors(text: &str, anchors: Vec<String>) -> String {
    if anchors.is_empty() {
        return text.to_string();
    }
    let mut anchors = anchors.into_iter();
    let mut out = String::with_capacity(text.len() + 64);
    let mut rest = text;
    while let Some(idx) = rest.find(ANCHOR) {
        out.push_str(&rest[..idx]);
        out.push_str(&anchors.next().unwrap_or_default());
        rest = &rest[idx + ANCHOR.len_utf8()..];
    }
    out.push_str(rest);
    out
}

fn without_anchors(raw: &str) -> Cow<'_, str> {
    if raw.contains(ANCHOR) {
        Cow::Owned(raw.replace(ANCHOR, ""))
    } else {
        Cow::Borrowed(raw)
    }
}

fn notify_link(listeners: &mut [&mut dyn TranslatorListener], target: String, kind: LinkKind) {
    let event = LinkEvent { target, kind };
    for listener in listeners.iter_mut() {
        listener.on_link(&event);
    }
}

fn list_marker(segment: &str) -> Option<(ListKind, usize)> {
    let bytes = segment.as_bytes();
    let (kind, marker) = match bytes.first()? {
        b'*' => (ListKind::Unordered, b'*'),
        b'#' => (ListKind::Ordered, b'#'),
        _ => return None,
    };
    Some((kind, bytes.iter().take_while(|b| **b == marker).count()))
}

fn heading_marker(segment: &str) -> Option<(HeadingLevel, &str)> {
    let bangs = segment.bytes().take_while(|b| *b == b'!').count();
    let level = match bangs {
        0 => return None,
        1 => HeadingLevel::Small,
        2 => HeadingLevel::Medium,
        _ => HeadingLevel::Large,
    };
    Some((level, segment[bangs.min(3)..].trim()))
}

/// Listener that gathers headings into a table of contents.
#[derive(Debug, Default)]
pub struct TocBuilder {
    headings: Vec<Heading>,
}

impl TocBuilder {
    pub fn headings(&self) -> &[Heading] {
        &self.headings
    }

    pub fn render_html(&self) -> String {
        if self.headings.is_empty() {
            return String::new();
        }
        let mut html = String::from("<div class=\"toc\">\n<ul>\n");
        for heading in &self.headings {
            let _ = writeln!(
                html,
                r##"<li class="toclevel-{}"><a href="#{}">{}</a></li>"##,
                heading.level.depth() + 1,
                escape_attribute(&heading.anchor),
                escape_html(&heading.title)
            );
        }
        html.push_str("</ul>\n</div>\n");
        html
    }
}

impl TranslatorListener for TocBuilder {
    fn on_heading(&mut self, heading: &Heading) {
        self.headings.push(heading.clone());
    }
}
