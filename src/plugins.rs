//! Plugin invocations embedded in page markup as `[{Name key=value ...}]`.
//!
//! The host resolves the plugin by name (the `Plugin` suffix is optional),
//! parses the parameters and splices the plugin's HTML into the page. A
//! failing plugin renders as an error span; the rest of the page is unaffected.

use crate::error::{Result, WikiError};
use crate::references::ReferenceGraph;
use crate::text::{clean_link, escape_html};
use crate::translator::{translate, RenderContext};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

const PLUGIN_SUFFIX: &str = "Plugin";

/// Separator placed between the entries of a page listing unless overridden.
const DEFAULT_SEPARATOR: &str = ", ";

pub trait Plugin: Send + Sync {
    fn execute(&self, ctx: &RenderContext<'_>, params: &PluginParams) -> Result<String>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PluginParams {
    values: FxHashMap<String, String>,
}

impl PluginParams {
    /// Parses `key=value key2='quoted value'`.
    pub fn parse(plugin: &str, input: &str) -> Result<Self> {
        let malformed = |message: String| WikiError::Plugin {
            name: plugin.to_string(),
            message,
        };

        let mut values = FxHashMap::default();
        let mut rest = input.trim_start();
        while !rest.is_empty() {
            let Some((key, after)) = rest.split_once('=') else {
                return Err(malformed(format!("parameter without value: {}", rest)));
            };
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(malformed(format!("malformed parameter name: {:?}", key)));
            }

            let after = after.trim_start();
            let (value, remaining) = if let Some(quoted) = after.strip_prefix('\'') {
                let Some(end) = quoted.find('\'') else {
                    return Err(malformed(format!("unterminated quote in parameter {}", key)));
                };
                (&quoted[..end], &quoted[end + 1..])
            } else {
                let end = after.find(char::is_whitespace).unwrap_or(after.len());
                (&after[..end], &after[end..])
            };

            values.insert(key.to_string(), value.to_string());
            rest = remaining.trim_start();
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'p>(&'p self, key: &str, default: &'p str) -> &'p str {
        self.get(key).unwrap_or(default)
    }

    fn number(&self, plugin: &str, key: &str) -> Result<Option<usize>> {
        self.get(key)
            .map(|raw| {
                raw.parse().map_err(|_| WikiError::Plugin {
                    name: plugin.to_string(),
                    message: format!("{} must be a number, got {:?}", key, raw),
                })
            })
            .transpose()
    }
}

/// Registry of the plugins a page may invoke.
#[derive(Default)]
pub struct PluginHost {
    plugins: FxHashMap<String, Arc<dyn Plugin>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host with the page listing and inclusion plugins registered.
    pub fn with_builtins(graph: Arc<ReferenceGraph>) -> Self {
        let mut host = Self::new();
        host.register(
            "ReferringPagesPlugin",
            Arc::new(ReferringPagesPlugin {
                graph: Arc::clone(&graph),
            }),
        );
        host.register(
            "UndefinedPagesPlugin",
            Arc::new(UndefinedPagesPlugin {
                graph: Arc::clone(&graph),
            }),
        );
        host.register("UnusedPagesPlugin", Arc::new(UnusedPagesPlugin { graph }));
        host.register("InsertPage", Arc::new(InsertPagePlugin));
        host
    }

    /// Registers under `name` stripped of any `Plugin` suffix.
    pub fn register(&mut self, name: &str, plugin: Arc<dyn Plugin>) {
        let key = name.strip_suffix(PLUGIN_SUFFIX).unwrap_or(name);
        self.plugins.insert(key.to_string(), plugin);
    }

    fn resolve(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        let key = name.strip_suffix(PLUGIN_SUFFIX).unwrap_or(name);
        self.plugins.get(key)
    }

    /// Runs the invocation `body` (the text between `[{` and `}]`).
    pub fn run(&self, ctx: &RenderContext<'_>, body: &str) -> Result<String> {
        let body = body.trim();
        let (name, params) = body
            .split_once(char::is_whitespace)
            .unwrap_or((body, ""));
        let plugin = self.resolve(name).ok_or_else(|| WikiError::Plugin {
            name: name.to_string(),
            message: "no such plugin".to_string(),
        })?;
        let params = PluginParams::parse(name, params)?;
        plugin.execute(ctx, &params)
    }

    /// Like [`PluginHost::run`] but renders failures as an error span.
    pub fn execute(&self, ctx: &RenderContext<'_>, body: &str) -> String {
        match self.run(ctx, body) {
            Ok(html) => html,
            Err(e) => {
                warn!(page = %ctx.page, error = %e, "Plugin invocation failed");
                format!(r#"<span class="error">{}</span>"#, escape_html(&e.to_string()))
            }
        }
    }
}

/// Renders `names` as page links joined by the `separator` parameter,
/// keeping at most `max` entries.
fn render_listing(
    plugin: &str,
    ctx: &RenderContext<'_>,
    params: &PluginParams,
    names: BTreeSet<String>,
) -> Result<String> {
    let max = params.number(plugin, "max")?;
    let separator = params.get_or("separator", DEFAULT_SEPARATOR);
    let total = names.len();

    let mut markup: Vec<String> = names
        .into_iter()
        .take(max.unwrap_or(usize::MAX))
        .map(|name| format!("[{}]", name))
        .collect();
    if markup.len() < total {
        markup.push(format!("and {} more", total - markup.len()));
    }

    // The listing goes through the translator so links carry the usual
    // existence decoration. Its own spans never contain plugins.
    let html = translate(ctx, &markup.join(separator), &mut []);
    Ok(html.trim_end().to_string())
}

/// Pages linking to `page` (default: the page being rendered).
pub struct ReferringPagesPlugin {
    graph: Arc<ReferenceGraph>,
}

impl Plugin for ReferringPagesPlugin {
    fn execute(&self, ctx: &RenderContext<'_>, params: &PluginParams) -> Result<String> {
        let page = params
            .get("page")
            .map(clean_link)
            .unwrap_or_else(|| ctx.page.clone());
        let referrers = self.graph.find_referrers(&page);
        render_listing("ReferringPages", ctx, params, referrers)
    }
}

/// Pages that are linked to but do not exist.
pub struct UndefinedPagesPlugin {
    graph: Arc<ReferenceGraph>,
}

impl Plugin for UndefinedPagesPlugin {
    fn execute(&self, ctx: &RenderContext<'_>, params: &PluginParams) -> Result<String> {
        render_listing("UndefinedPages", ctx, params, self.graph.find_uncreated())
    }
}

/// Pages no other page links to.
pub struct UnusedPagesPlugin {
    graph: Arc<ReferenceGraph>,
}

impl Plugin for UnusedPagesPlugin {
    fn execute(&self, ctx: &RenderContext<'_>, params: &PluginParams) -> Result<String> {
        render_listing("UnusedPages", ctx, params, self.graph.find_unreferenced())
    }
}

/// Renders another page inline.
pub struct InsertPagePlugin;

impl Plugin for InsertPagePlugin {
    fn execute(&self, ctx: &RenderContext<'_>, params: &PluginParams) -> Result<String> {
        let page = params
            .get("page")
            .map(clean_link)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| WikiError::Plugin {
                name: "InsertPage".to_string(),
                message: "missing parameter: page".to_string(),
            })?;

        let nested = ctx.nested(&page)?;
        let text = ctx
            .store
            .and_then(|store| store.page_text(&page, None))
            .ok_or_else(|| WikiError::PageNotFound(page.clone()))?;

        let html = translate(&nested, &text, &mut []);
        Ok(format!(r#"<div class="inserted-page">{}</div>"#, html))
    }
}
