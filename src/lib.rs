//! Wikiforge: the core of a server-rendered wiki
//!
//! This crate turns wiki markup into HTML and keeps track of which pages link
//! to which:
//!
//! 1. **Translation** -- A one-pass, line-oriented translator renders markup to HTML,
//!    tracking list nesting and code blocks and reporting headings and links to listeners
//! 2. **Reference tracking** -- A bidirectional link graph answers who links to a page,
//!    which pages are missing and which nobody links to
//! 3. **Renaming** -- Pages are moved together with their attachments, and every page
//!    linking to them is rewritten to the new name
//!
//! # Architecture
//!
//! - **One canonical name folding** -- [`text::clean_link`] is shared by rendering,
//!   scanning and renaming so they always agree on what a link points at
//! - **Scanning through the translator** -- References are collected by a translator
//!   listener, so whatever renders as a link is tracked as one
//! - **Coarse locking** -- The graph keeps both link maps behind a single mutex
//! - **Snapshot on disk** -- A versioned bincode snapshot lets restarts rescan only the
//!   pages modified since it was written
//! - **Parallel rebuild** -- Page scans run on rayon; results are applied under one lock
//!
//! # Key Modules
//!
//! - [`translator`] -- Markup to HTML, listeners, table of contents
//! - [`links`] -- Link syntax helpers and reference scanning
//! - [`references`] -- The reference graph
//! - [`rename`] -- Page renaming and link rewriting
//! - [`snapshot`] -- Reference graph persistence
//! - [`locks`] -- Edit locks and their reaper
//! - [`plugins`] -- Plugin invocation and the built-in listing plugins
//! - [`store`] -- The page storage interface with memory and directory providers
//! - [`engine`] -- Everything wired together behind one facade
//! - [`text`] -- Escaping, URL encoding and page name folding
//! - [`urls`] -- View, edit and attachment URLs
//! - [`models`] -- Shared data types
//! - [`config`] -- Settings and constants
//! - [`error`] -- The error type
//!
//! # Example Usage
//!
//! ```bash
//! # Render a page from a directory of pages
//! wikiforge --pages wiki/ render MainPage --toc
//!
//! # Pages linked to but never written
//! wikiforge --pages wiki/ uncreated --json
//!
//! # Rename a page and fix every link to it
//! wikiforge --pages wiki/ rename OldPage "New Page"
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod links;
pub mod locks;
pub mod models;
pub mod plugins;
pub mod references;
pub mod rename;
pub mod snapshot;
pub mod store;
pub mod text;
pub mod translator;
pub mod urls;
