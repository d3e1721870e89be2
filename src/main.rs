use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use wikiforge::config::WikiSettings;
use wikiforge::engine::WikiEngine;
use wikiforge::snapshot;
use wikiforge::store::{FilePageStore, PageStore};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikiforge")]
#[command(about = "Render wiki pages and maintain the links between them")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    wiki: WikiArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct WikiArgs {
    /// Directory holding the page files
    #[arg(short, long, global = true, default_value = ".")]
    pages: PathBuf,

    /// Directory for the reference snapshot (defaults to the page directory)
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// JSON settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page to HTML on stdout
    Render {
        page: String,
        /// Prepend the table of contents
        #[arg(long)]
        toc: bool,
    },
    /// List the pages linking to a page
    Referrers { page: String },
    /// List the pages a page links to
    RefersTo { page: String },
    /// List pages that are linked to but do not exist
    Uncreated,
    /// List existing pages nothing links to
    Unreferenced,
    /// Rename a page, rewriting the links of its referrers
    Rename {
        old: String,
        new: String,
        /// Move the page but leave referring pages untouched
        #[arg(long)]
        no_rewrite: bool,
    },
    /// Discard the reference snapshot and rescan every page
    Rebuild,
    /// Store the contents of a file as a new version of a page
    Save {
        page: String,
        file: PathBuf,
        /// Author recorded on the new version
        #[arg(long)]
        author: Option<String>,
    },
    /// Delete a page
    Delete { page: String },
}

fn open_store(args: &WikiArgs) -> Result<FilePageStore> {
    FilePageStore::open(&args.pages)
        .with_context(|| format!("Failed to open page directory: {:?}", args.pages))
}

/// The snapshot goes in `--work-dir`, or next to the pages.
fn work_dir(args: &WikiArgs, store: &FilePageStore) -> PathBuf {
    args.work_dir
        .clone()
        .unwrap_or_else(|| store.root().to_path_buf())
}

fn start_engine(args: &WikiArgs, store: FilePageStore) -> Result<WikiEngine> {
    let settings = match &args.config {
        Some(path) => WikiSettings::load(path)?,
        None => WikiSettings::default(),
    };
    let work_dir = work_dir(args, &store);
    let store: Arc<dyn PageStore> = Arc::new(store);
    WikiEngine::new(store, settings, Some(work_dir.as_path()))
        .context("Failed to start wiki engine")
}

fn open_engine(args: &WikiArgs) -> Result<WikiEngine> {
    start_engine(args, open_store(args)?)
}

fn print_names(names: &BTreeSet<String>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(names)?);
    } else {
        for name in names {
            println!("{}", name);
        }
    }
    Ok(())
}

fn run_rebuild(args: &WikiArgs) -> Result<()> {
    let store = open_store(args)?;
    snapshot::remove(&snapshot::snapshot_path(&work_dir(args, &store)))?;

    let start = Instant::now();
    let engine = start_engine(args, store)?;
    let pages = engine.find_created().len();
    let uncreated = engine.find_uncreated().len();
    info!(
        duration_secs = start.elapsed().as_secs_f64(),
        "Reference graph rebuilt"
    );

    if args.json {
        let summary = serde_json::json!({ "pages": pages, "uncreated": uncreated });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Pages scanned:   {}", pages);
        println!("Uncreated pages: {}", uncreated);
    }
    Ok(())
}

fn run_save(args: &WikiArgs, page: &str, file: &Path, author: Option<&str>) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read page source: {:?}", file))?;
    let engine = open_engine(args)?;
    engine.save_page(page, &text, author)?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let args = &cli.wiki;
    match cli.command {
        Commands::Render { page, toc } => {
            let rendered = open_engine(args)?.render_page(&page)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&rendered)?);
                return Ok(());
            }
            if toc {
                print!("{}", rendered.toc_html);
            }
            print!("{}", rendered.html);
        }
        Commands::Referrers { page } => {
            print_names(&open_engine(args)?.find_referrers(&page), args.json)?;
        }
        Commands::RefersTo { page } => {
            print_names(&open_engine(args)?.find_refers_to(&page), args.json)?;
        }
        Commands::Uncreated => print_names(&open_engine(args)?.find_uncreated(), args.json)?,
        Commands::Unreferenced => {
            print_names(&open_engine(args)?.find_unreferenced(), args.json)?;
        }
        Commands::Rename {
            old,
            new,
            no_rewrite,
        } => {
            let renamed = open_engine(args)?.rename_page(&old, &new, !no_rewrite)?;
            println!("{}", renamed);
        }
        Commands::Rebuild => run_rebuild(args)?,
        Commands::Save { page, file, author } => {
            run_save(args, &page, &file, author.as_deref())?;
        }
        Commands::Delete { page } => open_engine(args)?.delete_page(&page)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
