//! Command-line interface for the DBÖ backend.
//!
//! Runs the REST API and the batch jobs: importing TEI dumps, linking
//! places, importing the place authority and (re)building the search index.

use clap::{Args, Parser, Subcommand};
use colored::*;
use dboe_backend::{
    Dboe, Settings, SyncOptions,
    api::{self, AppState},
    error::Result,
    parse::import_files,
    progress::{ProgressCallback, ProgressUpdate},
    search::{DEFAULT_BATCH_SIZE, index_all},
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{LevelFilter, error, info};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "DBÖ dictionary backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    settings: Settings,

    /// Set verbosity level (use -v, -vv, or -vvv for increasing verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Child records synced on import. Without any flag, all of them are.
#[derive(Args, Debug, Default)]
struct SyncFlags {
    /// Sync citations (Kontexte)
    #[arg(long)]
    citations: bool,
    /// Sync additional lemmas of the citations
    #[arg(long)]
    zusatz_lemma: bool,
    /// Sync Lautungen
    #[arg(long)]
    lautungen: bool,
    /// Sync Lehnwörter
    #[arg(long)]
    lehnwoerter: bool,
    /// Sync senses (Bedeutungen)
    #[arg(long)]
    senses: bool,
    /// Sync notes on the pronunciation
    #[arg(long)]
    anmerkungen_lautung: bool,
}

impl SyncFlags {
    fn options(&self) -> SyncOptions {
        let selected = SyncOptions {
            citations: self.citations,
            zusatz_lemma: self.zusatz_lemma,
            lautungen: self.lautungen,
            lehnwoerter: self.lehnwoerter,
            senses: self.senses,
            anmerkungen_lautung: self.anmerkungen_lautung,
        };
        if selected == SyncOptions::none() {
            SyncOptions::all()
        } else {
            selected
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the REST API
    Serve,
    /// Import Belege from TEI dumps (plain or gzipped)
    Import {
        /// TEI files to import
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Delete all stored rows before importing
        #[arg(long, default_value_t = false)]
        force_reload: bool,
        #[command(flatten)]
        sync: SyncFlags,
    },
    /// Link every Beleg to the places named in its TEI entry
    LinkPlaces,
    /// Import the place authority (Bundesländer, regions, places) from JSON
    ImportPlaces {
        /// JSON file with the place records
        file: PathBuf,
    },
    /// Send every Beleg to the search index
    Index {
        /// Number of Belege per bulk request
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Also write each batch as JSON into this directory
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// Clear the DBÖ database
    ClearDb,
}

/// Sets up logging based on verbosity level.
fn setup_logging(verbose: u8, debug: bool) {
    let mut log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if debug && log_level < LevelFilter::Debug {
        log_level = LevelFilter::Debug;
    }

    env_logger::Builder::new()
        .filter(None, log_level)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}

/// Creates a progress callback drawing one bar per stage.
fn create_progress_callback(
    multi_progress: MultiProgress,
    progress_bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
) -> ProgressCallback {
    Box::new(move |update: ProgressUpdate| {
        let Ok(mut bars) = progress_bars.lock() else {
            return true;
        };

        if update.current_item == 0 && !bars.contains_key(&update.stage_description) {
            let pb = multi_progress.add(ProgressBar::new(update.total_items.unwrap_or(0)));
            let style_template = if update.total_items.is_some() {
                "{prefix:>12.cyan.bold} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} ({percent}%) {msg}"
            } else {
                "{prefix:>12.cyan.bold} [{elapsed_precise}] {spinner} {msg}"
            };
            let style = ProgressStyle::default_bar()
                .template(style_template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-");
            pb.set_style(style);
            pb.set_prefix(update.stage_description.clone());
            pb.set_message(update.message.unwrap_or_default());
            pb.enable_steady_tick(Duration::from_millis(100));
            bars.insert(update.stage_description.clone(), pb);
        } else if let Some(pb) = bars.get(&update.stage_description) {
            pb.set_position(update.current_item);
            if let Some(msg) = update.message {
                pb.set_message(msg);
            }
            if let Some(total) = update.total_items {
                if update.current_item >= total {
                    pb.finish_and_clear();
                }
            }
        }
        true
    })
}

/// Bars shared by the callback and the final cleanup.
struct Progress {
    multi: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
}

impl Progress {
    fn new() -> Self {
        Progress {
            multi: MultiProgress::new(),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn callback(&self) -> ProgressCallback {
        create_progress_callback(self.multi.clone(), Arc::clone(&self.bars))
    }

    fn finish(self) {
        if let Ok(bars) = self.bars.lock() {
            for pb in bars.values() {
                pb.finish_and_clear();
            }
        }
        std::io::stdout().flush().ok();
    }
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    error!("{}: {}", context, e);
    eprintln!("{}", format!("Error {}: {}", context, e).red());
    std::process::exit(1);
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.settings.debug);
    let settings = cli.settings;

    match cli.command {
        Commands::Serve => {
            let dboe = settings
                .open_store()
                .unwrap_or_else(|e| fail("opening database", e));
            let state = AppState::new(dboe, settings);
            if let Err(e) = api::serve(state).await {
                fail("serving API", e);
            }
        }
        Commands::Import {
            files,
            force_reload,
            sync,
        } => {
            let dboe = Dboe::open_with_options(settings.open_options(force_reload))
                .unwrap_or_else(|e| fail("opening database", e));
            let progress = Progress::new();
            let result =
                import_files(&dboe, &files, sync.options(), Some(progress.callback())).await;
            progress.finish();
            match result {
                Ok(stats) => println!(
                    "{} {} Belege saved, {} failed.",
                    "Import finished:".green(),
                    stats.saved,
                    stats.failed
                ),
                Err(e) => fail("importing", e),
            }
        }
        Commands::LinkPlaces => {
            let dboe = settings
                .open_store()
                .unwrap_or_else(|e| fail("opening database", e));
            let progress = Progress::new();
            let callback = progress.callback();
            let result =
                tokio::task::spawn_blocking(move || dboe.link_places(Some(callback))).await;
            progress.finish();
            match result {
                Ok(Ok(linked)) => {
                    println!("{} places linked for {} Belege.", "Done:".green(), linked)
                }
                Ok(Err(e)) => fail("linking places", e),
                Err(e) => fail("linking places", e),
            }
        }
        Commands::ImportPlaces { file } => {
            let dboe = settings
                .open_store()
                .unwrap_or_else(|e| fail("opening database", e));
            let json = tokio::fs::read_to_string(&file)
                .await
                .unwrap_or_else(|e| fail("reading place file", e));
            let progress = Progress::new();
            let callback = progress.callback();
            let result =
                tokio::task::spawn_blocking(move || dboe.import_places(&json, Some(callback)))
                    .await;
            progress.finish();
            match result {
                Ok(Ok(summary)) => println!(
                    "{} {} places created, {} hierarchy links set.",
                    "Done:".green(),
                    summary.created,
                    summary.linked
                ),
                Ok(Err(e)) => fail("importing places", e),
                Err(e) => fail("importing places", e),
            }
        }
        Commands::Index { batch_size, dump } => {
            let dboe = settings
                .open_store()
                .unwrap_or_else(|e| fail("opening database", e));
            let client = settings.index_client();
            let progress = Progress::new();
            let result = index_all(
                &dboe,
                client.as_ref(),
                batch_size,
                dump.as_deref(),
                Some(progress.callback()),
            )
            .await;
            progress.finish();
            match result {
                Ok(summary) => println!(
                    "{} {} processed, {} indexed, {} failed, {} files written.",
                    "Indexing finished:".green(),
                    summary.processed,
                    summary.indexed,
                    summary.failed,
                    summary.files.len()
                ),
                Err(e) => fail("indexing", e),
            }
        }
        Commands::ClearDb => {
            info!("Clearing database...");
            let db_path_to_clear = match settings.db_path {
                Some(path) => Some(path),
                None => Dboe::get_default_db_path().ok(),
            };
            match Dboe::clear_database(db_path_to_clear) {
                Ok(_) => println!("{}", "Database cleared successfully.".green()),
                Err(e) => fail("clearing database", e),
            }
        }
    }

    Ok(())
}
