use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;
use simplelog::{Config, WriteLogger};

use panelcache::navigation::BookNavigator;
use panelcache::panic_handler::initialize_panic_handler;
use panelcache::settings::{LogLevel, SettingsStore};
use panelcache::cache::WorkerPool;

const LOG_FILENAME: &str = "panelcache.log";

/// Open a comic book archive and page through it with background prefetch
#[derive(Parser, Debug)]
#[command(name = "panelcache", version, about)]
struct Cli {
    /// Comic book archive (.cbz, .zip, .cbr or .rar)
    archive: PathBuf,

    /// Page to show first, counting from 1
    #[arg(short, long, default_value_t = 1)]
    page: usize,

    /// Page forward to the end, then print cache statistics
    #[arg(long)]
    walk: bool,

    /// Print the archive's ComicInfo metadata
    #[arg(long)]
    info: bool,

    /// Settings file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// debug, info or error; overrides the settings file
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Keep settings and log in the working directory
    #[arg(long)]
    portable: bool,
}

fn log_path(cli: &Cli) -> PathBuf {
    if let Some(path) = &cli.log_file {
        return path.clone();
    }
    if !cli.portable {
        if let Some(dir) = dirs::cache_dir() {
            return dir.join("panelcache").join(LOG_FILENAME);
        }
    }
    PathBuf::from(LOG_FILENAME)
}

fn init_logging(cli: &Cli, settings: &SettingsStore) -> Result<()> {
    let path = log_path(cli);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
    }
    let level = cli.log_level.unwrap_or_else(|| settings.log_level());
    WriteLogger::init(
        level.level_filter(),
        Config::default(),
        File::create(&path).with_context(|| format!("failed to create {}", path.display()))?,
    )?;
    Ok(())
}

fn print_spread(nav: &BookNavigator) {
    let pages = nav.displayed_pages();
    let label = match pages.as_slice() {
        [single] => format!("Page {single}"),
        [first, .., last] => format!("Pages {first}-{last}"),
        [] => return,
    };
    let (width, height) = nav.display_size();
    println!("{label} of {}: {width}x{height}", nav.page_count());
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_panic_handler();

    let settings = match &cli.config {
        Some(path) => SettingsStore::load_from_path(path),
        None => SettingsStore::load(cli.portable),
    };
    init_logging(&cli, &settings)?;
    info!("Starting panelcache");

    let pool = WorkerPool::new(settings.worker_threads())
        .context("failed to start page loader threads")?;
    let mut nav = BookNavigator::open(&cli.archive, settings, pool)
        .with_context(|| format!("failed to open {}", cli.archive.display()))?;

    if cli.info {
        match nav.comic_info().filter(|info| info.has_info()) {
            Some(info) => {
                for line in info.info_lines() {
                    println!("{line}");
                }
            }
            None => println!("No book info"),
        }
    }

    let start = cli.page.saturating_sub(1);
    if !nav.go_to_page(start)? {
        bail!(
            "page {} is out of range, {} has {} pages",
            cli.page,
            cli.archive.display(),
            nav.page_count()
        );
    }
    print_spread(&nav);

    if cli.walk {
        while nav.next_page()? {
            print_spread(&nav);
        }
        nav.cache().wait_until_idle(Duration::from_secs(10));
        println!("Cache: {}", nav.cache().stats());
        println!("Cached pages: {:?}", nav.cache().cached_indices());
    }

    nav.cache().close();
    info!("Shutting down panelcache");
    Ok(())
}
