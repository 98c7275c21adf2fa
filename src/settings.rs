use log::{LevelFilter, debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "panelcache";

/// Verbosity written to the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }

    pub fn level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}' (expected debug, info or error)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Pages loaded ahead of the displayed ones
    #[serde(default = "default_cache_range")]
    pub cache_ahead_count: usize,

    /// Pages loaded behind the displayed ones
    #[serde(default = "default_cache_range")]
    pub cache_behind_count: usize,

    /// Slack beyond the load range before a cached page is dropped
    #[serde(default = "default_cache_range")]
    pub uncache_extra_range: usize,

    #[serde(default = "default_true")]
    pub show_two_pages: bool,

    #[serde(default = "default_gap")]
    pub gap_between_pages: u32,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_cache_range() -> usize {
    2
}

fn default_gap() -> u32 {
    5
}

fn default_worker_threads() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            cache_ahead_count: default_cache_range(),
            cache_behind_count: default_cache_range(),
            uncache_extra_range: default_cache_range(),
            show_two_pages: true,
            gap_between_pages: default_gap(),
            worker_threads: default_worker_threads(),
            log_level: LogLevel::default(),
            library_path: None,
        }
    }
}

/// The three values that shape the prefetch window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub cache_ahead_count: usize,
    pub cache_behind_count: usize,
    pub uncache_extra_range: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Settings::default().cache_settings()
    }
}

impl Settings {
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            cache_ahead_count: self.cache_ahead_count,
            cache_behind_count: self.cache_behind_count,
            uncache_extra_range: self.uncache_extra_range,
        }
    }
}

/// Where the config file lives: the OS config dir, or the working directory
/// in portable mode.
pub fn config_path(portable: bool) -> Option<PathBuf> {
    if portable {
        return std::env::current_dir()
            .ok()
            .map(|dir| dir.join(SETTINGS_FILENAME));
    }
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Shared, live-editable settings.
///
/// Clones share the same underlying values, so a change made through one
/// handle is seen by every cache and navigator holding another.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    inner: Arc<RwLock<Settings>>,
    path: Option<Arc<PathBuf>>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
            path: None,
        }
    }

    /// Load from the default location, creating the file with defaults if
    /// it does not exist yet.
    pub fn load(portable: bool) -> Self {
        match config_path(portable) {
            Some(path) => Self::load_from_path(path),
            None => {
                warn!("Could not determine config directory, using default settings");
                Self::default()
            }
        }
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = if path.exists() {
            read_settings(&path)
        } else {
            info!("Settings file not found, creating with defaults at {path:?}");
            let settings = Settings::default();
            save_settings_to_file(&settings, &path);
            settings
        };
        Self {
            inner: Arc::new(RwLock::new(settings)),
            path: Some(Arc::new(path)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    /// Write the current values back to the file this store was loaded from
    pub fn save(&self) {
        let Some(path) = self.path() else {
            debug!("Settings have no backing file, not saving");
            return;
        };
        save_settings_to_file(&self.read(), path);
    }

    pub fn save_to_path(&self, path: &Path) {
        save_settings_to_file(&self.read(), path);
    }

    fn read(&self) -> RwLockReadGuard<'_, Settings> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Settings {
        self.read().clone()
    }

    /// Apply `f` to the settings in place
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut settings);
    }

    pub fn cache_settings(&self) -> CacheSettings {
        self.inner
            .read()
            .map(|s| s.cache_settings())
            .unwrap_or_default()
    }

    pub fn show_two_pages(&self) -> bool {
        self.inner.read().map(|s| s.show_two_pages).unwrap_or(true)
    }

    pub fn set_show_two_pages(&self, show: bool) {
        self.update(|s| s.show_two_pages = show);
    }

    pub fn gap_between_pages(&self) -> u32 {
        self.inner
            .read()
            .map(|s| s.gap_between_pages)
            .unwrap_or_else(|_| default_gap())
    }

    pub fn worker_threads(&self) -> usize {
        self.inner
            .read()
            .map(|s| s.worker_threads)
            .unwrap_or_else(|_| default_worker_threads())
    }

    pub fn log_level(&self) -> LogLevel {
        self.inner.read().map(|s| s.log_level).unwrap_or_default()
    }

    pub fn library_path(&self) -> Option<PathBuf> {
        self.inner
            .read()
            .map(|s| s.library_path.clone())
            .unwrap_or_default()
    }

    pub fn set_cache_ahead_count(&self, count: usize) {
        self.update(|s| s.cache_ahead_count = count);
    }

    pub fn set_cache_behind_count(&self, count: usize) {
        self.update(|s| s.cache_behind_count = count);
    }

    pub fn set_uncache_extra_range(&self, range: usize) {
        self.update(|s| s.uncache_extra_range = range);
    }
}

fn read_settings(path: &Path) -> Settings {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                Settings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
            Settings::default()
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // v1 allowed a zero-sized worker pool
    if settings.version < 2 && settings.worker_threads == 0 {
        settings.worker_threads = default_worker_threads();
    }

    settings.version = CURRENT_VERSION;
}

fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n\n", settings.version));

    content.push_str("# Number of pages loaded in the background after the displayed ones\n");
    content.push_str(&format!(
        "cache_ahead_count: {}\n",
        settings.cache_ahead_count
    ));
    content.push_str("# Number of pages loaded in the background before the displayed ones\n");
    content.push_str(&format!(
        "cache_behind_count: {}\n",
        settings.cache_behind_count
    ));
    content.push_str("# Extra pages kept beyond the load range before they are dropped\n");
    content.push_str(&format!(
        "uncache_extra_range: {}\n\n",
        settings.uncache_extra_range
    ));

    content.push_str("# Show two pages side by side when they fit\n");
    content.push_str(&format!("show_two_pages: {}\n", settings.show_two_pages));
    content.push_str("# Gap in pixels between pages shown side by side\n");
    content.push_str(&format!(
        "gap_between_pages: {}\n\n",
        settings.gap_between_pages
    ));

    content.push_str("# Background threads decoding pages\n");
    content.push_str(&format!("worker_threads: {}\n", settings.worker_threads));
    content.push_str("# One of: debug, info, error\n");
    content.push_str(&format!("log_level: {}\n", settings.log_level.as_str()));

    if let Some(library) = &settings.library_path {
        // Paths may hold quotes, backslashes or `#`; let serde_yaml quote them
        match serde_yaml::to_string(library) {
            Ok(scalar) => {
                content.push_str("\n# Default folder to open archives from\n");
                content.push_str(&format!("library_path: {scalar}"));
            }
            Err(e) => warn!("Not saving library path {library:?}: {e}"),
        }
    }

    content
}
