//! Runtime configuration.
//!
//! Settings layer the same way throughout: environment variables override the
//! config file (`config.toml` in the app data directory), which overrides
//! built-in defaults. Cost-model weights and thresholds are deliberately
//! configuration rather than constants; the performance-report feedback loop
//! is how their values get validated.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default worker pool size for the coordinator.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Default per-file size cap. Files above this are reported as too large.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default selectivity assumed for a filter with no learned statistics.
pub const DEFAULT_SELECTIVITY: f64 = 0.5;

/// Default estimated-cost threshold above which query results are cached.
pub const DEFAULT_CACHE_COST_THRESHOLD: f64 = 250.0;

/// Default capacity of the query result cache (entries).
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default smoothing factor for selectivity feedback.
pub const DEFAULT_EMA_ALPHA: f64 = 0.3;

/// Default relative error above which an estimate is flagged as inaccurate.
pub const DEFAULT_MISESTIMATE_TOLERANCE: f64 = 0.5;

/// Default number of times a filter combination must be seen before the
/// advisor suggests a composite index for it.
pub const DEFAULT_SUGGESTION_MIN_OCCURRENCES: u64 = 10;

/// Default number of performance reports retained for observability.
pub const DEFAULT_REPORT_HISTORY: usize = 256;

/// Cost units per second of wall-clock execution, used to convert measured
/// latency into the cost model's unitless scale (1 unit per millisecond).
pub const DEFAULT_COST_UNITS_PER_SEC: f64 = 1000.0;

/// Per-run indexing options. Immutable once a run starts.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub recursive: bool,
    /// Include globs; empty means everything.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size: u64,
    pub follow_symlinks: bool,
    /// Reindex even when the content fingerprint is unchanged.
    pub force: bool,
    /// Upper bound on in-flight tasks for this run.
    pub max_concurrent: usize,
    /// Retain every per-file result in the batch, not just failures.
    pub keep_results: bool,
    /// Optional deadline applied to each task of the run.
    pub task_deadline: Option<Duration>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            include: Vec::new(),
            exclude: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            follow_symlinks: false,
            force: false,
            max_concurrent: DEFAULT_MAX_WORKERS,
            keep_results: false,
            task_deadline: None,
        }
    }
}

/// Construction-time configuration for the index coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Standing worker pool size.
    pub max_workers: usize,
    /// Priority given to batch tasks and schedule_reindex calls that don't
    /// specify one.
    pub default_priority: i32,
    /// Where the fingerprint cache persists; `None` keeps it in memory only.
    pub fingerprint_cache: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            default_priority: 0,
            fingerprint_cache: None,
        }
    }
}

/// Tunables for the query optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub cpu_weight: f64,
    pub io_weight: f64,
    pub memory_weight: f64,
    pub default_selectivity: f64,
    pub cache_cost_threshold: f64,
    pub cache_capacity: usize,
    pub ema_alpha: f64,
    pub misestimate_tolerance: f64,
    pub suggestion_min_occurrences: u64,
    pub report_history: usize,
    pub cost_units_per_sec: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            io_weight: 1.0,
            memory_weight: 0.25,
            default_selectivity: DEFAULT_SELECTIVITY,
            cache_cost_threshold: DEFAULT_CACHE_COST_THRESHOLD,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            ema_alpha: DEFAULT_EMA_ALPHA,
            misestimate_tolerance: DEFAULT_MISESTIMATE_TOLERANCE,
            suggestion_min_occurrences: DEFAULT_SUGGESTION_MIN_OCCURRENCES,
            report_history: DEFAULT_REPORT_HISTORY,
            cost_units_per_sec: DEFAULT_COST_UNITS_PER_SEC,
        }
    }
}

/// Config file format (TOML), located at `<app data>/symdex/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub coordinator: CoordinatorConfigFile,
    #[serde(default)]
    pub optimizer: OptimizerConfigFile,
}

/// Coordinator section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoordinatorConfigFile {
    pub max_workers: Option<usize>,
    pub default_priority: Option<i32>,
}

/// Optimizer section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptimizerConfigFile {
    pub cpu_weight: Option<f64>,
    pub io_weight: Option<f64>,
    pub memory_weight: Option<f64>,
    pub default_selectivity: Option<f64>,
    pub cache_cost_threshold: Option<f64>,
    pub cache_capacity: Option<usize>,
    pub ema_alpha: Option<f64>,
    pub misestimate_tolerance: Option<f64>,
    pub suggestion_min_occurrences: Option<u64>,
}

impl ConfigFile {
    /// Returns None if the file doesn't exist or can't be parsed.
    fn load_from_file() -> Option<ConfigFile> {
        let config_path = app_data_dir().ok()?.join("config.toml");
        if !config_path.exists() {
            return None;
        }
        let content = fs::read_to_string(&config_path).ok()?;
        toml::from_str(&content).ok()
    }
}

impl CoordinatorConfig {
    /// Load with priority: environment variables > config file > defaults.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(file) = ConfigFile::load_from_file() {
            if let Some(v) = file.coordinator.max_workers {
                config.max_workers = v.max(1);
            }
            if let Some(v) = file.coordinator.default_priority {
                config.default_priority = v;
            }
        }

        if let Ok(val) = std::env::var("SYMDEX_MAX_WORKERS") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_workers = n.max(1);
            }
        }

        config
    }
}

impl OptimizerConfig {
    /// Load with priority: environment variables > config file > defaults.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(file) = ConfigFile::load_from_file() {
            let o = file.optimizer;
            if let Some(v) = o.cpu_weight {
                config.cpu_weight = v;
            }
            if let Some(v) = o.io_weight {
                config.io_weight = v;
            }
            if let Some(v) = o.memory_weight {
                config.memory_weight = v;
            }
            if let Some(v) = o.default_selectivity {
                config.default_selectivity = v.clamp(f64::EPSILON, 1.0);
            }
            if let Some(v) = o.cache_cost_threshold {
                config.cache_cost_threshold = v;
            }
            if let Some(v) = o.cache_capacity {
                config.cache_capacity = v.max(1);
            }
            if let Some(v) = o.ema_alpha {
                config.ema_alpha = v.clamp(0.0, 1.0);
            }
            if let Some(v) = o.misestimate_tolerance {
                config.misestimate_tolerance = v;
            }
            if let Some(v) = o.suggestion_min_occurrences {
                config.suggestion_min_occurrences = v;
            }
        }

        if let Ok(val) = std::env::var("SYMDEX_CACHE_COST_THRESHOLD") {
            if let Ok(v) = val.parse() {
                config.cache_cost_threshold = v;
            }
        }
        if let Ok(val) = std::env::var("SYMDEX_DEFAULT_SELECTIVITY") {
            if let Ok(v) = val.parse::<f64>() {
                config.default_selectivity = v.clamp(f64::EPSILON, 1.0);
            }
        }
        if let Ok(val) = std::env::var("SYMDEX_SUGGESTION_MIN_OCCURRENCES") {
            if let Ok(v) = val.parse() {
                config.suggestion_min_occurrences = v;
            }
        }

        config
    }
}

/// Application data directory (`~/.local/share/symdex` on Linux).
pub fn app_data_dir() -> io::Result<PathBuf> {
    let base = dirs::data_local_dir()
        .ok_or_else(|| io::Error::other("could not determine app data directory"))?;
    let dir = base.join("symdex");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Location of the persisted fingerprint cache. Entries are keyed by
/// absolute path, so one file serves every indexed root.
pub fn fingerprint_cache_path() -> io::Result<PathBuf> {
    Ok(app_data_dir()?.join("fingerprints.json"))
}

/// Best-effort guess whether a path is covered by another (for cache
/// cleanup on `remove`).
pub fn path_is_under(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}
