use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use symdex::config::{CoordinatorConfig, IndexOptions, OptimizerConfig, fingerprint_cache_path};
use symdex::coordinator::IndexCoordinator;
use symdex::model::{Query, QueryKind};
use symdex::optimizer::QueryOptimizer;
use symdex::output;
use symdex::plugin::PluginRegistry;
use symdex::storage::MemoryStore;

#[derive(Parser)]
#[command(name = "symdex")]
#[command(about = "Incremental source-tree indexer with cost-based query planning")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory tree
    Index {
        /// Path to index
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Reindex files even when their content fingerprint is unchanged
        #[arg(short, long)]
        force: bool,

        /// Do not recurse into subdirectories
        #[arg(long)]
        no_recursive: bool,

        /// Include glob (repeatable); empty means everything
        #[arg(long)]
        include: Vec<String>,

        /// Exclude glob (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Follow symbolic links during traversal
        #[arg(long)]
        follow_symlinks: bool,

        /// Maximum file size in bytes
        #[arg(long)]
        max_file_size: Option<u64>,

        /// Maximum concurrent indexing tasks
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
    },
    /// Index a tree, then run a query against it
    Search {
        /// Search term
        term: String,

        /// Path to search in
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Query kind: symbol, text, fuzzy, semantic or reference
        #[arg(short, long, default_value = "text")]
        kind: String,

        /// Filter as name=value (repeatable), e.g. language=rust
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Print the chosen plan and cost estimate
        #[arg(long)]
        explain: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Index a tree and show store statistics
    Status {
        /// Path to index
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Replay a query workload and print composite-index suggestions
    Suggest {
        /// Path to index
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Workload file: one query per line, `kind term [name=value ...]`;
        /// blank lines and lines starting with # are skipped
        #[arg(long)]
        workload: PathBuf,

        /// Minimum times a filter combination must appear to be suggested
        #[arg(long)]
        min_occurrences: Option<u64>,
    },
    /// Drop cached fingerprints for a tree
    Remove {
        /// Root whose fingerprints should be forgotten
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Index {
            path,
            force,
            no_recursive,
            include,
            exclude,
            follow_symlinks,
            max_file_size,
            jobs,
        } => {
            let mut options = IndexOptions {
                recursive: !no_recursive,
                include,
                exclude,
                follow_symlinks,
                force,
                ..Default::default()
            };
            if let Some(size) = max_file_size {
                options.max_file_size = size;
            }
            if let Some(jobs) = jobs {
                options.max_concurrent = jobs.max(1);
            }

            let (coordinator, storage) = build_coordinator();
            let batch = run_index(&coordinator, &path, &options)?;
            output::print_batch_summary(&batch);

            let stats = storage.stats();
            println!(
                "store: {} docs, {} symbols, {} tokens, {} trigrams",
                stats.docs, stats.symbols, stats.tokens, stats.trigrams
            );
        }

        Commands::Search {
            term,
            path,
            kind,
            filters,
            limit,
            explain,
            no_color,
        } => {
            let kind = parse_kind(&kind)?;
            let mut query = Query::new(kind, term);
            for filter in &filters {
                let (name, value) = parse_filter(filter)?;
                query = query.with_filter(name, value);
            }

            let (coordinator, storage) = build_coordinator();
            run_index(&coordinator, &path, &IndexOptions::default())?;

            let optimizer = QueryOptimizer::new(storage, OptimizerConfig::load());
            if explain {
                let plan = optimizer.plan_search(&query)?;
                let cost = optimizer.estimate_cost(&query);
                output::print_plan(&plan, &cost)?;
                println!();
            }

            let mut outcome = optimizer.search(&query)?;
            outcome.hits.truncate(limit);
            if outcome.degraded {
                eprintln!("warning: some plan steps failed; results may be incomplete");
            }
            output::print_hits(&outcome.hits, !no_color)?;
        }

        Commands::Status { path } => {
            let (coordinator, storage) = build_coordinator();
            let batch = run_index(&coordinator, &path, &IndexOptions::default())?;
            let stats = storage.stats();

            println!("Index Statistics");
            println!("================");
            println!();
            println!("Files seen:       {}", batch.seen);
            println!("Indexed:          {}", batch.indexed);
            println!("Unchanged:        {}", batch.skipped);
            println!("Failed:           {}", batch.failed);
            println!("Documents:        {}", stats.docs);
            println!("Symbols:          {}", stats.symbols);
            println!("Distinct tokens:  {}", stats.tokens);
            println!("Trigrams:         {}", stats.trigrams);
        }

        Commands::Suggest {
            path,
            workload,
            min_occurrences,
        } => {
            let (coordinator, storage) = build_coordinator();
            run_index(&coordinator, &path, &IndexOptions::default())?;

            let mut config = OptimizerConfig::load();
            if let Some(n) = min_occurrences {
                config.suggestion_min_occurrences = n.max(1);
            }
            let optimizer = QueryOptimizer::new(storage, config);

            let content = std::fs::read_to_string(&workload)
                .with_context(|| format!("Failed to read workload {}", workload.display()))?;
            let mut replayed = 0usize;
            for (line_no, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let query = parse_workload_query(line)
                    .with_context(|| format!("bad query on line {}", line_no + 1))?;
                optimizer.search(&query)?;
                replayed += 1;
            }

            println!("replayed {replayed} queries");
            output::print_suggestions(&optimizer.recommend_indexes())?;
        }

        Commands::Remove { path } => {
            let (coordinator, _) = build_coordinator();
            let root = path.canonicalize().context("Invalid path")?;
            let removed = coordinator.forget_fingerprints_under(&root);
            coordinator
                .persist_fingerprints()
                .context("Failed to update fingerprint cache")?;
            println!("Forgot {} fingerprints under {}", removed, root.display());
        }
    }

    Ok(())
}

fn build_coordinator() -> (Arc<IndexCoordinator>, Arc<MemoryStore>) {
    let storage = Arc::new(MemoryStore::new());
    let mut config = CoordinatorConfig::load();
    config.fingerprint_cache = fingerprint_cache_path().ok();
    let coordinator = Arc::new(IndexCoordinator::new(
        Arc::new(PluginRegistry::with_defaults()),
        storage.clone(),
        config,
    ));
    (coordinator, storage)
}

/// Run a directory index, showing live progress when the `progress` feature
/// is on.
fn run_index(
    coordinator: &Arc<IndexCoordinator>,
    path: &std::path::Path,
    options: &IndexOptions,
) -> Result<symdex::model::BatchIndexResult> {
    let worker = {
        let coordinator = coordinator.clone();
        let path = path.to_path_buf();
        let options = options.clone();
        std::thread::spawn(move || coordinator.index_directory(&path, &options))
    };

    #[cfg(feature = "progress")]
    {
        use indicatif::{ProgressBar, ProgressStyle};
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap(),
        );
        while !worker.is_finished() {
            let progress = coordinator.get_progress();
            bar.set_message(format!(
                "{}/{} files ({:.0}/s)",
                progress.completed, progress.total, progress.files_per_sec
            ));
            bar.tick();
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        bar.finish_and_clear();
    }

    let batch = worker
        .join()
        .map_err(|_| anyhow::anyhow!("indexing thread panicked"))??;
    Ok(batch)
}

/// Parse one workload line: `kind term [name=value ...]`.
fn parse_workload_query(line: &str) -> Result<Query> {
    let mut parts = line.split_whitespace();
    let kind = parse_kind(parts.next().context("missing query kind")?)?;
    let term = parts.next().context("missing search term")?;
    let mut query = Query::new(kind, term);
    for part in parts {
        let (name, value) = parse_filter(part)?;
        query = query.with_filter(name, value);
    }
    Ok(query)
}

fn parse_kind(kind: &str) -> Result<QueryKind> {
    match kind.to_ascii_lowercase().as_str() {
        "symbol" => Ok(QueryKind::Symbol),
        "text" => Ok(QueryKind::Text),
        "fuzzy" => Ok(QueryKind::Fuzzy),
        "semantic" => Ok(QueryKind::Semantic),
        "reference" | "refs" => Ok(QueryKind::Reference),
        other => bail!("unknown query kind: {other}"),
    }
}

fn parse_filter(filter: &str) -> Result<(String, String)> {
    match filter.split_once('=') {
        Some((name, value)) if !name.is_empty() && !value.is_empty() => {
            Ok((name.to_string(), value.to_string()))
        }
        _ => bail!("filters must be name=value, got: {filter}"),
    }
}
