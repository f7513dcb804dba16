//! Agenr CLI
//!
//! Command-line interface for the knowledge memory engine: watch transcript
//! files, recall memory, store and retire entries, resolve conflicts, and
//! inspect the database.
//!
//! Exit codes: 0 success; 1 user-visible failure (no match, validation
//! error); 2 reserved for hard crashes.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use agenr_core::{
    Config, ConflictResolution, Embedder, EntryType, Extractor, HttpModelClient, Judge,
    JudgeVerdict, JudgedRelation, LlmExtractor, LlmJudge, MatchType, ModelClient, NewEntry,
    RecallContext, RecallQuery, RemoteEmbedder, RetireOptions, RetireQuery, Store, WatchOptions,
    WatchTarget, Watcher,
};

/// Agenr - knowledge memory for AI coding agents
#[derive(Parser)]
#[command(name = "agenr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local-first knowledge memory for AI coding agents")]
#[command(long_about = "Agenr watches agent transcripts, distills them into typed knowledge \
entries, and serves ranked recall back into future sessions.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a transcript file (or sessions directory) and ingest new content
    Watch {
        /// Transcript file to watch
        file: Option<PathBuf>,
        /// Watch the most recently active session file under a directory
        #[arg(long, conflicts_with = "file")]
        dir: Option<PathBuf>,
        /// Probe the known session roots for the active file
        #[arg(long, conflicts_with_all = ["file", "dir"])]
        auto: bool,
        /// Cycle interval in seconds
        #[arg(long)]
        interval: Option<u64>,
        /// Minimum new bytes before a cycle does any work
        #[arg(long = "min-chunk")]
        min_chunk: Option<u64>,
        /// Run one cycle and exit
        #[arg(long)]
        once: bool,
        /// Full cycle without DB writes or offset advance
        #[arg(long)]
        dry_run: bool,
        /// Directory for context.md writeouts
        #[arg(long)]
        context: Option<PathBuf>,
    },

    /// Recall ranked memory for a query
    Recall {
        /// Query text (optional for session-start and browse contexts)
        query: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Comma-separated entry types (fact,decision,preference,event,todo,insight)
        #[arg(long)]
        types: Option<String>,
        /// Lower date bound: YYYY-MM-DD or relative like 7d
        #[arg(long)]
        since: Option<String>,
        /// Upper date bound: YYYY-MM-DD or relative like 7d
        #[arg(long)]
        until: Option<String>,
        /// Recall context: default, session-start, or browse
        #[arg(long, default_value = "default")]
        context: String,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Store entries from a JSON payload on stdin
    Store {
        /// Bypass the at-most-once ingest guard
        #[arg(long)]
        force: bool,
    },

    /// Retire entries by subject (or id), excluding them from recall
    Retire {
        /// Subject pattern
        subject: Option<String>,
        /// Retire a single entry by id
        #[arg(long, conflicts_with = "subject")]
        id: Option<String>,
        /// Substring match instead of exact
        #[arg(long)]
        contains: bool,
        /// Show what would be retired without retiring
        #[arg(long)]
        dry_run: bool,
        /// Record the retirement in the durable ledger
        #[arg(long)]
        persist: bool,
        #[arg(long)]
        reason: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Todo helpers
    Todo {
        #[command(subcommand)]
        command: TodoCommands,
    },

    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// List or resolve pending conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },

    /// Time recall over the live store
    Benchmark {
        #[arg(long, default_value = "5")]
        runs: usize,
        /// Benchmark the session-start path instead of semantic recall
        #[arg(long)]
        session: bool,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TodoCommands {
    /// Mark a todo done (retires it by exact subject)
    Done { subject: String },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Show store statistics
    Stats,
    /// Dump active entries as JSON to stdout
    Export {
        /// jsonl for one entry per line
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Delete all entries (requires --force)
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// Print the database path
    Path,
    /// Rebuild the vector index from stored embeddings
    RebuildIndex,
    /// Run integrity checks
    Check,
    /// Print schema and crate versions
    Version,
}

#[derive(Subcommand)]
enum ConflictCommands {
    /// List pending conflicts
    List,
    /// Resolve one conflict: keep-new, keep-old, or keep-both
    Resolve { id: i64, resolution: String },
}

// ============================================================================
// MAIN
// ============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Watch {
            file,
            dir,
            auto,
            interval,
            min_chunk,
            once,
            dry_run,
            context,
        } => run_watch(&config, file, dir, auto, interval, min_chunk, once, dry_run, context).await,
        Commands::Recall {
            query,
            limit,
            types,
            since,
            until,
            context,
            platform,
            project,
            json,
        } => {
            run_recall(
                &config, query, limit, types, since, until, context, platform, project, json,
            )
            .await
        }
        Commands::Store { force } => run_store(&config, force).await,
        Commands::Retire {
            subject,
            id,
            contains,
            dry_run,
            persist,
            reason,
            force,
        } => run_retire(&config, subject, id, contains, dry_run, persist, reason, force),
        Commands::Todo { command } => match command {
            TodoCommands::Done { subject } => run_todo_done(&config, subject),
        },
        Commands::Db { command } => run_db(&config, command),
        Commands::Conflicts { command } => run_conflicts(&config, command),
        Commands::Benchmark { runs, session, json } => {
            run_benchmark(&config, runs, session, json).await
        }
    }
}

// ============================================================================
// WIRING
// ============================================================================

fn open_store(config: &Config) -> anyhow::Result<Arc<Store>> {
    let store = Store::open(config.db_path.clone(), config.embedding.dimensions)?;
    Ok(Arc::new(store))
}

fn build_embedder(config: &Config) -> anyhow::Result<Arc<dyn Embedder>> {
    #[cfg(feature = "local-embeddings")]
    if config.embedding.local {
        return Ok(Arc::new(agenr_core::LocalEmbedder::new()));
    }
    #[cfg(not(feature = "local-embeddings"))]
    if config.embedding.local {
        anyhow::bail!(
            "config requests local embeddings but this build lacks the local-embeddings feature"
        );
    }

    let api_key = config.embed_api_key().ok_or_else(|| {
        anyhow::anyhow!("no embedding API key; set AGENR_EMBED_API_KEY or embedding.apiKey")
    })?;
    Ok(Arc::new(RemoteEmbedder::new(
        &config.embedding.base_url,
        &config.embedding.model,
        api_key,
        config.embedding.dimensions,
    )))
}

/// Without an LLM key, dedup falls back to never-supersede verdicts
struct OfflineJudge;

#[async_trait::async_trait]
impl Judge for OfflineJudge {
    async fn judge(
        &self,
        _incoming: &NewEntry,
        _existing: &agenr_core::Entry,
    ) -> Result<JudgeVerdict, agenr_core::LlmError> {
        Ok(JudgeVerdict {
            relation: JudgedRelation::Coexists,
            confidence: 0.0,
        })
    }
}

fn build_model_client(config: &Config) -> Option<Arc<dyn ModelClient>> {
    config
        .api_key()
        .map(|key| Arc::new(HttpModelClient::new(config.api_base_url(), key)) as Arc<dyn ModelClient>)
}

fn build_judge(config: &Config) -> anyhow::Result<Arc<dyn Judge>> {
    match build_model_client(config) {
        Some(client) => Ok(Arc::new(LlmJudge::new(client, &config.model_set()?))),
        None => {
            tracing::warn!("no LLM API key; supersession judging disabled");
            Ok(Arc::new(OfflineJudge))
        }
    }
}

// ============================================================================
// WATCH
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_watch(
    config: &Config,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    auto: bool,
    interval: Option<u64>,
    min_chunk: Option<u64>,
    once: bool,
    dry_run: bool,
    context: Option<PathBuf>,
) -> anyhow::Result<()> {
    let target = if let Some(file) = file {
        WatchTarget::File(file)
    } else if let Some(dir) = dir {
        WatchTarget::Dir(dir)
    } else if auto {
        WatchTarget::Auto
    } else {
        anyhow::bail!("nothing to watch: pass a file, --dir, or --auto");
    };

    let store = open_store(config)?;
    let embedder = build_embedder(config)?;
    let judge = build_judge(config)?;
    let client = build_model_client(config)
        .ok_or_else(|| anyhow::anyhow!("watch needs an LLM key; set AGENR_API_KEY"))?;
    let extractor: Arc<dyn Extractor> =
        Arc::new(LlmExtractor::new(client, &config.model_set()?));

    let mut options = WatchOptions {
        once,
        dry_run,
        store_options: config.store_options(),
        ..Default::default()
    };
    options.interval = std::time::Duration::from_secs(interval.unwrap_or(config.watch.interval_secs));
    options.min_chunk_chars = min_chunk.unwrap_or(config.watch.min_chunk_chars);

    let mut watcher = Watcher::new(store, embedder, judge, extractor, options)?;
    if let Some(context_dir) = context {
        watcher = watcher.with_context(Arc::new(agenr_core::context::ContextFiles::new(context_dir)));
    }

    // SIGINT/SIGTERM set the shutdown flag; the in-flight cycle completes
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    println!("{}", "=== Agenr Watch ===".cyan().bold());
    let summary = watcher.run(target, shutdown_rx).await?;

    println!();
    println!("{}: {}", "Cycles".white().bold(), summary.cycles);
    println!("{}: {}", "Skipped".white().bold(), summary.skipped_cycles);
    println!("{}: {}", "Bytes read".white().bold(), summary.bytes_read);
    println!("{}: {}", "Entries stored".white().bold(), summary.entries_stored);
    if summary.file_switches > 0 {
        println!("{}: {}", "File switches".white().bold(), summary.file_switches);
    }
    Ok(())
}

// ============================================================================
// RECALL
// ============================================================================

/// Parse `7d`-style relative offsets or `YYYY-MM-DD`
fn parse_date_bound(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(days) = raw.strip_suffix('d').and_then(|d| d.parse::<i64>().ok()) {
        return Ok(Utc::now() - Duration::days(days));
    }
    if let Some(hours) = raw.strip_suffix('h').and_then(|h| h.parse::<i64>().ok()) {
        return Ok(Utc::now() - Duration::hours(hours));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("invalid date '{raw}': use YYYY-MM-DD, 7d, or 12h"))?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc())
}

#[allow(clippy::too_many_arguments)]
async fn run_recall(
    config: &Config,
    query_text: Option<String>,
    limit: Option<usize>,
    types: Option<String>,
    since: Option<String>,
    until: Option<String>,
    context: String,
    platform: Option<String>,
    project: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let embedder = build_embedder(config)?;

    let mut query = RecallQuery {
        text: query_text.filter(|t| !t.trim().is_empty()),
        context: RecallContext::parse_name(&context),
        limit,
        platform,
        project,
        ..Default::default()
    };
    if let Some(types) = types {
        query.types = types
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(EntryType::parse_name)
            .collect();
    }
    if let Some(since) = since {
        query.since = Some(parse_date_bound(&since)?);
    }
    if let Some(until) = until {
        query.until = Some(parse_date_bound(&until)?);
    }

    let results = agenr_core::recall::recall(
        &store,
        embedder.as_ref(),
        &query,
        &config.recall_settings(),
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("{}", "No matching entries.".dimmed());
        return Ok(());
    }

    println!("{}", "=== Agenr Recall ===".cyan().bold());
    println!();
    for (i, result) in results.iter().enumerate() {
        let entry = &result.entry;
        println!(
            "{:2}. {} {} {}",
            i + 1,
            format!("[{:.2}]", result.score).green(),
            format!("[{}, imp:{}]", entry.entry_type, entry.importance).yellow(),
            entry.subject.white().bold(),
        );
        println!("    {}", truncate(&entry.content, 120));
        if !entry.tags.is_empty() {
            println!("    {}", format!("#{}", entry.tags.join(" #")).dimmed());
        }
    }
    Ok(())
}

// ============================================================================
// STORE
// ============================================================================

async fn run_store(config: &Config, force: bool) -> anyhow::Result<()> {
    let mut payload = String::new();
    std::io::stdin().read_to_string(&mut payload)?;
    if payload.trim().is_empty() {
        anyhow::bail!("expected a JSON payload on stdin");
    }

    // Either a bare array of entries or {"entries": [...], "sourceFile": ...}
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct StorePayload {
        entries: Vec<NewEntry>,
        #[serde(default)]
        source_file: Option<String>,
    }

    let (entries, source_file) = match serde_json::from_str::<Vec<NewEntry>>(&payload) {
        Ok(entries) => (entries, None),
        Err(_) => {
            let parsed: StorePayload = serde_json::from_str(&payload)
                .map_err(|e| anyhow::anyhow!("invalid store payload: {e}"))?;
            (parsed.entries, parsed.source_file)
        }
    };
    if entries.is_empty() {
        anyhow::bail!("no entries in payload");
    }

    let store = open_store(config)?;
    let embedder = build_embedder(config)?;
    let judge = build_judge(config)?;

    let mut options = config.store_options();
    options.force = force;

    let report = store
        .store_entries(
            entries,
            source_file.as_deref().unwrap_or("stdin"),
            &agenr_core::ingest_content_hash(&payload),
            &options,
            embedder.as_ref(),
            judge.as_ref(),
        )
        .await?;

    if report.duplicate_ingest {
        println!(
            "{}",
            "Already ingested (same source and content hash); use --force to repeat.".yellow()
        );
        return Ok(());
    }

    println!("{}", "=== Agenr Store ===".cyan().bold());
    println!();
    println!("{}: {}", "Added".white().bold(), report.added);
    println!("{}: {}", "Skipped".white().bold(), report.skipped);
    println!("{}: {}", "Superseded".white().bold(), report.superseded);
    println!("{}: {}", "Judge calls".white().bold(), report.llm_dedup_calls);
    println!("{}: {}ms", "Duration".white().bold(), report.duration_ms);
    Ok(())
}

// ============================================================================
// RETIRE / TODO
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn run_retire(
    config: &Config,
    subject: Option<String>,
    id: Option<String>,
    contains: bool,
    dry_run: bool,
    persist: bool,
    reason: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let query = if let Some(id) = id {
        RetireQuery::Id(id)
    } else if let Some(subject) = subject {
        RetireQuery::Subject {
            pattern: subject,
            match_type: if contains { MatchType::Contains } else { MatchType::Exact },
            canonical_key: None,
        }
    } else {
        anyhow::bail!("pass a subject pattern or --id");
    };

    // Preview what would be hit
    let matching: Vec<_> = match &query {
        RetireQuery::Id(id) => store
            .get_entry(id)?
            .into_iter()
            .filter(|e| !e.retired)
            .collect(),
        RetireQuery::Subject {
            pattern,
            match_type,
            ..
        } => store
            .all_active_entries()?
            .into_iter()
            .filter(|e| match_type.matches(pattern, &e.subject))
            .collect(),
    };

    if matching.is_empty() {
        anyhow::bail!("no active entries match");
    }

    println!("{}", "=== Agenr Retire ===".cyan().bold());
    println!();
    for entry in &matching {
        println!(
            "  {} [{}] {}",
            &entry.id[..8].dimmed(),
            entry.entry_type,
            truncate(&entry.subject, 60)
        );
    }

    if dry_run {
        println!();
        println!(
            "{}",
            format!("Dry run: {} entries would be retired.", matching.len()).yellow()
        );
        return Ok(());
    }

    if !force && matching.len() > 1 {
        print!(
            "{} Retire {} entries? [y/N] ",
            "WARNING:".red().bold(),
            matching.len()
        );
        use std::io::Write;
        std::io::stdout().flush()?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("{}", "Aborted.".yellow());
            anyhow::bail!("aborted");
        }
    }

    let outcome = store.retire(
        &query,
        &RetireOptions {
            reason,
            write_ledger: persist,
            ..Default::default()
        },
    )?;

    println!();
    println!(
        "{}",
        format!(
            "Retired {} entr{}{}",
            outcome.count,
            if outcome.count == 1 { "y" } else { "ies" },
            if persist { " (ledger updated)" } else { "" }
        )
        .green()
        .bold()
    );
    Ok(())
}

fn run_todo_done(config: &Config, subject: String) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let todos: Vec<_> = store
        .all_active_entries()?
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Todo)
        .filter(|e| e.subject.to_lowercase() == subject.to_lowercase())
        .collect();

    if todos.is_empty() {
        anyhow::bail!("no open todo with subject '{subject}'");
    }

    let mut count = 0;
    for todo in &todos {
        let outcome = store.retire(
            &RetireQuery::Id(todo.id.clone()),
            &RetireOptions {
                reason: Some("todo done".to_string()),
                ..Default::default()
            },
        )?;
        count += outcome.count;
    }

    println!(
        "{}",
        format!("Done: retired {count} todo{}", if count == 1 { "" } else { "s" })
            .green()
            .bold()
    );
    Ok(())
}

// ============================================================================
// DB
// ============================================================================

fn run_db(config: &Config, command: DbCommands) -> anyhow::Result<()> {
    match command {
        DbCommands::Stats => {
            let store = open_store(config)?;
            let stats = store.stats()?;

            println!("{}", "=== Agenr Store Statistics ===".cyan().bold());
            println!();
            println!("{}: {}", "Total entries".white().bold(), stats.total);
            println!("{}: {}", "Active".white().bold(), stats.active);
            println!("{}: {}", "Retired".white().bold(), stats.retired);
            println!("{}: {}", "Superseded".white().bold(), stats.superseded);
            println!("{}: {}", "With embeddings".white().bold(), stats.with_embeddings);
            println!("{}: {}", "Pending conflicts".white().bold(), stats.pending_conflicts);
            if let Some(oldest) = stats.oldest {
                println!("{}: {}", "Oldest".white().bold(), oldest.format("%Y-%m-%d %H:%M:%S"));
            }
            if let Some(newest) = stats.newest {
                println!("{}: {}", "Newest".white().bold(), newest.format("%Y-%m-%d %H:%M:%S"));
            }

            if !stats.by_type.is_empty() {
                println!();
                println!("{}", "By type:".yellow().bold());
                let total = stats.active.max(1) as usize;
                for (name, count) in &stats.by_type {
                    print_distribution_bar(name, *count as usize, total);
                }
            }
            if !stats.by_expiry.is_empty() {
                println!();
                println!("{}", "By expiry:".yellow().bold());
                let total = stats.active.max(1) as usize;
                for (name, count) in &stats.by_expiry {
                    print_distribution_bar(name, *count as usize, total);
                }
            }
            Ok(())
        }
        DbCommands::Export { format } => {
            if format != "json" && format != "jsonl" {
                anyhow::bail!("invalid format '{format}': use json or jsonl");
            }
            let store = open_store(config)?;
            let entries = store.export_active()?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
                _ => {
                    for entry in &entries {
                        println!("{}", serde_json::to_string(entry)?);
                    }
                }
            }
            Ok(())
        }
        DbCommands::Reset { force } => {
            if !force {
                anyhow::bail!("db reset deletes every entry; re-run with --force");
            }
            let store = open_store(config)?;
            store.reset()?;
            println!("{}", "Store reset.".green().bold());
            Ok(())
        }
        DbCommands::Path => {
            let store = open_store(config)?;
            println!("{}", store.db_path().display());
            Ok(())
        }
        DbCommands::RebuildIndex => {
            let store = open_store(config)?;
            let start = std::time::Instant::now();
            let count = store.rebuild_vector_index()?;
            println!(
                "{}",
                format!(
                    "Vector index rebuilt: {} vectors in {}ms",
                    count,
                    start.elapsed().as_millis()
                )
                .green()
                .bold()
            );
            Ok(())
        }
        DbCommands::Check => {
            let store = open_store(config)?;
            let problems = store.integrity_check()?;
            if problems.is_empty() {
                println!("{}", "Store healthy.".green().bold());
                Ok(())
            } else {
                for problem in &problems {
                    println!("  {} {}", "!".yellow().bold(), problem.yellow());
                }
                anyhow::bail!("{} integrity problem(s) found", problems.len());
            }
        }
        DbCommands::Version => {
            let store = open_store(config)?;
            println!("agenr {}", agenr_core::VERSION);
            println!("schema v{}", store.schema_version()?);
            Ok(())
        }
    }
}

// ============================================================================
// CONFLICTS
// ============================================================================

fn run_conflicts(config: &Config, command: ConflictCommands) -> anyhow::Result<()> {
    let store = open_store(config)?;
    match command {
        ConflictCommands::List => {
            let pending = store.pending_conflicts()?;
            if pending.is_empty() {
                println!("{}", "No pending conflicts.".green());
                return Ok(());
            }
            println!("{}", "=== Pending Conflicts ===".cyan().bold());
            println!();
            for conflict in &pending {
                println!(
                    "{:4} {} (confidence {:.2})",
                    conflict.id,
                    conflict.relation.yellow(),
                    conflict.confidence
                );
                if let Some(a) = store.get_entry(&conflict.entry_a)? {
                    println!("     new: {}", truncate(&a.content, 80));
                }
                if let Some(b) = store.get_entry(&conflict.entry_b)? {
                    println!("     old: {}", truncate(&b.content, 80));
                }
            }
            Ok(())
        }
        ConflictCommands::Resolve { id, resolution } => {
            let resolution = ConflictResolution::parse_name(&resolution).ok_or_else(|| {
                anyhow::anyhow!("invalid resolution '{resolution}': use keep-new, keep-old, or keep-both")
            })?;
            store.resolve_conflict(id, resolution)?;
            println!(
                "{}",
                format!("Conflict {id} resolved: {}", resolution.as_str())
                    .green()
                    .bold()
            );
            Ok(())
        }
    }
}

// ============================================================================
// BENCHMARK
// ============================================================================

async fn run_benchmark(config: &Config, runs: usize, session: bool, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let embedder = build_embedder(config)?;
    let settings = config.recall_settings();

    let query = if session {
        RecallQuery {
            context: RecallContext::SessionStart,
            no_update: true,
            ..Default::default()
        }
    } else {
        let mut q = RecallQuery::semantic("recent project decisions and preferences");
        q.no_update = true;
        q
    };

    let mut timings_ms = Vec::with_capacity(runs);
    let mut result_count = 0;
    for _ in 0..runs.max(1) {
        let start = std::time::Instant::now();
        let results =
            agenr_core::recall::recall(&store, embedder.as_ref(), &query, &settings).await?;
        timings_ms.push(start.elapsed().as_secs_f64() * 1000.0);
        result_count = results.len();
    }

    let min = timings_ms.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = timings_ms.iter().cloned().fold(0.0, f64::max);
    let avg = timings_ms.iter().sum::<f64>() / timings_ms.len() as f64;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "runs": timings_ms.len(),
                "mode": if session { "session-start" } else { "semantic" },
                "results": result_count,
                "avgMs": avg,
                "minMs": min,
                "maxMs": max,
            })
        );
    } else {
        println!("{}", "=== Agenr Benchmark ===".cyan().bold());
        println!();
        println!("{}: {}", "Runs".white().bold(), timings_ms.len());
        println!("{}: {}", "Results".white().bold(), result_count);
        println!("{}: {avg:.1}ms", "Average".white().bold());
        println!("{}: {min:.1}ms", "Fastest".white().bold());
        println!("{}: {max:.1}ms", "Slowest".white().bold());
    }
    Ok(())
}

// ============================================================================
// OUTPUT HELPERS
// ============================================================================

fn print_distribution_bar(label: &str, count: usize, total: usize) {
    let percentage = (count as f64 / total as f64) * 100.0;
    let bar_width: usize = 30;
    let filled = ((percentage / 100.0) * bar_width as f64) as usize;
    let empty = bar_width.saturating_sub(filled);
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(empty));
    println!("  {:12} [{:30}] {:>4} ({:>5.1}%)", label, bar.green(), count, percentage);
}

/// Truncate a string for display (UTF-8 safe)
fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_chars {
        s
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

// ============================================================================
// TESTS
// ============================================================================
