use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shelf_core::{AppConfig, AsinStatus, Book, BookFilter, Database, ExitCode, InfoQuality, ShelfError};
use shelf_enrich::amazon::{AmazonEnrichment, AmazonOutcome, AmazonRun};
use shelf_enrich::cache::Cache;
use shelf_enrich::enrichment::{
    ChannelDispatcher, EnrichmentWorker, GoogleEnrichment, GoogleOutcome, request_amazon_enrichment,
};
use shelf_enrich::links::{LinkBuilder, LinkInput};
use shelf_enrich::providers::{ProviderRegistry, SearchOptions};
use shelf_enrich::{DiskCache, MultiSourceSearch, RateLimiter, RegionResolver};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "shelf",
    about = "Book metadata enrichment from Amazon, Google Books and Open Library",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format. Also enabled by setting SHELF_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import books from a JSON array.
    Import {
        file: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },

    /// List books in the store.
    List {
        /// pending, processing, completed or failed.
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        missing_asin: bool,
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Find ASINs on Amazon, one book at a time.
    EnrichAmazon(EnrichAmazonArgs),

    /// Fill metadata from Google Books.
    EnrichGoogle(EnrichGoogleArgs),

    /// Queue books for background Amazon enrichment.
    ///
    /// Books already `processing` are skipped as in flight. A book left
    /// `processing` by an interrupted run needs `--force` to be queued again.
    QueueAmazon {
        #[arg(long = "book-id", required = true, action = clap::ArgAction::Append)]
        book_ids: Vec<i64>,
        /// Re-queue books stuck in `processing`.
        #[arg(long)]
        force: bool,
    },

    /// Search every enabled provider, first with results wins.
    Search {
        query: String,
        #[arg(long)]
        lang: Option<String>,
        #[arg(long)]
        max_results: Option<u32>,
        #[arg(long)]
        no_cache: bool,
    },

    /// Build an Amazon link for a stored book or for the given fields.
    Link(LinkArgs),

    /// Show which Amazon marketplace a locale maps to.
    Region { locale: String },

    /// Drop every cached search result.
    CacheFlush,

    /// Counts per ASIN status and info quality.
    Stats,
}

#[derive(Args)]
struct EnrichAmazonArgs {
    #[arg(long = "book-id", action = clap::ArgAction::Append)]
    book_ids: Vec<i64>,
    #[arg(long)]
    max_books: Option<usize>,
    /// Run the matching without saving anything.
    #[arg(long)]
    dry_run: bool,
    /// Title similarity required on a product page.
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    show_details: bool,
    /// Also pick up books whose last lookup failed.
    #[arg(long)]
    retry_failed: bool,
    /// Minimum delay between Amazon requests.
    #[arg(long)]
    delay_ms: Option<u64>,
}

#[derive(Args)]
struct EnrichGoogleArgs {
    #[arg(long = "book-id", action = clap::ArgAction::Append)]
    book_ids: Vec<i64>,
    #[arg(long)]
    max_books: Option<usize>,
    #[arg(long)]
    dry_run: bool,
    /// Title similarity required for a volume.
    #[arg(long)]
    threshold: Option<f64>,
}

#[derive(Args)]
struct LinkArgs {
    book_id: Option<i64>,
    #[arg(long, conflicts_with = "book_id")]
    isbn: Option<String>,
    #[arg(long, conflicts_with = "book_id")]
    title: Option<String>,
    #[arg(long, conflicts_with = "book_id")]
    author: Option<String>,
    #[arg(long, conflicts_with = "book_id")]
    asin: Option<String>,
    #[arg(long)]
    lang: Option<String>,
}

// ─── Main ───────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(ExitCode::InvalidArgs.code());
        }
        Err(e) => e.exit(),
    };
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code_for(&e).code());
    }
}

/// Bad input exits 3, a missing book 2, anything else 1.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.chain().find_map(|cause| cause.downcast_ref::<ShelfError>()) {
        Some(ShelfError::ValidationError(_)) => ExitCode::InvalidArgs,
        Some(ShelfError::BookNotFound(_)) => ExitCode::NotFound,
        _ => ExitCode::GeneralError,
    }
}

fn check_threshold(threshold: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(ShelfError::ValidationError(format!("threshold must be within 0..=1, got {threshold}")).into())
    }
}

async fn run(cli: Cli) -> Result<()> {
    let json_output = cli.json || std::env::var("SHELF_JSON").as_deref() == Ok("1");
    let config = load_config(cli.config.as_deref())?;
    let start = Instant::now();

    match cli.command {
        Commands::Import { file, dry_run } => {
            let db = open_db(&config)?;
            cmd_import(&db, &file, dry_run, json_output, start)
        }
        Commands::List {
            status,
            missing_asin,
            limit,
        } => {
            let db = open_db(&config)?;
            let filter = BookFilter {
                asin_status: status.as_deref().map(str::parse).transpose()?,
                missing_asin,
                limit: Some(limit),
                ..Default::default()
            };
            let books = db.list_books(&filter)?;
            if json_output {
                print_json(&json!({"status":"ok","data":books,"meta":{"duration_ms":elapsed_ms(start)}}))?;
            } else {
                print_books(&books);
            }
            Ok(())
        }
        Commands::EnrichAmazon(args) => {
            let db = open_db(&config)?;
            cmd_enrich_amazon(&config, &db, args, json_output, start).await
        }
        Commands::EnrichGoogle(args) => {
            let db = open_db(&config)?;
            cmd_enrich_google(&config, &db, args, json_output, start).await
        }
        Commands::QueueAmazon { book_ids, force } => {
            let db = Arc::new(open_db(&config)?);
            cmd_queue_amazon(&config, db, book_ids, force, json_output, start).await
        }
        Commands::Search {
            query,
            lang,
            max_results,
            no_cache,
        } => {
            let registry = ProviderRegistry::from_config(&config)?;
            let cache: Arc<dyn Cache> = Arc::new(search_cache(&config));
            let search = MultiSourceSearch::from_config(&config, registry, cache);
            let options = SearchOptions {
                max_results: max_results.unwrap_or(config.search.default_max_results),
                language: lang,
            };
            let result = if no_cache {
                search.refresh(&query, &options).await
            } else {
                search.search(&query, &options).await
            };

            if json_output {
                print_json(&json!({"status":"ok","data":result,"meta":{"duration_ms":elapsed_ms(start)}}))?;
            } else if result.has_results() {
                println!("{} ({} found)", result.message, result.total_found);
                for record in &result.books {
                    println!(
                        "  {:<50}  {:<30}  {}",
                        truncate(&record.title, 50),
                        truncate(&record.authors_joined().unwrap_or_default(), 30),
                        record.isbn.as_deref().unwrap_or("-")
                    );
                }
            } else {
                println!("No results: {}", result.message);
                if !result.providers_tried.is_empty() {
                    println!("Tried: {}", result.providers_tried.join(", "));
                }
                for suggestion in &result.suggestions {
                    println!("  - {suggestion}");
                }
            }
            Ok(())
        }
        Commands::Link(args) => cmd_link(&config, args, json_output, start),
        Commands::Region { locale } => {
            let region = RegionResolver::from_code(&config.core.default_region).resolve(Some(&locale));
            let region_config = region.config();
            if json_output {
                print_json(&json!({"status":"ok","data":region_config,"meta":{"duration_ms":elapsed_ms(start)}}))?;
            } else {
                println!(
                    "{} {} ({}) https://www.{}",
                    region_config.code, region_config.name, region_config.language, region_config.domain
                );
            }
            Ok(())
        }
        Commands::CacheFlush => {
            let cache = search_cache(&config);
            let removed = cache.flush().await?;
            if json_output {
                print_json(&json!({"status":"ok","data":{"removed":removed},"meta":{"duration_ms":elapsed_ms(start)}}))?;
            } else {
                println!("Removed {removed} cached entries from {}", cache.dir().display());
            }
            Ok(())
        }
        Commands::Stats => {
            let db = open_db(&config)?;
            let by_status = db.count_by_status()?;
            let by_quality = db.count_by_quality()?;
            let statuses: Vec<(&str, usize)> = AsinStatus::ALL
                .iter()
                .map(|s| (s.as_str(), by_status.get(s).copied().unwrap_or(0)))
                .collect();
            let qualities: Vec<(&str, usize)> = [InfoQuality::Basic, InfoQuality::Enhanced, InfoQuality::Complete]
                .iter()
                .map(|q| (q.as_str(), by_quality.get(q).copied().unwrap_or(0)))
                .collect();

            if json_output {
                let status_map: serde_json::Map<String, serde_json::Value> =
                    statuses.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
                let quality_map: serde_json::Map<String, serde_json::Value> =
                    qualities.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
                print_json(&json!({
                    "status": "ok",
                    "data": {"asin_status": status_map, "info_quality": quality_map},
                    "meta": {"duration_ms": elapsed_ms(start)}
                }))?;
            } else {
                println!("ASIN status");
                for (name, count) in &statuses {
                    println!("  {name:<12} {count:>6}");
                }
                println!("Info quality");
                for (name, count) in &qualities {
                    println!("  {name:<12} {count:>6}");
                }
            }
            Ok(())
        }
    }
}

// ─── Setup ──────────────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let default = if verbose {
        "shelf_cli=debug,shelf_enrich=debug,shelf_core=debug"
    } else {
        "shelf_cli=info,shelf_enrich=info,shelf_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("cannot load config from {}", path.display()))?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => AppConfig::load().context("cannot load config"),
    }
}

fn open_db(config: &AppConfig) -> Result<Database> {
    let path = config.database_path();
    Database::open(&path).with_context(|| format!("cannot open database at {}", path.display()))
}

fn search_cache(config: &AppConfig) -> DiskCache {
    DiskCache::in_namespace(&config.cache_dir(), "search")
}

// ─── Commands ───────────────────────────────────────────────────────────────

fn cmd_import(db: &Database, file: &Path, dry_run: bool, json_output: bool, start: Instant) -> Result<()> {
    let contents = std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))?;
    let books: Vec<Book> =
        serde_json::from_str(&contents).with_context(|| format!("{} is not a JSON array of books", file.display()))?;

    let mut imported = Vec::new();
    let mut skipped = 0usize;
    for mut book in books {
        if !book.has_title() && !book.has_isbn() {
            warn!("skipping book with neither title nor ISBN");
            skipped += 1;
            continue;
        }
        book.id = 0;
        book.refresh_info_quality();
        if dry_run {
            imported.push(book);
            continue;
        }
        match db.insert_book(&book) {
            Ok(id) => {
                book.id = id;
                imported.push(book);
            }
            Err(e) => {
                warn!(title = %book.title, error = %e, "import failed");
                skipped += 1;
            }
        }
    }
    info!(imported = imported.len(), skipped, dry_run, "import finished");

    if json_output {
        print_json(&json!({
            "status": "ok",
            "data": {"imported": imported.len(), "skipped": skipped, "dry_run": dry_run, "books": imported},
            "meta": {"duration_ms": elapsed_ms(start)}
        }))?;
    } else {
        let verb = if dry_run { "Would import" } else { "Imported" };
        println!("{verb} {} book(s), skipped {skipped}", imported.len());
    }
    Ok(())
}

/// Explicit ids win. Otherwise books without an ASIN that are still pending,
/// plus failed ones when retrying.
fn amazon_batch(db: &Database, args: &EnrichAmazonArgs) -> Result<Vec<Book>> {
    if !args.book_ids.is_empty() {
        return Ok(db.list_books(&BookFilter::by_ids(args.book_ids.clone()))?);
    }
    let filter = BookFilter {
        missing_asin: true,
        ..Default::default()
    };
    Ok(db
        .list_books(&filter)?
        .into_iter()
        .filter(|b| b.asin_status == AsinStatus::Pending || (args.retry_failed && b.asin_status == AsinStatus::Failed))
        .take(args.max_books.unwrap_or(usize::MAX))
        .collect())
}

async fn cmd_enrich_amazon(
    config: &AppConfig,
    db: &Database,
    args: EnrichAmazonArgs,
    json_output: bool,
    start: Instant,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(threshold) = args.threshold {
        config.matching.title_threshold = check_threshold(threshold)?;
    }
    if let Some(delay) = args.delay_ms {
        config.amazon.request_delay_ms = delay;
    }
    let limiter = RateLimiter::new(Duration::from_millis(config.amazon.request_delay_ms));
    let workflow = AmazonEnrichment::from_config(&config, limiter)?;

    let books = amazon_batch(db, &args)?;
    info!(books = books.len(), dry_run = args.dry_run, "starting amazon enrichment");

    let mut runs = Vec::with_capacity(books.len());
    for mut book in books {
        let run = workflow.enrich(&mut book).await;
        if !args.dry_run
            && let Err(e) = db.save_book(&book)
        {
            warn!(book_id = book.id, error = %e, "could not save book");
        }
        runs.push((book.title, run));
    }

    let matched = runs.iter().filter(|(_, run)| run.is_match()).count();
    if json_output {
        let data: Vec<&AmazonRun> = runs.iter().map(|(_, run)| run).collect();
        print_json(&json!({
            "status": "ok",
            "data": data,
            "meta": {"duration_ms": elapsed_ms(start), "matched": matched, "dry_run": args.dry_run}
        }))?;
        return Ok(());
    }

    println!(
        "{:>6}  {:<36}  {:<16}  {:<10}  {:<6}  {:<14}  {:>7}",
        "ID", "TITLE", "OUTCOME", "ASIN", "REGION", "STRATEGY", "MS"
    );
    for (title, run) in &runs {
        println!(
            "{:>6}  {:<36}  {:<16}  {:<10}  {:<6}  {:<14}  {:>7}",
            run.book_id,
            truncate(title, 36),
            amazon_outcome_label(run.outcome),
            run.asin.as_deref().unwrap_or("-"),
            run.region.map(|r| r.code()).unwrap_or("-"),
            run.strategy.as_deref().unwrap_or("-"),
            run.elapsed_ms
        );
        if args.show_details {
            for step in &run.report.steps {
                println!("        step: {step}");
            }
            if !run.report.fields_updated.is_empty() {
                println!("        fields: {}", run.report.fields_updated.join(", "));
            }
            for error in &run.report.errors {
                println!("        error: {error}");
            }
        }
    }
    let suffix = if args.dry_run { " (dry run, nothing saved)" } else { "" };
    println!("\n{matched}/{} matched{suffix}", runs.len());
    Ok(())
}

async fn cmd_enrich_google(
    config: &AppConfig,
    db: &Database,
    args: EnrichGoogleArgs,
    json_output: bool,
    start: Instant,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(threshold) = args.threshold {
        config.matching.google_title_threshold = check_threshold(threshold)?;
    }
    let limiter = RateLimiter::new(Duration::from_millis(config.google_books.request_delay_ms));
    let workflow = GoogleEnrichment::from_config(&config, limiter)?;

    let books: Vec<Book> = if args.book_ids.is_empty() {
        db.list_books(&BookFilter::default())?
            .into_iter()
            .filter(|b| b.enriched_at.is_none())
            .take(args.max_books.unwrap_or(usize::MAX))
            .collect()
    } else {
        db.list_books(&BookFilter::by_ids(args.book_ids.clone()))?
    };
    info!(books = books.len(), dry_run = args.dry_run, "starting google books enrichment");

    let mut runs = Vec::with_capacity(books.len());
    for mut book in books {
        let run = workflow.enrich(&mut book).await;
        if !args.dry_run
            && run.outcome == GoogleOutcome::Matched
            && let Err(e) = db.save_book(&book)
        {
            warn!(book_id = book.id, error = %e, "could not save book");
        }
        runs.push((book.title, run));
    }

    let matched = runs.iter().filter(|(_, run)| run.outcome == GoogleOutcome::Matched).count();
    if json_output {
        let data: Vec<_> = runs.iter().map(|(_, run)| run).collect();
        print_json(&json!({
            "status": "ok",
            "data": data,
            "meta": {"duration_ms": elapsed_ms(start), "matched": matched, "dry_run": args.dry_run}
        }))?;
        return Ok(());
    }

    for (title, run) in &runs {
        let outcome = match run.outcome {
            GoogleOutcome::Matched => "matched",
            GoogleOutcome::NotFound => "not found",
            GoogleOutcome::NothingToSearch => "nothing to search",
        };
        println!(
            "{:>6}  {:<40}  {:<18}  {}",
            run.book_id,
            truncate(title, 40),
            outcome,
            run.report.fields_updated.join(", ")
        );
    }
    println!("\n{matched}/{} matched", runs.len());
    Ok(())
}

async fn cmd_queue_amazon(
    config: &AppConfig,
    db: Arc<Database>,
    book_ids: Vec<i64>,
    force: bool,
    json_output: bool,
    start: Instant,
) -> Result<()> {
    let limiter = RateLimiter::new(Duration::from_millis(config.amazon.request_delay_ms));
    let workflow = AmazonEnrichment::from_config(config, limiter)?;
    let (dispatcher, rx) = ChannelDispatcher::channel(book_ids.len());
    let worker = tokio::spawn(EnrichmentWorker::new(db.clone(), workflow, rx).run());

    let mut decisions = Vec::with_capacity(book_ids.len());
    for id in book_ids {
        match request_amazon_enrichment(&db, &dispatcher, id, force).await {
            Ok(decision) => decisions.push(json!({"book_id": id, "decision": decision})),
            Err(e) => {
                warn!(book_id = id, error = %e, "could not queue book");
                decisions.push(json!({"book_id": id, "error": e.to_string()}));
            }
        }
    }
    drop(dispatcher);
    let summary = worker.await.context("enrichment worker panicked")?;

    if json_output {
        print_json(&json!({
            "status": "ok",
            "data": {"requests": decisions, "summary": summary},
            "meta": {"duration_ms": elapsed_ms(start)}
        }))?;
    } else {
        for decision in &decisions {
            println!("{decision}");
        }
        println!(
            "processed {}, matched {}, failed {}, missing {}",
            summary.processed, summary.matched, summary.failed, summary.missing
        );
    }
    Ok(())
}

fn cmd_link(config: &AppConfig, args: LinkArgs, json_output: bool, start: Instant) -> Result<()> {
    let builder = LinkBuilder::from_config(config);

    let (url, region) = match args.book_id {
        Some(id) => {
            let db = open_db(config)?;
            let Some(book) = db.find_book(id)? else {
                if json_output {
                    print_json(&json!({"status":"error","error":"not_found","message":format!("Book {id} not found"),"meta":{"duration_ms":elapsed_ms(start)}}))?;
                } else {
                    eprintln!("Book {id} not found");
                }
                std::process::exit(ExitCode::NotFound.code());
            };
            let language = args.lang.as_deref().or(book.language.as_deref());
            (
                builder.link(&LinkInput::from(&book), language),
                builder.region_for(language),
            )
        }
        None => {
            let input = LinkInput {
                asin: args.asin.as_deref(),
                isbn: args.isbn.as_deref(),
                title: args.title.as_deref(),
                authors: args.author.as_deref(),
            };
            let language = args.lang.as_deref();
            (builder.link(&input, language), builder.region_for(language))
        }
    };

    if json_output {
        print_json(&json!({"status":"ok","data":{"url":url,"region":region.code()},"meta":{"duration_ms":elapsed_ms(start)}}))?;
    } else {
        println!("{url}");
    }
    Ok(())
}

// ─── Output ─────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn print_books(books: &[Book]) {
    if books.is_empty() {
        println!("No books.");
        return;
    }
    println!(
        "{:>6}  {:<40}  {:<24}  {:<13}  {:<10}  {:<10}  {}",
        "ID", "TITLE", "AUTHORS", "ISBN", "ASIN", "STATUS", "QUALITY"
    );
    for book in books {
        println!(
            "{:>6}  {:<40}  {:<24}  {:<13}  {:<10}  {:<10}  {}",
            book.id,
            truncate(&book.title, 40),
            truncate(book.authors.as_deref().unwrap_or("-"), 24),
            book.isbn.as_deref().unwrap_or("-"),
            book.amazon_asin.as_deref().unwrap_or("-"),
            book.asin_status,
            book.info_quality
        );
    }
}

fn amazon_outcome_label(outcome: AmazonOutcome) -> &'static str {
    match outcome {
        AmazonOutcome::AlreadyLinked => "already linked",
        AmazonOutcome::NothingToSearch => "nothing to search",
        AmazonOutcome::Matched => "matched",
        AmazonOutcome::NotFound => "not found",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
