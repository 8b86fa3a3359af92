#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use legiscore::batch::{BatchImporter, BatchPlanner, BatchWriter};
use legiscore::cache::{MemoryObjectCache, ObjectCache, SqliteObjectCache, TieredCache};
use legiscore::config::HarnessConfig;
use legiscore::generation::{OpenAiGenerator, ThrottledGenerator};
use legiscore::impact::{self, Chamber};
use legiscore::interpretation::SessionContext;
use legiscore::reducer::{Reducer, SourceDocument};
use legiscore::trace::{JsonlTraceSink, TraceSink};

#[derive(Parser)]
#[command(name = "legiscore", version, about = "Legislative interpretation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SessionArgs {
    #[arg(long, default_value = "us/congress")]
    namespace: String,
    #[arg(long)]
    session: String,
    /// JSON config file; LEGISCORE_* variables override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export SQLite cache to JSONL
    CacheExport {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Prune SQLite cache (by age and/or size)
    CachePrune {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        max_age_days: Option<u64>,
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// Reduce documents online through the OpenAI-compatible API
    Reduce {
        #[command(flatten)]
        session: SessionArgs,
        /// JSONL of {"subjectId", "text", "originId"?}
        #[arg(long)]
        documents: PathBuf,
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Write the requests still missing for a set of documents as JSONL blocks
    BatchPlan {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        documents: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, default_value = "requests")]
        stem: String,
    },
    /// Import a batch response file into the cache
    BatchImport {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        responses: PathBuf,
        /// Request files the responses answer; failed rows are re-emitted from these
        #[arg(long)]
        requests: Vec<PathBuf>,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Compute impact and hot scores for one document
    Impact {
        #[arg(long, allow_hyphen_values = true)]
        rating: f64,
        /// Procedural progress in [0, 1]
        #[arg(long)]
        progress: f64,
        #[arg(long, default_value_t = 0)]
        cosponsors: usize,
        #[arg(long, value_enum, default_value_t = ChamberArg::House)]
        chamber: ChamberArg,
        #[arg(long, default_value_t = impact::DEFAULT_IMPACT_LAW_WEIGHT)]
        law_weight: f64,
        /// Introduction date; enables the hot score
        #[arg(long)]
        introduced: Option<NaiveDate>,
        #[arg(long)]
        last_action: Option<NaiveDate>,
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ChamberArg {
    House,
    Senate,
}

impl From<ChamberArg> for Chamber {
    fn from(value: ChamberArg) -> Self {
        match value {
            ChamberArg::House => Chamber::House,
            ChamberArg::Senate => Chamber::Senate,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentLine {
    subject_id: String,
    #[serde(default)]
    origin_id: Option<String>,
    text: String,
}

fn load_documents(path: &Path) -> Result<Vec<SourceDocument>, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut docs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: DocumentLine = serde_json::from_str(&line)?;
        let mut doc = SourceDocument::new(record.subject_id, record.text);
        if let Some(origin) = record.origin_id {
            doc = doc.with_origin(origin);
        }
        docs.push(doc);
    }
    Ok(docs)
}

fn open_session(
    args: &SessionArgs,
) -> Result<(SessionContext, HarnessConfig, SqliteObjectCache), Box<dyn std::error::Error>> {
    let config = HarnessConfig::load(args.config.as_deref())?;
    let path = args.db.clone().unwrap_or_else(|| config.cache_path.clone());
    let cache = SqliteObjectCache::new(path)?;
    Ok((
        SessionContext::new(&args.namespace, &args.session),
        config,
        cache,
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CacheExport { db, out } => {
            let path = db.unwrap_or_else(SqliteObjectCache::default_path);
            let cache = SqliteObjectCache::new(path)?;
            let written = cache.export_jsonl(&out).await?;
            println!("exported {written} rows to {}", out.display());
        }
        Commands::CachePrune {
            db,
            max_age_days,
            max_rows,
        } => {
            if max_age_days.is_none() && max_rows.is_none() {
                return Err("cache-prune requires --max-age-days and/or --max-rows".into());
            }
            if matches!(max_rows, Some(0)) {
                return Err("--max-rows must be >= 1".into());
            }
            let path = db.unwrap_or_else(SqliteObjectCache::default_path);
            let cache = SqliteObjectCache::new(path)?;
            let _lock = cache.lock_exclusive()?;
            let stats = cache.prune(max_age_days, max_rows).await?;
            println!(
                "pruned {} rows; {} rows remain",
                stats.deleted, stats.remaining
            );
        }
        Commands::Reduce {
            session,
            documents,
            trace,
        } => {
            let (ctx, config, sqlite) = open_session(&session)?;
            let docs = load_documents(&documents)?;
            let memory: Arc<dyn ObjectCache> = Arc::new(MemoryObjectCache::new());
            let local: Arc<dyn ObjectCache> = Arc::new(sqlite);
            let cache: Arc<dyn ObjectCache> = Arc::new(TieredCache::new(vec![memory, local]));
            let generator = ThrottledGenerator::new(
                OpenAiGenerator::from_env(config.model.model.clone())?,
                config.throttle(),
            );

            let (sink, worker) = match &trace {
                Some(path) => {
                    let (sink, worker) = JsonlTraceSink::new(path)?;
                    (Some(Arc::new(sink) as Arc<dyn TraceSink>), Some(worker))
                }
                None => (None, None),
            };
            let mut reducer = Reducer::new(Arc::new(generator), cache, config);
            if let Some(sink) = sink {
                reducer = reducer.with_trace(sink);
            }

            let mut failed = 0;
            for doc in &docs {
                if let Err(err) = reducer.reduce(&ctx, doc).await {
                    tracing::warn!(subject = %doc.subject_id, error = %err, "reduce failed");
                    failed += 1;
                }
            }
            drop(reducer);
            if let Some(worker) = worker {
                let events = worker.join()?;
                tracing::info!(events, "trace events written");
            }
            println!("reduced {} documents; {failed} failed", docs.len() - failed);
        }
        Commands::BatchPlan {
            session,
            documents,
            out_dir,
            stem,
        } => {
            let (ctx, config, cache) = open_session(&session)?;
            let docs = load_documents(&documents)?;
            let planner = BatchPlanner::new(&cache, &config);
            let mut writer = BatchWriter::new(out_dir.clone(), stem, config.token_block_size);
            let planned = planner.write_all(&ctx, &docs, &mut writer).await?;
            let files = writer.finish()?;
            println!("planned {planned} requests in {} files", files.len());
            for file in files {
                println!("{}", file.display());
            }
        }
        Commands::BatchImport {
            session,
            responses,
            requests,
            out_dir,
        } => {
            let (ctx, config, cache) = open_session(&session)?;
            let _lock = cache.lock_exclusive()?;
            let importer = BatchImporter::new(&cache, &config, &ctx);
            let report = importer.import(&responses, &requests, &out_dir).await?;
            println!(
                "imported {}; skipped {}; failed {}",
                report.imported,
                report.skipped,
                report.failed.len()
            );
            if let Some(path) = report.unprocessed_path {
                println!("unprocessed requests written to {}", path.display());
            }
        }
        Commands::Impact {
            rating,
            progress,
            cosponsors,
            chamber,
            law_weight,
            introduced,
            last_action,
            today,
        } => {
            let breadth = impact::support_breadth(cosponsors, chamber.into());
            let score = impact::impact(rating, progress, breadth, law_weight);
            println!("impact: {score}");
            if let Some(introduced) = introduced {
                let today = today.unwrap_or_else(|| chrono::Utc::now().date_naive());
                let hot = impact::hot(rating, progress, breadth, introduced, last_action, today);
                println!("hot: {hot:.2}");
            }
        }
    }

    Ok(())
}
