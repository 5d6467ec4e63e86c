use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result, bail};
use bar_history::{ChunkMode, EngineConfig, HistoricalBars, QueryOptions};
use bar_sources::{BarKind, HistoricalDataRequest, TimeFrame};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Used when no `--config` is given: one writable disk tier and Binance.
const DEFAULT_CONFIG: &str = r#"
[[disk]]
id = "disk"
root = "data/bars"

[exchanges.binance.exchange]
source = "binance"
"#;

#[derive(Parser)]
#[command(version, about = "Historical bar retrieval")]
struct Cli {
    /// Engine configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Fetch bars and print them as CSV.
    Get(GetArgs),
    /// Print the chunks a query would resolve.
    Chunks(ChunksArgs),
}

#[derive(Args)]
struct RangeArgs {
    #[arg(long, default_value = "binance")]
    exchange: String,
    #[arg(long, default_value = "spot")]
    area: String,
    #[arg(long)]
    symbol: String,
    /// e.g. m1, m15, h1, d1
    #[arg(long, default_value = "m1")]
    timeframe: TimeFrame,
    /// RFC 3339 instant or YYYY-MM-DD (midnight UTC).
    #[arg(long, value_parser = parse_instant)]
    start: DateTime<Utc>,
    /// Exclusive end; same formats as --start.
    #[arg(long, value_parser = parse_instant)]
    end: DateTime<Utc>,
}

#[derive(Args)]
struct GetArgs {
    #[command(flatten)]
    range: RangeArgs,
    #[arg(long, value_enum, default_value_t = KindArg::Trade)]
    kind: KindArg,
    #[arg(long, value_enum, default_value_t = ModeArg::Any)]
    mode: ModeArg,
    /// Skip the in-process memory cache.
    #[arg(long)]
    no_memory_cache: bool,
}

#[derive(Args)]
struct ChunksArgs {
    #[command(flatten)]
    range: RangeArgs,
    #[arg(long)]
    short_only: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Trade,
    MarkPrice,
    IndexPrice,
}

impl From<KindArg> for BarKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Trade => BarKind::Trade,
            KindArg::MarkPrice => BarKind::MarkPrice,
            KindArg::IndexPrice => BarKind::IndexPrice,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Any,
    ShortOnly,
    ExactShort,
    ExactLong,
}

impl From<ModeArg> for ChunkMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Any => ChunkMode::Any,
            ModeArg::ShortOnly => ChunkMode::ShortOnly,
            ModeArg::ExactShort => ChunkMode::ExactShort,
            ModeArg::ExactLong => ChunkMode::ExactLong,
        }
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got {s:?}"))
}

impl RangeArgs {
    fn request(&self) -> HistoricalDataRequest {
        HistoricalDataRequest::new(
            self.exchange.as_str(),
            self.area.as_str(),
            self.symbol.as_str(),
            self.timeframe,
            self.start,
            self.end,
        )
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => EngineConfig::from_toml_str(DEFAULT_CONFIG).context("built-in default config"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let engine = config.build_engine()?;

    match cli.cmd {
        Cmd::Get(args) => get(&engine, args).await,
        Cmd::Chunks(args) => chunks(&engine, &args),
    }
}

async fn get(engine: &HistoricalBars, args: GetArgs) -> Result<()> {
    let request = args.range.request().with_bar_kind(args.kind.into());

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling query");
            on_ctrl_c.cancel();
        }
    });

    let mut options = QueryOptions::default()
        .with_chunk_mode(args.mode.into())
        .with_cancel(cancel);
    if args.no_memory_cache {
        options = options.without_memory_cache();
    }

    let Some(result) = engine.get(&request, &options).await? else {
        info!(symbol = %request.symbol, "no data");
        return Ok(());
    };

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    writeln!(out, "open_time,open,high,low,close,volume,trade_count,vwap")?;
    for bar in result.values() {
        writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            bar.open_time.to_rfc3339(),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            bar.trade_count.map(|n| n.to_string()).unwrap_or_default(),
            bar.vwap.map(|v| v.to_string()).unwrap_or_default(),
        )?;
    }
    out.flush()?;

    info!(
        bars = result.len(),
        up_to_date = engine.is_up_to_date(&result),
        "done"
    );
    Ok(())
}

fn chunks(engine: &HistoricalBars, args: &ChunksArgs) -> Result<()> {
    let request = args.range.request();
    let chunks = engine.chunks_for(&request, args.short_only)?;
    if chunks.is_empty() {
        bail!("range decomposes into no chunks");
    }
    for chunk in chunks {
        println!(
            "{}\t{}\t{}",
            chunk.start.to_rfc3339(),
            chunk.end_exclusive.to_rfc3339(),
            if chunk.is_long { "long" } else { "short" }
        );
    }
    Ok(())
}
