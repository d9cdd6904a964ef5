//! envdiff - print the diff between two snapshots of an entity
//!
//! Usage: envdiff (--db <path> | --cli <program>) --type <T> --id <I>
//!        --left <ms> --right <ms> [options]

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

use envdiff::config::load_config;
use envdiff::logging::init_logging;
use envdiff::{
    CliBackend, DiffBackend, DiffConfig, DiffParams, Driver, Phase, SqliteBackend, ViewState,
    render_lines,
};

fn main() -> Result<()> {
    let args = parse_args()?;

    let mut config = load_config()?.unwrap_or_default();
    config.apply_env()?;
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    if let Some(poll_ms) = args.poll_ms {
        config.poll_interval_ms = poll_ms;
    }
    config.validate()?;

    init_logging(&config.log_level)?;

    let backend: Box<dyn DiffBackend + Send> = match args.source {
        Source::Db(path) => Box::new(
            SqliteBackend::open(&path)
                .with_context(|| format!("Failed to open diff cache: {}", path.display()))?,
        ),
        Source::Cli(program) => Box::new(CliBackend::new(program)),
    };

    let phase = run(backend, config, args.params, &args.collapse)?;
    if phase == Phase::Error {
        bail!("diff failed");
    }
    Ok(())
}

/// Longest single wait for a backend reply when no timer is armed.
const REPLY_WAIT: Duration = Duration::from_secs(30);

/// Drive the session to a terminal phase and print the tree.
fn run(
    backend: Box<dyn DiffBackend + Send>,
    config: DiffConfig,
    params: DiffParams,
    collapse: &[String],
) -> Result<Phase> {
    let mut driver = Driver::new(backend, config)?;
    driver.start(params, Instant::now());

    while !driver.is_settled() {
        let now = Instant::now();
        let until_deadline = driver
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now));
        if driver.in_flight() > 0 {
            driver.wait(until_deadline.unwrap_or(REPLY_WAIT));
        } else if let Some(delay) = until_deadline {
            thread::sleep(delay);
        } else {
            break;
        }
        driver.pump(Instant::now());
    }

    let view = driver.view();
    let mut state = ViewState::default();
    if let Some(tree) = view.tree() {
        for model_type in collapse {
            state.collapse_model(tree, model_type);
        }
    }
    for line in render_lines(&view, &state) {
        println!("{line}");
    }
    Ok(view.phase())
}

enum Source {
    Db(PathBuf),
    Cli(String),
}

struct CliArgs {
    source: Source,
    params: DiffParams,
    page_size: Option<usize>,
    poll_ms: Option<u64>,
    collapse: Vec<String>,
}

fn print_usage() {
    println!("Usage: envdiff (--db <path> | --cli <program>) --type <T> --id <I> --left <ms> --right <ms> [options]");
    println!();
    println!("Options:");
    println!("  --db <path>          Read the diff from a SQLite diff cache");
    println!("  --cli <program>      Run <program> diff structure|nodes for each request");
    println!("  --type <model>       Entity model type, e.g. Environment");
    println!("  --id <id>            Entity id");
    println!("  --left <ms>          Earlier snapshot, milliseconds since the epoch");
    println!("  --right <ms>         Later snapshot, milliseconds since the epoch");
    println!("  --page-size <n>      Node records per page request");
    println!("  --poll-ms <ms>       Poll period while the backend is computing");
    println!("  --collapse <model>   Collapse nodes of this model type (repeatable)");
    println!();
    println!("Environment:");
    println!("  ENVDIFF_PAGE_SIZE    Default page size");
    println!("  ENVDIFF_POLL_MS      Default poll period");
    println!("  RUST_LOG             Log filter (overrides log_level in config.json)");
}

fn parse_args() -> Result<CliArgs> {
    let args: Vec<String> = std::env::args().collect();
    let mut db: Option<PathBuf> = None;
    let mut cli: Option<String> = None;
    let mut entity_type: Option<String> = None;
    let mut entity_id: Option<String> = None;
    let mut left: Option<u64> = None;
    let mut right: Option<u64> = None;
    let mut page_size: Option<usize> = None;
    let mut poll_ms: Option<u64> = None;
    let mut collapse = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        if matches!(flag, "--help" | "-h") {
            print_usage();
            std::process::exit(0);
        }
        if !flag.starts_with('-') {
            bail!("Unexpected argument: {flag}");
        }
        i += 1;
        let Some(value) = args.get(i) else {
            bail!("{flag} requires a value");
        };
        match flag {
            "--db" => db = Some(PathBuf::from(value)),
            "--cli" => cli = Some(value.clone()),
            "--type" => entity_type = Some(value.clone()),
            "--id" => entity_id = Some(value.clone()),
            "--left" => left = Some(parse_number(flag, value)?),
            "--right" => right = Some(parse_number(flag, value)?),
            "--page-size" => page_size = Some(parse_number(flag, value)?),
            "--poll-ms" => poll_ms = Some(parse_number(flag, value)?),
            "--collapse" => collapse.push(value.clone()),
            _ => bail!("Unknown option: {flag}"),
        }
        i += 1;
    }

    let source = match (db, cli) {
        (Some(path), None) => Source::Db(path),
        (None, Some(program)) => Source::Cli(program),
        (Some(_), Some(_)) => bail!("--db and --cli are mutually exclusive"),
        (None, None) => bail!("one of --db or --cli is required"),
    };
    let (Some(entity_type), Some(entity_id), Some(left), Some(right)) =
        (entity_type, entity_id, left, right)
    else {
        bail!("--type, --id, --left and --right are required");
    };

    Ok(CliArgs {
        source,
        params: DiffParams::new(entity_type, entity_id, left, right),
        page_size,
        poll_ms,
        collapse,
    })
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("{flag} expects a number, got {value}"))
}
