use std::io::{self, BufRead, Write};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use turnstile::config::{KeyEviction, TurnstileConfig};
use turnstile::{PolicySpec, DEFAULT_BUCKET};

/// Replay requests from stdin through an admission limiter.
///
/// Each input line is either `<identifier>` or `<bucket> <identifier>`.
#[derive(Parser, Debug)]
#[command(name = "turnstile")]
#[command(about = "Sliding-window admission limiter")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Bucket for lines that do not name one
    #[arg(short, long, default_value = DEFAULT_BUCKET)]
    bucket: String,

    /// Override the admission limit for every bucket
    #[arg(short, long, allow_negative_numbers = true)]
    limit: Option<i64>,

    /// Override the window length in milliseconds for every bucket
    #[arg(short, long, allow_negative_numbers = true)]
    window_ms: Option<i64>,

    /// Drop keys once their admissions have all expired
    #[arg(long)]
    evict_idle: bool,

    /// Print one JSON object per decision
    #[arg(long)]
    json: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct DecisionRecord<'a> {
    bucket: &'a str,
    identifier: &'a str,
    limited: bool,
    remaining: u64,
    retry_after_ms: Option<u64>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Split an input line into `(bucket, identifier)`.
///
/// A single token is an identifier in `default_bucket`. Blank lines yield
/// `None`, and tokens after the second are ignored.
fn parse_line<'a>(line: &'a str, default_bucket: &'a str) -> Option<(&'a str, &'a str)> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => None,
        (Some(identifier), None) => Some((default_bucket, identifier)),
        (Some(bucket), Some(identifier)) => Some((bucket, identifier)),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    if args.evict_idle {
        config.limiter.eviction = KeyEviction::EvictIdle;
    }
    info!(
        eviction = ?config.limiter.eviction,
        buckets = config.policies.buckets.len(),
        "Configuration loaded"
    );

    let overrides = PolicySpec {
        limit: args.limit,
        window_ms: args.window_ms,
        bucket: None,
    };
    // Fail fast on bad flags before reading any input
    overrides
        .or(&config.policies.default)
        .resolve()
        .context("invalid policy flags")?;

    let limiter = config.build_limiter();
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut processed = 0u64;
    let mut limited = 0u64;

    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        let Some((bucket, identifier)) = parse_line(&line, &args.bucket) else {
            continue;
        };

        let base = config.policies.policy_for(bucket)?;
        let policy = overrides.or(&PolicySpec::from(&base)).resolve()?;
        let decision = limiter.check(identifier, &policy);
        debug!(
            bucket = bucket,
            identifier = identifier,
            limited = decision.limited,
            "Decision made"
        );

        processed += 1;
        if decision.is_limited() {
            limited += 1;
        }

        if args.json {
            let record = DecisionRecord {
                bucket,
                identifier,
                limited: decision.limited,
                remaining: decision.remaining,
                retry_after_ms: decision.retry_after_ms,
            };
            serde_json::to_writer(&mut out, &record)?;
            writeln!(out)?;
        } else {
            let verdict = if decision.is_limited() { "limited" } else { "admitted" };
            writeln!(out, "{} {} {}", verdict, bucket, identifier)?;
        }
    }

    info!(
        processed = processed,
        limited = limited,
        keys = limiter.key_count(),
        "Turnstile stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blank_line() {
        assert_eq!(parse_line("", "default"), None);
        assert_eq!(parse_line("   \t ", "default"), None);
    }

    #[test]
    fn test_parse_identifier_only() {
        assert_eq!(parse_line("10.0.0.1", "login"), Some(("login", "10.0.0.1")));
        assert_eq!(parse_line("  alice  ", "default"), Some(("default", "alice")));
    }

    #[test]
    fn test_parse_bucket_and_identifier() {
        assert_eq!(
            parse_line("newsletter-signup alice", "default"),
            Some(("newsletter-signup", "alice"))
        );
        assert_eq!(parse_line("login\tbob extra", "default"), Some(("login", "bob")));
    }
}
