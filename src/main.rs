//! Retrieves one report for one business date and prints the run summary as a
//! single JSON line on standard output. Logs go to standard error and,
//! when `output.log_dir` is set, to a daily file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use clap::Parser;

use rs_faas_ng::NgError;
use rs_faas_ng::configs::{ConfigManager, FaasConfig};
use rs_faas_ng::faas::calendar;
use rs_faas_ng::faas::{Pipeline, ReportKind, RunSummary};
use rs_faas_ng::info;
use rs_faas_ng::loggers::{LogLevel, LoggerBuilder};

#[derive(Parser)]
#[command(
    name = "rs_faas_ng",
    about = "Asynchronous report retrieval client",
    long_about = "Requests a report, polls the job until it is ready or confirmed absent, and writes one file per page."
)]
struct Cli {
    /// portfolio | profitability | cash-statement (carteira, rentabilidade, extrato)
    kind: ReportKind,

    /// Business date, YYYY-MM-DD
    #[arg(long, conflicts_with = "n_days")]
    date: Option<String>,

    /// Business days before today
    #[arg(long)]
    n_days: Option<u32>,

    /// Overrides output.base_dir
    #[arg(long)]
    output_dir_base: Option<PathBuf>,

    /// Writes the page files to this directory instead of the report's default one
    #[arg(long)]
    json_dir: Option<PathBuf>,

    /// TOML or JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

fn resolve_date(cli: &Cli, config: &FaasConfig) -> Result<NaiveDate, NgError> {
    if let Some(raw) = &cli.date {
        return calendar::parse_date(raw);
    }
    let today = calendar::today(&config.calendar);
    Ok(calendar::previous_business_day(today, cli.n_days.unwrap_or(1)))
}

fn emit(summary: &RunSummary) -> ExitCode {
    println!("{}", summary.to_json_line());
    summary.exit_code()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let started = Instant::now();
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let requested = cli.date.clone().unwrap_or_default();

    let config = match ConfigManager::load_for(cli.config.as_deref(), cli.kind) {
        Ok(config) => config,
        Err(e) => return emit(&RunSummary::failed(&e, started.elapsed(), &requested, "")),
    };

    let business_date = match resolve_date(&cli, &config) {
        Ok(date) => date,
        Err(e) => return emit(&RunSummary::failed(&e, started.elapsed(), &requested, "")),
    };

    let mut builder = LoggerBuilder::new("rs_faas_ng").with_level(cli.log_level);
    if let Some(dir) = &config.output.log_dir {
        builder = builder.with_log_dir(dir);
    }
    let (logger, log_worker) = match builder.spawn() {
        Ok(pair) => pair,
        Err(e) => {
            let date = business_date.to_string();
            return emit(&RunSummary::failed(&e, started.elapsed(), &date, ""));
        }
    };

    info!(logger, "Starting", "kind" => cli.kind.to_string(), "date" => business_date.to_string());

    let mut pipeline = Pipeline::new(config.clone(), cli.kind, logger.clone());
    if let Some(base) = &cli.output_dir_base {
        pipeline = pipeline.with_output_base(base);
    }
    if let Some(dir) = &cli.json_dir {
        pipeline = pipeline.with_output_dir(dir);
    }
    let summary = pipeline.run(business_date).await;

    // Dropping every sender lets the worker drain and finish.
    drop(pipeline);
    drop(logger);
    let _ = tokio::time::timeout(Duration::from_secs(5), log_worker).await;

    emit(&summary)
}
