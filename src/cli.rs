use std::path::PathBuf;

use chrono::{Duration, Local, NaiveDate};
use clap::Parser;

/// Format accepted for `--date`.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Dumps yesterday's (or the given day's) per-video YouTube Analytics metrics into SQLite.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Report date in YYYY-MM-DD format (defaults to yesterday)
    #[arg(short, long, value_parser = parse_report_date)]
    pub(crate) date: Option<NaiveDate>,

    /// Number of concurrent report workers (overrides `pools.report_threads`)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) threads: Option<u16>,

    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub(crate) config: PathBuf,

    /// Path of the log file
    #[arg(long, default_value = "analytics_dump.log")]
    pub(crate) log_file: PathBuf,

    /// Print debug output on the terminal
    #[arg(short, long)]
    pub(crate) verbose: bool,
}

impl Cli {
    /// The day to report on: `--date` when given, otherwise yesterday in local time.
    pub(crate) fn report_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(yesterday)
    }
}

fn yesterday() -> NaiveDate {
    Local::now().date_naive() - Duration::days(1)
}

fn parse_report_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| format!("expected a date in YYYY-MM-DD format: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_date_and_threads() {
        let cli = Cli::parse_from(["yt_analytics_dump", "--date", "2024-03-09", "--threads", "3"]);
        assert_eq!(cli.report_date(), NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(cli.threads, Some(3));
        assert_eq!(cli.config, PathBuf::from("config.toml"));
    }

    #[test]
    fn defaults_to_yesterday() {
        let cli = Cli::parse_from(["yt_analytics_dump"]);
        assert_eq!(cli.report_date(), yesterday());
        assert_eq!(cli.threads, None);
    }

    #[test]
    fn rejects_malformed_date_and_zero_threads() {
        assert!(Cli::try_parse_from(["yt_analytics_dump", "--date", "09/03/2024"]).is_err());
        assert!(Cli::try_parse_from(["yt_analytics_dump", "--threads", "0"]).is_err());
    }
}
