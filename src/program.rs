use std::env::current_dir;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Error};
use chrono::NaiveDate;
use console::Term;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::analytics::api::{CredentialProvider, ReportSource, VideoDirectory};
use crate::analytics::backoff::Pause;
use crate::analytics::discovery::discover_videos;
use crate::analytics::io::{AppConfig, Credentials};
use crate::analytics::models::Metric;
use crate::analytics::sender::YouTubeSender;
use crate::analytics::store::{InsertSummary, ResultStore};
use crate::analytics::worker::{PoolOutcome, ReportPool};
use crate::cli::Cli;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Drives one dump: discovery, the report pool and storage.
pub(crate) struct Program {
    cli: Cli,
}

impl Program {
    pub(crate) fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Runs the dump for the selected report date.
    pub(crate) fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("YouTube analytics dump");
        trace!("Starting YouTube analytics dump...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        let working_dir = current_dir().context("Unable to get working directory")?;
        trace!("Program Working Directory: {}", working_dir.display());

        let config = AppConfig::load_or_create(&self.cli.config)
            .with_context(|| format!("Unable to load {}", self.cli.config.display()))?;
        trace!("Config loaded: {:?}", config);

        let date = self.cli.report_date();
        let threads = self
            .cli
            .threads
            .map(usize::from)
            .unwrap_or(config.pools.report_threads);

        let credentials_path = Path::new(&config.paths.credentials_file);
        let Some(credentials) = Credentials::load_or_template(credentials_path)
            .with_context(|| format!("Unable to load {}", credentials_path.display()))?
        else {
            return Ok(());
        };
        if credentials.is_incomplete() {
            info!(
                "{} is missing client_id, client_secret or refresh_token. Fill them in and run again.",
                credentials_path.display()
            );
            return Ok(());
        }
        trace!("Credentials loaded: {:?}", credentials);

        let sender = YouTubeSender::new(&config.api, credentials)
            .context("Unable to build the HTTP client")?;
        if !sender.has_access_token() {
            sender
                .refresh_access_token()
                .context("Unable to obtain an access token")?;
        }

        let store = ResultStore::open(&config.paths.database_file)?;
        let pool = ReportPool::new(&sender, &sender, date)
            .workers(threads)
            .policy(config.backoff_policy())
            .progress(Self::progress_bar());
        let summary = dump_day(&sender, &pool, config.api.page_size, &store)?;

        let stats = sender.get_stats();
        info!(
            "Requests: {} sent, {} failed, {} token refreshes",
            stats.total_requests, stats.failed_requests, stats.token_refreshes
        );
        info!(
            "Summary for {}: {} videos in {} channels, {} rows stored, {} duplicates, {} dropped, {} unprocessed",
            date,
            summary.discovered,
            summary.channels,
            summary.insert.inserted,
            summary.insert.duplicates,
            summary.outcome.dropped(),
            summary.outcome.unprocessed.len()
        );

        info!("All done!");
        Ok(())
    }

    fn progress_bar() -> ProgressBar {
        const PROGRESS_TEMPLATE: &str = "{spinner} {bar:40} {pos}/{len} reports";

        let progress_style = ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");

        let progress_bar = ProgressBar::new(0);
        progress_bar.set_style(progress_style);
        progress_bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        progress_bar.enable_steady_tick(Duration::from_millis(200));
        progress_bar
    }
}

/// Counts from one [`dump_day`] run.
#[derive(Debug)]
pub(crate) struct DumpSummary {
    pub(crate) discovered: usize,
    pub(crate) channels: usize,
    pub(crate) outcome: PoolOutcome,
    pub(crate) insert: InsertSummary,
}

/// Discovers the account's videos, reports on each of them for the pool's date and
/// stores the rows.
///
/// Report and discovery failures are logged and never fail the run; only pool start-up
/// and database errors do.
pub(crate) fn dump_day<D, R, C, P>(
    directory: &D,
    pool: &ReportPool<'_, R, C, P>,
    page_size: u32,
    store: &ResultStore,
) -> Result<DumpSummary, Error>
where
    D: VideoDirectory + ?Sized,
    R: ReportSource + ?Sized,
    C: CredentialProvider + ?Sized,
    P: Pause,
{
    let date = pool.date();
    info!("Dumping analytics for {}", date);

    let discovery = discover_videos(directory, page_size);
    for channel in &discovery.incomplete_channels {
        warn!("Channel {} was only partially listed", channel);
    }
    let discovered = discovery.queue.len();
    if discovered == 0 {
        info!("No videos to report on.");
    }

    let outcome = pool.run(&discovery.queue)?;
    log_outcome(&outcome);

    let insert = store.insert_rows(date, &outcome.rows)?;
    log_stored(store, date)?;

    Ok(DumpSummary {
        discovered,
        channels: discovery.channels,
        outcome,
        insert,
    })
}

fn log_outcome(outcome: &PoolOutcome) {
    for worker in &outcome.workers {
        info!(
            "{}: {} after {} reports ({} dropped, {} backoff sleeps, {} credential refreshes)",
            worker.name,
            worker.exit,
            worker.reported,
            worker.dropped,
            worker.backoff_sleeps,
            worker.credential_refreshes
        );
    }

    if !outcome.unprocessed.is_empty() {
        warn!(
            "{} videos were not reported on; run again later to pick them up:",
            outcome.unprocessed.len()
        );
        for video in &outcome.unprocessed {
            warn!("  {}", video);
        }
    }
}

/// Logs what the store now holds for `date` and how many of those videos have earlier days.
fn log_stored(store: &ResultStore, date: NaiveDate) -> Result<(), Error> {
    let records = store.records_for_date(date)?;
    let mut with_history = 0;
    let mut views = 0.0;
    for record in &records {
        trace!(
            "Stored {} {}: {:?}",
            record.date,
            record.video_id,
            record.metrics.values()
        );
        views += record.metrics.get(Metric::Views);
        if store.history(&record.video_id)?.len() > 1 {
            with_history += 1;
        }
    }
    info!(
        "{} records stored for {} ({} views), {} of them with earlier days",
        records.len(),
        date,
        views,
        with_history
    );
    Ok(())
}
