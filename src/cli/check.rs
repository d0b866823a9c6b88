//! Check subcommand implementation.
//!
//! Handles `sshsweep check <list>`: load targets, run the checker pool and
//! print the report.

use crate::checker::{CheckerPool, PoolObserver, Progress};
use crate::cli::OutputFormat;
use crate::config::{
    CheckerSettings, DEFAULT_CONCURRENCY, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_FLOOD_THRESHOLD,
    DEFAULT_KEX_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS,
};
use crate::error::{CliError, CliResult};
use crate::loader;
use crate::output::{self, CheckReport};
use crate::ssh::{RusshTransportFactory, SshSessionFactory};
use crate::types::{ProxyAddr, Target, DEFAULT_DELIMITER, DEFAULT_PORT};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Check credentials against every target in a list.
#[derive(Parser, Debug)]
pub struct CheckCommand {
    /// Target list, one `host[:port]|user|pass` per line
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Treat the input as free-form text and pull out IPv4 addresses
    ///
    /// Requires --user and --pass.
    #[arg(long, requires = "user")]
    pub fixed: bool,

    /// Login user for every target (overrides the list)
    #[arg(short, long, requires = "pass")]
    pub user: Option<String>,

    /// Login password for every target (overrides the list)
    #[arg(short, long, requires = "user")]
    pub pass: Option<String>,

    /// Port for extracted addresses without an explicit `:port`
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Field delimiter of the target list
    #[arg(short, long, default_value_t = DEFAULT_DELIMITER)]
    pub delimiter: char,

    /// Tunnel every connection through an HTTP proxy (HOST:PORT)
    #[arg(long, value_name = "HOST:PORT", value_parser = parse_proxy)]
    pub proxy: Option<ProxyAddr>,

    /// Number of concurrent workers
    #[arg(short = 'c', long, env = "SSHSWEEP_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// TCP connect timeout in milliseconds
    #[arg(long, env = "SSHSWEEP_CONNECT_TIMEOUT", default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout: u64,

    /// Key exchange timeout in milliseconds (0 = none)
    #[arg(long, env = "SSHSWEEP_KEX_TIMEOUT", default_value_t = DEFAULT_KEX_TIMEOUT_MS)]
    pub kex_timeout: u64,

    /// Undrained authentication messages tolerated before dropping a peer
    #[arg(long, env = "SSHSWEEP_FLOOD_THRESHOLD", default_value_t = DEFAULT_FLOOD_THRESHOLD)]
    pub flood_threshold: usize,

    /// Progress update interval in milliseconds
    #[arg(long, env = "SSHSWEEP_POLL_INTERVAL", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval: u64,

    /// Maximum login attempts per second (0 = unlimited)
    #[arg(short = 'r', long = "rate", env = "SSHSWEEP_RATE", default_value_t = 0)]
    pub rate_limit: u32,

    /// Output format for results
    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,
}

impl CheckCommand {
    /// Execute the check command.
    pub async fn execute(&self, _verbose: bool, quiet: bool) -> CliResult<()> {
        let settings = self.settings();
        settings.validate()?;

        let targets = self.load_targets()?;
        if targets.is_empty() {
            return Err(CliError::Other(format!(
                "no targets found in {}",
                self.input.display()
            )));
        }

        if !quiet && self.output == OutputFormat::Plain {
            output::print_info(&format!(
                "Checking {} targets with {} workers",
                targets.len(),
                settings.concurrency
            ));
        }

        let sessions = SshSessionFactory::new(Arc::new(RusshTransportFactory::new()))
            .with_flood_threshold(settings.flood_threshold);
        let total = targets.len();
        let mut pool = CheckerPool::new(targets, settings, Arc::new(sessions));
        if !quiet {
            pool = pool.with_observer(Arc::new(ProgressObserver::new(total)));
        }

        let report = CheckReport::new(total);
        let start = Instant::now();

        let pool = Arc::new(pool);
        pool.check(false).await;

        let interrupt = {
            let pool = pool.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return false;
                }
                output::print_warning("interrupted, stopping workers");
                pool.stop();
                true
            })
        };
        pool.wait().await;
        interrupt.abort();
        let stopped = matches!(interrupt.await, Ok(true));

        let report = report.finalize(&pool.snapshot(), stopped, start.elapsed().as_millis() as u64);
        info!(summary = %report.summary(), "run finished");
        output::format_report(&report, self.output)?;

        if !quiet && self.output == OutputFormat::Plain {
            output::print_success(&report.summary());
        }
        Ok(())
    }

    fn settings(&self) -> CheckerSettings {
        CheckerSettings::default()
            .with_concurrency(self.concurrency)
            .with_timeouts(self.connect_timeout, self.kex_timeout)
            .with_flood_threshold(self.flood_threshold)
            .with_poll_interval(self.poll_interval)
            .with_rate_limit(self.rate_limit)
    }

    fn load_targets(&self) -> CliResult<Vec<Target>> {
        let text = std::fs::read_to_string(&self.input).map_err(|source| CliError::ReadInput {
            path: self.input.clone(),
            source,
        })?;

        let mut targets = match (&self.user, &self.pass) {
            (Some(user), Some(pass)) if self.fixed => {
                loader::extract_fixed(&text, user, pass, self.port)
            }
            _ => loader::parse_list(&text, self.delimiter),
        };

        if let (Some(user), Some(pass)) = (&self.user, &self.pass) {
            loader::set_credentials(&mut targets, user, pass);
        }
        if let Some(proxy) = &self.proxy {
            for target in &mut targets {
                target.proxy = Some(proxy.clone());
            }
        }
        Ok(targets)
    }
}

fn parse_proxy(value: &str) -> Result<ProxyAddr, String> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected HOST:PORT, got '{value}'"))?;
    let port = port
        .parse()
        .map_err(|_| format!("invalid proxy port '{port}'"))?;
    if host.is_empty() {
        return Err("proxy host is empty".to_string());
    }
    Ok(ProxyAddr::new(host, port))
}

/// Spinner fed by the pool monitor.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }
}

impl PoolObserver for ProgressObserver {
    fn on_progress(&self, progress: Progress) {
        self.bar.set_position(progress.checked as u64);
        self.bar
            .set_message(format!("workers done {}/{}", progress.workers_done, progress.workers));
        self.bar.tick();
    }

    fn on_complete(&self, progress: Progress) {
        self.bar.set_position(progress.checked as u64);
        self.bar.finish_with_message("Check complete");
    }
}
