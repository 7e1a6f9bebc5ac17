//! Process diagnostics
//!
//! Best effort only: registration failures are logged by the caller and never
//! stop the controller.

use kestrel::{Error, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Interval between process stats log lines
pub const STATS_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub trait Diagnostics: Send + Sync {
    /// Start background hooks; they stop when `token` is cancelled
    fn register(&self, token: &CancellationToken) -> Result<()>;
}

/// Periodic memory stats plus a SIGUSR1 backtrace dump
#[derive(Debug, Clone)]
pub struct ProcessDiagnostics {
    stats_interval: Duration,
    started: Instant,
}

impl Default for ProcessDiagnostics {
    fn default() -> Self {
        Self::new(STATS_INTERVAL)
    }
}

impl ProcessDiagnostics {
    pub fn new(stats_interval: Duration) -> Self {
        Self {
            stats_interval,
            started: Instant::now(),
        }
    }

    fn spawn_stats_ticker(&self, token: CancellationToken) {
        let interval = self.stats_interval;
        let started = self.started;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => log_stats(started),
                }
            }
        });
    }

    #[cfg(unix)]
    fn spawn_backtrace_dumper(&self, token: CancellationToken) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut usr1 = signal(SignalKind::user_defined1())
            .map_err(|e| Error::Diagnostics(format!("Failed to install SIGUSR1 handler: {}", e)))?;
        let started = self.started;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = usr1.recv() => {
                        if received.is_none() {
                            break;
                        }
                        let backtrace = std::backtrace::Backtrace::force_capture();
                        info!("SIGUSR1 received, dumping backtrace:\n{}", backtrace);
                        log_stats(started);
                    }
                }
            }
        });
        Ok(())
    }

    #[cfg(not(unix))]
    fn spawn_backtrace_dumper(&self, _token: CancellationToken) -> Result<()> {
        Err(Error::Diagnostics("Signal based dumps are only supported on unix".into()))
    }
}

impl Diagnostics for ProcessDiagnostics {
    fn register(&self, token: &CancellationToken) -> Result<()> {
        self.spawn_stats_ticker(token.child_token());
        self.spawn_backtrace_dumper(token.child_token())
    }
}

fn log_stats(started: Instant) {
    let uptime = started.elapsed().as_secs();
    match resident_memory_bytes() {
        Some(rss) => {
            metrics::gauge!("kestrel_process_resident_memory_bytes").set(rss as f64);
            info!("Process stats: uptime={}s rss={}MiB", uptime, rss / (1024 * 1024));
        }
        None => info!("Process stats: uptime={}s", uptime),
    }
}

/// Resident set size, when the platform exposes it
pub fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    parse_statm_rss(&statm).map(|pages| pages * 4096)
}

fn parse_statm_rss(statm: &str) -> Option<u64> {
    statm.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statm() {
        assert_eq!(parse_statm_rss("12345 678 90 1 0 2 0"), Some(678));
        assert_eq!(parse_statm_rss("12345"), None);
        assert_eq!(parse_statm_rss(""), None);
    }

    #[tokio::test]
    async fn test_register_and_cancel() {
        let token = CancellationToken::new();
        let diagnostics = ProcessDiagnostics::new(Duration::from_millis(10));
        diagnostics.register(&token).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    }
}
