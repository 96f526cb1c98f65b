use std::{io::Write, path::PathBuf, time::Duration};

use chrono::Utc;
use rand::RngCore;
use tokio::time::Instant;
use tracing::{Level, debug, error, warn};

use crate::{
    backoff::{BackoffConfig, BackoffState},
    config::Config,
    diff::diff,
    feed::{FeedSnapshot, FeedSource},
    notify::{ChangeContext, Notifier},
    shutdown::Shutdown,
    state::{self, LoadStatus, Snapshot},
};

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub interval: Duration,
    pub max_failures: u32,
    pub once: bool,
    pub state_file: PathBuf,
    pub backoff: BackoffConfig,
}

impl WatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.interval(),
            max_failures: config.max_failures,
            once: config.once,
            state_file: config.state_file.clone(),
            backoff: BackoffConfig::new(config.interval(), config.max_backoff()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    Shutdown,
    OnceCompleted,
    OnceFailed,
    FailureLimit { failures: u32 },
}

impl WatchExit {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Shutdown | Self::OnceCompleted => 0,
            Self::OnceFailed | Self::FailureLimit { .. } => 1,
        }
    }
}

struct LoopState<R> {
    poll: u64,
    consecutive_failures: u32,
    snapshot: Snapshot,
    first_run: bool,
    /// The in-memory snapshot is newer than the state file.
    dirty: bool,
    backoff: BackoffState<R>,
}

enum Cycle {
    Success,
    Failure { kind: &'static str, error: String },
}

pub async fn run_watch<F, W, R>(
    opts: &WatchOptions,
    feed: &F,
    notifier: &mut Notifier<W>,
    mut shutdown: Shutdown,
    rng: R,
) -> anyhow::Result<WatchExit>
where
    F: FeedSource + ?Sized,
    W: Write,
    R: RngCore,
{
    let (snapshot, load_status) = state::load_with_status(&opts.state_file);
    let mut st = LoopState {
        poll: 0,
        consecutive_failures: 0,
        first_run: load_status != LoadStatus::Loaded || snapshot.is_empty(),
        snapshot,
        dirty: false,
        backoff: BackoffState::new(opts.backoff, rng),
    };

    notifier.emit(
        Level::INFO,
        &format!(
            "Watcher started. Endpoint={}, interval={}s, once={}, known_apps={}",
            feed.endpoint(),
            opts.interval.as_secs(),
            opts.once,
            st.snapshot.len()
        ),
    )?;

    let exit = loop {
        if shutdown.is_requested() {
            break WatchExit::Shutdown;
        }

        st.poll += 1;
        let started = Instant::now();
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        if opts.once {
            notifier.emit(Level::INFO, &format!("[{now}] Checking once"))?;
        } else {
            notifier.emit(Level::INFO, &format!("[{now}] Poll #{}", st.poll))?;
        }

        let fetched = tokio::select! {
            res = feed.fetch() => res,
            _ = shutdown.requested() => break WatchExit::Shutdown,
        };

        let cycle = match fetched {
            Ok(fresh) => apply_feed(opts, &mut st, fresh, notifier)?,
            Err(err) => Cycle::Failure {
                kind: err.kind(),
                error: err.to_string(),
            },
        };

        let delay = match cycle {
            Cycle::Success => {
                st.consecutive_failures = 0;
                if opts.once {
                    break WatchExit::OnceCompleted;
                }
                let delay = opts.interval.saturating_sub(started.elapsed());
                notifier.emit(
                    Level::DEBUG,
                    &format!("Sleeping {:.1}s", delay.as_secs_f64()),
                )?;
                delay
            }
            Cycle::Failure { kind, error } => {
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                warn!(
                    endpoint = feed.endpoint(),
                    error_kind = kind,
                    error = %error,
                    attempt = st.poll,
                    consecutive_failures = st.consecutive_failures,
                    max_failures = opts.max_failures,
                    "poll failed"
                );

                if st.consecutive_failures >= opts.max_failures {
                    notifier.emit(
                        Level::ERROR,
                        &format!(
                            "Max consecutive failures ({}) reached. Exiting.",
                            opts.max_failures
                        ),
                    )?;
                    break WatchExit::FailureLimit {
                        failures: st.consecutive_failures,
                    };
                }
                if opts.once {
                    notifier.emit(Level::ERROR, &format!("Check failed ({kind}): {error}"))?;
                    break WatchExit::OnceFailed;
                }

                let delay = st
                    .backoff
                    .delay_for(st.consecutive_failures)
                    .saturating_sub(started.elapsed());
                notifier.emit(
                    Level::WARN,
                    &format!(
                        "Will retry in {:.1}s (backoff due to {} failures)",
                        delay.as_secs_f64(),
                        st.consecutive_failures
                    ),
                )?;
                delay
            }
        };

        if sleep_or_shutdown(delay, &mut shutdown).await {
            break WatchExit::Shutdown;
        }
    };

    if st.dirty {
        match state::save(&opts.state_file, &st.snapshot) {
            Ok(()) => debug!(path = %opts.state_file.display(), "pending state saved on exit"),
            Err(err) => error!(
                path = %opts.state_file.display(),
                error = %err,
                "failed to save pending state on exit"
            ),
        }
    }

    let level = if exit.exit_code() == 0 {
        Level::INFO
    } else {
        Level::ERROR
    };
    notifier.emit(level, &format!("Watcher stopped ({exit:?})"))?;
    Ok(exit)
}

/// Diffs, reports and persists one successful fetch. The write happens here,
/// outside any section that races against shutdown.
fn apply_feed<W: Write, R>(
    opts: &WatchOptions,
    st: &mut LoopState<R>,
    fresh: FeedSnapshot,
    notifier: &mut Notifier<W>,
) -> std::io::Result<Cycle> {
    if st.first_run {
        notifier.summary(&fresh.apps)?;
    }

    let events = diff(&st.snapshot, &fresh.apps);
    if events.is_empty() {
        notifier.emit(Level::INFO, "No changes")?;
    } else {
        notifier.emit(
            Level::INFO,
            &format!("Changes detected ({} events)", events.len()),
        )?;
    }
    let ctx = ChangeContext::new(fresh.timestamp, &st.snapshot, &fresh.apps);
    notifier.notify(&events, &ctx)?;

    st.snapshot = Snapshot::from_records(&fresh.apps);
    st.first_run = false;
    st.dirty = true;

    match state::save(&opts.state_file, &st.snapshot) {
        Ok(()) => {
            st.dirty = false;
            debug!(path = %opts.state_file.display(), apps = st.snapshot.len(), "state saved");
            Ok(Cycle::Success)
        }
        Err(err) => {
            error!(path = %opts.state_file.display(), error = %err, "failed to save state");
            Ok(Cycle::Failure {
                kind: "persist",
                error: err.to_string(),
            })
        }
    }
}

/// Returns true when shutdown interrupted the sleep.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut Shutdown) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.requested() => true,
    }
}
