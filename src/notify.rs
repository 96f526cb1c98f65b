use std::{
    collections::BTreeMap,
    io::{self, Write},
};

use chrono::{DateTime, Utc};
use tracing::{Level, debug, error, info, warn};

use crate::{diff::ChangeEvent, feed::AppRecord, state::Snapshot};

const SUMMARY_SAMPLE: usize = 5;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Everything needed to label a batch of change events.
#[derive(Debug, Clone, Copy)]
pub struct ChangeContext<'a> {
    pub at: DateTime<Utc>,
    pub previous: &'a Snapshot,
    pub current: &'a [AppRecord],
}

impl<'a> ChangeContext<'a> {
    /// Prefers the repository's own publish time over the local clock.
    pub fn new(
        feed_timestamp: Option<i64>,
        previous: &'a Snapshot,
        current: &'a [AppRecord],
    ) -> Self {
        let at = feed_timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);
        Self {
            at,
            previous,
            current,
        }
    }
}

pub struct Notifier<W> {
    out: W,
    quiet: bool,
}

impl Notifier<io::Stdout> {
    pub fn stdout(quiet: bool) -> Self {
        Self::new(io::stdout(), quiet)
    }
}

impl<W: Write> Notifier<W> {
    pub fn new(out: W, quiet: bool) -> Self {
        Self { out, quiet }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Logs `msg` at `level` and echoes it to the console unless quiet.
    pub fn emit(&mut self, level: Level, msg: &str) -> io::Result<()> {
        if level == Level::ERROR {
            error!("{msg}");
        } else if level == Level::WARN {
            warn!("{msg}");
        } else if level == Level::INFO {
            info!("{msg}");
        } else {
            debug!("{msg}");
        }
        self.echo(msg)
    }

    pub fn notify(&mut self, events: &[ChangeEvent], ctx: &ChangeContext<'_>) -> io::Result<()> {
        let current: BTreeMap<&str, &AppRecord> =
            ctx.current.iter().map(|r| (r.id.as_str(), r)).collect();
        let at = ctx.at.format(TIME_FORMAT).to_string();

        for event in events {
            let name_of_current = |id: &str| {
                current
                    .get(id)
                    .and_then(|r| r.name.clone())
                    .or_else(|| ctx.previous.get(id).and_then(|a| a.name.clone()))
                    .unwrap_or_else(|| "-".to_string())
            };

            let line = match event {
                ChangeEvent::Added { id, version_code } => {
                    let name = name_of_current(id.as_str());
                    info!(
                        change = event.kind(),
                        app_id = %id,
                        name = %name,
                        version_code,
                        "app added"
                    );
                    format!("[{at}] NEW    : {id} ({name}) vc={version_code}")
                }
                ChangeEvent::Removed { id } => {
                    let old = ctx.previous.get(id);
                    let name = old
                        .and_then(|a| a.name.clone())
                        .unwrap_or_else(|| "-".to_string());
                    let was = old
                        .map(|a| a.version_code.to_string())
                        .unwrap_or_else(|| "?".to_string());
                    warn!(
                        change = event.kind(),
                        app_id = %id,
                        name = %name,
                        last_version_code = %was,
                        "app removed"
                    );
                    format!("[{at}] REMOVED: {id} ({name}) was vc={was}")
                }
                ChangeEvent::Updated {
                    id,
                    old_version,
                    new_version,
                } => {
                    let name = name_of_current(id.as_str());
                    info!(
                        change = event.kind(),
                        app_id = %id,
                        name = %name,
                        old_version,
                        new_version,
                        "app updated"
                    );
                    format!("[{at}] UPDATED: {id} ({name}) {old_version} -> {new_version}")
                }
                ChangeEvent::CertificateChanged {
                    id,
                    old_fingerprint,
                    new_fingerprint,
                } => {
                    let name = name_of_current(id.as_str());
                    warn!(
                        change = event.kind(),
                        app_id = %id,
                        name = %name,
                        old_fingerprint = %old_fingerprint,
                        new_fingerprint = %new_fingerprint,
                        "app signing certificate changed"
                    );
                    format!(
                        "[{at}] CERT   : {id} ({name}) signing cert changed: {old_fingerprint} -> {new_fingerprint}"
                    )
                }
            };
            self.echo(&line)?;
        }

        self.out.flush()
    }

    /// Console-only overview printed when there is no prior state.
    pub fn summary(&mut self, apps: &[AppRecord]) -> io::Result<()> {
        info!(total_apps = apps.len(), "repository summary");
        if self.quiet {
            return Ok(());
        }

        writeln!(self.out)?;
        writeln!(self.out, "Repository summary")?;
        writeln!(self.out, "   Total apps: {}", apps.len())?;
        for (i, app) in apps.iter().take(SUMMARY_SAMPLE).enumerate() {
            writeln!(
                self.out,
                "   {}. {} - {} (vc {})",
                i + 1,
                app.name.as_deref().unwrap_or("-"),
                app.id,
                app.version_code
            )?;
        }
        if apps.len() > SUMMARY_SAMPLE {
            writeln!(self.out, "   ... plus {} more", apps.len() - SUMMARY_SAMPLE)?;
        }
        self.out.flush()
    }

    fn echo(&mut self, line: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(self.out, "{line}")
    }
}
