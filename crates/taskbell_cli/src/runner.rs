//! Process-level wiring around the reminder core.
//!
//! # Responsibility
//! - Own the database connection and mail transport for the process.
//! - Drive the sweep on a fixed cadence, or once, or run the manual trigger.
//!
//! # Invariants
//! - Sweeps run one after another; they never overlap.
//! - A tick that fires while a sweep is still running is skipped, not queued.
//! - Sweeps run on the blocking pool, so shutdown is observed mid-sweep; the
//!   runner then waits for that sweep's latch commit before returning.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use taskbell_core::db::open_db;
use taskbell_core::{
    CallerIdentity, Config, DryRunMailer, FixedClock, Mailer, ManualTriggerHandler,
    ReminderDispatcher, ReminderRenderer, ReminderTier, RunSummary, SmtpMailer,
    SqliteTaskRepository, SqliteUserDirectory, TestNotificationRequest,
};
use tokio::time::MissedTickBehavior;

type SharedMailer = dyn Mailer + Send + Sync;

pub struct App {
    conn: Mutex<Connection>,
    mailer: Box<SharedMailer>,
    renderer: ReminderRenderer,
    tick_interval: Duration,
}

impl App {
    /// Opens storage and builds the mail transport. Dry runs need no SMTP settings.
    pub fn open(config: Config, dry_run: bool) -> Result<Self> {
        let conn = open_db(&config.db_path)
            .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

        let mailer: Box<SharedMailer> = if dry_run {
            Box::new(DryRunMailer)
        } else {
            let settings = config.require_smtp()?;
            Box::new(SmtpMailer::from_settings(&settings).context("failed to build SMTP transport")?)
        };

        let renderer = match &config.app_url {
            Some(url) => ReminderRenderer::new().with_app_url(url.as_str()),
            None => ReminderRenderer::new(),
        };

        info!(
            "event=runner_open module=cli status=ok dry_run={} tick_secs={}",
            dry_run,
            config.tick_interval.as_secs()
        );

        Ok(Self::from_parts(conn, mailer, renderer, config.tick_interval))
    }

    fn from_parts(
        conn: Connection,
        mailer: Box<SharedMailer>,
        renderer: ReminderRenderer,
        tick_interval: Duration,
    ) -> Self {
        Self {
            conn: Mutex::new(conn),
            mailer,
            renderer,
            tick_interval,
        }
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn dispatcher<'a>(
        &'a self,
        conn: &'a Connection,
    ) -> ReminderDispatcher<SqliteTaskRepository<'a>, SqliteUserDirectory<'a>, &'a SharedMailer>
    {
        ReminderDispatcher::new(
            SqliteTaskRepository::new(conn),
            SqliteUserDirectory::new(conn),
            self.mailer.as_ref(),
            self.renderer.clone(),
        )
        .with_tick_interval(self.tick_interval)
    }

    /// Sweeps on the configured cadence until Ctrl-C.
    pub async fn run_forever(self: Arc<Self>) -> Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    async fn run_until<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("event=runner_start module=cli status=ok");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let app = Arc::clone(&self);
                    let mut sweep = tokio::task::spawn_blocking(move || app.sweep_once(None));
                    tokio::select! {
                        joined = &mut sweep => {
                            joined.context("sweep task panicked")??;
                        }
                        signal = &mut shutdown => {
                            signal.context("failed to listen for shutdown signal")?;
                            info!("event=runner_stop module=cli status=draining reason=signal");
                            sweep.await.context("sweep task panicked")??;
                            info!("event=runner_stop module=cli status=ok reason=signal");
                            return Ok(());
                        }
                    }
                }
                signal = &mut shutdown => {
                    signal.context("failed to listen for shutdown signal")?;
                    info!("event=runner_stop module=cli status=ok reason=signal");
                    return Ok(());
                }
            }
        }
    }

    /// One sweep, optionally evaluated at a fixed instant.
    pub fn sweep_once(&self, at: Option<DateTime<Utc>>) -> Result<RunSummary> {
        let conn = self.connection()?;
        let dispatcher = self.dispatcher(&conn);
        Ok(match at {
            Some(at) => dispatcher.with_clock(FixedClock(at)).run(),
            None => dispatcher.run(),
        })
    }

    /// Runs the manual trigger and returns the wire payload plus success.
    pub fn send_test(
        &self,
        task_id: &str,
        caller: Option<&str>,
        tier: Option<ReminderTier>,
    ) -> Result<(Value, bool)> {
        let conn = self.connection()?;
        let handler = ManualTriggerHandler::new(
            SqliteTaskRepository::new(&conn),
            SqliteUserDirectory::new(&conn),
            self.mailer.as_ref(),
            self.renderer.clone(),
        );
        let caller = caller.map(CallerIdentity::new);
        let request = TestNotificationRequest {
            task_id: task_id.to_string(),
            tier,
        };

        Ok(match handler.send_test_notification(caller.as_ref(), &request) {
            Ok(response) => (json!(response), true),
            Err(err) => (
                json!({
                    "success": false,
                    "error": { "code": err.code(), "message": err.to_string() },
                }),
                false,
            ),
        })
    }
}
