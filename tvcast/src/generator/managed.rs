//! A single externally supplied script and its lifecycle.
//!
//! The artifact is downloaded into the data directory, health-checked, run
//! as an isolated child process under a hard timeout, and optionally re-run
//! on a recurring timer. Failures are recorded in the instance state and
//! returned as typed errors; they never take the process down.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use process_utils::{CapturedOutput, RunError};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ARTIFACT_PLACEHOLDER, GeneratorConfig, ScheduleInterval};
use crate::utils::fs;
use crate::{Error, Result};

use super::events::{GeneratorEvent, GeneratorEventBroadcaster};
use super::role::GeneratorRole;
use super::schedule::ScheduleHandle;
use super::state::{GeneratorState, GeneratorStatus, Phase, ScheduleStatus};

/// Owner of one generator artifact.
pub struct ManagedGenerator {
    role: GeneratorRole,
    config: GeneratorConfig,
    http: reqwest::Client,
    artifact_path: PathBuf,
    state: Mutex<GeneratorState>,
    schedule: Mutex<Option<ScheduleHandle>>,
    /// Parent of every schedule token installed by this instance.
    cancellation_token: CancellationToken,
    events: GeneratorEventBroadcaster,
}

impl ManagedGenerator {
    /// Create a generator for `role`.
    ///
    /// An artifact left in the data directory by a previous run is adopted
    /// and the instance starts `Ready`.
    pub fn new(
        role: GeneratorRole,
        config: GeneratorConfig,
        http: reqwest::Client,
        cancellation_token: CancellationToken,
        events: GeneratorEventBroadcaster,
    ) -> Self {
        let path = config.data_dir.join(role.artifact_file_name());
        let artifact_path = std::path::absolute(&path).unwrap_or(path);
        let installed = artifact_path.is_file();
        if installed {
            info!(role = %role, path = %artifact_path.display(), "Adopted existing artifact");
        }

        Self {
            role,
            config,
            http,
            artifact_path,
            state: Mutex::new(GeneratorState::new(installed)),
            schedule: Mutex::new(None),
            cancellation_token,
            events,
        }
    }

    pub fn role(&self) -> GeneratorRole {
        self.role
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase()
    }

    pub fn is_executing(&self) -> bool {
        !self.state.lock().in_flight.is_empty()
    }

    pub fn has_artifact(&self) -> bool {
        self.state.lock().installed
    }

    pub fn source_url(&self) -> Option<String> {
        self.state.lock().source_url.clone()
    }

    /// Document produced by the last successful playlist run.
    pub fn last_output(&self) -> Option<Arc<str>> {
        self.state.lock().last_output.clone()
    }

    // ========== Acquisition ==========

    /// Download the artifact from `source_url` and install it.
    ///
    /// The previous artifact stays in place unless the download and the
    /// atomic replacement both succeed.
    pub async fn acquire(&self, source_url: &str) -> Result<()> {
        let _guard = self.begin_download()?;
        info!(role = %self.role, url = %source_url, "Downloading generator artifact");

        let result = match self.download(source_url).await {
            Ok(bytes) => self.write_artifact(source_url, &bytes).await,
            Err(e) => Err(e),
        };
        self.finish_install(source_url, result)
    }

    /// Install `contents` as the artifact without downloading it.
    ///
    /// `origin` is recorded as the source URL.
    pub async fn install(&self, contents: &[u8], origin: &str) -> Result<()> {
        let _guard = self.begin_download()?;
        let result = if contents.iter().all(u8::is_ascii_whitespace) {
            Err(Error::acquisition(origin, "empty payload"))
        } else {
            self.write_artifact(origin, contents).await
        };
        self.finish_install(origin, result)
    }

    fn begin_download(&self) -> Result<DownloadGuard<'_>> {
        let mut state = self.state.lock();
        if state.downloading {
            return Err(Error::AlreadyRunning {
                role: self.role.as_str(),
                operation: "acquire",
            });
        }
        state.downloading = true;
        Ok(DownloadGuard { state: &self.state })
    }

    async fn download(&self, source_url: &str) -> Result<Vec<u8>> {
        url::Url::parse(source_url)
            .map_err(|e| Error::acquisition(source_url, format!("invalid URL: {e}")))?;

        let response = self
            .http
            .get(source_url)
            .send()
            .await
            .map_err(|e| Error::acquisition(source_url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::acquisition(source_url, format!("HTTP status {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::acquisition(source_url, e.to_string()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::acquisition(source_url, "empty payload"));
        }

        Ok(bytes.to_vec())
    }

    async fn write_artifact(&self, origin: &str, contents: &[u8]) -> Result<()> {
        fs::write_atomic(&self.artifact_path, contents)
            .await
            .map_err(|e| Error::acquisition(origin, e.to_string()))
    }

    fn finish_install(&self, origin: &str, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    state.installed = true;
                    state.source_url = Some(origin.to_string());
                    state.settled = Phase::Ready;
                    state.last_error = None;
                    state.reported_version = None;
                }
                info!(role = %self.role, path = %self.artifact_path.display(), "Artifact installed");
                self.events.publish(GeneratorEvent::ArtifactInstalled {
                    role: self.role,
                    source_url: origin.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(role = %self.role, error = %e, "Artifact acquisition failed");
                self.state.lock().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    // ========== Validation ==========

    /// Run the role's health check against the installed artifact.
    ///
    /// Returns `Ok(false)` for a failed or timed-out check. Errors are
    /// reserved for a missing artifact or an interpreter that cannot start.
    pub async fn validate(&self) -> Result<bool> {
        if !self.has_artifact() {
            return Err(Error::validation(format!(
                "no {} artifact installed",
                self.role
            )));
        }

        let template = match self.role {
            GeneratorRole::Playlist => &self.config.syntax_check_args,
            GeneratorRole::Resolver => &self.config.self_test_args,
        };
        let artifact = self.artifact_path.to_string_lossy();
        let args: Vec<String> = template
            .iter()
            .map(|arg| arg.replace(ARTIFACT_PLACEHOLDER, &artifact))
            .collect();

        let cmd = self.command(&args);
        match process_utils::run_captured(cmd, self.config.validation_timeout).await {
            Ok(out) if out.success() => {
                let mut state = self.state.lock();
                if self.role == GeneratorRole::Resolver {
                    state.reported_version = out.first_line().map(str::to_string);
                }
                state.last_error = None;
                info!(role = %self.role, version = ?state.reported_version, "Health check passed");
                Ok(true)
            }
            Ok(out) => {
                let reason = format!("health check failed: {}", describe_exit(&out));
                warn!(role = %self.role, "{}", reason);
                self.state.lock().last_error = Some(reason);
                Ok(false)
            }
            Err(RunError::TimedOut(timeout)) => {
                let reason = format!("health check timed out after {}s", timeout.as_secs());
                warn!(role = %self.role, "{}", reason);
                self.state.lock().last_error = Some(reason);
                Ok(false)
            }
            Err(e) => Err(Error::execution(
                self.role.as_str(),
                format!("health check could not run: {e}"),
            )),
        }
    }

    // ========== Execution ==========

    /// Run the artifact with `args` and return its standard output.
    ///
    /// Fails with [`Error::AlreadyRunning`] if an execution with the same
    /// arguments is in flight. Nothing is queued.
    pub async fn execute(&self, args: &[String]) -> Result<String> {
        let role = self.role.as_str();
        let key = args.to_vec();

        {
            let mut state = self.state.lock();
            if state.in_flight.contains(&key) {
                return Err(Error::AlreadyRunning {
                    role,
                    operation: "execute",
                });
            }
            if !state.installed {
                let err = Error::execution(role, "no artifact installed");
                state.last_error = Some(err.to_string());
                return Err(err);
            }
            state.in_flight.insert(key.clone());
        }
        let _guard = ExecutionGuard {
            state: &self.state,
            key,
        };

        debug!(role, ?args, "Executing generator artifact");
        let argv = std::iter::once(self.artifact_path.as_os_str())
            .chain(args.iter().map(OsStr::new));
        let outcome =
            process_utils::run_captured(self.command(argv), self.config.execution_timeout).await;
        let result = self.interpret(args, outcome);

        {
            let mut state = self.state.lock();
            state.last_execution_at = Some(Utc::now());
            match &result {
                Ok(stdout) => {
                    state.settled = Phase::Ready;
                    state.last_error = None;
                    if self.role == GeneratorRole::Playlist {
                        state.last_output = Some(Arc::from(stdout.as_str()));
                    }
                }
                Err(e) => {
                    state.settled = Phase::Failed;
                    state.last_error = Some(e.to_string());
                }
            }
        }

        match &result {
            Ok(stdout) => {
                debug!(role, bytes = stdout.len(), "Generator execution succeeded");
                if args.is_empty() {
                    self.events
                        .publish(GeneratorEvent::OutputProduced { role: self.role });
                }
            }
            Err(e) => {
                warn!(role, error = %e, "Generator execution failed");
                if args.is_empty() {
                    self.events.publish(GeneratorEvent::ExecutionFailed {
                        role: self.role,
                        reason: e.to_string(),
                    });
                }
            }
        }

        result
    }

    /// Interpreter command run from the artifact's directory.
    fn command<I, S>(&self, args: I) -> tokio::process::Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = process_utils::tokio_command(&self.config.interpreter);
        cmd.args(args);
        if let Some(dir) = self.artifact_path.parent() {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn interpret(
        &self,
        args: &[String],
        outcome: std::result::Result<CapturedOutput, RunError>,
    ) -> Result<String> {
        let role = self.role.as_str();
        match outcome {
            Err(RunError::TimedOut(timeout)) => Err(Error::execution(
                role,
                format!("timed out after {}s", timeout.as_secs_f32()),
            )),
            Err(RunError::Spawn(e)) => Err(Error::execution(
                role,
                format!("failed to start {}: {e}", self.config.interpreter),
            )),
            Err(e) => Err(Error::execution(role, e.to_string())),
            Ok(out) if !out.success() => Err(Error::execution(role, describe_exit(&out))),
            Ok(out) if self.role.requires_output(args) && out.stdout.trim().is_empty() => {
                Err(Error::execution(role, "produced no output"))
            }
            Ok(out) => Ok(out.stdout),
        }
    }

    // ========== Scheduling ==========

    /// Parse `interval` and install a recurring execution timer.
    ///
    /// Returns `false` and records `last_error` if the interval is invalid;
    /// no timer is installed in that case.
    pub fn schedule_recurring(self: &Arc<Self>, interval: &str) -> bool {
        match ScheduleInterval::parse(interval) {
            Ok(interval) => {
                self.schedule(interval);
                true
            }
            Err(e) => {
                warn!(role = %self.role, error = %e, "Rejected schedule interval");
                self.state.lock().last_error = Some(e.to_string());
                false
            }
        }
    }

    /// Install a recurring execution timer, replacing any existing one.
    pub fn schedule(self: &Arc<Self>, interval: ScheduleInterval) {
        self.install_timer(interval, interval.period());
    }

    fn install_timer(self: &Arc<Self>, interval: ScheduleInterval, period: Duration) {
        let token = self.cancellation_token.child_token();
        let task_token = token.clone();
        let generator = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!(role = %generator.role, "Generator schedule stopped");
                        break;
                    }
                    _ = ticker.tick() => generator.run_scheduled_tick().await,
                }
            }
        });

        let previous = self
            .schedule
            .lock()
            .replace(ScheduleHandle::new(interval, token, task));
        if let Some(previous) = previous {
            previous.cancel();
        }

        info!(role = %self.role, interval = %interval, "Scheduled recurring execution");
    }

    async fn run_scheduled_tick(&self) {
        if self.is_executing() {
            debug!(role = %self.role, "Skipping scheduled tick, execution in progress");
            return;
        }

        match self.execute(&[]).await {
            Ok(output) => {
                info!(role = %self.role, bytes = output.len(), "Scheduled execution completed")
            }
            Err(e) if e.is_already_running() => {
                debug!(role = %self.role, "Skipping scheduled tick, execution in progress")
            }
            Err(e) => warn!(role = %self.role, error = %e, "Scheduled execution failed"),
        }
    }

    /// Cancel the recurring timer. Returns whether one was installed.
    pub fn cancel_schedule(&self) -> bool {
        match self.schedule.lock().take() {
            Some(handle) => {
                handle.cancel();
                info!(role = %self.role, "Cancelled recurring execution");
                true
            }
            None => false,
        }
    }

    // ========== Status ==========

    pub fn status(&self) -> GeneratorStatus {
        let schedule = self
            .schedule
            .lock()
            .as_ref()
            .map(ScheduleHandle::status)
            .unwrap_or_else(ScheduleStatus::default);

        let state = self.state.lock();
        let phase = state.phase();
        GeneratorStatus {
            role: self.role,
            phase,
            running: phase == Phase::Executing,
            artifact_present: state.installed,
            artifact_path: state
                .installed
                .then(|| self.artifact_path.display().to_string()),
            source_url: state.source_url.clone(),
            last_execution_at: state.last_execution_at,
            last_error: state.last_error.clone(),
            reported_version: state.reported_version.clone(),
            has_output: state.last_output.is_some(),
            schedule,
        }
    }

    /// Drop memoized output tied to this instance.
    ///
    /// Returns whether anything was cleared.
    pub fn clear_produced_cache(&self) -> bool {
        let mut state = self.state.lock();
        let had_version = state.reported_version.take().is_some();
        let had_output = state.last_output.take().is_some();
        debug!(role = %self.role, had_version, had_output, "Cleared produced cache");
        had_version || had_output
    }
}

fn describe_exit(out: &CapturedOutput) -> String {
    match out.stderr_tail() {
        Some(tail) => format!("exited with code {}: {tail}", out.code()),
        None => format!("exited with code {}", out.code()),
    }
}

/// Clears the downloading flag however acquisition ends.
struct DownloadGuard<'a> {
    state: &'a Mutex<GeneratorState>,
}

impl Drop for DownloadGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().downloading = false;
    }
}

/// Removes an execution from the in-flight set however it ends.
struct ExecutionGuard<'a> {
    state: &'a Mutex<GeneratorState>,
    key: Vec<String>,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.key);
    }
}
