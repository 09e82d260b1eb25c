//! Run controller
//!
//! One task owns the crawl lifecycle. Callers talk to it through a cloneable
//! [`Controller`] handle: commands go over an mpsc channel and each carries a
//! oneshot for its reply. At most one run is active at a time.

use crate::config::{CrawlConfig, ServiceConfig};
use crate::crawler::{Coordinator, Frontier, RunOutcome};
use crate::logging::LogBuffer;
use crate::output::{Stats, StatsTracker};
use crate::state::RunState;
use crate::storage::{open_storage, SqliteStorage};
use crate::{Result, ScrollError};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};

const COMMAND_BUFFER: usize = 16;

/// Snapshot returned by [`Controller::status`]
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: RunState,
    /// Active run, or the last one started
    pub run_id: Option<String>,
    /// Live statistics while running, final ones afterwards
    pub stats: Option<Stats>,
    pub recent_logs: Vec<String>,
    /// Terminal error of a failed run
    pub error: Option<String>,
    pub archive_path: Option<String>,
}

enum Command {
    Start {
        config: CrawlConfig,
        reply: oneshot::Sender<Result<String>>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
}

/// Handle to the run controller task
#[derive(Clone)]
pub struct Controller {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<RunState>,
}

impl Controller {
    /// Spawns the controller task on the current runtime
    ///
    /// # Arguments
    ///
    /// * `service` - User agent, output locations and fetch behaviour shared by every run
    /// * `index` - The run index database
    /// * `logs` - Log tail returned in status reports
    pub fn spawn(service: ServiceConfig, index: Arc<Mutex<SqliteStorage>>, logs: LogBuffer) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state) = watch::channel(RunState::Idle);

        let actor = Actor {
            service,
            index,
            logs,
            state: RunState::Idle,
            state_tx,
            active: None,
            run_id: None,
            last_stats: None,
            error: None,
            archive_path: None,
        };
        tokio::spawn(actor.run(rx));

        Self { tx, state }
    }

    /// Opens the run index under the data directory and spawns the controller
    pub fn open(service: ServiceConfig, logs: LogBuffer) -> Result<Self> {
        let index = open_storage(&service.output.database_path())?;
        Ok(Self::spawn(service, Arc::new(Mutex::new(index)), logs))
    }

    /// Starts a run
    ///
    /// # Returns
    ///
    /// * `Ok(run_id)` - The run was registered and is crawling
    /// * `Err(ScrollError::RunInProgress)` - Another run is active
    /// * `Err(ScrollError)` - Invalid settings or storage could not be set up;
    ///   the controller moves to `failed`
    pub async fn start(&self, config: CrawlConfig) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { config, reply }).await?;
        rx.await.map_err(|_| ScrollError::ControllerClosed)?
    }

    /// Asks the active run to stop
    ///
    /// Nothing more is admitted; in-flight fetches finish and the partial
    /// archive is written. Returns false if no run was active.
    pub async fn stop(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| ScrollError::ControllerClosed)
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await.map_err(|_| ScrollError::ControllerClosed)
    }

    /// Current lifecycle state, without a round trip to the task
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Waits until no run is active and returns the resulting state
    pub async fn wait_idle(&self) -> Result<RunState> {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if current != RunState::Running {
                return Ok(current);
            }
            state
                .changed()
                .await
                .map_err(|_| ScrollError::ControllerClosed)?;
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ScrollError::ControllerClosed)
    }
}

struct ActiveRun {
    frontier: Arc<Frontier>,
    stats: Arc<StatsTracker>,
    handle: JoinHandle<RunOutcome>,
}

enum Event {
    Command(Option<Command>),
    Finished(std::result::Result<RunOutcome, JoinError>),
}

struct Actor {
    service: ServiceConfig,
    index: Arc<Mutex<SqliteStorage>>,
    logs: LogBuffer,
    state: RunState,
    state_tx: watch::Sender<RunState>,
    active: Option<ActiveRun>,
    run_id: Option<String>,
    last_stats: Option<Stats>,
    error: Option<String>,
    archive_path: Option<String>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            let event = tokio::select! {
                command = rx.recv() => Event::Command(command),
                joined = join_active(&mut self.active) => Event::Finished(joined),
            };

            match event {
                Event::Command(Some(command)) => self.handle(command).await,
                Event::Command(None) => break,
                Event::Finished(joined) => self.finish(joined),
            }
        }

        // Every handle is gone; let the active run end on its own.
        if let Some(active) = self.active.take() {
            active.frontier.close();
            if let Ok(outcome) = active.handle.await {
                tracing::info!("Run {} ended after controller shutdown", outcome.run_id);
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start { config, reply } => {
                let _ = reply.send(self.start(config).await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn start(&mut self, config: CrawlConfig) -> Result<String> {
        if !self.state.accepts_start() {
            let run_id = self.run_id.clone().unwrap_or_default();
            return Err(ScrollError::RunInProgress(run_id));
        }

        // Registers the run and creates its directories
        let service = self.service.clone();
        let index = Arc::clone(&self.index);
        let created = tokio::task::spawn_blocking(move || Coordinator::new(config, &service, index))
            .await
            .unwrap_or_else(|e| Err(ScrollError::Task(e.to_string())));

        let coordinator = match created {
            Ok(coordinator) => coordinator,
            Err(e) => {
                tracing::error!("Run rejected: {}", e);
                self.error = Some(e.to_string());
                self.last_stats = None;
                self.archive_path = None;
                self.set_state(RunState::Failed);
                return Err(e);
            }
        };

        let run_id = coordinator.run_id().to_string();
        self.active = Some(ActiveRun {
            frontier: coordinator.frontier(),
            stats: coordinator.stats(),
            handle: tokio::spawn(coordinator.run()),
        });
        self.run_id = Some(run_id.clone());
        self.last_stats = None;
        self.error = None;
        self.archive_path = None;
        self.set_state(RunState::Running);

        Ok(run_id)
    }

    fn stop(&mut self) -> bool {
        match &self.active {
            Some(active) if !active.frontier.is_stopped() => {
                tracing::info!("Stop requested for run {}", self.run_id.as_deref().unwrap_or(""));
                active.frontier.close();
                true
            }
            _ => false,
        }
    }

    fn status(&self) -> StatusReport {
        let stats = match &self.active {
            Some(active) => Some(active.stats.snapshot()),
            None => self.last_stats.clone(),
        };
        StatusReport {
            state: self.state,
            run_id: self.run_id.clone(),
            stats,
            recent_logs: self.logs.lines(),
            error: self.error.clone(),
            archive_path: self.archive_path.clone(),
        }
    }

    fn finish(&mut self, joined: std::result::Result<RunOutcome, JoinError>) {
        let active = self.active.take();
        match joined {
            Ok(outcome) => {
                self.archive_path = outcome
                    .archive_path()
                    .map(|p| p.to_string_lossy().into_owned());
                self.last_stats = Some(outcome.stats);
                self.error = outcome.error;
                self.set_state(outcome.status.into());
            }
            Err(e) => {
                tracing::error!("Run task failed: {}", e);
                self.last_stats = active.map(|a| a.stats.freeze());
                self.error = Some(ScrollError::Task(e.to_string()).to_string());
                self.set_state(RunState::Failed);
            }
        }
    }

    fn set_state(&mut self, state: RunState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Resolves when the active run's task ends; never resolves without one
async fn join_active(
    active: &mut Option<ActiveRun>,
) -> std::result::Result<RunOutcome, JoinError> {
    match active {
        Some(run) => (&mut run.handle).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn controller(dir: &TempDir) -> Controller {
        let service = ServiceConfig {
            output: OutputConfig {
                data_dir: dir.path().join("data").to_string_lossy().into_owned(),
                archive_dir: dir.path().join("archives").to_string_lossy().into_owned(),
            },
            ..ServiceConfig::default()
        };
        Controller::open(service, LogBuffer::default()).unwrap()
    }

    fn crawl(server: &MockServer) -> CrawlConfig {
        let mut config = CrawlConfig::new(format!("{}/", server.uri()));
        config.request_delay = 0.0;
        config.respect_robots_txt = false;
        config
    }

    async fn slow_site() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body><a href=\"/next\">next</a></body></html>", "text/html")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);

        let status = controller.status().await.unwrap();
        assert_eq!(status.state, RunState::Idle);
        assert!(status.run_id.is_none());
        assert!(status.stats.is_none());
        assert!(!controller.stop().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_run() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);

        let result = controller.start(CrawlConfig::new("not a url")).await;
        assert!(matches!(result, Err(ScrollError::Config(_))));

        let status = controller.status().await.unwrap();
        assert_eq!(status.state, RunState::Failed);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn test_rejects_start_while_running() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        let server = slow_site().await;

        let run_id = controller.start(crawl(&server)).await.unwrap();
        assert_eq!(controller.state(), RunState::Running);

        match controller.start(crawl(&server)).await {
            Err(ScrollError::RunInProgress(active)) => assert_eq!(active, run_id),
            other => panic!("expected RunInProgress, got {:?}", other.map(|_| ())),
        }

        assert_eq!(controller.wait_idle().await.unwrap(), RunState::Completed);
        let status = controller.status().await.unwrap();
        assert_eq!(status.run_id.as_deref(), Some(run_id.as_str()));
        assert!(status.archive_path.is_some());
        assert!(status.stats.unwrap().pages_scraped >= 1);
    }

    #[tokio::test]
    async fn test_stop_ends_run_as_stopped() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        let server = slow_site().await;

        controller.start(crawl(&server)).await.unwrap();
        assert!(controller.stop().await.unwrap());

        assert_eq!(controller.wait_idle().await.unwrap(), RunState::Stopped);
        let status = controller.status().await.unwrap();
        assert_eq!(status.state, RunState::Stopped);
        assert!(status.error.is_none());
        assert!(status.archive_path.is_some());

        // A new run is accepted after a terminal state
        controller.start(crawl(&server)).await.unwrap();
        controller.stop().await.unwrap();
        controller.wait_idle().await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_start_registers_run_off_the_actor_thread() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        let server = slow_site().await;

        let (started, status) = tokio::join!(controller.start(crawl(&server)), controller.status());
        let run_id = started.unwrap();
        assert!(status.is_ok());

        let run_dir = dir.path().join("data").join("runs").join(&run_id);
        assert!(run_dir.is_dir());
        let status = controller.status().await.unwrap();
        assert_eq!(status.state, RunState::Running);
        assert_eq!(status.run_id.as_deref(), Some(run_id.as_str()));

        controller.stop().await.unwrap();
        assert_eq!(controller.wait_idle().await.unwrap(), RunState::Stopped);
    }
}
