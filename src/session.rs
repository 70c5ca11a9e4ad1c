//! Acquisition session: one continuous run at a time.
//!
//! The session owns everything a run needs. There is no global state, so
//! several sessions can coexist.
//!
//! ```text
//!   start() ──► Starting ──► Running ──stop()──► Stopping ──► Idle
//!                  │            │
//!                  │            └─ read error ─► Failed (source closed)
//!                  └─ setup error ─► Failed ─► Idle (source closed)
//! ```
//!
//! # Threads
//!
//! Each run gets a dedicated OS thread that owns the [`DataSource`] and the
//! [`SlidingBuffer`]. The thread polls the source, folds every block into the
//! buffer and publishes an immutable [`WindowSnapshot`] into a one-slot
//! mailbox (`tokio::sync::watch`). Publishing never blocks; a slow consumer
//! simply observes the latest window.
//!
//! Cancellation is a per-run `Arc<AtomicBool>` checked once per iteration,
//! so `stop()` returns immediately and the worker exits within one poll or
//! read cycle.
//!
//! # Example
//!
//! ```no_run
//! use waveform_daq::config::Settings;
//! use waveform_daq::hardware::simulated_factory;
//! use waveform_daq::session::AcquisitionSession;
//!
//! # async fn example() -> waveform_daq::error::AppResult<()> {
//! let settings = Settings::load_from("config/daq.toml")?;
//! let session = AcquisitionSession::from_settings(
//!     &settings,
//!     simulated_factory(settings.simulation.clone()),
//! )?;
//!
//! session.attach_consumer(&tokio::runtime::Handle::current(), |snapshot| {
//!     println!("t = {:?}", snapshot.latest_time());
//! });
//! let path = session.start()?;
//! tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//! session.stop();
//! session.wait_until_stopped().await;
//! println!("saved to {}", path.display());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle as TaskHandle;
use tracing::{debug, error, info, info_span, warn};

use crate::channel::ChannelConfig;
use crate::config::{AcquisitionConfig, Settings, StorageConfig};
use crate::data::block::SampleBlock;
use crate::data::sliding_buffer::{SlidingBuffer, WindowSnapshot};
use crate::error::{AppResult, DaqError, ErrorKind};
use crate::hardware::{DataSource, DataSourceFactory, LoggingMode};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No run; `start()` allowed
    Idle,
    /// `start()` is configuring the device
    Starting,
    /// Worker thread is acquiring
    Running,
    /// Stop requested; worker is shutting the device down
    Stopping,
    /// Last run ended with an error; `start()` allowed
    Failed,
}

impl SessionState {
    /// True in the states from which a new run may start.
    pub fn is_resting(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Failed)
    }
}

/// Error recorded for the most recent failed start or run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunError {
    /// Category
    pub kind: ErrorKind,
    /// Display text
    pub message: String,
    /// Operator-facing dialog title and body
    pub user_message: (String, String),
}

impl From<&DaqError> for RunError {
    fn from(err: &DaqError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            user_message: err.user_message(),
        }
    }
}

/// Everything a session needs to configure a run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device name
    pub device: String,
    /// Channels in order
    pub channels: Vec<ChannelConfig>,
    /// Timing and loop tuning
    pub acquisition: AcquisitionConfig,
    /// Output placement
    pub storage: StorageConfig,
}

impl SessionConfig {
    /// Extract the session-relevant parts of validated settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            device: settings.global.device.clone(),
            channels: settings.channels.clone(),
            acquisition: settings.acquisition.clone(),
            storage: settings.storage.clone(),
        }
    }
}

type SnapshotSlot = Option<Arc<WindowSnapshot>>;

struct RunHandle {
    id: u64,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    output_path: Option<PathBuf>,
}

/// Owner of the acquisition lifecycle.
pub struct AcquisitionSession {
    config: Arc<SessionConfig>,
    factory: DataSourceFactory,
    state: Arc<watch::Sender<SessionState>>,
    snapshots: Arc<watch::Sender<SnapshotSlot>>,
    last_error: Arc<Mutex<Option<RunError>>>,
    run: Mutex<Option<RunHandle>>,
    consumer: Mutex<Option<TaskHandle<()>>>,
    next_run_id: AtomicU64,
}

impl AcquisitionSession {
    /// Create an idle session.
    pub fn new(config: SessionConfig, factory: DataSourceFactory) -> AppResult<Self> {
        if config.channels.is_empty() {
            return Err(DaqError::Configuration(
                "At least one channel must be configured".to_string(),
            ));
        }
        let acq = &config.acquisition;
        if !(acq.sample_rate.is_finite() && acq.sample_rate > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid sample rate {}",
                acq.sample_rate
            )));
        }
        if acq.batch_cap == 0 {
            return Err(DaqError::Configuration(
                "batch_cap must be non-zero".to_string(),
            ));
        }
        if acq.poll_interval.is_zero() {
            return Err(DaqError::Configuration(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        let (state, _) = watch::channel(SessionState::Idle);
        let (snapshots, _) = watch::channel(None);
        Ok(Self {
            config: Arc::new(config),
            factory,
            state: Arc::new(state),
            snapshots: Arc::new(snapshots),
            last_error: Arc::new(Mutex::new(None)),
            run: Mutex::new(None),
            consumer: Mutex::new(None),
            next_run_id: AtomicU64::new(1),
        })
    }

    /// Create an idle session from loaded settings.
    pub fn from_settings(settings: &Settings, factory: DataSourceFactory) -> AppResult<Self> {
        Self::new(SessionConfig::from_settings(settings), factory)
    }

    /// Channels in buffer order.
    pub fn channels(&self) -> &[ChannelConfig] {
        &self.config.channels
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// True only while the worker is acquiring.
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// State change notifications.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Snapshot mailbox. Holds `None` until the first fold of a run.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<SnapshotSlot> {
        self.snapshots.subscribe()
    }

    /// Most recently published window.
    pub fn latest_snapshot(&self) -> SnapshotSlot {
        self.snapshots.borrow().clone()
    }

    /// Error of the most recent failed start or run.
    pub fn last_error(&self) -> Option<RunError> {
        self.last_error.lock().clone()
    }

    /// Log file of the current or most recent run.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.run.lock().as_ref().and_then(|r| r.output_path.clone())
    }

    /// Begin a new run and return the path it logs to.
    ///
    /// Fails with [`DaqError::AlreadyRunning`] unless the session is `Idle`
    /// or `Failed`. On a setup failure the source is closed, the error is
    /// recorded and the session returns to `Idle`.
    pub fn start(&self) -> AppResult<PathBuf> {
        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));

        // Claim and install the new handle in one step, so a concurrent
        // stop() either sees the new run or finds the session resting.
        let previous = {
            let mut slot = self.run.lock();
            let claimed = self.state.send_if_modified(|state| {
                if state.is_resting() {
                    *state = SessionState::Starting;
                    true
                } else {
                    false
                }
            });
            if !claimed {
                drop(slot);
                warn!(state = ?self.state(), "Start rejected; acquisition already active");
                return Err(DaqError::AlreadyRunning);
            }
            slot.replace(RunHandle {
                id: run_id,
                cancel: Arc::clone(&cancel),
                thread: None,
                output_path: None,
            })
        };

        // The previous worker has already left the loop; reap it.
        if let Some(mut previous) = previous {
            join_worker(&mut previous);
        }

        match self.launch(run_id, cancel) {
            Ok(path) => Ok(path),
            Err(err) => {
                error!(run = run_id, error = %err, "Failed to start acquisition");
                *self.last_error.lock() = Some(RunError::from(&err));
                self.state.send_replace(SessionState::Failed);
                self.state.send_replace(SessionState::Idle);
                Err(err)
            }
        }
    }

    fn launch(&self, run_id: u64, cancel: Arc<AtomicBool>) -> AppResult<PathBuf> {
        let cfg = &self.config;
        let acq = &cfg.acquisition;
        let output_path = next_output_path(&cfg.storage, Local::now())?;
        if let Some(run) = self.run.lock().as_mut() {
            run.output_path = Some(output_path.clone());
        }
        let buffer = SlidingBuffer::new(cfg.channels.len(), acq.window_capacity(), acq.sample_rate)?;

        let mut source = (self.factory)()?;
        if let Err(err) = configure_source(source.as_mut(), cfg, &output_path) {
            if let Err(close_err) = source.close() {
                warn!(error = %close_err, "Error closing data source after failed setup");
            }
            return Err(err);
        }

        self.snapshots.send_replace(None);
        *self.last_error.lock() = None;

        let worker = Worker {
            run_id,
            source,
            buffer,
            block: SampleBlock::new(cfg.channels.len()),
            config: Arc::clone(&self.config),
            cancel: Arc::clone(&cancel),
            state: Arc::clone(&self.state),
            snapshots: Arc::clone(&self.snapshots),
            last_error: Arc::clone(&self.last_error),
        };

        // Hold the slot so a concurrent stop() sees the thread handle.
        let mut slot = self.run.lock();
        let cancelled = cancel.load(Ordering::SeqCst);
        self.state.send_replace(if cancelled {
            SessionState::Stopping
        } else {
            SessionState::Running
        });
        let thread = thread::Builder::new()
            .name(format!("daq-acquisition-{run_id}"))
            .spawn(move || worker.run())?;
        if let Some(run) = slot.as_mut() {
            run.thread = Some(thread);
        }
        drop(slot);

        info!(
            run = run_id,
            channels = cfg.channels.len(),
            sample_rate = acq.sample_rate,
            path = %output_path.display(),
            "Started acquisition"
        );
        Ok(output_path)
    }

    /// Request the current run to end. Never blocks; no-op when idle.
    pub fn stop(&self) {
        // Cancel and transition under the run lock; launch() publishes
        // Running under the same lock.
        let slot = self.run.lock();
        if let Some(run) = slot.as_ref() {
            run.cancel.store(true, Ordering::SeqCst);
            debug!(run = run.id, "Stop requested");
        }
        self.state.send_if_modified(|state| {
            if *state == SessionState::Running {
                *state = SessionState::Stopping;
                true
            } else {
                false
            }
        });
    }

    /// Request a stop and block until the worker has closed the device.
    pub fn stop_and_join(&self) {
        self.stop();
        let thread = self.run.lock().as_mut().and_then(|r| r.thread.take());
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Acquisition worker panicked");
            }
        }
    }

    /// Resolve once the session is back in `Idle` or `Failed`.
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|state| state.is_resting()).await;
    }

    /// Run `callback` on `runtime` for every new snapshot.
    ///
    /// At most one consumer is attached; attaching another replaces it.
    pub fn attach_consumer<F>(&self, runtime: &Handle, mut callback: F)
    where
        F: FnMut(Arc<WindowSnapshot>) + Send + 'static,
    {
        let mut rx = self.snapshots.subscribe();
        let task = runtime.spawn(async move {
            while rx.changed().await.is_ok() {
                let latest = rx.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    callback(snapshot);
                }
            }
        });
        if let Some(previous) = self.consumer.lock().replace(task) {
            previous.abort();
            debug!("Replaced snapshot consumer");
        }
    }

    /// Remove the attached consumer, if any.
    pub fn detach_consumer(&self) {
        if let Some(task) = self.consumer.lock().take() {
            task.abort();
        }
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        self.detach_consumer();
        self.stop_and_join();
    }
}

fn join_worker(run: &mut RunHandle) {
    if let Some(thread) = run.thread.take() {
        if thread.join().is_err() {
            error!(run = run.id, "Acquisition worker panicked");
        }
    }
}

/// Open channels, timing, buffer and logging, then start the source.
fn configure_source(source: &mut dyn DataSource, cfg: &SessionConfig, path: &Path) -> AppResult<()> {
    let acq = &cfg.acquisition;
    source.open_channels(&cfg.device, &cfg.channels)?;
    source.configure_continuous(acq.sample_rate, acq.samples_per_channel)?;
    source.set_input_buffer_size(acq.input_buffer_size)?;
    source.enable_logging(path, LoggingMode::LogAndRead)?;
    source.start()
}

/// `<dir>/<prefix>_YYYYmmdd_HHMMSS.tdms`, suffixed `_N` if that file exists.
pub fn next_output_path(storage: &StorageConfig, now: DateTime<Local>) -> AppResult<PathBuf> {
    std::fs::create_dir_all(&storage.output_dir)?;
    let stem = format!("{}_{}", storage.file_prefix, now.format("%Y%m%d_%H%M%S"));
    let mut candidate = storage.output_dir.join(format!("{stem}.tdms"));
    let mut n = 1;
    while candidate.exists() {
        candidate = storage.output_dir.join(format!("{stem}_{n}.tdms"));
        n += 1;
    }
    Ok(candidate)
}

/// State moved into the acquisition thread.
struct Worker {
    run_id: u64,
    source: Box<dyn DataSource>,
    buffer: SlidingBuffer,
    block: SampleBlock,
    config: Arc<SessionConfig>,
    cancel: Arc<AtomicBool>,
    state: Arc<watch::Sender<SessionState>>,
    snapshots: Arc<watch::Sender<SnapshotSlot>>,
    last_error: Arc<Mutex<Option<RunError>>>,
}

impl Worker {
    fn run(mut self) {
        let span = info_span!("acquisition", run = self.run_id);
        let _enter = span.enter();

        let outcome = self.pump();

        // The device is always released before the state leaves the run.
        let teardown = self.source.stop();
        let closed = self.source.close();
        let outcome = outcome.and(teardown).and(closed);

        match outcome {
            Ok(()) => {
                info!(samples = self.buffer.total_samples(), "Acquisition stopped");
                self.state.send_replace(SessionState::Idle);
            }
            Err(err) => {
                error!(error = %err, samples = self.buffer.total_samples(), "Acquisition failed");
                *self.last_error.lock() = Some(RunError::from(&err));
                self.state.send_replace(SessionState::Failed);
            }
        }
    }

    fn pump(&mut self) -> AppResult<()> {
        let acq = &self.config.acquisition;
        let mut elapsed_index = 0u64;
        let mut sequence = 0u64;

        while !self.cancel.load(Ordering::SeqCst) {
            let available = self.source.available_samples()?;
            if available == 0 {
                thread::sleep(acq.poll_interval);
                continue;
            }

            let wanted = available.min(acq.batch_cap);
            let got = self.source.read(wanted, acq.read_timeout, &mut self.block)?;
            if got == 0 {
                continue;
            }
            self.block.truncate(got);

            self.buffer.fold(&self.block, elapsed_index)?;
            elapsed_index += got as u64;
            sequence += 1;
            self.snapshots
                .send_replace(Some(Arc::new(self.buffer.snapshot(sequence))));
        }
        debug!(samples = elapsed_index, snapshots = sequence, "Worker loop exited");
        Ok(())
    }
}
