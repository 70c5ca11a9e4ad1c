//! Lifecycle tests for `AcquisitionSession` against a scripted data source.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use waveform_daq::channel::ChannelConfig;
use waveform_daq::config::{AcquisitionConfig, Settings, StorageConfig};
use waveform_daq::data::{SampleBlock, WaveformCapture};
use waveform_daq::error::{AppResult, DaqError, ErrorKind};
use waveform_daq::hardware::{simulated_factory, DataSource, DataSourceFactory, LoggingMode};
use waveform_daq::session::{AcquisitionSession, SessionConfig, SessionState};

/// Which call should fail, if any.
#[derive(Clone, Copy, Default)]
struct Script {
    fail_configure: bool,
    missing_scale: bool,
    fail_read_after: Option<usize>,
    /// Report no more samples after this many reads.
    max_reads: Option<usize>,
    /// Make `start()` take a while.
    slow_start: bool,
}

/// Test double that records every call and produces a counting ramp.
struct ScriptedSource {
    script: Script,
    calls: Arc<Mutex<Vec<&'static str>>>,
    produced: u64,
    reads: usize,
}

impl ScriptedSource {
    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

impl DataSource for ScriptedSource {
    fn open_channels(&mut self, _device: &str, _channels: &[ChannelConfig]) -> AppResult<()> {
        self.record("open_channels");
        if self.script.missing_scale {
            return Err(DaqError::CustomScaleMissing {
                scale: "psi".to_string(),
            });
        }
        Ok(())
    }

    fn configure_continuous(&mut self, _rate: f64, _samples_per_channel: u64) -> AppResult<()> {
        self.record("configure_continuous");
        if self.script.fail_configure {
            return Err(DaqError::HardwareConfig("no sample clock".to_string()));
        }
        Ok(())
    }

    fn set_input_buffer_size(&mut self, _samples_per_channel: u64) -> AppResult<()> {
        self.record("set_input_buffer_size");
        Ok(())
    }

    fn enable_logging(&mut self, _path: &Path, mode: LoggingMode) -> AppResult<()> {
        assert_eq!(mode, LoggingMode::LogAndRead);
        self.record("enable_logging");
        Ok(())
    }

    fn start(&mut self) -> AppResult<()> {
        if self.script.slow_start {
            std::thread::sleep(Duration::from_millis(100));
        }
        self.record("start");
        Ok(())
    }

    fn available_samples(&mut self) -> AppResult<usize> {
        match self.script.max_reads {
            Some(max) if self.reads >= max => Ok(0),
            _ => Ok(5),
        }
    }

    fn read(&mut self, n: usize, _timeout: Duration, block: &mut SampleBlock) -> AppResult<usize> {
        if let Some(limit) = self.script.fail_read_after {
            if self.reads >= limit {
                return Err(DaqError::Hardware("device unplugged".to_string()));
            }
        }
        self.reads += 1;
        std::thread::sleep(Duration::from_millis(1));

        block.reset(n);
        for (c, channel) in block.channels_mut().iter_mut().enumerate() {
            for (i, slot) in channel.iter_mut().enumerate() {
                *slot = (self.produced + i as u64) as f64 + 1000.0 * c as f64;
            }
        }
        self.produced += n as u64;
        Ok(n)
    }

    fn stop(&mut self) -> AppResult<()> {
        self.record("stop");
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.record("close");
        Ok(())
    }
}

fn scripted_factory(script: Script, calls: Arc<Mutex<Vec<&'static str>>>) -> DataSourceFactory {
    Arc::new(move || {
        Ok(Box::new(ScriptedSource {
            script,
            calls: Arc::clone(&calls),
            produced: 0,
            reads: 0,
        }) as Box<dyn DataSource>)
    })
}

fn session_config(output_dir: &Path) -> SessionConfig {
    SessionConfig {
        device: "Dev1".to_string(),
        channels: vec![
            ChannelConfig::parse("a", "ai0, RSE, 10, V").unwrap(),
            ChannelConfig::parse("b", "ai1, RSE, 10, V").unwrap(),
        ],
        acquisition: AcquisitionConfig {
            sample_rate: 100.0,
            window_seconds: 1.0,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        },
        storage: StorageConfig {
            output_dir: output_dir.to_path_buf(),
            file_prefix: "test".to_string(),
        },
    }
}

fn scripted_session(script: Script) -> (AcquisitionSession, Arc<Mutex<Vec<&'static str>>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = AcquisitionSession::new(
        session_config(dir.path()),
        scripted_factory(script, Arc::clone(&calls)),
    )
    .unwrap();
    (session, calls, dir)
}

#[test]
fn second_start_is_rejected_while_running() {
    let (session, calls, _dir) = scripted_session(Script::default());

    let path = session.start().unwrap();
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("tdms"));
    assert_eq!(session.state(), SessionState::Running);

    let err = session.start().unwrap_err();
    assert!(matches!(err, DaqError::AlreadyRunning));
    assert_eq!(session.state(), SessionState::Running);

    session.stop_and_join();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.last_error().is_none());

    let calls = calls.lock();
    assert_eq!(calls.iter().filter(|c| **c == "start").count(), 1);
    assert_eq!(calls.last(), Some(&"close"));
}

#[test]
fn setup_runs_in_order() {
    let (session, calls, _dir) = scripted_session(Script::default());
    session.start().unwrap();
    session.stop_and_join();

    assert_eq!(
        *calls.lock(),
        [
            "open_channels",
            "configure_continuous",
            "set_input_buffer_size",
            "enable_logging",
            "start",
            "stop",
            "close",
        ]
    );
}

#[test]
fn session_restarts_after_stop() {
    let (session, calls, _dir) = scripted_session(Script::default());

    session.start().unwrap();
    session.stop_and_join();
    assert_eq!(session.state(), SessionState::Idle);

    session.start().unwrap();
    assert!(session.is_running());
    session.stop_and_join();
    assert_eq!(session.state(), SessionState::Idle);

    let calls = calls.lock();
    assert_eq!(calls.iter().filter(|c| **c == "open_channels").count(), 2);
    assert_eq!(calls.iter().filter(|c| **c == "close").count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_then_start_never_mixes_runs() {
    let (session, _calls, _dir) = scripted_session(Script {
        max_reads: Some(1),
        ..Default::default()
    });
    let mut snapshots = session.subscribe_snapshots();

    session.start().unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), snapshots.wait_for(Option::is_some))
        .await
        .unwrap()
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(first.total_samples, 5);

    session.stop();
    assert_eq!(session.state(), SessionState::Stopping);
    assert!(matches!(session.start(), Err(DaqError::AlreadyRunning)));

    tokio::time::timeout(Duration::from_secs(5), session.wait_until_stopped())
        .await
        .expect("worker did not stop");
    assert_eq!(session.state(), SessionState::Idle);

    session.start().unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), snapshots.wait_for(Option::is_some))
        .await
        .unwrap()
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(second.sequence, 1);
    assert_eq!(second.total_samples, 5);
    // The ramp restarted; nothing from the first run is in the window.
    assert_eq!(second.latest_values(), vec![4.0, 1004.0]);
    assert!((second.latest_time().unwrap() - 0.04).abs() < 1e-9);
    assert!(second.samples[0][..95].iter().all(|&v| v == 0.0));

    session.stop_and_join();
}

#[test]
fn stop_during_setup_cancels_the_new_run() {
    let (session, calls, _dir) = scripted_session(Script {
        slow_start: true,
        ..Default::default()
    });

    std::thread::scope(|scope| {
        let starter = scope.spawn(|| session.start());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while session.state() != SessionState::Starting {
            assert!(std::time::Instant::now() < deadline, "start never began");
            std::thread::sleep(Duration::from_millis(1));
        }
        session.stop();

        assert!(starter.join().unwrap().is_ok());
    });

    // The cancel reached the new run, so the worker winds down by itself.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while session.state() != SessionState::Idle {
        assert!(std::time::Instant::now() < deadline, "run was not cancelled");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!session.is_running());
    assert_eq!(calls.lock().last(), Some(&"close"));
}

#[test]
fn stop_when_idle_is_a_no_op() {
    let (session, calls, _dir) = scripted_session(Script::default());
    session.stop();
    session.stop_and_join();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(calls.lock().is_empty());
}

#[test]
fn hardware_config_error_leaves_session_idle() {
    let (session, calls, _dir) = scripted_session(Script {
        fail_configure: true,
        ..Default::default()
    });

    let err = session.start().unwrap_err();
    assert!(err.is_hardware_config());
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.latest_snapshot().is_none());

    let recorded = session.last_error().unwrap();
    assert_eq!(recorded.kind, ErrorKind::HardwareConfig);
    assert_eq!(recorded.user_message.0, "Task Creation Issue");

    let calls = calls.lock();
    assert!(!calls.contains(&"start"));
    assert_eq!(calls.last(), Some(&"close"));
}

#[test]
fn missing_scale_is_reported_to_the_operator() {
    let (session, calls, _dir) = scripted_session(Script {
        missing_scale: true,
        ..Default::default()
    });

    let err = session.start().unwrap_err();
    let (title, body) = err.user_message();
    assert_eq!(title, "Missing Custom Scale");
    assert!(body.contains("psi"));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(*calls.lock(), ["open_channels", "close"]);

    // A retry is attempted, not rejected as already running.
    assert!(matches!(
        session.start(),
        Err(DaqError::CustomScaleMissing { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn read_error_fails_the_run_and_closes_the_source() {
    let (session, calls, _dir) = scripted_session(Script {
        fail_read_after: Some(3),
        ..Default::default()
    });

    session.start().unwrap();
    tokio::time::timeout(Duration::from_secs(5), session.wait_until_stopped())
        .await
        .expect("worker did not stop");

    assert_eq!(session.state(), SessionState::Failed);
    let recorded = session.last_error().unwrap();
    assert_eq!(recorded.kind, ErrorKind::Hardware);
    assert!(recorded.message.contains("device unplugged"));

    let snapshot = session.latest_snapshot().unwrap();
    assert_eq!(snapshot.sequence, 3);
    assert_eq!(snapshot.total_samples, 15);

    {
        let calls = calls.lock();
        let tail: Vec<_> = calls.iter().rev().take(2).rev().copied().collect();
        assert_eq!(tail, ["stop", "close"]);
    }

    // Failed is a resting state.
    session.start().unwrap();
    session.stop_and_join();
    assert_eq!(calls.lock().iter().filter(|c| **c == "start").count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn consumer_receives_snapshots() {
    let (session, _calls, _dir) = scripted_session(Script::default());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    session.attach_consumer(&tokio::runtime::Handle::current(), move |snapshot| {
        let _ = tx.send(snapshot);
    });

    session.start().unwrap();
    let mut last_sequence = 0;
    for _ in 0..3 {
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no snapshot published")
            .expect("consumer dropped");

        assert!(snapshot.sequence > last_sequence);
        last_sequence = snapshot.sequence;

        assert_eq!(snapshot.samples.len(), 2);
        assert_eq!(snapshot.timestamps.len(), 100);
        assert!(snapshot.samples.iter().all(|ch| ch.len() == 100));

        let newest = (snapshot.total_samples - 1) as f64;
        assert!((snapshot.latest_time().unwrap() - newest / 100.0).abs() < 1e-9);
        assert_eq!(snapshot.latest_values(), vec![newest, newest + 1000.0]);
    }

    session.stop();
    tokio::time::timeout(Duration::from_secs(5), session.wait_until_stopped())
        .await
        .expect("worker did not stop");
    session.detach_consumer();
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn state_changes_are_observable() {
    let (session, _calls, _dir) = scripted_session(Script::default());
    let mut states = session.subscribe_state();
    assert_eq!(*states.borrow_and_update(), SessionState::Idle);

    session.start().unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == SessionState::Running),
    )
    .await
    .unwrap()
    .unwrap();

    session.stop();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == SessionState::Idle),
    )
    .await
    .unwrap()
    .unwrap();
}

#[test]
fn simulated_run_is_logged_to_tdms() {
    let dir = tempfile::tempdir().unwrap();
    let raw = format!(
        r#"
        [global]
        device = "SimDev"

        [acquisition]
        sample_rate = 1000.0
        window_seconds = 0.5
        poll_interval = "2ms"

        [storage]
        output_dir = "{}"
        file_prefix = "sim"

        [simulation]
        seed = 42

        [simulation.scales.flow]
        slope = 2.0

        [channels]
        voltage = "ai0, RSE, 5, V"
        flow = "ai1, DIFF, flow, 20, L/min"
        "#,
        dir.path().display()
    );
    let settings = Settings::from_toml_str(&raw).unwrap();
    settings.validate().unwrap();

    let session =
        AcquisitionSession::from_settings(&settings, simulated_factory(settings.simulation.clone()))
            .unwrap();
    let path = session.start().unwrap();
    assert!(path.starts_with(dir.path()));
    assert_eq!(session.output_path().as_deref(), Some(path.as_path()));

    std::thread::sleep(Duration::from_millis(300));
    session.stop_and_join();
    assert_eq!(session.state(), SessionState::Idle);

    let snapshot = session.latest_snapshot().unwrap();
    assert_eq!(snapshot.timestamps.len(), 500);

    let capture = WaveformCapture::load(&path).unwrap();
    assert_eq!(capture.channel_names(), ["voltage", "flow"]);
    assert_eq!(capture.sample_increment, 0.001);
    assert_eq!(capture.num_samples() as u64, snapshot.total_samples);
    assert_eq!(capture.channel("flow").unwrap().unit(), Some("L/min"));
    assert!(capture.channels[0].samples.iter().all(|v| v.abs() <= 5.0));
}
