//! Integration tests for a whole session.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::arena::BufferId;
use crate::config::SystemConfig;
use crate::control::{Dispatcher, Observer};
use crate::error::PipelineError;
use crate::runtime::Session;
use crate::time::ManualClock;

const CONFIG: &str = r#"
{
    "version": "1.0",
    "buffers": [
        {"name": "acc", "storage": {"kind": "hybrid", "memory_size": 100}},
        {"name": "offset", "static": true, "initial": [0.5]},
        {"name": "shifted", "storage": {"kind": "memory", "size": 100}},
        {"name": "mean", "storage": {"kind": "memory", "size": 10}},
        {"name": "history"}
    ],
    "modules": [
        {
            "name": "shift",
            "type": "subtract",
            "inputs": [{"buffer": "offset", "as": "subtrahend"}, {"buffer": "acc", "as": "minuend"}],
            "outputs": [{"buffer": "shifted"}]
        },
        {
            "name": "mean",
            "type": "average",
            "inputs": [{"buffer": "shifted"}],
            "outputs": [{"buffer": "mean", "clear": false}]
        },
        {
            "name": "first_only",
            "type": "append",
            "inputs": [{"value": 42}],
            "outputs": [{"buffer": "history", "clear": false}],
            "cycles": [{"from": 0, "to": 0}]
        }
    ],
    "analysis": {
        "sleep": 0.02,
        "require_fill": "acc",
        "require_fill_threshold": 1,
        "on_user_input": true
    }
}
"#;

#[derive(Default)]
struct Ui {
    completed: Vec<BufferId>,
    cycles: usize,
}

impl Observer for Ui {
    fn analysis_complete(&mut self, buffer: BufferId) {
        self.completed.push(buffer);
    }

    fn analysis_did_update(&mut self, _timestamp: f64) {
        self.cycles += 1;
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn pump_until(dispatcher: &Dispatcher, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        dispatcher.dispatch_timeout(Duration::from_millis(10));
        if done() {
            return true;
        }
    }
    done()
}

#[test]
fn test_full_session() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new();
    let config = SystemConfig::from_json_str(CONFIG).unwrap();
    let session = Session::load(
        config,
        dispatcher.notifier(),
        Some(dir.path()),
        Arc::new(ManualClock::new(1.0)),
    )
    .unwrap();

    let ui = Arc::new(Mutex::new(Ui::default()));
    let ui_id = dispatcher.register(Arc::clone(&ui));
    session.scheduler().add_observer(ui_id);
    session.buffer("mean").unwrap().add_observer(ui_id);

    session.start();
    let acc = Arc::clone(session.buffer("acc").unwrap());
    let spill = dir.path().join("acc.buffer");
    assert!(spill.exists());

    acc.append_from_slice(&[1.0, 2.0, 3.0], true);
    let mean = Arc::clone(session.buffer("mean").unwrap());
    assert!(pump_until(&dispatcher, Duration::from_secs(5), || {
        mean.last() == Some(1.5)
    }));
    assert!(session.scheduler().wait_idle(Duration::from_secs(5)));
    dispatcher.dispatch_pending();

    assert_eq!(
        session.buffer("shifted").unwrap().to_vec(),
        vec![0.5, 1.5, 2.5]
    );
    assert_eq!(session.buffer("history").unwrap().to_vec(), vec![42.0]);
    assert_eq!(crate::storage::read_state(&spill).unwrap(), vec![1.0, 2.0, 3.0]);

    let mean_id = session.arena().resolve("mean").unwrap();
    {
        let ui = ui.lock();
        assert!(ui.cycles >= 1);
        assert!(!ui.completed.is_empty());
        assert!(ui.completed.iter().all(|id| *id == mean_id));
    }

    session.stop();
    assert!(!spill.exists());
    let before = session.buffer("shifted").unwrap().to_vec();
    acc.append(10.0, true);
    dispatcher.dispatch_timeout(Duration::from_millis(100));
    assert!(session.scheduler().wait_idle(Duration::from_secs(1)));
    assert_eq!(session.buffer("shifted").unwrap().to_vec(), before);
}

#[test]
fn test_hybrid_buffers_need_a_storage_dir() {
    let dispatcher = Dispatcher::new();
    let config = SystemConfig::from_json_str(CONFIG).unwrap();
    let err = Session::load(
        config,
        dispatcher.notifier(),
        None,
        Arc::new(ManualClock::new(0.0)),
    )
    .err()
    .unwrap();
    assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));
}

#[test]
fn test_clear_data_resets_the_analysis() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new();
    let session = Session::load(
        SystemConfig::from_json_str(CONFIG).unwrap(),
        dispatcher.notifier(),
        Some(dir.path()),
        Arc::new(ManualClock::new(0.0)),
    )
    .unwrap();
    session.buffer("acc").unwrap().append(1.0, false);
    session.scheduler().set_running(true);
    session.scheduler().set_needs_update();
    assert!(session.scheduler().wait_idle(Duration::from_secs(5)));
    assert_eq!(session.scheduler().cycle(), 1);

    session.clear_data().unwrap();
    assert_eq!(session.scheduler().cycle(), 0);
    assert!(session.buffer("acc").unwrap().is_empty());
    assert_eq!(session.buffer("offset").unwrap().to_vec(), vec![0.5]);
}

#[test]
fn test_clear_data_waits_for_an_idle_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new();
    let mut config = SystemConfig::from_json_str(CONFIG).unwrap();
    config.analysis.sleep = 0.5;
    let session = Session::load(
        config,
        dispatcher.notifier(),
        Some(dir.path()),
        Arc::new(ManualClock::new(0.0)),
    )
    .unwrap();
    let acc = session.buffer("acc").unwrap();
    acc.append_from_slice(&[1.0, 2.0], false);
    session.scheduler().set_running(true);
    session.scheduler().set_needs_update();

    assert!(matches!(
        session.clear_data(),
        Err(PipelineError::InvalidState(_))
    ));
    assert_eq!(acc.to_vec(), vec![1.0, 2.0]);

    assert!(session.scheduler().wait_idle(Duration::from_secs(5)));
    session.clear_data().unwrap();
    assert!(acc.is_empty());
}
