//! The analysis scheduler.
//!
//! A single named worker thread owns cycle execution. Requests move the
//! scheduler from `Idle` to `CoolingDown` and post a wake-up deadline to the
//! worker, which waits on its channel until the deadline so a shutdown is
//! honoured at any time. At most one cycle is pending: requests during the
//! cooldown are absorbed, a request during a cycle schedules one more.
//! Unless the graph runs on user input only, a finished cycle requests the
//! next one itself for as long as the analysis is running.

use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::arena::{BufferArena, BufferId};
use crate::control::{Event, Notifier, Observer, ObserverId};
use crate::error::{PipelineError, PipelineResult};
use crate::graph::{AnalysisGraph, MAXIMUM_COOLDOWN, MINIMUM_COOLDOWN};
use crate::time::TimeSource;

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CoolingDown,
    Running,
}

enum WorkerMsg {
    Wake(Instant),
    Shutdown,
}

struct State {
    phase: Phase,
    rerun_requested: bool,
    timestamp: f64,
    cycle: u64,
    observers: Vec<ObserverId>,
}

struct Shared {
    arena: Arc<BufferArena>,
    graph: AnalysisGraph,
    clock: Arc<dyn TimeSource>,
    notifier: Notifier,
    running: AtomicBool,
    state: Mutex<State>,
    settled: Condvar,
    worker_tx: Sender<WorkerMsg>,
}

impl Shared {
    fn set_needs_update(&self) {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Idle => {
                let delay = self.cooldown();
                state.phase = Phase::CoolingDown;
                drop(state);
                debug!("Analysis cycle scheduled in {:?}", delay);
                let now = Instant::now();
                let due = now.checked_add(delay).unwrap_or(now);
                if self.worker_tx.send(WorkerMsg::Wake(due)).is_err() {
                    warn!("Analysis worker is gone; request dropped");
                    self.state.lock().phase = Phase::Idle;
                    self.settled.notify_all();
                }
            }
            Phase::CoolingDown => {}
            Phase::Running => state.rerun_requested = true,
        }
    }

    fn cooldown(&self) -> Duration {
        let settings = self.graph.settings();
        let seconds = settings
            .dynamic_period
            .and_then(|id| self.arena.get(id))
            .and_then(|buffer| buffer.last())
            .unwrap_or(settings.minimum_period);
        let seconds = if seconds.is_nan() {
            MINIMUM_COOLDOWN
        } else {
            seconds.clamp(MINIMUM_COOLDOWN, MAXIMUM_COOLDOWN)
        };
        Duration::from_secs_f64(seconds)
    }

    fn fill_satisfied(&self) -> bool {
        let Some(fill) = &self.graph.settings().require_fill else {
            return true;
        };
        let threshold = fill
            .dynamic
            .and_then(|id| self.arena.get(id))
            .and_then(|buffer| buffer.last())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map_or(fill.threshold, |v| v as usize);
        self.arena
            .get(fill.buffer)
            .map_or(false, |buffer| buffer.len() >= threshold)
    }

    /// Returns to idle and reports whether another cycle should follow.
    fn settle(&self, state: &mut State) -> bool {
        state.phase = Phase::Idle;
        self.settled.notify_all();
        let requested = std::mem::take(&mut state.rerun_requested);
        let continuous =
            !self.graph.settings().on_user_input && self.running.load(Ordering::Acquire);
        requested || continuous
    }

    fn run_cycle(&self) {
        let (timestamp, cycle, observers) = {
            let mut state = self.state.lock();
            if !self.running.load(Ordering::Acquire) {
                debug!("Analysis stopped during cooldown; cycle aborted");
                self.settle(&mut state);
                return;
            }
            if !self.fill_satisfied() {
                let observers = state.observers.clone();
                let rerun = self.settle(&mut state);
                drop(state);
                self.notifier.send(observers, Event::AnalysisSkipped);
                if rerun {
                    self.set_needs_update();
                }
                return;
            }
            state.timestamp = self.clock.now();
            state.phase = Phase::Running;
            (state.timestamp, state.cycle, state.observers.clone())
        };

        self.notifier
            .send(observers, Event::AnalysisWillUpdate { timestamp });

        let started = Instant::now();
        let mut evaluated = 0;
        for module in self.graph.modules() {
            if !module.runs_in_cycle(cycle) {
                continue;
            }
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| module.update(&self.arena, timestamp)));
            match result {
                Ok(_) => evaluated += 1,
                Err(_) => error!("Module '{}' panicked during cycle {}", module.name, cycle),
            }
        }
        for id in self.graph.output_buffers() {
            if let Some(buffer) = self.arena.get(*id) {
                buffer.send_analysis_complete();
            }
        }
        debug!(
            "Analysis cycle {} evaluated {} modules in {:?}",
            cycle,
            evaluated,
            started.elapsed()
        );

        let (observers, rerun) = {
            let mut state = self.state.lock();
            state.cycle += 1;
            let rerun = self.settle(&mut state);
            (state.observers.clone(), rerun)
        };
        self.notifier
            .send(observers, Event::AnalysisDidUpdate { timestamp });
        if rerun {
            self.set_needs_update();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<WorkerMsg>) {
    info!("Analysis worker started");
    'outer: loop {
        let due = match rx.recv() {
            Ok(WorkerMsg::Wake(due)) => due,
            Ok(WorkerMsg::Shutdown) | Err(_) => break,
        };
        loop {
            match rx.recv_deadline(due) {
                Err(RecvTimeoutError::Timeout) => break,
                Ok(WorkerMsg::Wake(_)) => continue,
                Ok(WorkerMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break 'outer,
            }
        }
        shared.run_cycle();
    }
    info!("Analysis worker finished");
}

/// Marks the scheduler dirty when a pure input buffer changes.
struct InputWatcher {
    shared: Weak<Shared>,
}

impl Observer for InputWatcher {
    fn buffer_updated(&mut self, _buffer: BufferId, no_data: bool) {
        if no_data {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            if shared.running.load(Ordering::Acquire) {
                shared.set_needs_update();
            }
        }
    }
}

/// Runs the modules of an [`AnalysisGraph`] in cycles.
pub struct AnalysisScheduler {
    shared: Arc<Shared>,
    watcher: ObserverId,
    worker: Option<thread::JoinHandle<()>>,
}

impl AnalysisScheduler {
    pub fn new(
        arena: Arc<BufferArena>,
        graph: AnalysisGraph,
        clock: Arc<dyn TimeSource>,
    ) -> PipelineResult<Self> {
        let (worker_tx, worker_rx) = flume::unbounded();
        let notifier = arena.notifier().clone();
        let shared = Arc::new(Shared {
            arena,
            graph,
            clock,
            notifier,
            running: AtomicBool::new(false),
            state: Mutex::new(State {
                phase: Phase::Idle,
                rerun_requested: false,
                timestamp: 0.0,
                cycle: 0,
                observers: Vec::new(),
            }),
            settled: Condvar::new(),
            worker_tx,
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("analysis-scheduler".to_string())
                .spawn(move || worker_loop(shared, worker_rx))?
        };

        let watcher = shared.notifier.register(Arc::new(Mutex::new(InputWatcher {
            shared: Arc::downgrade(&shared),
        })));
        for id in shared.graph.pure_inputs() {
            if let Some(buffer) = shared.arena.get(*id) {
                buffer.add_observer(watcher);
            }
        }

        Ok(Self {
            shared,
            watcher,
            worker: Some(worker),
        })
    }

    /// Requests a cycle. See the module docs for coalescing.
    pub fn set_needs_update(&self) {
        self.shared.set_needs_update();
    }

    /// Zeroes the timestamp and the cycle counter. Only valid while idle.
    pub fn reset(&self) -> PipelineResult<()> {
        let mut state = self.shared.state.lock();
        if state.phase != Phase::Idle {
            return Err(PipelineError::InvalidState(format!(
                "cannot reset the analysis while {:?}",
                state.phase
            )));
        }
        state.timestamp = 0.0;
        state.cycle = 0;
        Ok(())
    }

    pub fn set_running(&self, running: bool) {
        self.shared.running.store(running, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    /// Timestamp of the latest cycle.
    pub fn timestamp(&self) -> f64 {
        self.shared.state.lock().timestamp
    }

    /// Number of completed cycles since creation or the last reset.
    pub fn cycle(&self) -> u64 {
        self.shared.state.lock().cycle
    }

    pub fn graph(&self) -> &AnalysisGraph {
        &self.shared.graph
    }

    /// Registers an observer for will-update, did-update and skipped events.
    pub fn add_observer(&self, observer: ObserverId) {
        let mut state = self.shared.state.lock();
        if !state.observers.contains(&observer) {
            state.observers.push(observer);
        }
    }

    pub fn remove_observer(&self, observer: ObserverId) {
        self.shared.state.lock().observers.retain(|o| *o != observer);
    }

    /// Blocks until the scheduler is idle or `timeout` passes. Returns
    /// whether it is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.phase != Phase::Idle {
            if self
                .shared
                .settled
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.phase == Phase::Idle;
            }
        }
        true
    }
}

impl Drop for AnalysisScheduler {
    fn drop(&mut self) {
        self.set_running(false);
        for id in self.shared.graph.pure_inputs() {
            if let Some(buffer) = self.shared.arena.get(*id) {
                buffer.remove_observer(self.watcher);
            }
        }
        self.shared.notifier.unregister(self.watcher);
        let _ = self.shared.worker_tx.send(WorkerMsg::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Analysis worker panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StorageKind;
    use crate::control::Dispatcher;
    use crate::graph::AnalysisSettings;
    use crate::stage::{AnalysisModule, ModuleInput, ModuleKind};
    use crate::time::ManualClock;

    struct Fixture {
        dispatcher: Dispatcher,
        arena: Arc<BufferArena>,
        clock: Arc<ManualClock>,
        scheduler: AnalysisScheduler,
    }

    fn fixture(settings: AnalysisSettings, extra: &[&str]) -> Fixture {
        let dispatcher = Dispatcher::new();
        let mut arena = BufferArena::new(dispatcher.notifier());
        let input = arena
            .create("in", StorageKind::Memory { size: 0 }, false, vec![])
            .unwrap();
        let output = arena
            .create("out", StorageKind::Memory { size: 0 }, false, vec![])
            .unwrap();
        for name in extra {
            arena
                .create(name, StorageKind::Memory { size: 0 }, false, vec![])
                .unwrap();
        }
        let module = AnalysisModule::new("count", ModuleKind::Count)
            .input(ModuleInput::Buffer {
                buffer: input,
                role: None,
            })
            .output(output, false);
        let graph = AnalysisGraph::new(vec![module], settings);
        let arena = Arc::new(arena);
        arena.open_all();
        let clock = Arc::new(ManualClock::new(4.0));
        let scheduler =
            AnalysisScheduler::new(Arc::clone(&arena), graph, clock.clone()).unwrap();
        Fixture {
            dispatcher,
            arena,
            clock,
            scheduler,
        }
    }

    fn settings(minimum_period: f64) -> AnalysisSettings {
        AnalysisSettings {
            minimum_period,
            on_user_input: true,
            ..AnalysisSettings::default()
        }
    }

    #[derive(Default)]
    struct Lifecycle {
        events: Vec<&'static str>,
        timestamps: Vec<f64>,
    }

    impl Observer for Lifecycle {
        fn analysis_will_update(&mut self, timestamp: f64) {
            self.events.push("will");
            self.timestamps.push(timestamp);
        }

        fn analysis_did_update(&mut self, _timestamp: f64) {
            self.events.push("did");
        }

        fn analysis_skipped(&mut self) {
            self.events.push("skipped");
        }

        fn analysis_complete(&mut self, _buffer: BufferId) {
            self.events.push("complete");
        }
    }

    #[test]
    fn rapid_requests_coalesce_into_one_cycle() {
        let f = fixture(settings(0.2), &[]);
        f.scheduler.set_running(true);
        for _ in 0..50 {
            f.scheduler.set_needs_update();
        }
        assert_eq!(f.scheduler.phase(), Phase::CoolingDown);
        assert!(f.scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(f.scheduler.cycle(), 1);
        assert_eq!(f.arena.by_name("out").unwrap().to_vec(), vec![0.0]);
    }

    #[test]
    fn stopping_during_cooldown_aborts_the_cycle() {
        let f = fixture(settings(0.2), &[]);
        f.scheduler.set_running(true);
        f.scheduler.set_needs_update();
        f.scheduler.set_running(false);
        assert!(f.scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(f.scheduler.cycle(), 0);
        assert!(f.arena.by_name("out").unwrap().is_empty());
    }

    #[test]
    fn cycle_signals_observers_in_order() {
        let f = fixture(settings(0.0), &[]);
        let lifecycle = Arc::new(Mutex::new(Lifecycle::default()));
        let id = f.dispatcher.register(Arc::clone(&lifecycle));
        f.scheduler.add_observer(id);
        f.arena.by_name("out").unwrap().add_observer(id);

        f.scheduler.set_running(true);
        f.scheduler.set_needs_update();
        assert!(f.scheduler.wait_idle(Duration::from_secs(5)));
        f.dispatcher.dispatch_pending();

        let lifecycle = lifecycle.lock();
        assert_eq!(lifecycle.events, vec!["will", "complete", "did"]);
        assert_eq!(lifecycle.timestamps, vec![4.0]);
        assert_eq!(f.scheduler.timestamp(), 4.0);
    }

    #[test]
    fn pure_input_changes_trigger_cycles() {
        let f = fixture(settings(0.0), &[]);
        f.scheduler.set_running(true);
        let input = f.arena.by_name("in").unwrap();
        input.append_from_slice(&[1.0, 2.0, 3.0], true);
        f.dispatcher.dispatch_timeout(Duration::from_secs(1));
        assert!(f.scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(f.arena.by_name("out").unwrap().to_vec(), vec![3.0]);

        // An empty clear carries no data and triggers nothing.
        input.clear(true, true);
        f.dispatcher.dispatch_timeout(Duration::from_millis(100));
        assert_eq!(f.scheduler.phase(), Phase::Idle);
        assert_eq!(f.scheduler.cycle(), 1);
    }

    #[test]
    fn unmet_fill_requirement_skips_the_cycle() {
        let mut s = settings(0.0);
        s.require_fill = Some(crate::graph::RequireFill {
            buffer: BufferId::from_index(0),
            threshold: 2,
            dynamic: None,
        });
        let f = fixture(s, &[]);
        let lifecycle = Arc::new(Mutex::new(Lifecycle::default()));
        let id = f.dispatcher.register(Arc::clone(&lifecycle));
        f.scheduler.add_observer(id);

        f.scheduler.set_running(true);
        f.scheduler.set_needs_update();
        assert!(f.scheduler.wait_idle(Duration::from_secs(5)));
        assert!(f.arena.by_name("out").unwrap().is_empty());

        f.arena.by_name("in").unwrap().append_from_slice(&[1.0, 2.0], false);
        f.scheduler.set_needs_update();
        assert!(f.scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(f.arena.by_name("out").unwrap().to_vec(), vec![2.0]);

        f.dispatcher.dispatch_pending();
        assert_eq!(lifecycle.lock().events, vec!["skipped", "will", "did"]);
    }

    #[test]
    fn dynamic_period_overrides_the_minimum() {
        let mut s = settings(5.0);
        s.dynamic_period = Some(BufferId::from_index(2));
        let f = fixture(s, &["period"]);
        f.arena.by_name("period").unwrap().append(0.0, false);
        f.scheduler.set_running(true);
        let started = Instant::now();
        f.scheduler.set_needs_update();
        assert!(f.scheduler.wait_idle(Duration::from_secs(3)));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(f.scheduler.cycle(), 1);
    }

    #[test]
    fn huge_dynamic_periods_are_clamped() {
        let mut s = settings(0.0);
        s.dynamic_period = Some(BufferId::from_index(2));
        let f = fixture(s, &["period"]);
        let period = f.arena.by_name("period").unwrap();
        for huge in [1e19, 1e20, f64::MAX, f64::INFINITY] {
            period.append(huge, false);
            assert_eq!(
                f.scheduler.shared.cooldown(),
                Duration::from_secs_f64(MAXIMUM_COOLDOWN)
            );
        }
        period.append(f64::NAN, false);
        assert_eq!(
            f.scheduler.shared.cooldown(),
            Duration::from_secs_f64(MINIMUM_COOLDOWN)
        );

        period.append(1e20, false);
        f.scheduler.set_running(true);
        f.scheduler.set_needs_update();
        assert_eq!(f.scheduler.phase(), Phase::CoolingDown);

        // The worker survived and still honours a shutdown mid-cooldown.
        let started = Instant::now();
        drop(f.scheduler);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cycles_repeat_while_running_unless_on_user_input() {
        let mut s = settings(0.0);
        s.on_user_input = false;
        let f = fixture(s, &[]);
        f.scheduler.set_running(true);
        f.scheduler.set_needs_update();

        let deadline = Instant::now() + Duration::from_secs(5);
        while f.scheduler.cycle() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(f.scheduler.cycle() >= 3);

        f.scheduler.set_running(false);
        assert!(f.scheduler.wait_idle(Duration::from_secs(5)));
        let stopped_at = f.scheduler.cycle();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(f.scheduler.cycle(), stopped_at);
        assert_eq!(f.scheduler.phase(), Phase::Idle);
    }

    #[test]
    fn reset_requires_idle() {
        let f = fixture(settings(0.3), &[]);
        f.scheduler.set_running(true);
        f.scheduler.set_needs_update();
        assert!(matches!(
            f.scheduler.reset(),
            Err(PipelineError::InvalidState(_))
        ));
        assert!(f.scheduler.wait_idle(Duration::from_secs(5)));
        f.clock.advance(1.0);
        assert_eq!(f.scheduler.cycle(), 1);
        f.scheduler.reset().unwrap();
        assert_eq!(f.scheduler.cycle(), 0);
        assert_eq!(f.scheduler.timestamp(), 0.0);
    }
}
