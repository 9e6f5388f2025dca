//! A mock sensor producing a sine wave into one buffer.

use analysis_pipeline::DataBuffer;
use std::f64::consts::TAU;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::SensorConfig;

pub struct MockSensor {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<u64>>,
}

impl MockSensor {
    pub fn spawn(buffer: Arc<DataBuffer>, config: &SensorConfig) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let config = config.clone();
        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("mock-sensor".to_string())
                .spawn(move || run(buffer, config, stop))?
        };
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(samples) => info!("Mock sensor stopped after {} samples", samples),
                Err(_) => error!("Mock sensor thread panicked"),
            }
        }
    }
}

impl Drop for MockSensor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(buffer: Arc<DataBuffer>, config: SensorConfig, stop: Arc<AtomicBool>) -> u64 {
    info!(
        "Mock sensor writing {} Hz into '{}'",
        config.sample_rate_hz,
        buffer.name()
    );
    let period = Duration::from_secs_f64(config.batch_size as f64 / config.sample_rate_hz);
    let started = Instant::now();
    let mut produced: u64 = 0;
    let mut batches: u32 = 0;
    let mut batch = Vec::with_capacity(config.batch_size);
    while !stop.load(Ordering::Acquire) {
        batch.clear();
        for _ in 0..config.batch_size {
            let t = produced as f64 / config.sample_rate_hz;
            batch.push(config.amplitude * (TAU * config.frequency_hz * t).sin());
            produced += 1;
        }
        buffer.append_from_slice(&batch, true);
        batches = batches.saturating_add(1);

        // Pace against the start time so sleep jitter does not accumulate.
        let due = started + period * batches;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
    produced
}
