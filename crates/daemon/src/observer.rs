//! Logs observer events on the daemon's dispatch turn.

use analysis_pipeline::{BufferArena, BufferId, Observer};
use std::collections::HashMap;
use tracing::{debug, info};

pub struct EventLog {
    names: HashMap<BufferId, String>,
    cycles: u64,
    skipped: u64,
}

impl EventLog {
    pub fn new(arena: &BufferArena) -> Self {
        Self {
            names: arena
                .iter()
                .map(|(id, buffer)| (id, buffer.name().to_string()))
                .collect(),
            cycles: 0,
            skipped: 0,
        }
    }

    fn name(&self, id: BufferId) -> &str {
        self.names.get(&id).map_or("?", String::as_str)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Observer for EventLog {
    fn buffer_updated(&mut self, buffer: BufferId, no_data: bool) {
        debug!("Buffer '{}' updated (no_data: {})", self.name(buffer), no_data);
    }

    fn analysis_complete(&mut self, buffer: BufferId) {
        debug!("Analysis complete for '{}'", self.name(buffer));
    }

    fn analysis_will_update(&mut self, timestamp: f64) {
        debug!("Analysis cycle starting at t={:.3}s", timestamp);
    }

    fn analysis_did_update(&mut self, timestamp: f64) {
        self.cycles += 1;
        if self.cycles % 100 == 0 {
            info!("{} analysis cycles done, last at t={:.3}s", self.cycles, timestamp);
        }
    }

    fn analysis_skipped(&mut self) {
        self.skipped += 1;
        debug!("Analysis cycle skipped, fill requirement not met");
    }
}
