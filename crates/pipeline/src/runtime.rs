//! Session runtime: buffers plus the scheduler driving their analysis.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::arena::BufferArena;
use crate::buffer::{DataBuffer, StorageKind};
use crate::config::{StorageConfig, SystemConfig};
use crate::control::Notifier;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{AnalysisScheduler, Phase};
use crate::graph::AnalysisGraph;
use crate::time::TimeSource;

/// A loaded configuration, ready to be started and stopped.
pub struct Session {
    config: SystemConfig,
    arena: Arc<BufferArena>,
    scheduler: AnalysisScheduler,
}

impl Session {
    /// Validates `config`, creates its buffers and builds the analysis.
    ///
    /// Hybrid buffers spill to `<storage_dir>/<name>.buffer`; declaring one
    /// without a storage directory is an error.
    ///
    /// Changes to pure input buffers reach the scheduler through `notifier`,
    /// so the host must keep draining the matching
    /// [`Dispatcher`](crate::control::Dispatcher). Until it does, those
    /// changes trigger no cycles and the channel keeps growing.
    pub fn load(
        config: SystemConfig,
        notifier: Notifier,
        storage_dir: Option<&Path>,
        clock: Arc<dyn TimeSource>,
    ) -> PipelineResult<Self> {
        config.validate()?;

        let mut arena = BufferArena::new(notifier);
        for buffer in &config.buffers {
            let storage = match buffer.storage {
                StorageConfig::Memory { size } => StorageKind::Memory { size },
                StorageConfig::Hybrid { memory_size } => {
                    let dir = storage_dir.ok_or_else(|| PipelineError::InvalidConfiguration {
                        message: format!(
                            "hybrid buffer '{}' needs a storage directory",
                            buffer.name
                        ),
                    })?;
                    StorageKind::Hybrid {
                        memory_size,
                        path: dir.join(format!("{}.buffer", buffer.name)),
                    }
                }
            };
            arena.create(&buffer.name, storage, buffer.is_static, buffer.initial.clone())?;
        }

        let graph = AnalysisGraph::build(&config, &arena)?;
        info!(
            "Loaded session with {} buffers and {} modules ({} pure inputs)",
            arena.len(),
            graph.modules().len(),
            graph.pure_inputs().len()
        );
        let arena = Arc::new(arena);
        let scheduler = AnalysisScheduler::new(Arc::clone(&arena), graph, clock)?;
        Ok(Self {
            config,
            arena,
            scheduler,
        })
    }

    /// Opens every buffer, marks the analysis running and requests a cycle.
    pub fn start(&self) {
        self.arena.open_all();
        self.scheduler.set_running(true);
        self.scheduler.set_needs_update();
        info!("Session started");
    }

    /// Clears the running flag, so a pending cycle aborts, and closes every
    /// buffer. A cycle already executing still completes.
    pub fn stop(&self) {
        if !self.scheduler.is_running() {
            return;
        }
        self.scheduler.set_running(false);
        self.arena.close_all();
        info!("Session stopped");
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Clears every buffer and resets the analysis timestamp and cycle count.
    /// Fails without touching any buffer unless the scheduler is idle.
    pub fn clear_data(&self) -> PipelineResult<()> {
        let phase = self.scheduler.phase();
        if phase != Phase::Idle {
            return Err(PipelineError::InvalidState(format!(
                "cannot clear data while the analysis is {:?}",
                phase
            )));
        }
        for (_, buffer) in self.arena.iter() {
            buffer.clear(true, true);
        }
        self.scheduler.reset()
    }

    pub fn buffer(&self, name: &str) -> Option<&Arc<DataBuffer>> {
        self.arena.by_name(name)
    }

    pub fn arena(&self) -> &Arc<BufferArena> {
        &self.arena
    }

    pub fn scheduler(&self) -> &AnalysisScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
