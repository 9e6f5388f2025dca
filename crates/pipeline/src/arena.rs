//! Session-owned buffer storage with stable handles.

use slab::Slab;
use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::{DataBuffer, StorageKind};
use crate::control::Notifier;
use crate::error::{PipelineError, PipelineResult};

/// Stable handle of a buffer inside its [`BufferArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(usize);

impl BufferId {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Owns every buffer of a session. Names are resolved to [`BufferId`]s once,
/// when the module graph is built.
pub struct BufferArena {
    buffers: Slab<Arc<DataBuffer>>,
    names: HashMap<String, BufferId>,
    notifier: Notifier,
}

impl BufferArena {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            buffers: Slab::new(),
            names: HashMap::new(),
            notifier,
        }
    }

    pub fn create(
        &mut self,
        name: &str,
        storage: StorageKind,
        is_static: bool,
        initial: Vec<f64>,
    ) -> PipelineResult<BufferId> {
        if self.names.contains_key(name) {
            return Err(PipelineError::DuplicateBuffer {
                name: name.to_string(),
            });
        }
        let entry = self.buffers.vacant_entry();
        let id = BufferId(entry.key());
        let buffer = DataBuffer::new(name, storage, is_static, initial)?
            .linked(id, self.notifier.clone());
        entry.insert(Arc::new(buffer));
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn resolve(&self, name: &str) -> PipelineResult<BufferId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::BufferNotFound {
                name: name.to_string(),
            })
    }

    pub fn get(&self, id: BufferId) -> Option<&Arc<DataBuffer>> {
        self.buffers.get(id.0)
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<DataBuffer>> {
        self.names.get(name).and_then(|id| self.get(*id))
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BufferId, &Arc<DataBuffer>)> {
        self.buffers.iter().map(|(key, buffer)| (BufferId(key), buffer))
    }

    pub fn open_all(&self) {
        for (_, buffer) in self.buffers.iter() {
            buffer.open();
        }
    }

    pub fn close_all(&self) {
        for (_, buffer) in self.buffers.iter() {
            buffer.close();
        }
    }
}
