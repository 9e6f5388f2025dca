//! Named sample buffers.
//!
//! A [`DataBuffer`] is a [`RingStore`] plus the bookkeeping around it: the
//! write-once rule for static buffers, the optional spill file of hybrid
//! storage, state tokens and observer notification.
//!
//! Locking: every path that needs both locks takes the bookkeeping mutex
//! first and the store lock second. Mutators hold both for the whole
//! operation including the spill write. Store guards never leave this
//! module, so callers cannot hold one while re-entering the buffer.

use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::arena::BufferId;
use crate::control::{Event, Notifier, ObserverId};
use crate::error::BufferError;
use crate::queue::{Ring, RingStore};
use crate::storage::{self, SpillFile};

/// Where a buffer keeps its samples.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageKind {
    /// In memory only. `size == 0` means unbounded.
    Memory { size: usize },
    /// A bounded in-memory window mirrored to a spill file while open.
    Hybrid { memory_size: usize, path: PathBuf },
}

impl StorageKind {
    pub fn memory_capacity(&self) -> usize {
        match self {
            StorageKind::Memory { size } => *size,
            StorageKind::Hybrid { memory_size, .. } => *memory_size,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            StorageKind::Memory { .. } => "memory",
            StorageKind::Hybrid { .. } => "hybrid",
        }
    }
}

/// Opaque marker for one version of a buffer's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateToken(Uuid);

struct Link {
    id: BufferId,
    notifier: Notifier,
}

struct BufferIo {
    written: bool,
    open: bool,
    spill: Option<SpillFile>,
    token: Option<StateToken>,
    observers: Vec<ObserverId>,
    link: Option<Link>,
}

enum SpillOp<'a> {
    Append(&'a [f64]),
    Rewrite,
}

pub struct DataBuffer {
    name: String,
    storage: StorageKind,
    is_static: bool,
    initial: Vec<f64>,
    store: RingStore,
    io: Mutex<BufferIo>,
}

impl std::fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBuffer")
            .field("name", &self.name)
            .field("storage", &self.storage)
            .field("static", &self.is_static)
            .field("len", &self.store.len())
            .finish()
    }
}

impl DataBuffer {
    /// Creates a closed buffer holding `initial`. The initial contents are
    /// restored by every [`clear`](Self::clear).
    pub fn new(
        name: impl Into<String>,
        storage: StorageKind,
        is_static: bool,
        initial: Vec<f64>,
    ) -> Result<Self, BufferError> {
        let name = name.into();
        let capacity = storage.memory_capacity();
        if capacity > 0 && initial.len() > capacity {
            return Err(BufferError::InitialContentsTooLarge {
                name,
                len: initial.len(),
                capacity,
            });
        }
        let store = RingStore::new(capacity);
        store.append_batch(&initial);
        Ok(Self {
            name,
            storage,
            is_static,
            store,
            io: Mutex::new(BufferIo {
                written: !initial.is_empty(),
                open: false,
                spill: None,
                token: None,
                observers: Vec::new(),
                link: None,
            }),
            initial,
        })
    }

    /// Routes this buffer's notifications through `notifier` under `id`.
    pub fn linked(mut self, id: BufferId, notifier: Notifier) -> Self {
        self.io.get_mut().link = Some(Link { id, notifier });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &StorageKind {
        &self.storage
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn is_open(&self) -> bool {
        self.io.lock().open
    }

    pub fn is_written(&self) -> bool {
        self.io.lock().written
    }

    /// Configured in-memory capacity, `0` for unbounded.
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub fn spill_path(&self) -> Option<PathBuf> {
        self.io.lock().spill.as_ref().map(|s| s.path().to_path_buf())
    }

    // --- lifecycle ---------------------------------------------------------

    /// Enables notifications and, for hybrid storage, creates the spill file
    /// holding the current contents. No-op when already open.
    pub fn open(&self) {
        let mut io = self.io.lock();
        if io.open {
            return;
        }
        io.open = true;
        if let StorageKind::Hybrid { path, .. } = &self.storage {
            let window = self.store.read().to_vec();
            match SpillFile::create(path, &window) {
                Ok(spill) => io.spill = Some(spill),
                Err(e) => warn!(
                    "Buffer '{}' could not create spill file {}: {}; continuing in memory",
                    self.name,
                    path.display(),
                    e
                ),
            }
        }
        info!("Buffer '{}' opened", self.name);
    }

    /// Disables notifications and deletes the spill file. No-op when closed.
    pub fn close(&self) {
        let mut io = self.io.lock();
        if !io.open {
            return;
        }
        io.open = false;
        if let Some(spill) = io.spill.take() {
            let path = spill.path().to_path_buf();
            if let Err(e) = spill.remove() {
                warn!(
                    "Buffer '{}' could not remove spill file {}: {}",
                    self.name,
                    path.display(),
                    e
                );
            }
        }
        info!("Buffer '{}' closed", self.name);
    }

    // --- mutation ----------------------------------------------------------

    pub fn append(&self, value: f64, notify: bool) {
        let mut io = self.io.lock();
        if self.locked_by_static(&io) {
            return;
        }
        let mut ring = self.store.write();
        let evicted = ring.append(value);
        let op = if evicted == 0 {
            SpillOp::Append(std::slice::from_ref(&value))
        } else {
            SpillOp::Rewrite
        };
        self.persist(&mut io, &ring, op);
        drop(ring);
        self.mutated(&mut io, true, notify, false);
    }

    /// Appends `value` if present; `None` is the producer's "no sample".
    pub fn append_optional(&self, value: Option<f64>, notify: bool) {
        if let Some(value) = value {
            self.append(value, notify);
        }
    }

    pub fn append_from_slice(&self, values: &[f64], notify: bool) {
        if values.is_empty() {
            return;
        }
        let mut io = self.io.lock();
        if self.locked_by_static(&io) {
            return;
        }
        let mut ring = self.store.write();
        let cut = ring.append_batch(values);
        let op = if cut == 0 {
            SpillOp::Append(values)
        } else {
            SpillOp::Rewrite
        };
        self.persist(&mut io, &ring, op);
        drop(ring);
        self.mutated(&mut io, true, notify, false);
    }

    pub fn replace_values(&self, values: &[f64], notify: bool) {
        let mut io = self.io.lock();
        if self.locked_by_static(&io) {
            return;
        }
        let mut ring = self.store.write();
        ring.replace_all(values);
        self.persist(&mut io, &ring, SpillOp::Rewrite);
        drop(ring);
        self.mutated(&mut io, true, notify, false);
    }

    /// Drops the `n` oldest values. Refused for hybrid storage, whose spill
    /// file only grows at the tail.
    pub fn remove_first(&self, n: usize) -> Result<usize, BufferError> {
        if let StorageKind::Hybrid { .. } = self.storage {
            warn!("remove_first called on hybrid buffer '{}'; ignored", self.name);
            return Err(BufferError::UnsupportedOperation {
                name: self.name.clone(),
                operation: "remove_first",
                storage: self.storage.label(),
            });
        }
        let mut io = self.io.lock();
        let removed = self.store.write().remove_first(n);
        if removed > 0 {
            let written = io.written;
            self.mutated(&mut io, written, true, false);
        }
        Ok(removed)
    }

    /// Restores the initial contents and re-enables writing.
    pub fn clear(&self, notify: bool, no_data: bool) {
        let mut io = self.io.lock();
        let mut ring = self.store.write();
        ring.replace_all(&self.initial);
        self.persist(&mut io, &ring, SpillOp::Rewrite);
        drop(ring);
        self.mutated(&mut io, false, notify, no_data);
    }

    // --- reading -----------------------------------------------------------

    pub fn to_vec(&self) -> Vec<f64> {
        self.store.to_vec()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.store.get(index)
    }

    pub fn first(&self) -> Option<f64> {
        self.store.first()
    }

    pub fn last(&self) -> Option<f64> {
        self.store.last()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Runs `f` against the contents under the read lock. `f` must not call
    /// back into this buffer.
    pub fn with_values<R>(&self, f: impl FnOnce(&Ring) -> R) -> R {
        f(&self.store.read())
    }

    pub fn state_token(&self) -> StateToken {
        Self::token_of(&mut self.io.lock())
    }

    pub fn state_token_is_valid(&self, token: StateToken) -> bool {
        self.io.lock().token == Some(token)
    }

    /// Contents and the token describing exactly those contents.
    pub fn snapshot(&self) -> (Vec<f64>, StateToken) {
        let mut io = self.io.lock();
        let values = self.store.to_vec();
        (values, Self::token_of(&mut io))
    }

    fn token_of(io: &mut BufferIo) -> StateToken {
        *io.token.get_or_insert_with(|| StateToken(Uuid::new_v4()))
    }

    // --- observers ---------------------------------------------------------

    /// Registers `observer`. Registering twice keeps the first position.
    pub fn add_observer(&self, observer: ObserverId) {
        let mut io = self.io.lock();
        if !io.observers.contains(&observer) {
            io.observers.push(observer);
        }
    }

    pub fn remove_observer(&self, observer: ObserverId) {
        self.io.lock().observers.retain(|o| *o != observer);
    }

    pub fn observers(&self) -> Vec<ObserverId> {
        self.io.lock().observers.clone()
    }

    /// Tells observers that an analysis cycle writing this buffer finished.
    pub fn send_analysis_complete(&self) {
        let io = self.io.lock();
        if let Some(buffer) = io.link.as_ref().map(|link| link.id) {
            self.notify(&io, Event::AnalysisComplete { buffer });
        }
    }

    // --- state files -------------------------------------------------------

    /// Writes the current window to `path` using the spill layout.
    pub fn write_state(&self, path: &Path) -> Result<(), BufferError> {
        let values = self.store.to_vec();
        storage::write_state(path, &values)
    }

    /// Replaces the contents with a state file. The write-once rule of static
    /// buffers does not apply.
    pub fn read_state(&self, path: &Path) -> Result<(), BufferError> {
        let values = storage::read_state(path)?;
        let mut io = self.io.lock();
        let mut ring = self.store.write();
        ring.replace_all(&values);
        self.persist(&mut io, &ring, SpillOp::Rewrite);
        drop(ring);
        self.mutated(&mut io, true, true, false);
        debug!("Buffer '{}' restored {} values", self.name, values.len());
        Ok(())
    }

    // --- internals ---------------------------------------------------------

    fn locked_by_static(&self, io: &BufferIo) -> bool {
        self.is_static && io.written
    }

    fn persist(&self, io: &mut BufferIo, ring: &Ring, op: SpillOp<'_>) {
        let Some(spill) = io.spill.as_mut() else {
            return;
        };
        let result = match op {
            SpillOp::Append(values) => spill.append(values),
            SpillOp::Rewrite => spill.rewrite(&ring.to_vec()),
        };
        if let Err(e) = result {
            self.spill_failed(io, e);
        }
    }

    fn spill_failed(&self, io: &mut BufferIo, err: io::Error) {
        warn!(
            "Buffer '{}' spill write failed: {}; continuing in memory",
            self.name, err
        );
        if let Some(spill) = io.spill.take() {
            let _ = spill.remove();
        }
    }

    fn mutated(&self, io: &mut BufferIo, written: bool, notify: bool, no_data: bool) {
        io.written = written;
        io.token = None;
        if !notify {
            return;
        }
        if let Some(buffer) = io.link.as_ref().map(|link| link.id) {
            self.notify(io, Event::BufferUpdated { buffer, no_data });
        }
    }

    // Sent while the bookkeeping lock is held so events leave in mutation order.
    fn notify(&self, io: &BufferIo, event: Event) {
        if !io.open {
            return;
        }
        if let Some(link) = &io.link {
            link.notifier.send(io.observers.clone(), event);
        }
    }
}

impl Drop for DataBuffer {
    fn drop(&mut self) {
        self.close();
    }
}
