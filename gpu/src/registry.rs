//! Per-thread command pool registry.
//!
//! Command pools are externally synchronized, so every thread records from
//! pools of its own. The registry keys pools by (thread, queue kind, policy)
//! and creates them lazily on first use.
//!
//! The designated main thread looks its pools up in a fixed table of
//! [`OnceLock`] slots without taking a lock. Other threads go through a
//! mutex-protected map. Pool creation on either path is serialized by the
//! device's allocation lock.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::command::{CommandBufferBatch, CommandPool};
use crate::device::Device;
use crate::error::GpuResult;
use crate::types::{CommandPoolPolicy, QueueKind};

const SLOT_COUNT: usize = QueueKind::ALL.len() * CommandPoolPolicy::ALL.len();

type PoolKey = (ThreadId, QueueKind, CommandPoolPolicy);

/// Lazily created command pools, one per (thread, kind, policy).
///
/// # Example
///
/// ```ignore
/// let registry = device.create_command_pool_registry();
/// let mut batch = registry.allocate(QueueKind::Graphics, CommandPoolPolicy::Transient, 2)?;
/// batch.begin_all()?;
/// batch.end_all()?;
/// ```
pub struct CommandPoolRegistry {
    device: Arc<Device>,
    main_thread: ThreadId,
    main_pools: [OnceLock<Arc<CommandPool>>; SLOT_COUNT],
    thread_pools: Mutex<HashMap<PoolKey, Arc<CommandPool>>>,
}

impl CommandPoolRegistry {
    /// Create a registry whose main thread is the calling thread.
    pub fn new(device: &Arc<Device>) -> Self {
        Self::with_main_thread(device, thread::current().id())
    }

    pub fn with_main_thread(device: &Arc<Device>, main_thread: ThreadId) -> Self {
        Self {
            device: Arc::clone(device),
            main_thread,
            main_pools: std::array::from_fn(|_| OnceLock::new()),
            thread_pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Allocate `count` command buffers from the calling thread's pool for
    /// (`kind`, `policy`), creating the pool on first use.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn allocate(
        &self,
        kind: QueueKind,
        policy: CommandPoolPolicy,
        count: u32,
    ) -> GpuResult<CommandBufferBatch> {
        assert!(count > 0, "command buffer batch must contain at least one buffer");
        crate::profile_scope!("command_pool_registry_allocate");
        self.pool(kind, policy)?.allocate(count)
    }

    /// The calling thread's pool for (`kind`, `policy`).
    pub fn pool(&self, kind: QueueKind, policy: CommandPoolPolicy) -> GpuResult<Arc<CommandPool>> {
        let thread = thread::current().id();
        if thread == self.main_thread {
            self.main_pool(kind, policy)
        } else {
            self.thread_pool(thread, kind, policy)
        }
    }

    fn main_pool(&self, kind: QueueKind, policy: CommandPoolPolicy) -> GpuResult<Arc<CommandPool>> {
        let slot = &self.main_pools[kind.slot() * CommandPoolPolicy::ALL.len() + policy.slot()];
        if let Some(pool) = slot.get() {
            return Ok(Arc::clone(pool));
        }

        let _guard = self.device.allocation_lock().lock();
        if let Some(pool) = slot.get() {
            return Ok(Arc::clone(pool));
        }
        let pool = CommandPool::new(&self.device, kind, policy)?;
        // Only the main thread writes these slots, and it holds the allocation lock.
        let _ = slot.set(Arc::clone(&pool));
        Ok(pool)
    }

    fn thread_pool(
        &self,
        thread: ThreadId,
        kind: QueueKind,
        policy: CommandPoolPolicy,
    ) -> GpuResult<Arc<CommandPool>> {
        let key = (thread, kind, policy);
        if let Some(pool) = self.thread_pools.lock().get(&key) {
            return Ok(Arc::clone(pool));
        }

        let pool = {
            let _guard = self.device.allocation_lock().lock();
            CommandPool::new(&self.device, kind, policy)?
        };
        log::debug!("Created {:?}/{:?} command pool for {:?}", kind, policy, thread);
        // A key is only ever inserted by its own thread, so nothing raced us here.
        let pool = self
            .thread_pools
            .lock()
            .entry(key)
            .or_insert(pool)
            .clone();
        Ok(pool)
    }

    /// Drop the pools of a thread that stopped recording.
    ///
    /// Batches still alive keep their pool until they are dropped.
    pub fn release_thread(&self, thread: ThreadId) {
        let mut pools = self.thread_pools.lock();
        let before = pools.len();
        pools.retain(|(owner, _, _), _| *owner != thread);
        log::debug!(
            "Released {} command pools of {:?}",
            before - pools.len(),
            thread
        );
    }

    /// Number of pools created so far and still cached.
    pub fn pool_count(&self) -> usize {
        let main = self.main_pools.iter().filter(|s| s.get().is_some()).count();
        main + self.thread_pools.lock().len()
    }
}

impl std::fmt::Debug for CommandPoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPoolRegistry")
            .field("main_thread", &self.main_thread)
            .field("pool_count", &self.pool_count())
            .finish()
    }
}
