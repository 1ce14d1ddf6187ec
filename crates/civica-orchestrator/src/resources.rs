use crate::config::ResourceLimits;
use crate::types::{ResourceAllocation, ResourceRequirements};
use chrono::{DateTime, Utc};
use civica_core::{CivicaError, CivicaResult, WorkflowId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Request for concurrency slots on behalf of one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub workflow_id: WorkflowId,
    pub phase: String,
    pub slots: u32,
}

/// Slots held by one phase until released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub id: Uuid,
    pub workflow_id: WorkflowId,
    pub phase: String,
    pub slots: u32,
    pub granted_at: DateTime<Utc>,
}

/// Counters of the resource ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceStats {
    /// Phase allocations granted.
    pub granted: u64,
    /// Phase allocations released (double releases are not counted).
    pub released: u64,
    /// Requests refused for lack of capacity.
    pub rejected: u64,
    /// Workflow budgets granted.
    pub budgets: u64,
    pub live: usize,
    pub allocated_slots: u32,
    pub capacity: u32,
    pub instances: u32,
}

struct Ledger {
    instances: u32,
    allocated: u32,
    live: HashMap<Uuid, u32>,
    granted: u64,
    released: u64,
    rejected: u64,
    budgets: u64,
}

/// Shared concurrency-slot counter.
///
/// Capacity is `instances × per_instance_concurrency`. Every read-modify-write
/// of the counter happens under one lock, so concurrent workflows can never
/// over-allocate.
pub struct ResourceManager {
    limits: ResourceLimits,
    per_instance: u32,
    ledger: Mutex<Ledger>,
    freed: Notify,
}

impl ResourceManager {
    pub fn new(limits: ResourceLimits, instances: u32, per_instance: u32) -> Self {
        Self {
            limits,
            per_instance,
            ledger: Mutex::new(Ledger {
                instances,
                allocated: 0,
                live: HashMap::new(),
                granted: 0,
                released: 0,
                rejected: 0,
                budgets: 0,
            }),
            freed: Notify::new(),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn per_instance_concurrency(&self) -> u32 {
        self.per_instance
    }

    /// Grant a workflow budget sized for `requirements`.
    ///
    /// The budget is a snapshot and reserves no slots; phases allocate their
    /// slots from the shared counter when they run.
    pub fn grant(
        &self,
        workflow_id: &WorkflowId,
        requirements: &ResourceRequirements,
    ) -> CivicaResult<ResourceAllocation> {
        let mut ledger = self.ledger.lock();
        let capacity = ledger.instances * self.per_instance;
        let ceiling = self.limits.max_concurrent_agents.min(capacity);
        if requirements.max_agent_slots > ceiling {
            ledger.rejected += 1;
            warn!(
                workflow_id = %workflow_id,
                requested = requirements.max_agent_slots,
                available = ceiling,
                "Workflow budget refused"
            );
            return Err(CivicaError::ResourceExhausted {
                requested: requirements.max_agent_slots,
                available: ceiling,
            });
        }
        ledger.budgets += 1;

        let max_concurrent_agents = requirements
            .peak_concurrency
            .max(requirements.max_agent_slots)
            .clamp(1, ceiling.max(1));
        info!(
            workflow_id = %workflow_id,
            max_concurrent_agents,
            capacity,
            "Workflow budget granted"
        );
        Ok(ResourceAllocation {
            workflow_id: workflow_id.clone(),
            max_concurrent_agents,
            max_memory_per_agent_mb: self.limits.max_memory_per_agent_mb,
            max_cpu_millis_per_agent: self.limits.max_cpu_millis_per_agent,
            max_execution_time_secs: self.limits.max_execution_time_secs,
            max_api_calls_per_hour: self.limits.max_api_calls_per_hour,
            granted_at: Utc::now(),
        })
    }

    /// Take `request.slots` from the counter, or fail with `ResourceExhausted`.
    pub fn allocate(&self, request: &AllocationRequest) -> CivicaResult<Allocation> {
        let mut ledger = self.ledger.lock();
        let capacity = ledger.instances * self.per_instance;
        let available = capacity.saturating_sub(ledger.allocated);
        if request.slots > available {
            ledger.rejected += 1;
            return Err(CivicaError::ResourceExhausted {
                requested: request.slots,
                available,
            });
        }

        let allocation = Allocation {
            id: Uuid::new_v4(),
            workflow_id: request.workflow_id.clone(),
            phase: request.phase.clone(),
            slots: request.slots,
            granted_at: Utc::now(),
        };
        ledger.allocated += request.slots;
        ledger.live.insert(allocation.id, request.slots);
        ledger.granted += 1;
        debug!(
            workflow_id = %request.workflow_id,
            phase = %request.phase,
            slots = request.slots,
            allocated = ledger.allocated,
            "Slots allocated"
        );
        Ok(allocation)
    }

    /// Like [`allocate`](Self::allocate), but waits for other workflows to
    /// release slots. Fails immediately when the request exceeds the whole
    /// current capacity, since waiting could not help.
    pub async fn acquire(&self, request: &AllocationRequest) -> CivicaResult<Allocation> {
        loop {
            let freed = self.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            match self.allocate(request) {
                Ok(allocation) => return Ok(allocation),
                Err(e) => {
                    if request.slots > self.capacity() {
                        return Err(e);
                    }
                }
            }
            debug!(
                workflow_id = %request.workflow_id,
                phase = %request.phase,
                slots = request.slots,
                "Waiting for free slots"
            );
            freed.await;
        }
    }

    /// Return an allocation's slots. Releasing twice is a no-op.
    pub fn release(&self, allocation: &Allocation) {
        let mut ledger = self.ledger.lock();
        let Some(slots) = ledger.live.remove(&allocation.id) else {
            return;
        };
        ledger.allocated = ledger.allocated.saturating_sub(slots);
        ledger.released += 1;
        debug!(
            workflow_id = %allocation.workflow_id,
            phase = %allocation.phase,
            slots,
            allocated = ledger.allocated,
            "Slots released"
        );
        drop(ledger);
        self.freed.notify_waiters();
    }

    /// Allocate and wrap the allocation in a guard that releases on drop.
    pub async fn acquire_guard(
        &self,
        request: &AllocationRequest,
    ) -> CivicaResult<AllocationGuard<'_>> {
        let allocation = self.acquire(request).await?;
        Ok(AllocationGuard {
            manager: self,
            allocation,
        })
    }

    /// Change the instance count; capacity follows under the same lock.
    /// Returns the new capacity.
    pub fn resize(&self, instances: u32) -> u32 {
        let mut ledger = self.ledger.lock();
        ledger.instances = instances.max(1);
        let capacity = ledger.instances * self.per_instance;
        drop(ledger);
        self.freed.notify_waiters();
        capacity
    }

    pub fn instances(&self) -> u32 {
        self.ledger.lock().instances
    }

    pub fn capacity(&self) -> u32 {
        self.ledger.lock().instances * self.per_instance
    }

    pub fn allocated_slots(&self) -> u32 {
        self.ledger.lock().allocated
    }

    pub fn available(&self) -> u32 {
        let ledger = self.ledger.lock();
        (ledger.instances * self.per_instance).saturating_sub(ledger.allocated)
    }

    pub fn is_live(&self, id: &Uuid) -> bool {
        self.ledger.lock().live.contains_key(id)
    }

    pub fn stats(&self) -> ResourceStats {
        let ledger = self.ledger.lock();
        ResourceStats {
            granted: ledger.granted,
            released: ledger.released,
            rejected: ledger.rejected,
            budgets: ledger.budgets,
            live: ledger.live.len(),
            allocated_slots: ledger.allocated,
            capacity: ledger.instances * self.per_instance,
            instances: ledger.instances,
        }
    }
}

/// Releases its allocation when dropped, on every exit path.
pub struct AllocationGuard<'a> {
    manager: &'a ResourceManager,
    allocation: Allocation,
}

impl AllocationGuard<'_> {
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }
}

impl Drop for AllocationGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.allocation);
    }
}
