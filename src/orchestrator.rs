//! # Update Orchestrator
//!
//! Drives one device through its update cycles:
//!
//! ```text
//! Unidentified ──identify──▶ Identified ──update──▶ UpdatingCycle
//!      ▲                         ▲                        │
//!      └──────── reset ──────────┴────── done / failed ───┘
//! ```
//!
//! Every [`update`](UpdateOrchestrator::update) opens one transport session,
//! identifies the device if it is still unknown, scans every plan of the
//! device's topology, closes the session, evaluates derived fields and
//! publishes the merged [`Snapshot`]. A failed cycle publishes nothing: the
//! previous snapshot stays current.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voltage_regmap::{DeviceCatalog, MemoryTransport, UpdateOrchestrator};
//!
//! # async fn run(catalog: Arc<DeviceCatalog>) -> voltage_regmap::ScanResult<()> {
//! let mut orchestrator = UpdateOrchestrator::new(MemoryTransport::new(), catalog);
//! let mut updates = orchestrator.subscribe();
//!
//! let snapshot = orchestrator.update().await?;
//! println!("{}: {} fields", snapshot.device, snapshot.len());
//!
//! updates.changed().await.ok();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::catalog::{DeviceCatalog, DeviceModel};
use crate::derived::apply_derived;
use crate::error::{ScanError, ScanResult};
use crate::executor::ScanExecutor;
use crate::resolver::DeviceResolver;
use crate::transport::RegisterTransport;
use crate::value::{FieldMap, Value};

/// Lifecycle state of an orchestrated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No device model yet; the next update identifies first
    Unidentified,
    /// Device model cached; updates skip identification
    Identified,
    /// A cycle is scanning
    UpdatingCycle,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Unidentified => f.write_str("unidentified"),
            OrchestratorState::Identified => f.write_str("identified"),
            OrchestratorState::UpdatingCycle => f.write_str("updating"),
        }
    }
}

/// Merged result of one successful cycle. Never mutated once published.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Snapshot {
    pub fields: FieldMap,
    pub device: Arc<DeviceModel>,
    /// Cycle number that produced this snapshot, starting at 1
    pub cycle: u64,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Counters over the orchestrator's update cycles.
///
/// Every started cycle ends as exactly one of success, failure or
/// cancellation (the `update` future was dropped before it finished).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    /// Cycles started
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
    pub cancelled: u64,
    /// Failures since the last successful cycle
    pub consecutive_failures: u32,
    pub last_error: Option<ScanError>,
}

impl CycleStats {
    fn record_success(&mut self) {
        self.successes += 1;
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self, error: &ScanError) {
        self.failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.clone());
    }
}

/// Bookkeeping of one running cycle.
///
/// Dropping it returns the orchestrator to its resting state, so a cycle
/// whose future is dropped mid-scan is never left in `UpdatingCycle`.
struct CycleGuard<'a> {
    state: &'a mut OrchestratorState,
    device: &'a mut Option<Arc<DeviceModel>>,
    stats: &'a mut CycleStats,
    settled: bool,
}

impl<'a> CycleGuard<'a> {
    fn start(
        state: &'a mut OrchestratorState,
        device: &'a mut Option<Arc<DeviceModel>>,
        stats: &'a mut CycleStats,
    ) -> Self {
        stats.cycles += 1;
        Self {
            state,
            device,
            stats,
            settled: false,
        }
    }

    fn cycle(&self) -> u64 {
        self.stats.cycles
    }

    fn settle(&mut self, result: &ScanResult<Arc<Snapshot>>) {
        match result {
            Ok(_) => self.stats.record_success(),
            Err(err) => self.stats.record_failure(err),
        }
        self.settled = true;
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        *self.state = match self.device {
            Some(_) => OrchestratorState::Identified,
            None => OrchestratorState::Unidentified,
        };
        if !self.settled {
            self.stats.cancelled += 1;
            debug!("Update cycle {} cancelled", self.stats.cycles);
        }
    }
}

/// Identification, scanning and snapshot publication for one device.
///
/// The orchestrator owns its transport, so all reads of a device are issued
/// from a single task, one at a time.
pub struct UpdateOrchestrator<T: RegisterTransport> {
    transport: T,
    resolver: DeviceResolver,
    executor: ScanExecutor,
    state: OrchestratorState,
    device: Option<Arc<DeviceModel>>,
    stats: CycleStats,
    publisher: watch::Sender<Option<Arc<Snapshot>>>,
}

impl<T: RegisterTransport> UpdateOrchestrator<T> {
    /// Orchestrator with default executor settings.
    pub fn new(transport: T, catalog: Arc<DeviceCatalog>) -> Self {
        Self::with_executor(transport, catalog, ScanExecutor::new())
    }

    /// Orchestrator with explicit device limits and read timeout.
    pub fn with_executor(transport: T, catalog: Arc<DeviceCatalog>, executor: ScanExecutor) -> Self {
        let (publisher, _) = watch::channel(None);
        Self {
            transport,
            resolver: DeviceResolver::new(catalog, executor.clone()),
            executor,
            state: OrchestratorState::Unidentified,
            device: None,
            stats: CycleStats::default(),
            publisher,
        }
    }

    /// Run one update cycle and publish its snapshot.
    ///
    /// On failure the error is returned, the previous snapshot stays current
    /// and the next call retries from the top (including identification if
    /// it had not succeeded yet). Dropping the returned future mid-cycle
    /// closes the session, publishes nothing and counts the cycle as
    /// cancelled.
    pub async fn update(&mut self) -> ScanResult<Arc<Snapshot>> {
        let mut guard = CycleGuard::start(&mut self.state, &mut self.device, &mut self.stats);
        let result = Self::cycle(
            &mut self.transport,
            &self.resolver,
            &self.executor,
            &mut guard,
        )
        .await;
        guard.settle(&result);
        drop(guard);

        match result {
            Ok(snapshot) => {
                self.publisher.send_replace(Some(Arc::clone(&snapshot)));
                debug!("Published cycle {} ({} fields)", snapshot.cycle, snapshot.len());
                Ok(snapshot)
            }
            Err(err) => {
                warn!(
                    "Update cycle {} failed ({} consecutive): {}",
                    self.stats.cycles, self.stats.consecutive_failures, err
                );
                Err(err)
            }
        }
    }

    async fn cycle(
        transport: &mut T,
        resolver: &DeviceResolver,
        executor: &ScanExecutor,
        guard: &mut CycleGuard<'_>,
    ) -> ScanResult<Arc<Snapshot>> {
        let mut session = executor.open_session(transport).await?;

        let device = match guard.device.clone() {
            Some(device) => device,
            None => {
                let device = Arc::new(resolver.identify(&mut *session).await?);
                *guard.device = Some(Arc::clone(&device));
                executor.pace().await;
                device
            }
        };

        *guard.state = OrchestratorState::UpdatingCycle;
        let schema_set = &device.schema_set;
        let mut fields = FieldMap::new();
        for (i, plan) in schema_set.plans_for(device.topology).into_iter().enumerate() {
            if i > 0 {
                executor.pace().await;
            }
            let decoded = executor
                .run(plan, &mut *session, &schema_set.schemas, &device)
                .await?;
            fields.extend(decoded);
        }
        drop(session);

        apply_derived(&mut fields, &schema_set.derived);
        Ok(Arc::new(Snapshot {
            fields,
            device: Arc::clone(&device),
            cycle: guard.cycle(),
            captured_at: Utc::now(),
        }))
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.publisher.subscribe()
    }

    /// Last published snapshot.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.publisher.borrow().clone()
    }

    #[inline]
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Cached device model, once identified.
    #[inline]
    pub fn device(&self) -> Option<&Arc<DeviceModel>> {
        self.device.as_ref()
    }

    #[inline]
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Forget the identified device and the published snapshot.
    ///
    /// The next update re-runs identification, e.g. after a device swap.
    pub fn reset(&mut self) {
        self.device = None;
        self.state = OrchestratorState::Unidentified;
        self.publisher.send_replace(None);
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}
