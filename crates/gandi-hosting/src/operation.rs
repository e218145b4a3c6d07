//! Asynchronous operations and the completion poller.

use crate::entity::{Entity, EntityRef};
use crate::Result;
use gandi_core::{EntityKind, Record, Step, Value};
use gandi_xmlrpc::Gateway;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Delay between two polls of a pending operation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A remote operation returned by every mutating call.
#[derive(Debug)]
pub struct Operation {
    entity: EntityRef,
}

impl Operation {
    /// Wraps an operation record.
    #[must_use]
    pub fn from_record(gateway: Arc<dyn Gateway>, record: Record) -> Self {
        Self {
            entity: Entity::new_ref(EntityKind::Operation, gateway, record),
        }
    }

    /// Underlying entity.
    #[must_use]
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Operation identifier.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.entity.id()
    }

    /// Current step, as last fetched.
    #[must_use]
    pub fn step(&self) -> Step {
        self.entity
            .get_str("step")
            .map_or_else(|| Step::Other(String::new()), |step| Step::from(step.as_str()))
    }

    /// Operation type (`vm_update`, `disk_create`, ...).
    #[must_use]
    pub fn op_type(&self) -> Option<String> {
        self.entity.get_str("type")
    }

    /// Identifier of the `kind` entity the operation targets.
    #[must_use]
    pub fn target_id(&self, kind: EntityKind) -> Option<i64> {
        self.entity
            .get(&format!("{}_id", kind.name()))
            .as_ref()
            .and_then(Value::as_i64)
    }

    /// Re-fetches the operation record.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn refresh(&self) -> Result<()> {
        self.entity.refresh().await
    }

    /// Polls the operation until it is `DONE` or `ERROR`, returning the last
    /// step seen.
    ///
    /// Without a timeout the poller only stops on a terminal step. With one,
    /// it sleeps and refreshes at least once, then stops on a terminal step or
    /// once the budget is spent. A zero interval with a timeout runs a single
    /// cycle.
    ///
    /// # Errors
    ///
    /// Propagates the first refresh failure.
    pub async fn wait_completion(
        &self,
        timeout: Option<Duration>,
        interval: Duration,
    ) -> Result<Step> {
        match timeout {
            None => {
                while !self.step().is_terminal() {
                    tokio::time::sleep(interval).await;
                    self.refresh().await?;
                    debug!(id = ?self.id(), step = %self.step(), "operation polled");
                }
            }
            Some(budget) => {
                let mut left = budget;
                loop {
                    tokio::time::sleep(interval).await;
                    left = left.saturating_sub(interval);
                    self.refresh().await?;
                    debug!(id = ?self.id(), step = %self.step(), "operation polled");

                    if self.step().is_terminal() || left.is_zero() || interval.is_zero() {
                        break;
                    }
                }
            }
        }

        Ok(self.step())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)
    }
}

/// Ordered history of the operations issued through a facade.
#[derive(Debug, Default)]
pub struct OperationLog {
    entries: VecDeque<Arc<Operation>>,
    capacity: Option<usize>,
    total: usize,
}

impl OperationLog {
    /// Unbounded log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log keeping only the `capacity` most recent operations.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
            total: 0,
        }
    }

    /// Appends an operation, evicting the oldest one when full.
    pub fn push(&mut self, operation: Arc<Operation>) {
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                self.total += 1;
                return;
            }
            while self.entries.len() >= capacity {
                self.entries.pop_front();
            }
        }
        self.entries.push_back(operation);
        self.total += 1;
    }

    /// Number of operations kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of operations ever pushed.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Most recent operation.
    #[must_use]
    pub fn last(&self) -> Option<&Arc<Operation>> {
        self.entries.back()
    }

    /// Operations in issue order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Operation>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{record, ScriptedGateway};
    use gandi_core::Error;
    use serde_json::json;
    use tokio::time::Instant;

    fn pending(gateway: Arc<ScriptedGateway>) -> Operation {
        Operation::from_record(
            gateway,
            record(json!({"id": 7, "step": "WAIT", "type": "disk_create", "disk_id": 42})),
        )
    }

    #[test]
    fn test_exposes_operation_fields() {
        let op = pending(ScriptedGateway::new());
        assert_eq!(op.id(), Some(7));
        assert_eq!(op.step(), Step::Other("WAIT".to_string()));
        assert_eq!(op.op_type().as_deref(), Some("disk_create"));
        assert_eq!(op.target_id(EntityKind::Disk), Some(42));
        assert_eq!(op.target_id(EntityKind::Vm), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_done_without_timeout() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("operation.info", json!({"id": 7, "step": "RUN"}));
        gateway.respond_json("operation.info", json!({"id": 7, "step": "RUN"}));
        gateway.respond_json("operation.info", json!({"id": 7, "step": "DONE"}));

        let op = pending(gateway.clone());
        let started = Instant::now();
        let step = op.wait_completion(None, Duration::from_secs(1)).await.unwrap();

        assert_eq!(step, Step::Done);
        assert_eq!(gateway.count("operation.info"), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_operation_sleeps_once_per_poll() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("operation.info", json!({"id": 9, "step": "PENDING"}));
        gateway.respond_json("operation.info", json!({"id": 9, "step": "DONE"}));

        let op = Operation::from_record(
            gateway.clone(),
            record(json!({"id": 9, "step": "PENDING"})),
        );
        let started = Instant::now();
        let step = op.wait_completion(None, Duration::from_secs(1)).await.unwrap();

        assert_eq!(step, Step::Done);
        assert_eq!(gateway.count("operation.info"), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_operation_is_not_polled_without_timeout() {
        let gateway = ScriptedGateway::new();
        let op = Operation::from_record(gateway.clone(), record(json!({"id": 7, "step": "DONE"})));

        let step = op.wait_completion(None, Duration::from_secs(1)).await.unwrap();
        assert_eq!(step, Step::Done);
        assert_eq!(gateway.count("operation.info"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_runs_one_cycle() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("operation.info", json!({"id": 7, "step": "RUN"}));

        let op = pending(gateway.clone());
        let step = op
            .wait_completion(Some(Duration::ZERO), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(step, Step::Other("RUN".to_string()));
        assert_eq!(gateway.count("operation.info"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_refreshes_even_a_terminal_operation() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("operation.info", json!({"id": 7, "step": "ERROR"}));

        let op = Operation::from_record(gateway.clone(), record(json!({"id": 7, "step": "DONE"})));
        let step = op
            .wait_completion(Some(Duration::from_secs(10)), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(step, Step::Error);
        assert_eq!(gateway.count("operation.info"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_the_number_of_polls() {
        let gateway = ScriptedGateway::new();
        gateway.respond_json("operation.info", json!({"id": 7, "step": "RUN"}));

        let op = pending(gateway.clone());
        let step = op
            .wait_completion(Some(Duration::from_secs(3)), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(step, Step::Other("RUN".to_string()));
        assert_eq!(gateway.count("operation.info"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_stops_the_poller() {
        let gateway = ScriptedGateway::new();
        gateway.fail("operation.info", Error::Timeout("slow".to_string()));

        let op = pending(gateway);
        let err = op
            .wait_completion(None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_log_keeps_issue_order() {
        let gateway = ScriptedGateway::new();
        let mut log = OperationLog::new();
        for id in 1..=3 {
            log.push(Arc::new(Operation::from_record(
                gateway.clone(),
                record(json!({"id": id, "step": "DONE"})),
            )));
        }

        let ids: Vec<_> = log.iter().filter_map(|op| op.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(log.last().and_then(|op| op.id()), Some(3));
        assert_eq!(log.total(), 3);
    }

    #[test]
    fn test_bounded_log_evicts_oldest() {
        let gateway = ScriptedGateway::new();
        let mut log = OperationLog::with_capacity(2);
        for id in 1..=3 {
            log.push(Arc::new(Operation::from_record(
                gateway.clone(),
                record(json!({"id": id, "step": "DONE"})),
            )));
        }

        let ids: Vec<_> = log.iter().filter_map(|op| op.id()).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.total(), 3);
    }
}
