use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{
    Command, HeartbeatOutcome, HeartbeatUpdate, IdleReport, Instance, InstanceState,
    StateChangeOutcome, StateChangeReport,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Repository trait for instance storage
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Store a new instance; fails if the ID is taken.
    async fn create(&self, instance: Instance) -> ControlPlaneResult<()>;

    /// Remove an instance, returning its last record.
    async fn delete(&self, instance_id: &str) -> ControlPlaneResult<Instance>;

    /// Refresh liveness and state, draining queued commands.
    async fn update_heartbeat(&self, update: HeartbeatUpdate)
        -> ControlPlaneResult<HeartbeatOutcome>;

    /// Store an idle report, moving a running instance to idle.
    async fn record_idle(&self, report: &IdleReport) -> ControlPlaneResult<Instance>;

    /// Validate and apply a reported lifecycle transition.
    async fn apply_state_change(
        &self,
        report: &StateChangeReport,
    ) -> ControlPlaneResult<StateChangeOutcome>;

    /// Queue a command for delivery with the next heartbeat.
    async fn enqueue_command(&self, instance_id: &str, command: Command)
        -> ControlPlaneResult<Instance>;

    async fn get(&self, instance_id: &str) -> ControlPlaneResult<Instance>;

    async fn list(&self) -> ControlPlaneResult<Vec<Instance>>;

    async fn count(&self) -> ControlPlaneResult<usize>;
}

struct InstanceRecord {
    instance: Instance,
    pending: Vec<Command>,
}

type SharedRecord = Arc<Mutex<InstanceRecord>>;

/// In-memory implementation of instance repository.
///
/// The table lock only guards membership. Each record has its own lock, so
/// updates to one instance are serialized without holding up the others.
#[derive(Clone, Default)]
pub struct InMemoryInstanceRepository {
    storage: Arc<RwLock<HashMap<String, SharedRecord>>>,
}

fn poisoned() -> ControlPlaneError {
    ControlPlaneError::StorageError("Lock poisoned".to_string())
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, instance_id: &str) -> ControlPlaneResult<SharedRecord> {
        let storage = self.storage.read().map_err(|_| poisoned())?;
        storage
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::InstanceNotFound(instance_id.to_string()))
    }

    fn with_record<T>(
        &self,
        instance_id: &str,
        apply: impl FnOnce(&mut InstanceRecord) -> ControlPlaneResult<T>,
    ) -> ControlPlaneResult<T> {
        let record = self.record(instance_id)?;
        let mut record = record.lock().map_err(|_| poisoned())?;
        apply(&mut record)
    }
}

/// Moves `instance` to `next`, keeping IdleSince consistent with the state.
fn enter_state(instance: &mut Instance, next: InstanceState) {
    if next == InstanceState::Idle {
        if instance.idle_since.is_none() {
            instance.idle_since = Some(Utc::now());
        }
    } else {
        instance.idle_since = None;
    }
    instance.state = next;
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn create(&self, instance: Instance) -> ControlPlaneResult<()> {
        let mut storage = self.storage.write().map_err(|_| poisoned())?;
        if storage.contains_key(&instance.instance_id) {
            return Err(ControlPlaneError::DuplicateInstance(
                instance.instance_id.clone(),
            ));
        }
        storage.insert(
            instance.instance_id.clone(),
            Arc::new(Mutex::new(InstanceRecord {
                instance,
                pending: Vec::new(),
            })),
        );
        Ok(())
    }

    async fn delete(&self, instance_id: &str) -> ControlPlaneResult<Instance> {
        let record = {
            let mut storage = self.storage.write().map_err(|_| poisoned())?;
            storage
                .remove(instance_id)
                .ok_or_else(|| ControlPlaneError::InstanceNotFound(instance_id.to_string()))?
        };
        let record = record.lock().map_err(|_| poisoned())?;
        Ok(record.instance.clone())
    }

    async fn update_heartbeat(
        &self,
        update: HeartbeatUpdate,
    ) -> ControlPlaneResult<HeartbeatOutcome> {
        self.with_record(&update.instance_id, |record| {
            let previous_state = record.instance.state;
            record.instance.last_heartbeat = update.received_at;
            record.instance.resource_usage = update.resource_usage;

            if previous_state.can_transition_to(update.state) {
                if previous_state != update.state {
                    enter_state(&mut record.instance, update.state);
                }
            } else {
                warn!(
                    instance_id = %update.instance_id,
                    stored = %previous_state,
                    reported = %update.state,
                    "Heartbeat reported an illegal transition, keeping stored state"
                );
            }

            Ok(HeartbeatOutcome {
                previous_state,
                instance: record.instance.clone(),
                commands: std::mem::take(&mut record.pending),
            })
        })
    }

    async fn record_idle(&self, report: &IdleReport) -> ControlPlaneResult<Instance> {
        self.with_record(&report.instance_id, |record| {
            let instance = &mut record.instance;
            if instance.state.can_transition_to(InstanceState::Idle) {
                instance.state = InstanceState::Idle;
                instance.idle_since = Some(report.idle_since);
            } else {
                debug!(
                    instance_id = %report.instance_id,
                    state = %instance.state,
                    "Idle report outside of running/idle, state left unchanged"
                );
            }
            instance.resource_usage = report.resource_usage.clone();
            Ok(instance.clone())
        })
    }

    async fn apply_state_change(
        &self,
        report: &StateChangeReport,
    ) -> ControlPlaneResult<StateChangeOutcome> {
        self.with_record(&report.instance_id, |record| {
            let stored = record.instance.state;
            if stored != report.previous_state {
                debug!(
                    instance_id = %report.instance_id,
                    %stored,
                    reported = %report.previous_state,
                    "Reported previous state differs from stored state"
                );
            }

            let next = stored.transition_to(report.current_state)?;
            enter_state(&mut record.instance, next);
            Ok(StateChangeOutcome {
                previous_state: stored,
                instance: record.instance.clone(),
            })
        })
    }

    async fn enqueue_command(
        &self,
        instance_id: &str,
        command: Command,
    ) -> ControlPlaneResult<Instance> {
        self.with_record(instance_id, |record| {
            record.pending.push(command);
            Ok(record.instance.clone())
        })
    }

    async fn get(&self, instance_id: &str) -> ControlPlaneResult<Instance> {
        self.with_record(instance_id, |record| Ok(record.instance.clone()))
    }

    async fn list(&self) -> ControlPlaneResult<Vec<Instance>> {
        let records: Vec<SharedRecord> = {
            let storage = self.storage.read().map_err(|_| poisoned())?;
            storage.values().cloned().collect()
        };

        let mut instances = records
            .iter()
            .map(|record| {
                record
                    .lock()
                    .map(|record| record.instance.clone())
                    .map_err(|_| poisoned())
            })
            .collect::<ControlPlaneResult<Vec<_>>>()?;
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(instances)
    }

    async fn count(&self) -> ControlPlaneResult<usize> {
        let storage = self.storage.read().map_err(|_| poisoned())?;
        Ok(storage.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snoozer_core::InstanceSpec;
    use std::time::Duration;

    fn create_test_instance(id: &str) -> Instance {
        Instance::from_spec(
            InstanceSpec {
                instance_id: id.to_string(),
                instance_type: "t3.micro".to_string(),
                region: "us-east-1".to_string(),
                zone: "us-east-1a".to_string(),
                provider: "aws".to_string(),
                thresholds: HashMap::from([("cpu".to_string(), 0.1)]),
                nap_time: Duration::from_secs(600),
            },
            "agent-1",
        )
    }

    fn heartbeat(id: &str, state: InstanceState) -> HeartbeatUpdate {
        HeartbeatUpdate {
            instance_id: id.to_string(),
            state,
            resource_usage: HashMap::from([("cpu".to_string(), 0.5)]),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = InMemoryInstanceRepository::new();
        repo.create(create_test_instance("i-1")).await.unwrap();

        let retrieved = repo.get("i-1").await.unwrap();
        assert_eq!(retrieved.instance_id, "i-1");
        assert_eq!(retrieved.state, InstanceState::Running);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_keeps_existing_record() {
        let repo = InMemoryInstanceRepository::new();
        repo.create(create_test_instance("i-1")).await.unwrap();

        let mut other = create_test_instance("i-1");
        other.region = "eu-west-1".to_string();
        assert_eq!(
            repo.create(other).await,
            Err(ControlPlaneError::DuplicateInstance("i-1".to_string()))
        );
        assert_eq!(repo.get("i-1").await.unwrap().region, "us-east-1");
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = InMemoryInstanceRepository::new();
        repo.create(create_test_instance("i-1")).await.unwrap();

        assert_eq!(repo.delete("i-1").await.unwrap().instance_id, "i-1");
        assert!(matches!(
            repo.get("i-1").await,
            Err(ControlPlaneError::InstanceNotFound(_))
        ));
        assert!(matches!(
            repo.delete("i-1").await,
            Err(ControlPlaneError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_drains_commands_once() {
        let repo = InMemoryInstanceRepository::new();
        repo.create(create_test_instance("i-1")).await.unwrap();
        repo.enqueue_command("i-1", Command::stop()).await.unwrap();

        let first = repo
            .update_heartbeat(heartbeat("i-1", InstanceState::Running))
            .await
            .unwrap();
        assert_eq!(first.commands, vec![Command::stop()]);
        assert!(!first.state_changed());

        let second = repo
            .update_heartbeat(heartbeat("i-1", InstanceState::Running))
            .await
            .unwrap();
        assert!(second.commands.is_empty());
        assert_eq!(second.instance.resource_usage.get("cpu"), Some(&0.5));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_instance() {
        let repo = InMemoryInstanceRepository::new();
        assert!(matches!(
            repo.update_heartbeat(heartbeat("ghost", InstanceState::Running))
                .await,
            Err(ControlPlaneError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_illegal_state_is_ignored() {
        let repo = InMemoryInstanceRepository::new();
        repo.create(create_test_instance("i-1")).await.unwrap();

        let before = repo.get("i-1").await.unwrap().last_heartbeat;
        let mut update = heartbeat("i-1", InstanceState::Stopped);
        update.received_at = before + chrono::Duration::seconds(30);

        let outcome = repo.update_heartbeat(update).await.unwrap();
        assert!(!outcome.state_changed());
        assert_eq!(outcome.instance.state, InstanceState::Running);
        assert_eq!(
            outcome.instance.last_heartbeat,
            before + chrono::Duration::seconds(30)
        );
    }

    #[tokio::test]
    async fn test_idle_then_running_clears_idle_since() {
        let repo = InMemoryInstanceRepository::new();
        repo.create(create_test_instance("i-1")).await.unwrap();

        let since = Utc::now() - chrono::Duration::minutes(5);
        let instance = repo
            .record_idle(&IdleReport {
                instance_id: "i-1".to_string(),
                idle_since: since,
                idle_duration: Duration::from_secs(300),
                resource_usage: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(instance.state, InstanceState::Idle);
        assert_eq!(instance.idle_since, Some(since));

        let outcome = repo
            .update_heartbeat(heartbeat("i-1", InstanceState::Running))
            .await
            .unwrap();
        assert!(outcome.state_changed());
        assert_eq!(outcome.previous_state, InstanceState::Idle);
        assert_eq!(outcome.instance.idle_since, None);
    }

    #[tokio::test]
    async fn test_idle_report_while_stopping_keeps_idle_since_clear() {
        let repo = InMemoryInstanceRepository::new();
        repo.create(create_test_instance("i-1")).await.unwrap();
        for (previous, current) in [
            (InstanceState::Running, InstanceState::Idle),
            (InstanceState::Idle, InstanceState::Stopping),
        ] {
            repo.apply_state_change(&StateChangeReport {
                instance_id: "i-1".to_string(),
                previous_state: previous,
                current_state: current,
                reason: "nap time reached".to_string(),
            })
            .await
            .unwrap();
        }

        let usage = HashMap::from([("cpu".to_string(), 0.02)]);
        let instance = repo
            .record_idle(&IdleReport {
                instance_id: "i-1".to_string(),
                idle_since: Utc::now() - chrono::Duration::minutes(20),
                idle_duration: Duration::from_secs(1200),
                resource_usage: usage.clone(),
            })
            .await
            .unwrap();
        assert_eq!(instance.state, InstanceState::Stopping);
        assert_eq!(instance.idle_since, None);
        assert_eq!(instance.resource_usage, usage);
    }

    #[tokio::test]
    async fn test_apply_state_change_validates_against_stored_state() {
        let repo = InMemoryInstanceRepository::new();
        repo.create(create_test_instance("i-1")).await.unwrap();

        let report = |previous, current| StateChangeReport {
            instance_id: "i-1".to_string(),
            previous_state: previous,
            current_state: current,
            reason: "test".to_string(),
        };

        let outcome = repo
            .apply_state_change(&report(InstanceState::Running, InstanceState::Idle))
            .await
            .unwrap();
        assert_eq!(outcome.previous_state, InstanceState::Running);
        assert!(outcome.instance.idle_since.is_some());

        assert!(matches!(
            repo.apply_state_change(&report(InstanceState::Idle, InstanceState::Starting))
                .await,
            Err(ControlPlaneError::InvalidTransition(_))
        ));
        assert_eq!(repo.get("i-1").await.unwrap().state, InstanceState::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_heartbeats_for_distinct_instances() {
        let repo = InMemoryInstanceRepository::new();
        for i in 0..16 {
            repo.create(create_test_instance(&format!("i-{i}")))
                .await
                .unwrap();
        }

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let repo = repo.clone();
            tasks.spawn(async move {
                repo.update_heartbeat(heartbeat(&format!("i-{i}"), InstanceState::Idle))
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(result.unwrap().unwrap().state_changed());
        }

        let instances = repo.list().await.unwrap();
        assert_eq!(instances.len(), 16);
        assert!(instances
            .iter()
            .all(|instance| instance.state == InstanceState::Idle));
    }
}
