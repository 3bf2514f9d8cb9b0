use crate::application::gateway::RemoteGateway;
use crate::domain::models::{
    is_temp_id, EntityKind, EntityPatch, EntityPayload, OperationAction, OperationData,
    PendingOperation, ValidationError,
};
use crate::infrastructure::error::{AuthError, GatewayError, InfraError, SyncError};
use crate::infrastructure::storage::{load_json, save_json, DurableStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub fn queue_key(kind: EntityKind) -> String {
    format!("pending_ops.{}", kind.collection_name())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub applied: Vec<String>,
    // Retryable failures stay queued; rejected ones are removed.
    pub failed: Vec<PendingOperation>,
    pub deferred: Vec<PendingOperation>,
    pub rejected: Vec<PendingOperation>,
    pub id_map: HashMap<String, String>,
    pub auth_failure: Option<AuthError>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
            && self.deferred.is_empty()
            && self.rejected.is_empty()
            && self.auth_failure.is_none()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ops: Vec<PendingOperation>,
    next_seq: u64,
    // Creates already acknowledged whose temporary id may still be in a caller's hands.
    acknowledged: HashMap<String, String>,
}

pub struct PendingOperationQueue<S>
where
    S: DurableStore + ?Sized,
{
    kind: EntityKind,
    key: String,
    store: Arc<S>,
    state: Mutex<QueueState>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl<S> PendingOperationQueue<S>
where
    S: DurableStore + ?Sized,
{
    pub fn load(store: Arc<S>, kind: EntityKind) -> Result<Self, InfraError> {
        let key = queue_key(kind);
        let ops: Vec<PendingOperation> = load_json(store.as_ref(), &key)?.unwrap_or_default();
        let next_seq = ops.iter().map(|op| op.seq).max().map_or(1, |seq| seq + 1);
        if !ops.is_empty() {
            info!(kind = %kind, pending = ops.len(), "restored pending operations");
        }
        Ok(Self {
            kind,
            key,
            store,
            state: Mutex::new(QueueState {
                ops,
                next_seq,
                acknowledged: HashMap::new(),
            }),
            flush_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, QueueState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::Store(format!("pending queue lock poisoned: {error}")))
    }

    pub fn enqueue(&self, op: PendingOperation) -> Result<PendingOperation, SyncError> {
        op.validate()?;
        if op.kind != self.kind {
            return Err(SyncError::Validation(ValidationError(format!(
                "{} operation cannot be queued for {}",
                op.kind,
                self.kind.collection_name()
            ))));
        }

        let mut state = self.lock_state()?;
        let mut op = remap_operation(op, &state.acknowledged);
        op.seq = state.next_seq;
        state.ops.push(op.clone());
        if let Err(error) = save_json(self.store.as_ref(), &self.key, &state.ops) {
            state.ops.pop();
            return Err(error.into());
        }
        state.next_seq += 1;
        debug!(
            kind = %self.kind,
            seq = op.seq,
            action = op.action().as_str(),
            entity_id = %op.entity_id,
            "operation queued"
        );
        Ok(op)
    }

    pub fn len(&self) -> usize {
        self.lock_state().map(|state| state.ops.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Result<Vec<PendingOperation>, InfraError> {
        Ok(self.lock_state()?.ops.clone())
    }

    pub fn forget_acknowledged(&self, id_map: &HashMap<String, String>) -> Result<(), InfraError> {
        let mut state = self.lock_state()?;
        for temp_id in id_map.keys() {
            state.acknowledged.remove(temp_id);
        }
        Ok(())
    }

    pub async fn flush<G>(&self, gateway: &G) -> Result<FlushReport, InfraError>
    where
        G: RemoteGateway + ?Sized,
    {
        let _flush_guard = self.flush_lock.lock().await;
        let (batch, acknowledged) = {
            let state = self.lock_state()?;
            (state.ops.clone(), state.acknowledged.clone())
        };
        let mut report = FlushReport::default();
        let mut resolved: HashSet<u64> = HashSet::new();
        // Entities with an earlier operation still outstanding in this pass.
        let mut blocked: HashSet<String> = HashSet::new();

        if batch.is_empty() {
            return Ok(report);
        }
        info!(kind = %self.kind, pending = batch.len(), "flushing pending operations");

        for op in batch {
            let op = remap_operation(remap_operation(op, &acknowledged), &report.id_map);

            if blocked.contains(&op.entity_id) {
                debug!(seq = op.seq, entity_id = %op.entity_id, "operation deferred behind earlier one");
                report.deferred.push(op);
                continue;
            }

            if op.action() != OperationAction::Create && op.targets_temp_id() {
                if self.has_unresolved_create(&op.entity_id, &resolved)? {
                    debug!(seq = op.seq, entity_id = %op.entity_id, "operation deferred behind pending create");
                    blocked.insert(op.entity_id.clone());
                    report.deferred.push(op);
                } else {
                    warn!(seq = op.seq, entity_id = %op.entity_id, "dropping operation on a temporary id with no pending create");
                    resolved.insert(op.seq);
                    report.rejected.push(op);
                }
                continue;
            }

            if let Some(parent) = temp_parent(&op).map(str::to_owned) {
                if self.has_unresolved_create(&parent, &resolved)? {
                    debug!(seq = op.seq, parent = %parent, "operation deferred behind its parent's create");
                    blocked.insert(op.entity_id.clone());
                    report.deferred.push(op);
                } else {
                    warn!(seq = op.seq, parent = %parent, "dropping operation whose parent was never created");
                    resolved.insert(op.seq);
                    report.rejected.push(op);
                }
                continue;
            }

            let outcome = match &op.data {
                OperationData::Create(payload) => gateway.create(payload).await.map(|entity| Some(entity.id)),
                OperationData::Update(patch) => gateway.update(&op.entity_id, patch).await.map(|_| None),
                OperationData::Delete => gateway.delete(op.kind, &op.entity_id).await.map(|_| None),
            };

            match outcome {
                Ok(canonical_id) => {
                    if let Some(canonical_id) = canonical_id {
                        info!(temp_id = %op.temp_id, canonical_id = %canonical_id, "create acknowledged");
                        report.id_map.insert(op.temp_id.clone(), canonical_id);
                    } else {
                        debug!(seq = op.seq, action = op.action().as_str(), entity_id = %op.entity_id, "operation applied");
                    }
                    resolved.insert(op.seq);
                    report.applied.push(op.temp_id);
                }
                Err(GatewayError::Auth(error)) => {
                    warn!(seq = op.seq, error = %error, "authentication failed; halting flush");
                    report.failed.push(op);
                    report.auth_failure = Some(error);
                    break;
                }
                Err(error) if error.is_retryable() => {
                    warn!(seq = op.seq, entity_id = %op.entity_id, error = %error, "operation failed; keeping it queued");
                    blocked.insert(op.entity_id.clone());
                    report.failed.push(op);
                }
                Err(error) => {
                    warn!(seq = op.seq, entity_id = %op.entity_id, error = %error, "server rejected operation; dropping");
                    resolved.insert(op.seq);
                    report.rejected.push(op);
                }
            }
        }

        self.rewrite(&resolved, &report.id_map)?;
        info!(
            kind = %self.kind,
            applied = report.applied.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            rejected = report.rejected.len(),
            "flush finished"
        );
        Ok(report)
    }

    fn has_unresolved_create(&self, temp_id: &str, resolved: &HashSet<u64>) -> Result<bool, InfraError> {
        Ok(self.lock_state()?.ops.iter().any(|op| {
            op.action() == OperationAction::Create
                && op.temp_id == temp_id
                && !resolved.contains(&op.seq)
        }))
    }

    fn rewrite(&self, resolved: &HashSet<u64>, id_map: &HashMap<String, String>) -> Result<(), InfraError> {
        if resolved.is_empty() && id_map.is_empty() {
            return Ok(());
        }
        let mut state = self.lock_state()?;
        let remaining: Vec<PendingOperation> = state
            .ops
            .iter()
            .filter(|op| !resolved.contains(&op.seq))
            .cloned()
            .map(|op| remap_operation(op, id_map))
            .collect();
        save_json(self.store.as_ref(), &self.key, &remaining)?;
        state.ops = remaining;
        state
            .acknowledged
            .extend(id_map.iter().map(|(temp, canonical)| (temp.clone(), canonical.clone())));
        Ok(())
    }
}

fn temp_parent(op: &PendingOperation) -> Option<&str> {
    let parent = match &op.data {
        OperationData::Create(EntityPayload::Task(task)) => task.parent.as_deref(),
        OperationData::Update(EntityPatch::Task(patch)) => patch.parent.as_deref(),
        _ => None,
    };
    parent.filter(|parent| is_temp_id(parent))
}

fn remap_operation(mut op: PendingOperation, id_map: &HashMap<String, String>) -> PendingOperation {
    if id_map.is_empty() {
        return op;
    }
    if let Some(canonical) = id_map.get(&op.entity_id) {
        op.entity_id = canonical.clone();
    }
    let parent = match &mut op.data {
        OperationData::Create(EntityPayload::Task(task)) => task.parent.as_mut(),
        OperationData::Update(EntityPatch::Task(patch)) => patch.parent.as_mut(),
        _ => None,
    };
    if let Some(parent) = parent.filter(|parent| is_temp_id(parent)) {
        if let Some(canonical) = id_map.get(parent.as_str()) {
            *parent = canonical.clone();
        }
    }
    op
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fakes::ScriptedGateway;
    use crate::domain::models::{Entity, TaskPatch, TaskPayload};
    use crate::infrastructure::storage::InMemoryStore;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T00:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn create_task(temp_id: &str, title: &str) -> PendingOperation {
        PendingOperation::create(temp_id, EntityPayload::Task(TaskPayload::new(title)), fixed_time())
    }

    fn rename_task(id: &str, title: &str) -> PendingOperation {
        PendingOperation::update(
            id,
            EntityPatch::Task(TaskPatch {
                title: Some(title.to_string()),
                ..TaskPatch::default()
            }),
            fixed_time(),
        )
    }

    fn queue(store: Arc<InMemoryStore>) -> PendingOperationQueue<InMemoryStore> {
        PendingOperationQueue::load(store, EntityKind::Task).expect("load queue")
    }

    #[test]
    fn enqueue_writes_through_and_survives_reload() {
        let store = Arc::new(InMemoryStore::default());
        let first = queue(Arc::clone(&store));
        first.enqueue(create_task("temp-1", "Buy milk")).expect("enqueue create");
        first.enqueue(rename_task("temp-1", "Buy oat milk")).expect("enqueue update");
        assert_eq!(store.write_count(&queue_key(EntityKind::Task)), 2);

        let reloaded = queue(store);
        let ops = reloaded.snapshot().expect("snapshot");
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].seq, 1);
        assert_eq!(ops[1].seq, 2);

        let next = reloaded.enqueue(rename_task("srv-1", "x")).expect("enqueue after reload");
        assert_eq!(next.seq, 3);
    }

    #[test]
    fn invalid_operations_never_reach_the_queue() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));

        let result = queue.enqueue(create_task("temp-1", "   "));
        assert!(matches!(result, Err(SyncError::Validation(_))));

        let event_delete = PendingOperation::delete(EntityKind::Event, "evt-1", fixed_time());
        assert!(matches!(queue.enqueue(event_delete), Err(SyncError::Validation(_))));

        assert!(queue.is_empty());
        assert_eq!(store.write_count(&queue_key(EntityKind::Task)), 0);
    }

    #[tokio::test]
    async fn temp_create_then_update_rewrites_id_within_one_flush() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();
        gateway.assign_ids(&["srv-9"]);

        queue.enqueue(create_task("temp-100", "Buy milk")).expect("enqueue create");
        queue.enqueue(rename_task("temp-100", "Buy oat milk")).expect("enqueue update");

        let report = queue.flush(&gateway).await.expect("flush");

        assert_eq!(gateway.calls(), vec!["create:Buy milk", "update:srv-9"]);
        assert_eq!(report.applied, vec!["temp-100", "temp-100"]);
        assert_eq!(report.id_map.get("temp-100"), Some(&"srv-9".to_string()));
        assert!(report.is_clean());
        assert!(queue.is_empty());
        let remote = gateway.remote(EntityKind::Task);
        assert_eq!(remote.len(), 1);
        let EntityPayload::Task(task) = &remote[0].payload else {
            panic!("expected task");
        };
        assert_eq!(task.title, "Buy oat milk");
    }

    #[tokio::test]
    async fn second_flush_after_success_makes_no_remote_calls() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();
        queue.enqueue(create_task("temp-1", "Buy milk")).expect("enqueue");

        queue.flush(&gateway).await.expect("first flush");
        let calls_after_first = gateway.calls().len();
        let second = queue.flush(&gateway).await.expect("second flush");

        assert_eq!(gateway.calls().len(), calls_after_first);
        assert_eq!(second, FlushReport::default());
    }

    #[tokio::test]
    async fn single_failure_does_not_block_unrelated_operations() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new()
            .with_remote(vec![Entity::remote("srv-1", EntityPayload::Task(TaskPayload::new("Old")))]);
        gateway.fail("create:Flaky", GatewayError::Network("connection reset".to_string()));

        queue.enqueue(create_task("temp-1", "Flaky")).expect("enqueue flaky");
        queue.enqueue(rename_task("srv-1", "Renamed")).expect("enqueue rename");
        queue.enqueue(create_task("temp-2", "Stable")).expect("enqueue stable");

        let report = queue.flush(&gateway).await.expect("flush");

        assert_eq!(report.applied, vec!["srv-1", "temp-2"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].temp_id, "temp-1");
        let remaining = queue.snapshot().expect("snapshot");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].temp_id, "temp-1");
    }

    #[tokio::test]
    async fn update_on_temp_id_waits_behind_failed_create() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();
        gateway.fail("create:Buy milk", GatewayError::Server("http 503".to_string()));

        queue.enqueue(create_task("temp-1", "Buy milk")).expect("enqueue create");
        queue.enqueue(rename_task("temp-1", "Buy oat milk")).expect("enqueue update");

        let report = queue.flush(&gateway).await.expect("first flush");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.deferred.len(), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(gateway.calls(), vec!["create:Buy milk"]);

        gateway.assign_ids(&["srv-5"]);
        let report = queue.flush(&gateway).await.expect("second flush");
        assert!(report.is_clean());
        assert!(queue.is_empty());
        assert_eq!(
            gateway.calls(),
            vec!["create:Buy milk", "create:Buy milk", "update:srv-5"]
        );
    }

    #[tokio::test]
    async fn orphaned_temp_id_operations_are_dropped() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();
        gateway.fail(
            "create:Bad",
            GatewayError::Validation("http 400; invalid title".to_string()),
        );

        queue.enqueue(create_task("temp-1", "Bad")).expect("enqueue create");
        queue.enqueue(rename_task("temp-1", "Still bad")).expect("enqueue update");
        queue
            .enqueue(PendingOperation::delete(EntityKind::Task, "temp-unknown", fixed_time()))
            .expect("enqueue delete");

        let report = queue.flush(&gateway).await.expect("flush");

        assert_eq!(report.rejected.len(), 3);
        assert!(queue.is_empty());
        assert_eq!(gateway.calls(), vec!["create:Bad"]);
    }

    #[tokio::test]
    async fn auth_failure_halts_flush_and_keeps_remaining_operations() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();
        gateway.fail(
            "create:First",
            GatewayError::Auth(AuthError::new("revoked").with_persistent(true)),
        );

        queue.enqueue(create_task("temp-1", "First")).expect("enqueue first");
        queue.enqueue(create_task("temp-2", "Second")).expect("enqueue second");

        let report = queue.flush(&gateway).await.expect("flush");

        assert!(report.auth_failure.as_ref().is_some_and(|error| error.persistent));
        assert_eq!(gateway.calls(), vec!["create:First"]);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn subtask_parent_is_remapped_once_parent_lands() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();
        gateway.assign_ids(&["srv-parent", "srv-child"]);

        let mut child = TaskPayload::new("Child");
        child.parent = Some("temp-parent".to_string());
        queue.enqueue(create_task("temp-parent", "Parent")).expect("enqueue parent");
        queue
            .enqueue(PendingOperation::create("temp-child", EntityPayload::Task(child), fixed_time()))
            .expect("enqueue child");

        queue.flush(&gateway).await.expect("flush");

        let remote = gateway.remote(EntityKind::Task);
        let child = remote.iter().find(|entity| entity.id == "srv-child").expect("child created");
        let EntityPayload::Task(task) = &child.payload else {
            panic!("expected task");
        };
        assert_eq!(task.parent.as_deref(), Some("srv-parent"));
    }

    #[tokio::test]
    async fn edit_queued_with_acknowledged_temp_id_targets_canonical_id() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();
        gateway.assign_ids(&["srv-4"]);

        queue.enqueue(create_task("temp-4", "Buy milk")).expect("enqueue create");
        let report = queue.flush(&gateway).await.expect("flush create");
        assert!(queue.is_empty());

        let queued = queue
            .enqueue(rename_task("temp-4", "Buy oat milk"))
            .expect("enqueue late edit");
        assert_eq!(queued.entity_id, "srv-4");

        let second = queue.flush(&gateway).await.expect("flush edit");
        assert_eq!(second.applied, vec!["temp-4"]);
        assert!(second.rejected.is_empty());
        assert_eq!(gateway.calls(), vec!["create:Buy milk", "update:srv-4"]);

        queue.forget_acknowledged(&report.id_map).expect("forget");
        let stale = queue.enqueue(rename_task("temp-4", "Stale")).expect("enqueue stale");
        assert_eq!(stale.entity_id, "temp-4");
    }

    #[tokio::test]
    async fn subtask_waits_for_parent_create_that_has_not_landed() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();
        gateway.fail("create:Parent", GatewayError::Network("offline".to_string()));

        let mut child = TaskPayload::new("Child");
        child.parent = Some("temp-parent".to_string());
        queue.enqueue(create_task("temp-parent", "Parent")).expect("enqueue parent");
        queue
            .enqueue(PendingOperation::create("temp-child", EntityPayload::Task(child), fixed_time()))
            .expect("enqueue child");

        let report = queue.flush(&gateway).await.expect("first flush");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.deferred.len(), 1);
        assert_eq!(gateway.calls(), vec!["create:Parent"]);
        assert_eq!(queue.len(), 2);

        gateway.assign_ids(&["srv-parent", "srv-child"]);
        let report = queue.flush(&gateway).await.expect("second flush");
        assert!(report.is_clean());
        let remote = gateway.remote(EntityKind::Task);
        let child = remote.iter().find(|entity| entity.id == "srv-child").expect("child created");
        let EntityPayload::Task(task) = &child.payload else {
            panic!("expected task");
        };
        assert_eq!(task.parent.as_deref(), Some("srv-parent"));
    }

    #[tokio::test]
    async fn subtask_of_never_created_parent_is_dropped() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();

        let mut child = TaskPayload::new("Child");
        child.parent = Some("temp-ghost".to_string());
        queue
            .enqueue(PendingOperation::create("temp-child", EntityPayload::Task(child), fixed_time()))
            .expect("enqueue child");

        let report = queue.flush(&gateway).await.expect("flush");

        assert_eq!(report.rejected.len(), 1);
        assert!(gateway.calls().is_empty());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn non_retryable_server_answer_drops_the_operation() {
        let store = Arc::new(InMemoryStore::default());
        let queue = queue(Arc::clone(&store));
        let gateway = ScriptedGateway::new();
        gateway.fail("create:Too long", GatewayError::Validation("http 400".to_string()));
        gateway.fail("create:Later", GatewayError::Server("http 503".to_string()));

        queue.enqueue(create_task("temp-1", "Too long")).expect("enqueue");
        queue.enqueue(create_task("temp-2", "Later")).expect("enqueue");

        let report = queue.flush(&gateway).await.expect("flush");

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].temp_id, "temp-1");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].temp_id, "temp-2");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remap_operation_leaves_unmapped_ids_alone() {
        let op = rename_task("srv-3", "Same");
        let id_map = HashMap::from([("temp-1".to_string(), "srv-1".to_string())]);
        assert_eq!(remap_operation(op.clone(), &id_map), op);
    }

    // Feature: dashsync, Property 3: a flush never loses or duplicates queued work
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn property3_flush_partitions_every_operation(
            failures in proptest::collection::vec(any::<bool>(), 1..12)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let store = Arc::new(InMemoryStore::default());
            let queue = queue(Arc::clone(&store));
            let gateway = ScriptedGateway::new();

            for (index, fails) in failures.iter().enumerate() {
                let title = format!("Task {index}");
                if *fails {
                    gateway.fail(&format!("create:{title}"), GatewayError::Network("offline".to_string()));
                }
                queue.enqueue(create_task(&format!("temp-{index}"), &title)).expect("enqueue");
            }

            let report = runtime.block_on(queue.flush(&gateway)).expect("flush");
            let failed_count = failures.iter().filter(|fails| **fails).count();

            prop_assert_eq!(report.applied.len() + report.failed.len(), failures.len());
            prop_assert_eq!(report.failed.len(), failed_count);
            prop_assert_eq!(queue.len(), failed_count);
            prop_assert_eq!(gateway.remote(EntityKind::Task).len(), failures.len() - failed_count);

            let second = runtime.block_on(queue.flush(&gateway)).expect("second flush");
            prop_assert!(second.is_clean());
            prop_assert!(queue.is_empty());
        }
    }
}
