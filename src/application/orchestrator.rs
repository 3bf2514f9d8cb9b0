use crate::application::gateway::RemoteGateway;
use crate::application::pending_queue::{FlushReport, PendingOperationQueue};
use crate::domain::models::{
    new_temp_id, Entity, EntityKind, EntityPatch, EntityPayload, EventPatch, EventPayload,
    OperationAction, PendingOperation, SyncStatus, TaskPatch, TaskPayload, ValidationError,
};
use crate::domain::reconcile::{merge, overlay_pending, remap_ids};
use crate::infrastructure::error::{AuthError, GatewayError, InfraError, SyncError};
use crate::infrastructure::storage::{load_json, save_json, DurableStore};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type SyncFuture = Shared<BoxFuture<'static, Result<SyncOutcome, SyncError>>>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub fn snapshot_key(kind: EntityKind) -> String {
    format!("snapshot.{}", kind.collection_name())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Flushing,
    Fetching,
    Reconciling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    Healthy,
    Degraded,
    ReauthenticationRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    CollectionUpdated {
        kind: EntityKind,
        entities: Arc<[Entity]>,
    },
    SessionDegraded {
        message: String,
    },
    ReauthenticationRequired {
        message: String,
    },
    SessionRestored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub kind: EntityKind,
    pub flush: FlushReport,
    pub entities: Arc<[Entity]>,
}

struct Collection<S>
where
    S: DurableStore + ?Sized,
{
    kind: EntityKind,
    queue: PendingOperationQueue<S>,
    view: Mutex<Arc<[Entity]>>,
    phase: Mutex<SyncPhase>,
}

pub struct SyncOrchestrator<S, G>
where
    S: DurableStore + ?Sized + 'static,
    G: RemoteGateway + ?Sized + 'static,
{
    store: Arc<S>,
    gateway: Arc<G>,
    tasks: Collection<S>,
    events: Collection<S>,
    notifier: broadcast::Sender<SyncEvent>,
    session: Mutex<SessionHealth>,
    in_flight: tokio::sync::Mutex<HashMap<EntityKind, SyncFuture>>,
    now_provider: NowProvider,
}

impl<S, G> SyncOrchestrator<S, G>
where
    S: DurableStore + ?Sized + 'static,
    G: RemoteGateway + ?Sized + 'static,
{
    pub fn open(store: Arc<S>, gateway: Arc<G>) -> Result<Self, InfraError> {
        let tasks = Self::open_collection(&store, EntityKind::Task)?;
        let events = Self::open_collection(&store, EntityKind::Event)?;
        let (notifier, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            store,
            gateway,
            tasks,
            events,
            notifier,
            session: Mutex::new(SessionHealth::Healthy),
            in_flight: tokio::sync::Mutex::new(HashMap::new()),
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn open_collection(store: &Arc<S>, kind: EntityKind) -> Result<Collection<S>, InfraError> {
        let entities: Vec<Entity> = load_json(store.as_ref(), &snapshot_key(kind))?.unwrap_or_default();
        Ok(Collection {
            kind,
            queue: PendingOperationQueue::load(Arc::clone(store), kind)?,
            view: Mutex::new(entities.into()),
            phase: Mutex::new(SyncPhase::Idle),
        })
    }

    fn collection(&self, kind: EntityKind) -> &Collection<S> {
        match kind {
            EntityKind::Task => &self.tasks,
            EntityKind::Event => &self.events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.notifier.subscribe()
    }

    pub fn snapshot(&self, kind: EntityKind) -> Arc<[Entity]> {
        Arc::clone(
            &self
                .collection(kind)
                .view
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn state(&self, kind: EntityKind) -> SyncPhase {
        *self
            .collection(kind)
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn session_health(&self) -> SessionHealth {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending_count(&self, kind: EntityKind) -> usize {
        self.collection(kind).queue.len()
    }

    pub fn create_task(&self, payload: TaskPayload) -> Result<Entity, SyncError> {
        self.create(EntityPayload::Task(payload))
    }

    pub fn create_event(&self, payload: EventPayload) -> Result<Entity, SyncError> {
        self.create(EntityPayload::Event(payload))
    }

    pub fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Entity, SyncError> {
        self.update(id, EntityPatch::Task(patch))
    }

    pub fn update_event(&self, id: &str, patch: EventPatch) -> Result<Entity, SyncError> {
        self.update(id, EntityPatch::Event(patch))
    }

    fn create(&self, payload: EntityPayload) -> Result<Entity, SyncError> {
        payload.validate()?;
        let collection = self.collection(payload.kind());
        let entity = Entity::local(new_temp_id(), payload.clone());

        let mut view = lock_view(collection)?;
        collection
            .queue
            .enqueue(PendingOperation::create(entity.id.clone(), payload, (self.now_provider)()))?;
        let mut entities = view.to_vec();
        entities.push(entity.clone());
        self.publish_locked(collection, &mut view, entities)?;

        info!(kind = %collection.kind, temp_id = %entity.id, "entity created locally");
        Ok(entity)
    }

    fn update(&self, id: &str, patch: EntityPatch) -> Result<Entity, SyncError> {
        if patch.is_empty() {
            return Err(ValidationError("update patch must not be empty".to_string()).into());
        }
        let collection = self.collection(patch.kind());

        let mut view = lock_view(collection)?;
        let index = find_entity(&view, collection.kind, id)?;
        let mut updated = view[index].clone();
        updated.payload.apply(&patch)?;
        updated.payload.validate()?;
        updated.sync_status = SyncStatus::Pending;

        collection
            .queue
            .enqueue(PendingOperation::update(id, patch, (self.now_provider)()))?;
        let mut entities = view.to_vec();
        entities[index] = updated.clone();
        self.publish_locked(collection, &mut view, entities)?;

        debug!(kind = %collection.kind, id, "entity updated locally");
        Ok(updated)
    }

    pub fn delete(&self, kind: EntityKind, id: &str) -> Result<(), SyncError> {
        let collection = self.collection(kind);

        let mut view = lock_view(collection)?;
        let index = find_entity(&view, kind, id)?;
        collection
            .queue
            .enqueue(PendingOperation::delete(kind, id, (self.now_provider)()))?;
        let mut entities = view.to_vec();
        entities.remove(index);
        self.publish_locked(collection, &mut view, entities)?;

        debug!(kind = %kind, id, "entity deleted locally");
        Ok(())
    }

    // Callers arriving while a pass for the same kind runs share its outcome.
    pub async fn sync(self: &Arc<Self>, kind: EntityKind) -> Result<SyncOutcome, SyncError> {
        let pass = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&kind) {
                Some(existing) if existing.peek().is_none() => {
                    debug!(kind = %kind, "joining in-flight sync");
                    existing.clone()
                }
                _ => {
                    let this = Arc::clone(self);
                    let handle = tokio::spawn(async move { this.run_sync(kind).await });
                    let pass = async move {
                        handle
                            .await
                            .unwrap_or_else(|error| Err(SyncError::Aborted(error.to_string())))
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(kind, pass.clone());
                    pass
                }
            }
        };

        let result = pass.clone().await;

        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(&kind)
            .is_some_and(|current| current.ptr_eq(&pass))
        {
            in_flight.remove(&kind);
        }
        result
    }

    async fn run_sync(&self, kind: EntityKind) -> Result<SyncOutcome, SyncError> {
        info!(kind = %kind, "sync started");
        let result = self.run_phases(kind).await;
        self.set_phase(kind, SyncPhase::Idle);

        match &result {
            Ok(outcome) => {
                info!(
                    kind = %kind,
                    entities = outcome.entities.len(),
                    applied = outcome.flush.applied.len(),
                    failed = outcome.flush.failed.len(),
                    "sync finished"
                );
                self.mark_session_healthy();
            }
            Err(SyncError::Gateway(GatewayError::Auth(error))) => {
                warn!(kind = %kind, error = %error, "sync stopped by authentication failure");
                self.mark_session_failed(error);
            }
            Err(error) => warn!(kind = %kind, error = %error, "sync failed"),
        }
        result
    }

    async fn run_phases(&self, kind: EntityKind) -> Result<SyncOutcome, SyncError> {
        let collection = self.collection(kind);

        self.set_phase(kind, SyncPhase::Flushing);
        let report = collection.queue.flush(self.gateway.as_ref()).await?;
        if !report.id_map.is_empty() {
            let mut view = lock_view(collection)?;
            let remapped = remap_ids(&view, &report.id_map);
            self.publish_locked(collection, &mut view, remapped)?;
            collection.queue.forget_acknowledged(&report.id_map)?;
        }
        if let Some(error) = report.auth_failure.clone() {
            return Err(GatewayError::Auth(error).into());
        }

        self.set_phase(kind, SyncPhase::Fetching);
        let remote = self.gateway.list(kind).await?;

        self.set_phase(kind, SyncPhase::Reconciling);
        let mut view = lock_view(collection)?;
        let pending = collection.queue.snapshot()?;
        let pending_creates: HashSet<&str> = pending
            .iter()
            .filter(|op| op.action() == OperationAction::Create)
            .map(|op| op.entity_id.as_str())
            .collect();
        // Temporary entities whose create was dropped have nothing left to wait for.
        let local: Vec<Entity> = view
            .iter()
            .filter(|entity| !entity.is_temporary() || pending_creates.contains(entity.id.as_str()))
            .cloned()
            .collect();
        let merged = overlay_pending(&merge(&local, &remote), &pending);
        let entities = self.publish_locked(collection, &mut view, merged)?;

        Ok(SyncOutcome {
            kind,
            flush: report,
            entities,
        })
    }

    fn set_phase(&self, kind: EntityKind, phase: SyncPhase) {
        let mut current = self
            .collection(kind)
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != phase {
            debug!(kind = %kind, from = ?*current, to = ?phase, "sync phase");
            *current = phase;
        }
    }

    fn publish_locked(
        &self,
        collection: &Collection<S>,
        view: &mut MutexGuard<'_, Arc<[Entity]>>,
        entities: Vec<Entity>,
    ) -> Result<Arc<[Entity]>, InfraError> {
        save_json(self.store.as_ref(), &snapshot_key(collection.kind), &entities)?;
        let entities: Arc<[Entity]> = entities.into();
        **view = Arc::clone(&entities);
        // No subscribers is fine.
        let _ = self.notifier.send(SyncEvent::CollectionUpdated {
            kind: collection.kind,
            entities: Arc::clone(&entities),
        });
        Ok(entities)
    }

    fn mark_session_failed(&self, error: &AuthError) {
        let next = if error.requires_interactive_reauth() {
            SessionHealth::ReauthenticationRequired
        } else {
            SessionHealth::Degraded
        };
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *session == next {
            return;
        }
        *session = next;
        drop(session);

        let event = match next {
            SessionHealth::ReauthenticationRequired => SyncEvent::ReauthenticationRequired {
                message: error.message.clone(),
            },
            _ => SyncEvent::SessionDegraded {
                message: error.message.clone(),
            },
        };
        let _ = self.notifier.send(event);
    }

    fn mark_session_healthy(&self) {
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *session == SessionHealth::Healthy {
            return;
        }
        *session = SessionHealth::Healthy;
        drop(session);
        info!("session restored");
        let _ = self.notifier.send(SyncEvent::SessionRestored);
    }
}

fn lock_view<S>(collection: &Collection<S>) -> Result<MutexGuard<'_, Arc<[Entity]>>, InfraError>
where
    S: DurableStore + ?Sized,
{
    collection
        .view
        .lock()
        .map_err(|error| InfraError::Store(format!("collection view lock poisoned: {error}")))
}

fn find_entity(entities: &[Entity], kind: EntityKind, id: &str) -> Result<usize, ValidationError> {
    entities
        .iter()
        .position(|entity| entity.id == id)
        .ok_or_else(|| ValidationError(format!("unknown {kind} id: {id}")))
}
