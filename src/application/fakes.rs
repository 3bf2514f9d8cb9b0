use crate::application::gateway::RemoteGateway;
use crate::domain::models::{
    Entity, EntityKind, EntityPatch, EntityPayload, EventPatch, EventPayload, TaskPatch,
    TaskPayload,
};
use crate::infrastructure::error::GatewayError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// Failures are scripted per call key: create:<title>, update:<id>, delete:<id>, list:<collection>.
#[derive(Default)]
pub struct ScriptedGateway {
    remote: Mutex<HashMap<EntityKind, Vec<Entity>>>,
    failures: Mutex<HashMap<String, VecDeque<GatewayError>>>,
    next_ids: Mutex<VecDeque<String>>,
    id_counter: AtomicUsize,
    calls: Mutex<Vec<String>>,
    pub list_calls: AtomicUsize,
    list_delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn with_remote(self, entities: Vec<Entity>) -> Self {
        {
            let mut remote = self.remote.lock().expect("remote lock");
            for entity in entities {
                remote.entry(entity.kind).or_default().push(entity);
            }
        }
        self
    }

    pub fn assign_ids(&self, ids: &[&str]) {
        self.next_ids
            .lock()
            .expect("ids lock")
            .extend(ids.iter().map(|id| id.to_string()));
    }

    pub fn fail(&self, key: &str, error: GatewayError) {
        self.failures
            .lock()
            .expect("failures lock")
            .entry(key.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn remote(&self, kind: EntityKind) -> Vec<Entity> {
        self.remote
            .lock()
            .expect("remote lock")
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, key: String) -> Result<(), GatewayError> {
        self.calls.lock().expect("calls lock").push(key.clone());
        match self
            .failures
            .lock()
            .expect("failures lock")
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(&self) -> String {
        self.next_ids
            .lock()
            .expect("ids lock")
            .pop_front()
            .unwrap_or_else(|| format!("srv-{}", self.id_counter.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn do_create(&self, payload: EntityPayload, title: &str) -> Result<Entity, GatewayError> {
        self.record(format!("create:{title}"))?;
        let entity = Entity::remote(self.next_id(), payload);
        self.remote
            .lock()
            .expect("remote lock")
            .entry(entity.kind)
            .or_default()
            .push(entity.clone());
        Ok(entity)
    }

    fn do_update(&self, kind: EntityKind, id: &str, patch: EntityPatch) -> Result<Entity, GatewayError> {
        self.record(format!("update:{id}"))?;
        let mut remote = self.remote.lock().expect("remote lock");
        let entity = remote
            .entry(kind)
            .or_default()
            .iter_mut()
            .find(|entity| entity.id == id)
            .ok_or_else(|| GatewayError::Validation("http 404; not found".to_string()))?;
        entity.payload.apply(&patch)?;
        Ok(entity.clone())
    }

    fn do_delete(&self, kind: EntityKind, id: &str) -> Result<(), GatewayError> {
        self.record(format!("delete:{id}"))?;
        self.remote
            .lock()
            .expect("remote lock")
            .entry(kind)
            .or_default()
            .retain(|entity| entity.id != id);
        Ok(())
    }

    async fn do_list(&self, kind: EntityKind) -> Result<Vec<Entity>, GatewayError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(format!("list:{}", kind.collection_name()))?;
        Ok(self.remote(kind))
    }
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    async fn list_tasks(&self) -> Result<Vec<Entity>, GatewayError> {
        self.do_list(EntityKind::Task).await
    }

    async fn create_task(&self, payload: &TaskPayload) -> Result<Entity, GatewayError> {
        self.do_create(EntityPayload::Task(payload.clone()), &payload.title)
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Entity, GatewayError> {
        self.do_update(EntityKind::Task, id, EntityPatch::Task(patch.clone()))
    }

    async fn delete_task(&self, id: &str) -> Result<(), GatewayError> {
        self.do_delete(EntityKind::Task, id)
    }

    async fn list_events(&self) -> Result<Vec<Entity>, GatewayError> {
        self.do_list(EntityKind::Event).await
    }

    async fn create_event(&self, payload: &EventPayload) -> Result<Entity, GatewayError> {
        self.do_create(EntityPayload::Event(payload.clone()), &payload.summary)
    }

    async fn update_event(&self, id: &str, patch: &EventPatch) -> Result<Entity, GatewayError> {
        self.do_update(EntityKind::Event, id, EntityPatch::Event(patch.clone()))
    }

    async fn delete_event(&self, id: &str) -> Result<(), GatewayError> {
        self.do_delete(EntityKind::Event, id)
    }
}
