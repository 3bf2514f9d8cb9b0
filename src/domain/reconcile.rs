use crate::domain::models::{Entity, EntityPayload, OperationData, PendingOperation, SyncStatus};
use std::collections::{HashMap, HashSet};

// Remote wins for canonical ids; temporary local entities are kept.
pub fn merge(local: &[Entity], remote: &[Entity]) -> Vec<Entity> {
    let mut seen = HashSet::with_capacity(remote.len());
    let mut merged = Vec::with_capacity(remote.len() + local.len());

    for entity in remote {
        if seen.insert(entity.id.as_str()) {
            merged.push(entity.clone());
        }
    }

    for entity in local {
        if entity.is_temporary() && seen.insert(entity.id.as_str()) {
            merged.push(entity.clone());
        }
    }

    merged
}

pub fn remap_ids(entities: &[Entity], id_map: &HashMap<String, String>) -> Vec<Entity> {
    if id_map.is_empty() {
        return entities.to_vec();
    }

    let mut seen = HashSet::with_capacity(entities.len());
    let mut remapped = Vec::with_capacity(entities.len());
    for entity in entities {
        let mut entity = entity.clone();
        if let Some(canonical) = id_map.get(&entity.id) {
            entity.id = canonical.clone();
        }
        if let EntityPayload::Task(task) = &mut entity.payload {
            if let Some(canonical) = task.parent.as_ref().and_then(|parent| id_map.get(parent)) {
                task.parent = Some(canonical.clone());
            }
        }
        // A canonical id may already be present if the server listing raced the ack.
        if seen.insert(entity.id.clone()) {
            remapped.push(entity);
        }
    }
    remapped
}

pub fn overlay_pending(entities: &[Entity], pending: &[PendingOperation]) -> Vec<Entity> {
    if pending.is_empty() {
        return entities.to_vec();
    }

    let mut overlaid: Vec<Entity> = entities.to_vec();
    for op in pending {
        let Some(index) = overlaid
            .iter()
            .position(|entity| entity.id == op.entity_id && entity.kind == op.kind)
        else {
            continue;
        };

        match &op.data {
            OperationData::Create(_) => {
                overlaid[index].sync_status = SyncStatus::Pending;
            }
            OperationData::Update(patch) => {
                let entity = &mut overlaid[index];
                if entity.payload.apply(patch).is_ok() {
                    entity.sync_status = SyncStatus::Pending;
                }
            }
            OperationData::Delete => {
                overlaid.remove(index);
            }
        }
    }
    overlaid
}
