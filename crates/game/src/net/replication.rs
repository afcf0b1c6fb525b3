//! Entity state diffs between an authoritative store and its mirrors.
//!
//! An [`EntityList`] is positional: each entity record is applied before the
//! component records nested in it, and a component is created before its
//! fields are written. Field values are tagged by field index and type, so
//! partial updates do not depend on field order.

use std::sync::Arc;

use rkyv::{Archive, Deserialize, Serialize};

use crate::entity::{
    ComponentData, ComponentFlags, ComponentTypeDescriptor, ComponentTypeId, EntityId,
    EntityStore, FieldValue, Side,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum UpdateState {
    Created,
    Destroyed,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct FieldUpdate {
    pub index: u16,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ComponentUpdate {
    pub name: String,
    pub state: UpdateState,
    pub fields: Vec<FieldUpdate>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityUpdate {
    pub id: u32,
    pub state: UpdateState,
    pub components: Vec<ComponentUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityList {
    pub entities: Vec<EntityUpdate>,
}

impl EntityList {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityUpdate> {
        self.entities.iter().find(|e| e.id == id.raw())
    }
}

impl EntityUpdate {
    pub fn component(&self, name: &str) -> Option<&ComponentUpdate> {
        self.components.iter().find(|c| c.name == name)
    }
}

fn replicates(desc: &ComponentTypeDescriptor) -> bool {
    desc.net_type().is_replicated() && desc.net_type().exists_on(Side::Client)
}

fn all_fields(desc: &ComponentTypeDescriptor, data: &ComponentData) -> Vec<FieldUpdate> {
    desc.fields()
        .iter()
        .enumerate()
        .filter(|(_, field)| field.replicate())
        .filter_map(|(index, field)| {
            field.read(data).map(|value| FieldUpdate {
                index: index as u16,
                value,
            })
        })
        .collect()
}

/// Collects everything that changed since the last committed delta. The
/// store is left untouched; pass the list to [`commit_delta`] once it has
/// made it into an outgoing message.
pub fn encode_delta(store: &EntityStore) -> EntityList {
    let registry = store.registry();
    let mut list = EntityList::default();

    for &id in &store.changes().destroyed {
        list.entities.push(EntityUpdate {
            id: id.raw(),
            state: UpdateState::Destroyed,
            components: Vec::new(),
        });
    }

    let entities: Vec<EntityId> = store.entities().collect();
    for id in entities {
        let created = store.changes().created.contains(&id);
        let mut components = Vec::new();

        let removed: Vec<ComponentTypeId> = store
            .changes()
            .removed
            .range((id, ComponentTypeId(0))..=(id, ComponentTypeId(u32::MAX)))
            .map(|(_, ty)| *ty)
            .collect();

        for ty in removed {
            let Some(desc) = registry.get(ty).filter(|d| replicates(d)) else {
                continue;
            };
            components.push(ComponentUpdate {
                name: desc.name().to_string(),
                state: UpdateState::Destroyed,
                fields: Vec::new(),
            });
        }

        let attached: Vec<ComponentTypeId> = store.components_of(id).collect();
        for ty in attached {
            let Some(desc) = registry.get(ty).filter(|d| replicates(d)) else {
                continue;
            };
            let added = created || store.changes().added.contains(&(id, ty));
            let Some(data) = store.get_component(id, ty) else {
                continue;
            };

            let (state, fields) = if added {
                (UpdateState::Created, all_fields(desc, data))
            } else {
                let dirty = desc
                    .fields()
                    .iter()
                    .enumerate()
                    .filter(|(_, field)| field.replicate() && field.is_dirty(data))
                    .filter_map(|(index, field)| {
                        field.read(data).map(|value| FieldUpdate {
                            index: index as u16,
                            value,
                        })
                    })
                    .collect::<Vec<_>>();
                (UpdateState::Updated, dirty)
            };

            if state == UpdateState::Created || !fields.is_empty() {
                components.push(ComponentUpdate {
                    name: desc.name().to_string(),
                    state,
                    fields,
                });
            }
        }

        if created || !components.is_empty() {
            list.entities.push(EntityUpdate {
                id: id.raw(),
                state: if created {
                    UpdateState::Created
                } else {
                    UpdateState::Updated
                },
                components,
            });
        }
    }

    list
}

/// Ends the replication window `list` was encoded for: the fields it carries
/// are clean afterwards and structural change tracking starts over.
pub fn commit_delta(store: &mut EntityStore, list: &EntityList) {
    let registry = Arc::clone(store.registry());

    for record in &list.entities {
        let id = EntityId::new(record.id);
        for component in &record.components {
            let Some(desc) = registry.by_name(&component.name) else {
                continue;
            };
            let Some(data) = store.get_component_mut(id, desc.id()) else {
                continue;
            };
            for update in &component.fields {
                if let Some(field) = desc.field(update.index as usize) {
                    field.clear_dirty(data);
                }
            }
        }
    }

    store.finish_flush();
}

/// Encodes and commits in one step, for mirrors that share the process.
pub fn flush_delta(store: &mut EntityStore) -> EntityList {
    let list = encode_delta(store);
    commit_delta(store, &list);
    list
}

/// Full snapshot of every replicated entity, for a peer that just joined.
/// Leaves dirty bits and change tracking alone.
pub fn encode_full(store: &EntityStore) -> EntityList {
    let registry = store.registry();
    let mut list = EntityList::default();

    for id in store.entities() {
        let components = store
            .components_of(id)
            .filter_map(|ty| {
                let desc = registry.get(ty).filter(|d| replicates(d))?;
                let data = store.get_component(id, ty)?;
                Some(ComponentUpdate {
                    name: desc.name().to_string(),
                    state: UpdateState::Created,
                    fields: all_fields(desc, data),
                })
            })
            .collect();

        list.entities.push(EntityUpdate {
            id: id.raw(),
            state: UpdateState::Created,
            components,
        });
    }

    list
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub entities_created: usize,
    pub entities_destroyed: usize,
    pub components_created: usize,
    pub components_updated: usize,
    pub components_destroyed: usize,
    /// Records ignored because the client owns the component.
    pub predicted_skipped: usize,
    /// Records that could not be applied.
    pub rejected: usize,
}

/// Applies a decoded list to a mirror store. Bad records are logged and
/// skipped; the rest of the list still applies.
pub fn apply(store: &mut EntityStore, list: &EntityList) -> ApplyStats {
    let mut stats = ApplyStats::default();

    for record in &list.entities {
        let id = EntityId::new(record.id);

        match record.state {
            UpdateState::Destroyed => {
                if store.delete_entity(id) {
                    stats.entities_destroyed += 1;
                } else {
                    stats.rejected += 1;
                }
                continue;
            }
            UpdateState::Created if !store.is_alive(id) => {
                if let Err(err) = store.create_entity_with_id(id) {
                    log::warn!("Failed to create replicated entity {}: {}", id, err);
                    stats.rejected += 1;
                    continue;
                }
                stats.entities_created += 1;
            }
            UpdateState::Created | UpdateState::Updated => {
                if !store.is_alive(id) {
                    log::warn!("Update for unknown entity {}", id);
                    stats.rejected += 1;
                    continue;
                }
            }
        }

        for component in &record.components {
            apply_component(store, id, component, &mut stats);
        }
    }

    stats
}

fn apply_component(
    store: &mut EntityStore,
    id: EntityId,
    update: &ComponentUpdate,
    stats: &mut ApplyStats,
) {
    let registry = Arc::clone(store.registry());
    let Some(desc) = registry.by_name(&update.name) else {
        log::warn!("Entity {} got unknown component \"{}\"", id, update.name);
        stats.rejected += 1;
        return;
    };
    let ty = desc.id();

    match update.state {
        UpdateState::Destroyed => {
            if store.remove_component(id, ty) {
                stats.components_destroyed += 1;
            } else {
                stats.rejected += 1;
            }
            return;
        }
        UpdateState::Created => {
            if !store.has_component(id, ty) {
                if let Err(err) = store.add_component(id, ty) {
                    log::warn!("Failed to add \"{}\" to entity {}: {}", update.name, id, err);
                    stats.rejected += 1;
                    return;
                }
            }
            stats.components_created += 1;
        }
        UpdateState::Updated => {
            if !store.has_component(id, ty) {
                log::warn!("Entity {} has no \"{}\" to update", id, update.name);
                stats.rejected += 1;
                return;
            }
            if store.is_predicted(id, ty) || desc.flags().contains(ComponentFlags::DONT_OVERRIDE_CLIENT)
            {
                stats.predicted_skipped += 1;
                return;
            }
            stats.components_updated += 1;
        }
    }

    let Some(data) = store.get_component_mut(id, ty) else {
        return;
    };
    for field in &update.fields {
        let Some(desc_field) = desc.field(field.index as usize) else {
            log::warn!("\"{}\" has no field #{}", update.name, field.index);
            continue;
        };
        if !desc_field.write(data, &field.value) {
            log::warn!(
                "Type mismatch for {}.{}: got {:?}, want {:?}",
                update.name,
                desc_field.name(),
                field.value.field_type(),
                desc_field.field_type()
            );
        }
    }

    store.notify_updated(id, ty);
}
