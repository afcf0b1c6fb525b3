use std::sync::Arc;

use chroma::entity::components::{Camera, Health, Light, Renderable, Transform};
use chroma::entity::{
    register_base_components, ComponentRegistry, EntityId, EntityStore, FieldValue, Side,
};
use chroma::net::replication::{self, UpdateState};
use chroma::net::{ProtocolError, ServerMessage};
use glam::Vec3;
use proptest::prelude::*;

fn pair() -> (EntityStore, EntityStore) {
    let mut registry = ComponentRegistry::new();
    register_base_components(&mut registry).unwrap();
    let registry = Arc::new(registry);
    (
        EntityStore::new(Arc::clone(&registry), Side::Server),
        EntityStore::new(registry, Side::Client),
    )
}

/// Encodes one window, pushes it through the wire format and applies it.
fn sync(server: &mut EntityStore, client: &mut EntityStore) {
    let list = replication::encode_delta(server);
    let bytes = ServerMessage::EntityList(list.clone()).encode().unwrap();
    replication::commit_delta(server, &list);
    let ServerMessage::EntityList(list) = ServerMessage::decode(&bytes).unwrap() else {
        panic!("entity list did not survive the wire");
    };
    let stats = replication::apply(client, &list);
    assert_eq!(stats.rejected, 0, "{:?}", list);
}

#[derive(Debug, Clone)]
enum Op {
    Create,
    Destroy(usize),
    AddLight(usize),
    RemoveLight(usize),
    SetEnabled(usize, bool),
    SetLightPos(usize, f32),
    AddTransform(usize),
    MoveTransform(usize, f32),
    AddHealth(usize),
    SetHealth(usize, i32),
    Sync,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Create),
        1 => any::<usize>().prop_map(Op::Destroy),
        2 => any::<usize>().prop_map(Op::AddLight),
        1 => any::<usize>().prop_map(Op::RemoveLight),
        2 => (any::<usize>(), any::<bool>()).prop_map(|(i, b)| Op::SetEnabled(i, b)),
        2 => (any::<usize>(), -100.0f32..100.0).prop_map(|(i, x)| Op::SetLightPos(i, x)),
        2 => any::<usize>().prop_map(Op::AddTransform),
        2 => (any::<usize>(), -100.0f32..100.0).prop_map(|(i, x)| Op::MoveTransform(i, x)),
        1 => any::<usize>().prop_map(Op::AddHealth),
        2 => (any::<usize>(), -50i32..150).prop_map(|(i, h)| Op::SetHealth(i, h)),
        2 => Just(Op::Sync),
    ]
}

fn pick(store: &EntityStore, index: usize) -> Option<EntityId> {
    let mut alive: Vec<EntityId> = store.entities().collect();
    alive.sort();
    if alive.is_empty() {
        None
    } else {
        Some(alive[index % alive.len()])
    }
}

fn run(store: &mut EntityStore, op: &Op) {
    match *op {
        Op::Create => {
            store.create_entity();
        }
        Op::Destroy(i) => {
            if let Some(e) = pick(store, i) {
                store.delete_entity(e);
            }
        }
        Op::AddLight(i) => {
            if let Some(e) = pick(store, i) {
                let _ = store.add::<Light>(e);
            }
        }
        Op::RemoveLight(i) => {
            if let Some(e) = pick(store, i) {
                store.remove::<Light>(e);
            }
        }
        Op::SetEnabled(i, enabled) => {
            if let Some(light) = pick(store, i).and_then(|e| store.get_mut::<Light>(e)) {
                light.enabled.set(enabled);
            }
        }
        Op::SetLightPos(i, x) => {
            if let Some(light) = pick(store, i).and_then(|e| store.get_mut::<Light>(e)) {
                light.pos.edit().x = x;
            }
        }
        Op::AddTransform(i) => {
            if let Some(e) = pick(store, i) {
                let _ = store.add::<Transform>(e);
            }
        }
        Op::MoveTransform(i, x) => {
            if let Some(transform) = pick(store, i).and_then(|e| store.get_mut::<Transform>(e)) {
                transform.pos.set(Vec3::new(x, -x, 1.0));
            }
        }
        Op::AddHealth(i) => {
            if let Some(e) = pick(store, i) {
                let _ = store.add::<Health>(e);
            }
        }
        Op::SetHealth(i, health) => {
            if let Some(h) = pick(store, i).and_then(|e| store.get_mut::<Health>(e)) {
                h.health.set(health);
            }
        }
        Op::Sync => {}
    }
}

type Observed = (
    EntityId,
    Option<(bool, Vec3)>,
    Option<(Vec3, Vec3, Vec3)>,
    Option<i32>,
);

fn observe(store: &EntityStore) -> Vec<Observed> {
    let mut alive: Vec<EntityId> = store.entities().collect();
    alive.sort();
    alive
        .into_iter()
        .map(|e| {
            (
                e,
                store
                    .get::<Light>(e)
                    .map(|l| (l.enabled.value(), l.pos.value())),
                store
                    .get::<Transform>(e)
                    .map(|t| (t.pos.value(), t.ang.value(), t.scale.value())),
                store.get::<Health>(e).map(|h| h.health.value()),
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn mirror_matches_source(ops in prop::collection::vec(op(), 1..80)) {
        let (mut server, mut client) = pair();

        for op in &ops {
            if matches!(op, Op::Sync) {
                sync(&mut server, &mut client);
                prop_assert_eq!(observe(&server), observe(&client));
            } else {
                run(&mut server, op);
            }
        }

        sync(&mut server, &mut client);
        prop_assert_eq!(observe(&server), observe(&client));
        prop_assert!(replication::flush_delta(&mut server).is_empty());
    }
}

#[test]
fn light_toggle_sends_only_enabled() {
    let (mut server, mut client) = pair();
    let e = server.create_entity_with_id(EntityId::new(42)).unwrap();
    server.add::<Light>(e).unwrap();
    sync(&mut server, &mut client);
    assert!(client.get::<Light>(e).unwrap().enabled.value());

    server.get_mut::<Light>(e).unwrap().enabled.set(false);
    assert!(server.get::<Light>(e).unwrap().enabled.is_dirty());

    let list = replication::flush_delta(&mut server);
    let record = list.entity(e).unwrap();
    assert_eq!(record.state, UpdateState::Updated);
    let light = record.component("light").unwrap();
    assert_eq!(light.state, UpdateState::Updated);
    assert_eq!(light.fields.len(), 1);

    let desc = server.registry().by_name("light").unwrap();
    assert_eq!(
        light.fields[0].index as usize,
        desc.field_index("enabled").unwrap()
    );
    assert_eq!(light.fields[0].value, FieldValue::Bool(false));
    assert!(!server.get::<Light>(e).unwrap().enabled.is_dirty());

    replication::apply(&mut client, &list);
    assert!(!client.get::<Light>(e).unwrap().enabled.value());

    assert!(replication::flush_delta(&mut server).entity(e).is_none());
}

#[test]
fn client_owned_fields_survive_updates() {
    let (mut server, mut client) = pair();
    let e = server.create_entity();
    server.add::<Camera>(e).unwrap();
    server.get_mut::<Camera>(e).unwrap().fov.set(75.0);
    sync(&mut server, &mut client);
    assert_eq!(client.get::<Camera>(e).unwrap().fov.value(), 75.0);

    client.get_mut::<Camera>(e).unwrap().fov.set(40.0);
    server.get_mut::<Camera>(e).unwrap().fov.set(106.0);
    let list = replication::flush_delta(&mut server);
    let stats = replication::apply(&mut client, &list);

    assert_eq!(stats.predicted_skipped, 1);
    assert_eq!(client.get::<Camera>(e).unwrap().fov.value(), 40.0);
}

#[test]
fn predicted_components_ignore_updates() {
    let (mut server, mut client) = pair();
    let e = server.create_entity();
    server.add::<Transform>(e).unwrap();
    sync(&mut server, &mut client);

    let ty = client.type_of::<Transform>().unwrap();
    assert!(client.set_predicted(e, ty, true));
    server
        .get_mut::<Transform>(e)
        .unwrap()
        .pos
        .set(Vec3::new(5.0, 0.0, 0.0));
    sync(&mut server, &mut client);
    assert_eq!(client.get::<Transform>(e).unwrap().pos.value(), Vec3::ZERO);

    client.set_predicted(e, ty, false);
    server
        .get_mut::<Transform>(e)
        .unwrap()
        .pos
        .set(Vec3::new(6.0, 0.0, 0.0));
    sync(&mut server, &mut client);
    assert_eq!(
        client.get::<Transform>(e).unwrap().pos.value(),
        Vec3::new(6.0, 0.0, 0.0)
    );
}

#[test]
fn oversized_delta_stays_pending() {
    let (mut server, mut client) = pair();
    let e = server.create_entity();
    server.add::<Renderable>(e).unwrap();
    sync(&mut server, &mut client);

    server
        .get_mut::<Renderable>(e)
        .unwrap()
        .path
        .set("m".repeat(70_000));
    let list = replication::encode_delta(&server);
    let err = ServerMessage::EntityList(list).encode().unwrap_err();
    assert!(matches!(err, ProtocolError::TooLarge(_)));

    // nothing was committed, so the change is still owed to the client
    assert!(server.get::<Renderable>(e).unwrap().path.is_dirty());
    assert!(replication::encode_delta(&server).entity(e).is_some());

    server
        .get_mut::<Renderable>(e)
        .unwrap()
        .path
        .set("models/crate.glb".to_string());
    sync(&mut server, &mut client);
    assert_eq!(
        client.get::<Renderable>(e).unwrap().path.get(),
        "models/crate.glb"
    );
    assert!(!server.get::<Renderable>(e).unwrap().path.is_dirty());
}
