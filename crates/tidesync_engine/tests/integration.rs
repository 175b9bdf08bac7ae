//! Integration tests for sync sessions.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use tidesync_core::{
    encode_group_name, CoreError, CoreResult, DeferredKey, EntitySchema, FieldType, FieldValue,
    MemoryObjectStore, ObjectStore, PlaintextCipher, Record, SchemaRegistry, StoreConfig,
    SyncStore, ValueCipher,
};
use tidesync_engine::{
    HttpTransport, LoopbackClient, LoopbackServer, MockTransport, SessionState, SyncConfig,
    SyncEngine, SyncError, SyncResult, SyncTransport, TidemarkPolicy,
};
use tidesync_protocol::{
    GroupChanges, Operation, SyncRequest, SyncResponse, Tidemark, WireChange, DELETE_MARKER,
};

/// Wraps text values as `enc(...)`.
struct EnvelopeCipher;

impl ValueCipher for EnvelopeCipher {
    fn encrypt(&self, value: &FieldValue) -> CoreResult<String> {
        Ok(format!("enc({value})"))
    }

    fn decrypt(&self, opaque: &str) -> CoreResult<FieldValue> {
        opaque
            .strip_prefix("enc(")
            .and_then(|rest| rest.strip_suffix(')'))
            .map(FieldValue::from)
            .ok_or_else(|| CoreError::decryption_failed(format!("not an envelope: {opaque}")))
    }
}

struct Fixture {
    engine: SyncEngine<Arc<MockTransport>>,
    transport: Arc<MockTransport>,
    objects: Arc<MemoryObjectStore>,
    schema: Arc<SchemaRegistry>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(SyncConfig::new("app", "device-a", "key", "memory://"))
    }

    fn with_config(config: SyncConfig) -> Self {
        let schema = Arc::new(SchemaRegistry::new());
        schema.register(
            EntitySchema::builder("Person")
                .field("name", FieldType::Text)
                .field("age", FieldType::Text)
                .build(),
        );
        let objects = Arc::new(MemoryObjectStore::new(Arc::clone(&schema)));
        let transport = Arc::new(MockTransport::new());
        let engine = SyncEngine::new(
            config,
            Arc::clone(&transport),
            Arc::new(SyncStore::open_in_memory().unwrap()),
            objects.clone(),
            Arc::new(EnvelopeCipher),
        );
        Self {
            engine,
            transport,
            objects,
            schema,
        }
    }

    fn store(&self) -> &SyncStore {
        self.engine.store()
    }

    fn name_of(&self, id: &str) -> Option<String> {
        self.objects
            .get("Person", id)
            .and_then(|r| r.get("name").and_then(FieldValue::as_text).map(str::to_string))
    }
}

fn inbound(group: &str, id: &str, property: &str, value: &str) -> WireChange {
    WireChange {
        group: group.into(),
        entity: "Person".into(),
        record_id: id.into(),
        property: property.into(),
        value: value.into(),
        seconds_ago: 0,
        operation: Operation::Set,
        modified: String::new(),
    }
}

#[test]
fn round_trip_uploads_and_applies() {
    let fx = Fixture::new();
    fx.store().advance_group("g1", Some("T0".into()), 1).unwrap();
    fx.store()
        .record_mutation("Person", "P1", "name", "enc(Bob)", "g1")
        .unwrap();

    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new(
        "g1", "T1",
    )
    .with_change(inbound("g1", "P1", "name", "enc(Carol)"))]));

    let report = fx.engine.sync_now().unwrap();

    let sent = fx.transport.last_request().unwrap();
    assert_eq!(sent.app_id, "app");
    assert_eq!(sent.changes.len(), 1);
    assert_eq!(sent.changes[0].value, "enc(Bob)");
    assert_eq!(sent.groups.len(), 1);
    assert_eq!(sent.groups[0].tidemark, Some(Tidemark::from("T0")));

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(fx.store().pending_changes(), 0);
    assert_eq!(fx.name_of("P1").as_deref(), Some("Carol"));
    assert_eq!(
        fx.store().group("g1").unwrap().tidemark,
        Some(Tidemark::from("T1"))
    );
}

#[test]
fn tombstone_blocks_late_write() {
    let fx = Fixture::new();
    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new("g1", 1_u64)
        .with_change(inbound("g1", "P2", DELETE_MARKER, ""))]));
    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new("g1", 2_u64)
        .with_change(inbound("g1", "P2", "age", "enc(40)"))]));

    fx.engine.sync_now().unwrap();
    assert_eq!(fx.store().tombstones(), vec!["P2".to_string()]);

    let report = fx.engine.sync_now().unwrap();
    assert_eq!(report.discarded, 1);
    assert!(fx.objects.get("Person", "P2").is_none());
    assert!(fx.objects.is_empty());
    assert!(fx.store().deferred_changes().is_empty());
}

#[test]
fn failed_exchange_resends_same_batch() {
    let fx = Fixture::new();
    for id in ["P1", "P2", "P3"] {
        fx.store()
            .record_mutation("Person", id, "name", format!("enc({id})"), "g1")
            .unwrap();
    }
    fx.transport
        .push_error(SyncError::transport_retryable("connection reset"));
    fx.transport
        .push_response(SyncResponse::failure(vec!["try later".into()]));
    fx.transport.push_response(SyncResponse::success(vec![]));

    assert!(fx.engine.sync_now().is_err());
    assert!(fx.engine.sync_now().is_err());
    assert_eq!(fx.store().pending_changes(), 3);

    fx.engine.sync_now().unwrap();
    assert_eq!(fx.store().pending_changes(), 0);

    let requests = fx.transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].changes, requests[1].changes);
    assert_eq!(requests[1].changes, requests[2].changes);
}

#[test]
fn uploads_oldest_first_in_capped_batches() {
    let fx = Fixture::new();
    for i in 0..250 {
        fx.store()
            .record_mutation("Person", &format!("P{i}"), "name", format!("enc({i})"), "g1")
            .unwrap();
    }
    fx.transport.push_response(SyncResponse::success(vec![]));
    fx.transport.push_response(SyncResponse::success(vec![]));

    assert_eq!(fx.engine.sync_now().unwrap().uploaded, 200);
    assert_eq!(fx.store().pending_changes(), 50);
    assert_eq!(fx.engine.sync_now().unwrap().uploaded, 50);

    let requests = fx.transport.requests();
    assert_eq!(requests[0].changes[0].record_id, "P0");
    assert_eq!(requests[0].changes[199].record_id, "P199");
    assert_eq!(requests[1].changes[0].record_id, "P200");
}

#[test]
fn tidemark_never_moves_backwards() {
    let fx = Fixture::new();
    fx.store().advance_group("g1", Some(5_u64.into()), 1).unwrap();
    fx.transport
        .push_response(SyncResponse::success(vec![GroupChanges::new("g1", 3_u64)]));

    fx.engine.sync_now().unwrap();
    let cursor = fx.store().group("g1").unwrap();
    assert_eq!(cursor.tidemark, Some(Tidemark::from(5_u64)));
    assert!(cursor.last_polled_at > 1);
}

#[test]
fn opaque_tidemarks_follow_the_coordinator() {
    let fx = Fixture::new();
    let first = "f47ac10b-58cc-4372-a567-0e02b2c3d479";
    let second = "1b4e28ba-2fa1-11d2-883f-0016d3cca427";
    fx.store().advance_group("g1", Some(first.into()), 1).unwrap();
    fx.transport
        .push_response(SyncResponse::success(vec![GroupChanges::new("g1", second)
            .with_change(inbound("g1", "P1", "name", "enc(Ann)"))]));
    fx.transport.push_response(SyncResponse::success(vec![]));

    fx.engine.sync_now().unwrap();
    assert_eq!(
        fx.store().group("g1").unwrap().tidemark,
        Some(Tidemark::from(second))
    );

    fx.engine.sync_now().unwrap();
    let requests = fx.transport.requests();
    assert_eq!(requests[0].groups[0].tidemark, Some(Tidemark::from(first)));
    assert_eq!(requests[1].groups[0].tidemark, Some(Tidemark::from(second)));
}

#[test]
fn failed_apply_holds_tidemark() {
    let fx = Fixture::new();
    fx.store().advance_group("g1", Some(1_u64.into()), 1).unwrap();
    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new("g1", 2_u64)
        .with_change(inbound("g1", "P1", "name", "enc(ok)"))
        .with_change(inbound("g1", "P2", "name", "not-an-envelope"))]));

    let report = fx.engine.sync_now().unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.tidemarks_held, 1);
    assert_eq!(
        fx.store().group("g1").unwrap().tidemark,
        Some(Tidemark::from(1_u64))
    );
    assert_eq!(fx.engine.stats().tidemarks_held, 1);
}

#[test]
fn unconditional_policy_advances_and_parks_refused_commits() {
    let fx = Fixture::with_config(
        SyncConfig::new("app", "dev", "key", "memory://")
            .with_tidemark_policy(TidemarkPolicy::Unconditional),
    );
    fx.objects.refuse_commits(true);
    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new("g1", 9_u64)
        .with_change(inbound("g1", "P1", "name", "enc(x)"))]));

    let report = fx.engine.sync_now().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.tidemarks_held, 0);
    assert_eq!(
        fx.store().group("g1").unwrap().tidemark,
        Some(Tidemark::from(9_u64))
    );
    assert!(fx
        .store()
        .deferred(&DeferredKey::new("P1", "Person", "name"))
        .is_some());
}

#[test]
fn unconditional_policy_parks_undecryptable_values() {
    let fx = Fixture::with_config(
        SyncConfig::new("app", "dev", "key", "memory://")
            .with_tidemark_policy(TidemarkPolicy::Unconditional),
    );
    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new("g1", 9_u64)
        .with_change(inbound("g1", "P1", "name", "garbled"))]));

    let report = fx.engine.sync_now().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(
        fx.store().group("g1").unwrap().tidemark,
        Some(Tidemark::from(9_u64))
    );
    assert!(fx.objects.get("Person", "P1").is_none());
    let key = DeferredKey::new("P1", "Person", "name");
    assert_eq!(fx.store().deferred(&key).unwrap().raw_value, "garbled");

    // Still undecryptable, so the entry stays parked.
    let replay = fx.engine.replay_deferred().unwrap();
    assert_eq!(replay.failed, 1);
    assert!(fx.store().deferred(&key).is_some());
}

#[test]
fn unknown_field_waits_for_schema_then_replays() {
    let fx = Fixture::new();
    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new("g1", 1_u64)
        .with_change(inbound("g1", "P1", "name", "enc(Ann)"))
        .with_change(inbound("g1", "P1", "nickname", "enc(Annie)"))
        .with_change(inbound("g1", "P1", "nickname", "enc(Nan)"))]));

    let report = fx.engine.sync_now().unwrap();
    assert_eq!(report.deferred, 2);
    assert_eq!(report.tidemarks_held, 0);

    let key = DeferredKey::new("P1", "Person", "nickname");
    assert_eq!(fx.store().deferred_changes().len(), 1);
    assert_eq!(fx.store().deferred(&key).unwrap().raw_value, "enc(Nan)");
    assert!(fx.objects.get("Person", "P1").unwrap().get("nickname").is_none());

    // Nothing to replay yet.
    let early = fx.engine.replay_deferred().unwrap();
    assert_eq!(early.remaining, 1);
    assert_eq!(early.applied, 0);

    fx.schema.register(
        EntitySchema::builder("Person")
            .field("name", FieldType::Text)
            .field("age", FieldType::Text)
            .field("nickname", FieldType::Text)
            .build(),
    );
    let replay = fx.engine.replay_deferred().unwrap();
    assert_eq!(replay.applied, 1);
    assert_eq!(replay.remaining, 0);
    assert!(fx.store().deferred_changes().is_empty());

    let person = fx.objects.get("Person", "P1").unwrap();
    assert_eq!(person.get("nickname").and_then(FieldValue::as_text), Some("Nan"));
    assert_eq!(person.get("name").and_then(FieldValue::as_text), Some("Ann"));
}

#[test]
fn replay_drops_entries_for_tombstoned_records() {
    let fx = Fixture::new();
    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new("g1", 1_u64)
        .with_change(inbound("g1", "P7", "nickname", "enc(x)"))
        .with_change(inbound("g1", "P7", DELETE_MARKER, ""))]));
    fx.engine.sync_now().unwrap();

    fx.schema.register(
        EntitySchema::builder("Person")
            .field("name", FieldType::Text)
            .field("nickname", FieldType::Text)
            .build(),
    );
    let replay = fx.engine.replay_deferred().unwrap();
    assert_eq!(replay.discarded, 1);
    assert!(fx.store().deferred_changes().is_empty());
    assert!(fx.objects.get("Person", "P7").is_none());
}

#[test]
fn unseen_group_is_created_and_absent_groups_untouched() {
    let fx = Fixture::new();
    fx.store().advance_group("quiet", Some(4_u64.into()), 1).unwrap();
    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new("fresh", 1_u64)
        .with_change(inbound("", "P1", "name", "enc(Zed)"))]));

    fx.engine.sync_now().unwrap();

    let fresh = fx.store().group("fresh").unwrap();
    assert_eq!(fresh.tidemark, Some(Tidemark::from(1_u64)));
    assert_eq!(fresh.name, None);
    assert_eq!(fx.objects.get("Person", "P1").unwrap().group(), Some("fresh"));

    let quiet = fx.store().group("quiet").unwrap();
    assert_eq!(quiet.tidemark, Some(Tidemark::from(4_u64)));
    assert_eq!(quiet.last_polled_at, 1);
}

#[test]
fn groups_are_polled_least_recent_first() {
    let fx = Fixture::with_config(
        SyncConfig::new("app", "dev", "key", "memory://").with_group_batch_size(1),
    );
    fx.store().advance_group("recent", None, 200).unwrap();
    fx.store().advance_group("stale", None, 100).unwrap();
    fx.transport.push_response(SyncResponse::success(vec![]));

    fx.engine.sync_now().unwrap();
    let sent = fx.transport.last_request().unwrap();
    assert_eq!(sent.groups.len(), 1);
    assert_eq!(sent.groups[0].group, "stale");
    assert_eq!(sent.groups[0].tidemark, None);
}

/// Transport that blocks inside the exchange until released.
struct GateTransport {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl SyncTransport for GateTransport {
    fn send(&self, _request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.entered.lock().send(()).unwrap();
        self.release.lock().recv().unwrap();
        Ok(SyncResponse::success(vec![]))
    }
}

#[test]
fn overlapping_tick_is_skipped() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let schema = Arc::new(SchemaRegistry::new());
    let engine = Arc::new(SyncEngine::new(
        SyncConfig::default(),
        GateTransport {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        },
        Arc::new(SyncStore::open_in_memory().unwrap()),
        Arc::new(MemoryObjectStore::new(schema)),
        Arc::new(PlaintextCipher),
    ));

    let running = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.tick())
    };
    entered_rx.recv().unwrap();

    assert!(engine.is_syncing());
    assert_eq!(engine.state(), SessionState::AwaitingResponse);
    assert!(engine.tick().unwrap().is_none());
    assert!(matches!(engine.sync_now(), Err(SyncError::SessionInProgress)));

    release_tx.send(()).unwrap();
    assert!(running.join().unwrap().unwrap().is_some());

    let stats = engine.stats();
    assert_eq!(stats.sessions_attempted, 1);
    assert_eq!(stats.sessions_skipped, 2);
    assert_eq!(engine.state(), SessionState::Idle);
}

/// Minimal coordinator: an append-only log per group, tidemark = log length.
#[derive(Default)]
struct Coordinator {
    log: Mutex<HashMap<String, Vec<(String, WireChange)>>>,
}

struct CoordinatorLink(Arc<Coordinator>);

impl LoopbackServer for CoordinatorLink {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        if path != "/sync" {
            return Err(format!("404 {path}"));
        }
        let request = SyncRequest::decode(body).map_err(|e| e.to_string())?;
        let mut log = self.0.log.lock();
        for change in request.changes {
            log.entry(change.group.clone())
                .or_default()
                .push((request.device_id.clone(), change));
        }

        let groups = request
            .groups
            .iter()
            .map(|poll| {
                let entries = log.get(&poll.group).map(Vec::as_slice).unwrap_or_default();
                let since = poll
                    .tidemark
                    .as_ref()
                    .and_then(|t| t.as_str().parse::<usize>().ok())
                    .unwrap_or(0);
                let mut group = GroupChanges::new(poll.group.clone(), entries.len() as u64);
                group.changes = entries
                    .iter()
                    .skip(since)
                    .filter(|(device, _)| *device != request.device_id)
                    .map(|(_, change)| change.clone())
                    .collect();
                group
            })
            .collect();
        SyncResponse::success(groups).encode().map_err(|e| e.to_string())
    }
}

struct Device {
    engine: SyncEngine<HttpTransport<LoopbackClient<CoordinatorLink>>>,
    objects: Arc<MemoryObjectStore>,
}

fn device(coordinator: &Arc<Coordinator>, id: &str, store: Arc<SyncStore>) -> Device {
    let schema = Arc::new(SchemaRegistry::new());
    schema.register(EntitySchema::builder("Person").field("name", FieldType::Text).build());
    let objects = Arc::new(MemoryObjectStore::new(schema));
    let config = SyncConfig::new("app", id, "key", "http://coordinator.local");
    let transport = HttpTransport::from_config(
        &config,
        LoopbackClient::new(CoordinatorLink(Arc::clone(coordinator))),
    );
    Device {
        engine: SyncEngine::new(config, transport, store, objects.clone(), Arc::new(PlaintextCipher)),
        objects,
    }
}

#[test]
fn two_devices_converge_through_coordinator() {
    let coordinator = Arc::new(Coordinator::default());
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a");

    let a_store = Arc::new(SyncStore::open(&a_path, StoreConfig::default()).unwrap());
    a_store.set_default_group("team").unwrap();
    let a = device(&coordinator, "device-a", a_store);
    let b_store = Arc::new(SyncStore::open_in_memory().unwrap());
    b_store.subscribe_group("team").unwrap();
    let b = device(&coordinator, "device-b", b_store);

    let mut bob = Record::new("Person", "P1").with_field("name", "Bob");
    a.engine
        .store()
        .commit_tracked(&*a.objects, &mut bob, &PlaintextCipher)
        .unwrap();
    a.engine.sync_now().unwrap();
    b.engine.sync_now().unwrap();

    let copy = b.objects.get("Person", "P1").unwrap();
    assert_eq!(copy.get("name").and_then(FieldValue::as_text), Some("Bob"));
    assert_eq!(copy.group(), Some(encode_group_name("team").as_str()));

    // B deletes; A learns about it and tombstones the id.
    b.engine
        .store()
        .delete_tracked(&*b.objects, &copy)
        .unwrap();
    b.engine.sync_now().unwrap();
    a.engine.sync_now().unwrap();
    assert!(a.objects.get("Person", "P1").is_none());
    assert!(a.engine.store().is_tombstoned("P1"));

    // The cursor and tombstone survive a restart.
    let team = a.engine.store().group(&encode_group_name("team")).unwrap();
    drop(a);
    let reopened = SyncStore::open(&a_path, StoreConfig::default()).unwrap();
    assert!(reopened.is_tombstoned("P1"));
    assert_eq!(
        reopened.group(&encode_group_name("team")).unwrap().tidemark,
        team.tidemark
    );
    assert_eq!(reopened.pending_changes(), 0);
}

#[test]
fn undecryptable_value_does_not_abort_session() {
    let fx = Fixture::new();
    let value = PlaintextCipher.encrypt(&FieldValue::from("Dana")).unwrap();
    fx.transport.push_response(SyncResponse::success(vec![GroupChanges::new("g1", 1_u64)
        .with_change(inbound("g1", "P4", "name", &value))]));
    let report = fx.engine.sync_now().unwrap();
    assert_eq!(report.failed, 1);
    assert!(fx.objects.get("Person", "P4").is_none());
    assert_eq!(fx.engine.state(), SessionState::Idle);
}

#[test]
fn object_store_contract_is_used_for_field_checks() {
    let fx = Fixture::new();
    let fields = fx.objects.field_names("Person");
    assert!(fields.contains("name"));
    assert!(!fields.contains("id"));
    assert!(fx.objects.field_names("Unknown").is_empty());
}
