extern crate env_logger;
extern crate failure;
extern crate quarry;
extern crate rand;
extern crate serde_json;

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use failure::format_err;
use rand::Rng;

use quarry::prelude::*;

/// Completes synchronously with the internal id as a `String`, recording
/// every delivery together with the dependency count it observed.
struct RecordingProvider {
    log: Rc<RefCell<Vec<(String, usize)>>>,
}

impl ResourceProvider for RecordingProvider {
    fn provider_id(&self) -> &str {
        "mem"
    }

    fn default_type(&self, _location: &Arc<dyn ResourceLocation>) -> TypeId {
        TypeId::of::<String>()
    }

    fn provide(&self, ctx: ProvideContext) -> Result<()> {
        let id = ctx.internal_id();
        self.log.borrow_mut().push((id.clone(), ctx.dependency_count()));
        ctx.complete(Ok(id))
    }
}

/// Parks every request and completes it on the next update tick.
#[derive(Default)]
struct SlowProvider {
    parked: RefCell<Vec<(ProvideToken, String)>>,
}

impl ResourceProvider for SlowProvider {
    fn provider_id(&self) -> &str {
        "slow"
    }

    fn default_type(&self, _location: &Arc<dyn ResourceLocation>) -> TypeId {
        TypeId::of::<String>()
    }

    fn flags(&self) -> ProviderFlags {
        ProviderFlags {
            provide_with_failed_dependencies: false,
            wants_update: true,
        }
    }

    fn provide(&self, mut ctx: ProvideContext) -> Result<()> {
        ctx.set_progress(|| 0.25);
        let id = ctx.internal_id();
        self.parked.borrow_mut().push((ctx.token(), id));
        Ok(())
    }

    fn update(&self, system: &mut ResourceSystem, _dt: Duration) {
        let parked: Vec<_> = self.parked.borrow_mut().drain(..).collect();
        for (token, id) in parked {
            system.complete_token(token, Ok(id)).unwrap();
        }
    }
}

struct FailingProvider {
    id: &'static str,
    message: &'static str,
}

impl ResourceProvider for FailingProvider {
    fn provider_id(&self) -> &str {
        self.id
    }

    fn default_type(&self, _location: &Arc<dyn ResourceLocation>) -> TypeId {
        TypeId::of::<String>()
    }

    fn provide(&self, ctx: ProvideContext) -> Result<()> {
        ctx.complete::<String>(Err(format_err!("{}", self.message)))
    }
}

/// Runs even when its dependencies failed and falls back to a placeholder.
struct TolerantProvider;

impl ResourceProvider for TolerantProvider {
    fn provider_id(&self) -> &str {
        "tolerant"
    }

    fn default_type(&self, _location: &Arc<dyn ResourceLocation>) -> TypeId {
        TypeId::of::<String>()
    }

    fn flags(&self) -> ProviderFlags {
        ProviderFlags {
            provide_with_failed_dependencies: true,
            wants_update: false,
        }
    }

    fn provide(&self, ctx: ProvideContext) -> Result<()> {
        assert_eq!(ctx.dependency_count(), 1);
        assert!(ctx.dependency(0).is_none());
        ctx.complete(Ok("fallback".to_string()))
    }
}

fn testbed() -> (ResourceSystem, Rc<RefCell<Vec<(String, usize)>>>) {
    let _ = env_logger::try_init();
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut system = ResourceSystem::new();
    system.add_provider(Arc::new(RecordingProvider { log: Rc::clone(&log) }));
    (system, log)
}

fn location(id: &str, provider: &str) -> Arc<dyn ResourceLocation> {
    Arc::new(LocationInfo::new(id, id, provider, Vec::new()).unwrap())
}

fn location_with_deps(
    id: &str,
    provider: &str,
    deps: Vec<Arc<dyn ResourceLocation>>,
) -> Arc<dyn ResourceLocation> {
    Arc::new(LocationInfo::new(id, id, provider, deps).unwrap())
}

fn entry(id: &str, provider: &str, keys: &[ResourceKey], deps: &[ResourceKey]) -> CatalogEntry {
    CatalogEntry {
        internal_id: id.to_string(),
        provider_id: provider.to_string(),
        keys: keys.to_vec(),
        dependencies: deps.to_vec(),
        data: None,
    }
}

#[test]
fn equivalent_loads_share_one_operation() {
    let (mut system, log) = testbed();
    let mut map = LocationMap::new();
    map.add("a".into(), location("data/a.bin", "mem"));
    system.add_locator(Arc::new(map));

    let h1 = system.load::<String>(&"a".into());
    assert_eq!(system.status(h1).unwrap(), OperationStatus::Succeeded);
    assert_eq!(system.reference_count(h1).unwrap(), 1);

    let h2 = system.load::<String>(&"a".into());
    assert_eq!(h1.raw(), h2.raw());
    assert_eq!(system.reference_count(h1).unwrap(), 2);
    assert_eq!(log.borrow().len(), 1);

    system.release(h1);
    assert_eq!(system.reference_count(h2).unwrap(), 1);
    system.release(h2);
    assert!(!system.contains(h2));
    assert_eq!(system.operation_count(), 0);
}

#[test]
fn dependencies_deliver_before_their_dependents() {
    let (mut system, log) = testbed();
    let data = CatalogData::from_entries(
        "main",
        &[
            entry("models/hero.obj", "mem", &["hero".into()], &["hero_tex".into()]),
            entry("textures/hero_tex.png", "mem", &["hero_tex".into()], &[]),
        ],
    )
    .unwrap();
    system.load_catalog(&data, None).unwrap();

    let hero = system.load::<String>(&"hero".into());
    assert_eq!(system.status(hero).unwrap(), OperationStatus::Succeeded);
    assert_eq!(
        *log.borrow(),
        vec![
            ("textures/hero_tex.png".to_string(), 0),
            ("models/hero.obj".to_string(), 1),
        ]
    );

    system.release(hero);
    assert_eq!(system.operation_count(), 0);
}

#[test]
fn shared_dependency_groups_load_once() {
    let (mut system, log) = testbed();
    let shared: Vec<ResourceKey> = vec!["A".into(), "B".into()];
    let data = CatalogData::from_entries(
        "shared",
        &[
            entry("bundles/a.bin", "mem", &["A".into()], &[]),
            entry("bundles/b.bin", "mem", &["B".into()], &[]),
            entry("items/e1.json", "mem", &["e1".into()], &shared),
            entry("items/e2.json", "mem", &["e2".into()], &shared),
            entry("items/e3.json", "mem", &["e3".into()], &shared),
        ],
    )
    .unwrap();
    system.load_catalog(&data, None).unwrap();

    let e1 = system.load::<String>(&"e1".into());
    let e2 = system.load::<String>(&"e2".into());
    let e3 = system.load::<String>(&"e3".into());

    // the bundles back all three items but are delivered exactly once
    let count = |needle: &str| {
        log.borrow()
            .iter()
            .filter(|(id, _)| id == needle)
            .count()
    };
    assert_eq!(count("bundles/a.bin"), 1);
    assert_eq!(count("bundles/b.bin"), 1);
    assert_eq!(log.borrow().len(), 5);

    for (id, deps) in log.borrow().iter() {
        if id.starts_with("items/") {
            assert_eq!(*deps, 2);
        }
    }

    system.release(e1);
    system.release(e2);
    system.release(e3);
    assert_eq!(system.operation_count(), 0);
}

#[test]
fn unknown_keys_and_providers_fail_without_panicking() {
    let (mut system, _log) = testbed();
    let mut map = LocationMap::new();
    map.add("orphan".into(), location("data/orphan.bin", "nobody"));
    system.add_locator(Arc::new(map));

    let missing = system.load::<String>(&"missing".into());
    assert_eq!(system.status(missing).unwrap(), OperationStatus::Failed);
    match system.error(missing).unwrap().unwrap().downcast_ref::<Error>() {
        Some(Error::InvalidKey(_)) => {}
        other => panic!("unexpected error: {:?}", other),
    }

    let orphan = system.load::<String>(&"orphan".into());
    assert_eq!(system.status(orphan).unwrap(), OperationStatus::Failed);
    match system.error(orphan).unwrap().unwrap().downcast_ref::<Error>() {
        Some(Error::UnknownProvider(id)) => assert_eq!(id, "nobody"),
        other => panic!("unexpected error: {:?}", other),
    }

    system.release(missing);
    system.release(orphan);
}

#[test]
fn over_releasing_is_reported_not_fatal() {
    let (mut system, _log) = testbed();
    let mut map = LocationMap::new();
    map.add("a".into(), location("data/a.bin", "mem"));
    system.add_locator(Arc::new(map));

    let h = system.load::<String>(&"a".into());
    system.acquire(h).unwrap();
    system.acquire(h).unwrap();
    assert_eq!(system.reference_count(h).unwrap(), 3);

    system.release(h);
    system.release(h);
    system.release(h);
    assert!(!system.contains(h));

    // one release too many is logged and ignored
    system.release(h);
    assert!(system.acquire(h).is_err());
    assert!(system.status(h).is_err());
    assert!(system.result_of(h).is_err());
}

#[test]
fn batch_loads_deliver_members_in_order() {
    let (mut system, log) = testbed();
    let mut map = LocationMap::new();
    map.add_locations(
        "batch".into(),
        vec![
            location("data/one.bin", "mem"),
            location("data/two.bin", "mem"),
            location("data/three.bin", "mem"),
        ],
    );
    system.add_locator(Arc::new(map));

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let batch = system.load_all::<String, _>(&["batch".into()], MergeMode::Union, move |v| {
        sink.borrow_mut().push(v.as_str().to_string());
    });

    assert_eq!(system.status(batch).unwrap(), OperationStatus::Succeeded);
    let values = system.result_of(batch).unwrap().unwrap();
    let values: Vec<&str> = values.iter().map(|v| v.as_str()).collect();
    assert_eq!(values, ["data/one.bin", "data/two.bin", "data/three.bin"]);
    assert_eq!(
        *seen.borrow(),
        vec![
            "data/one.bin".to_string(),
            "data/two.bin".to_string(),
            "data/three.bin".to_string(),
        ]
    );

    // an equivalent batch reuses the cached members and skips the callbacks
    let again = system.load_all::<String, _>(&["batch".into()], MergeMode::Union, |_| {});
    assert_eq!(system.status(again).unwrap(), OperationStatus::Succeeded);
    assert_eq!(seen.borrow().len(), 3);
    assert_eq!(log.borrow().len(), 3);

    system.release(batch);
    system.release(again);
    assert_eq!(system.operation_count(), 0);
}

#[test]
fn intersection_batches_require_every_key() {
    let (mut system, _log) = testbed();
    let apple = location("data/apple.bin", "mem");
    let mut map = LocationMap::new();
    map.add_locations(
        "red".into(),
        vec![Arc::clone(&apple), location("data/fire.bin", "mem")],
    );
    map.add_locations(
        "fruit".into(),
        vec![Arc::clone(&apple), location("data/banana.bin", "mem")],
    );
    system.add_locator(Arc::new(map));

    let both = system.load_all::<String, _>(
        &["red".into(), "fruit".into()],
        MergeMode::Intersection,
        |_| {},
    );
    let values = system.result_of(both).unwrap().unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].as_str(), "data/apple.bin");

    let none = system.load_all::<String, _>(
        &["red".into(), "unknown".into()],
        MergeMode::Intersection,
        |_| {},
    );
    assert_eq!(system.status(none).unwrap(), OperationStatus::Failed);
    match system.error(none).unwrap().unwrap().downcast_ref::<Error>() {
        Some(Error::InvalidKey(_)) => {}
        other => panic!("unexpected error: {:?}", other),
    }

    system.release(both);
    system.release(none);
}

#[test]
fn group_failures_report_the_first_failing_member() {
    let (mut system, log) = testbed();
    system.add_provider(Arc::new(FailingProvider {
        id: "broken1",
        message: "first failure",
    }));
    system.add_provider(Arc::new(FailingProvider {
        id: "broken2",
        message: "second failure",
    }));

    let batch = vec![
        location("data/ok1.bin", "mem"),
        location("data/bad1.bin", "broken1"),
        location("data/bad2.bin", "broken2"),
        location("data/ok2.bin", "mem"),
    ];
    let handle = system.load_list::<String>(&batch);

    assert_eq!(system.status(handle).unwrap(), OperationStatus::Failed);
    let message = system.error(handle).unwrap().unwrap().to_string();
    assert!(message.contains("first failure"));
    assert!(!message.contains("second failure"));

    // the healthy members were still delivered
    assert_eq!(log.borrow().len(), 2);

    system.release(handle);
    assert_eq!(system.operation_count(), 0);
}

#[test]
fn failed_dependencies_stop_strict_providers() {
    let (mut system, _log) = testbed();
    system.add_provider(Arc::new(FailingProvider {
        id: "broken",
        message: "no bundle today",
    }));
    system.add_provider(Arc::new(TolerantProvider));

    let bad = location("data/broken.bin", "broken");
    let strict = location_with_deps("data/strict.bin", "mem", vec![Arc::clone(&bad)]);
    let tolerant = location_with_deps("data/tolerant.bin", "tolerant", vec![Arc::clone(&bad)]);

    let h = system.load_location::<String>(&strict);
    assert_eq!(system.status(h).unwrap(), OperationStatus::Failed);
    match system.error(h).unwrap().unwrap().downcast_ref::<Error>() {
        Some(Error::DependencyFailed(id, _)) => assert_eq!(id, "data/strict.bin"),
        other => panic!("unexpected error: {:?}", other),
    }

    let t = system.load_location::<String>(&tolerant);
    assert_eq!(system.status(t).unwrap(), OperationStatus::Succeeded);
    assert_eq!(system.result_of(t).unwrap().unwrap().as_str(), "fallback");

    system.release(h);
    system.release(t);
}

#[test]
fn update_driven_providers_complete_on_tick() {
    let (mut system, _log) = testbed();
    system.add_provider(Arc::new(SlowProvider::default()));
    let mut map = LocationMap::new();
    map.add("s".into(), location("data/slow.bin", "slow"));
    system.add_locator(Arc::new(map));

    let h = system.load::<String>(&"s".into());
    assert_eq!(system.status(h).unwrap(), OperationStatus::InProgress);
    assert!((system.progress(h).unwrap() - 0.25).abs() < 1e-6);

    system.update(Duration::from_secs(0));
    assert_eq!(system.status(h).unwrap(), OperationStatus::Succeeded);
    assert!((system.progress(h).unwrap() - 1.0).abs() < 1e-6);
    assert_eq!(system.result_of(h).unwrap().unwrap().as_str(), "data/slow.bin");

    system.release(h);
}

#[test]
fn wait_for_drives_updates_until_completion() {
    let (mut system, _log) = testbed();
    system.add_provider(Arc::new(SlowProvider::default()));
    let mut map = LocationMap::new();
    map.add("s".into(), location("data/slow.bin", "slow"));
    system.add_locator(Arc::new(map));

    let h = system.load::<String>(&"s".into());
    system.wait_for(h).unwrap();
    assert_eq!(system.status(h).unwrap(), OperationStatus::Succeeded);
    system.release(h);
}

#[test]
fn callbacks_fire_inline_or_on_the_next_tick() {
    let (mut system, _log) = testbed();
    system.add_provider(Arc::new(SlowProvider::default()));
    let mut map = LocationMap::new();
    map.add("s".into(), location("data/slow.bin", "slow"));
    system.add_locator(Arc::new(map));

    let h = system.load::<String>(&"s".into());

    // subscribed while in flight: runs at completion
    let early = Rc::new(Cell::new(0));
    let observed = Rc::clone(&early);
    system
        .on_complete(h, move |_, _| observed.set(observed.get() + 1))
        .unwrap();
    assert_eq!(early.get(), 0);
    system.update(Duration::from_secs(0));
    assert_eq!(early.get(), 1);

    // subscribed after completion: deferred to the next tick
    let late = Rc::new(Cell::new(0));
    let observed = Rc::clone(&late);
    system
        .on_complete(h, move |system, handle| {
            assert_eq!(
                system.result::<String>(handle).unwrap().unwrap().as_str(),
                "data/slow.bin"
            );
            observed.set(observed.get() + 1);
        })
        .unwrap();
    assert_eq!(late.get(), 0);
    system.update(Duration::from_secs(0));
    assert_eq!(late.get(), 1);
    system.update(Duration::from_secs(0));
    assert_eq!(late.get(), 1);

    system.release(h);
}

#[test]
fn chains_continue_into_follow_up_operations() {
    let (mut system, _log) = testbed();
    let mut map = LocationMap::new();
    map.add("a".into(), location("data/a.bin", "mem"));
    system.add_locator(Arc::new(map));

    let h = system.load::<String>(&"a".into());
    let chain = system
        .create_chain_operation(h.raw(), |system, dep| {
            let value = system
                .result::<String>(dep)?
                .map(|v| v.to_uppercase())
                .unwrap_or_default();
            Ok(system.create_completed_operation(value).raw())
        })
        .unwrap();

    assert_eq!(system.status(chain).unwrap(), OperationStatus::Succeeded);
    assert_eq!(
        system.result::<String>(chain).unwrap().unwrap().as_str(),
        "DATA/A.BIN"
    );

    system.release(chain);
    system.release(h);
    assert_eq!(system.operation_count(), 0);
}

#[test]
fn diagnostics_trace_the_whole_life_cycle() {
    let (mut system, _log) = testbed();
    let mut map = LocationMap::new();
    map.add("a".into(), location("data/a.bin", "mem"));
    system.add_locator(Arc::new(map));

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    system.set_diagnostics_handler(move |event, handle, value| {
        sink.borrow_mut().push((event, handle, value));
    });

    let h = system.load::<String>(&"a".into());
    system.release(h);

    let seen: Vec<(DiagnosticEvent, u32)> = events
        .borrow()
        .iter()
        .filter(|(_, handle, _)| *handle == h.raw())
        .map(|(event, _, value)| (*event, *value))
        .collect();
    assert_eq!(
        seen,
        vec![
            (DiagnosticEvent::Created, 1),
            (DiagnosticEvent::ReferenceCountChanged, 2),
            (DiagnosticEvent::Completed, 0),
            (DiagnosticEvent::ReferenceCountChanged, 1),
            (DiagnosticEvent::ReferenceCountChanged, 0),
            (DiagnosticEvent::Destroyed, 0),
        ]
    );
}

#[test]
fn slots_are_recycled_with_fresh_versions() {
    let (mut system, _log) = testbed();
    let mut map = LocationMap::new();
    map.add("a".into(), location("data/a.bin", "mem"));
    map.add("b".into(), location("data/b.bin", "mem"));
    system.add_locator(Arc::new(map));

    let h1 = system.load::<String>(&"a".into());
    system.release(h1);

    let h2 = system.load::<String>(&"b".into());
    assert!(system.result_of(h1).is_err());
    assert_eq!(system.result_of(h2).unwrap().unwrap().as_str(), "data/b.bin");
    system.release(h2);
}

#[test]
fn internal_id_transforms_apply_before_providers() {
    let (mut system, log) = testbed();
    system.set_internal_id_transform(|id| format!("https://cdn.example.com/{}", id));
    let loc = location("data/a.bin", "mem");

    let h = system.load_location::<String>(&loc);
    assert_eq!(
        system.result_of(h).unwrap().unwrap().as_str(),
        "https://cdn.example.com/data/a.bin"
    );
    assert_eq!(log.borrow()[0].0, "https://cdn.example.com/data/a.bin");
    system.release(h);
}

#[test]
fn file_providers_deliver_real_files() {
    let _ = env_logger::try_init();
    let dir = std::env::temp_dir();
    let pid = std::process::id();
    let text_path = dir.join(format!("quarry-text-{}.txt", pid));
    let json_path = dir.join(format!("quarry-json-{}.json", pid));
    let blob_path = dir.join(format!("quarry-blob-{}.bin", pid));
    std::fs::write(&text_path, "hello quarry").unwrap();
    std::fs::write(&json_path, r#"{"k": 1}"#).unwrap();
    std::fs::write(&blob_path, [0xDEu8, 0xAD, 0xBE, 0xEF]).unwrap();

    let mut system = ResourceSystem::new();
    system.add_provider(Arc::new(FileDataProvider));
    system.add_provider(Arc::new(TextDataProvider));
    system.add_provider(Arc::new(JsonDataProvider));

    let data = CatalogData::from_entries(
        "files",
        &[
            entry(text_path.to_str().unwrap(), TextDataProvider::ID, &["text".into()], &[]),
            entry(json_path.to_str().unwrap(), JsonDataProvider::ID, &["json".into()], &[]),
            entry(blob_path.to_str().unwrap(), FileDataProvider::ID, &["blob".into()], &[]),
        ],
    )
    .unwrap();
    system.load_catalog(&data, None).unwrap();

    let text = system.load::<String>(&"text".into());
    assert_eq!(system.result_of(text).unwrap().unwrap().as_str(), "hello quarry");

    let json = system.load::<serde_json::Value>(&"json".into());
    assert_eq!(
        system.result_of(json).unwrap().unwrap()["k"].as_i64(),
        Some(1)
    );

    let blob = system.load::<Vec<u8>>(&"blob".into());
    assert_eq!(
        system.result_of(blob).unwrap().unwrap().as_slice(),
        &[0xDE, 0xAD, 0xBE, 0xEF]
    );

    system.release(text);
    system.release(json);
    system.release(blob);

    std::fs::remove_file(&text_path).ok();
    std::fs::remove_file(&json_path).ok();
    std::fs::remove_file(&blob_path).ok();
}

#[test]
fn settings_install_catalogs_from_disk() {
    let _ = env_logger::try_init();
    let dir = std::env::temp_dir();
    let pid = std::process::id();
    let catalog_path = dir.join(format!("quarry-catalog-{}.json", pid));
    let settings_path = dir.join(format!("quarry-settings-{}.json", pid));

    let data = CatalogData::from_entries(
        "main",
        &[entry("docs/readme.txt", "mem", &["doc".into()], &[])],
    )
    .unwrap();
    data.save(&catalog_path).unwrap();

    let mut settings = RuntimeSettings::default();
    settings.build_target = "linux-x86_64".to_string();
    settings.catalogs.push(CatalogSource {
        id: "main".to_string(),
        path: catalog_path.to_str().unwrap().to_string(),
    });
    settings.save(&settings_path).unwrap();

    let loaded = RuntimeSettings::load(&settings_path).unwrap();
    assert_eq!(loaded.build_target, "linux-x86_64");

    let (mut system, _log) = testbed();
    system.apply_settings(&loaded).unwrap();
    assert_eq!(system.locate(&"doc".into()).len(), 1);

    let h = system.load::<String>(&"doc".into());
    assert_eq!(system.status(h).unwrap(), OperationStatus::Succeeded);
    system.release(h);

    std::fs::remove_file(&catalog_path).ok();
    std::fs::remove_file(&settings_path).ok();
}

#[test]
fn pooled_strategies_survive_heavy_churn() {
    let _ = env_logger::try_init();
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut system = ResourceSystem::with_strategy(Box::new(LruAllocationStrategy::new(4, 4, 2, 2)));
    system.add_provider(Arc::new(RecordingProvider { log: Rc::clone(&log) }));
    let mut map = LocationMap::new();
    for i in 0..8 {
        let id = format!("data/{}.bin", i);
        map.add(format!("k{}", i).into(), location(&id, "mem"));
    }
    system.add_locator(Arc::new(map));

    // far more loads than the pool retains
    for round in 0..64 {
        let key: ResourceKey = format!("k{}", round % 8).into();
        let h = system.load::<String>(&key);
        assert_eq!(system.status(h).unwrap(), OperationStatus::Succeeded);
        system.release(h);
    }
    assert_eq!(system.operation_count(), 0);
}

#[test]
fn stress() {
    let (mut system, _log) = testbed();
    let mut map = LocationMap::new();
    for i in 0..5 {
        let id = format!("data/{}.bin", i);
        map.add(format!("k{}", i).into(), location(&id, "mem"));
    }
    system.add_locator(Arc::new(map));

    let mut rng = rand::thread_rng();
    let mut held: Vec<TypedHandle<String>> = Vec::new();
    for _ in 0..1000 {
        if held.is_empty() || rng.gen_range(0, 2) == 0 {
            let key: ResourceKey = format!("k{}", rng.gen_range(0, 5)).into();
            held.push(system.load::<String>(&key));
        } else {
            let len = held.len();
            let handle = held.swap_remove(rng.gen_range(0, len));
            system.release(handle);
        }
        system.update(Duration::from_secs(0));
    }

    for handle in held {
        system.release(handle);
    }
    assert_eq!(system.operation_count(), 0);
}
