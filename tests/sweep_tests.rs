//! Cleanup-sweep reclamation tests.

use std::sync::Arc;
use std::sync::Mutex;

use chrono::{Duration, Utc};

use sprinklerd::error::ActuatorError;
use sprinklerd::gpio::Actuator;
use sprinklerd::registry::{Registry, RegistryEntry};
use sprinklerd::supervisor::{ProcessKiller, sweep_once};

/// Records every actuator call.
#[derive(Default)]
struct RecordingActuator {
    calls: Mutex<Vec<String>>,
}

impl RecordingActuator {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Actuator for RecordingActuator {
    fn setup(&self, zone: &str) -> Result<(), ActuatorError> {
        self.calls.lock().unwrap().push(format!("setup:{zone}"));
        Ok(())
    }
    fn on(&self, zone: &str) -> Result<(), ActuatorError> {
        self.calls.lock().unwrap().push(format!("on:{zone}"));
        Ok(())
    }
    fn off(&self, zone: &str) -> Result<(), ActuatorError> {
        self.calls.lock().unwrap().push(format!("off:{zone}"));
        Ok(())
    }
}

/// Pretends every pid is dead.
#[derive(Default)]
struct RecordingKiller {
    killed: Mutex<Vec<u32>>,
}

impl ProcessKiller for RecordingKiller {
    fn kill(&self, pid: u32) -> bool {
        self.killed.lock().unwrap().push(pid);
        false
    }
}

fn entry(pid: u32, zone: &str, secs_from_now: i64) -> RegistryEntry {
    RegistryEntry {
        pid,
        zone: zone.to_string(),
        end: Utc::now() + Duration::seconds(secs_from_now),
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    registry: Registry,
    actuator: Arc<RecordingActuator>,
    actuator_dyn: Arc<dyn Actuator>,
    killer: Arc<RecordingKiller>,
    killer_dyn: Arc<dyn ProcessKiller>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new(dir.path());
    let actuator = Arc::new(RecordingActuator::default());
    let killer = Arc::new(RecordingKiller::default());
    Fixture {
        registry,
        actuator_dyn: Arc::clone(&actuator) as Arc<dyn Actuator>,
        killer_dyn: Arc::clone(&killer) as Arc<dyn ProcessKiller>,
        actuator,
        killer,
        _dir: dir,
    }
}

#[tokio::test]
async fn expired_entry_is_reclaimed_exactly_once() {
    let f = fixture();
    f.registry
        .create_if_absent("z1", &entry(4242, "front", -10))
        .await
        .unwrap();

    sweep_once(&f.registry, &f.actuator_dyn, &f.killer_dyn).await;

    assert_eq!(f.actuator.calls(), vec!["setup:front", "off:front"]);
    assert_eq!(*f.killer.killed.lock().unwrap(), vec![4242u32]);
    assert!(f.registry.read("z1").await.unwrap().is_none());

    // A second sweep finds nothing to do.
    sweep_once(&f.registry, &f.actuator_dyn, &f.killer_dyn).await;
    assert_eq!(f.actuator.calls().len(), 2);
    assert_eq!(f.killer.killed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn live_entries_are_left_alone() {
    let f = fixture();
    f.registry
        .create_if_absent("z1", &entry(1, "front", 3600))
        .await
        .unwrap();

    sweep_once(&f.registry, &f.actuator_dyn, &f.killer_dyn).await;

    assert!(f.actuator.calls().is_empty());
    assert!(f.killer.killed.lock().unwrap().is_empty());
    assert!(f.registry.read("z1").await.unwrap().is_some());
}

#[tokio::test]
async fn mixed_entries_only_expired_reclaimed() {
    let f = fixture();
    f.registry
        .create_if_absent("stale", &entry(1, "front", -5))
        .await
        .unwrap();
    f.registry
        .create_if_absent("fresh", &entry(2, "back", 300))
        .await
        .unwrap();

    sweep_once(&f.registry, &f.actuator_dyn, &f.killer_dyn).await;

    assert!(f.registry.read("stale").await.unwrap().is_none());
    assert!(f.registry.read("fresh").await.unwrap().is_some());
    assert_eq!(f.actuator.calls(), vec!["setup:front", "off:front"]);
}

#[tokio::test]
async fn corrupt_entries_do_not_stop_the_sweep() {
    let f = fixture();
    tokio::fs::write(f.registry.dir().join("junk"), b"not an entry")
        .await
        .unwrap();
    f.registry
        .create_if_absent("stale", &entry(7, "front", -5))
        .await
        .unwrap();

    sweep_once(&f.registry, &f.actuator_dyn, &f.killer_dyn).await;

    assert!(f.registry.read("stale").await.unwrap().is_none());
    assert_eq!(f.actuator.calls(), vec!["setup:front", "off:front"]);
}

#[tokio::test]
async fn sweep_on_empty_registry_is_a_noop() {
    let f = fixture();
    sweep_once(&f.registry, &f.actuator_dyn, &f.killer_dyn).await;
    assert!(f.actuator.calls().is_empty());
}
