//! Integration tests for init, schema versions and the migration hook.

use std::sync::Arc;

use next_prefs::{
    Error, MemoryBackend, Pref, Prefs, Registry, Schema, Status, StoreError, VERSION_KEY, Value,
};

#[derive(Schema)]
struct DeviceConfig {
    registry: Registry,
    port: Pref<u16>,
    name: Pref<String>,
    calls: Vec<(u32, u32)>,
    fail_migration: bool,
}

impl DeviceConfig {
    fn new(backend: &MemoryBackend, version: u32) -> Self {
        let mut registry =
            Registry::new("device", version, Arc::new(backend.clone())).expect("registry");
        Self {
            port: registry.declare("Port", 8080).expect("declare Port"),
            name: registry
                .declare("Name", "Device".to_string())
                .expect("declare Name"),
            registry,
            calls: Vec::new(),
            fail_migration: false,
        }
    }

    fn failing(backend: &MemoryBackend, version: u32) -> Self {
        Self {
            fail_migration: true,
            ..Self::new(backend, version)
        }
    }
}

impl Prefs for DeviceConfig {
    fn on_init(&mut self, stored: u32, compiled: u32) -> Result<(), Error> {
        self.calls.push((stored, compiled));
        if self.fail_migration {
            return Err(Error::migration(stored, compiled, "refused"));
        }
        if stored == 0 {
            self.reset()?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.restore_defaults();
        Ok(())
    }
}

fn stored_version(backend: &MemoryBackend) -> Option<Value> {
    backend.peek("nvs", "device", VERSION_KEY)
}

#[test]
fn test_fresh_store_runs_hook_with_zero() {
    let backend = MemoryBackend::new();
    let mut config = DeviceConfig::new(&backend, 1);

    config.init().expect("init");

    assert_eq!(config.calls, [(0, 1)]);
    assert_eq!(config.status(), Status::Ok);
    assert_eq!(stored_version(&backend), Some(Value::U32(1)));
}

#[test]
fn test_hook_runs_on_every_init() {
    let backend = MemoryBackend::new();
    DeviceConfig::new(&backend, 1).init().expect("first boot");

    let mut config = DeviceConfig::new(&backend, 1);
    config.init().expect("second boot");

    assert_eq!(config.calls, [(1, 1)]);
    assert_eq!(config.status(), Status::Ok);
}

#[test]
fn test_reset_on_first_boot_persists_defaults() {
    let backend = MemoryBackend::new();
    DeviceConfig::new(&backend, 1).init().expect("init");

    assert_eq!(
        backend.peek("nvs", "device", "Port"),
        Some(Value::U16(8080))
    );
    assert_eq!(
        backend.peek("nvs", "device", "Name"),
        Some(Value::Str("Device".to_string()))
    );
}

#[test]
fn test_failed_migration_keeps_stored_version() {
    let backend = MemoryBackend::new();
    DeviceConfig::new(&backend, 1).init().expect("v1 boot");

    let mut config = DeviceConfig::failing(&backend, 2);
    let result = config.init();

    assert!(matches!(
        result,
        Err(Error::Migration {
            stored: 1,
            compiled: 2,
            ..
        })
    ));
    assert_eq!(config.status(), Status::Failed);
    assert_eq!(stored_version(&backend), Some(Value::U32(1)));

    let mut retry = DeviceConfig::failing(&backend, 2);
    assert!(retry.init().is_err());
    assert_eq!(retry.calls, [(1, 2)]);
}

#[test]
fn test_failed_first_boot_stays_at_zero() {
    let backend = MemoryBackend::new();
    assert!(DeviceConfig::failing(&backend, 1).init().is_err());
    assert_eq!(stored_version(&backend), None);

    let mut config = DeviceConfig::new(&backend, 1);
    config.init().expect("retry");
    assert_eq!(config.calls, [(0, 1)]);
}

#[test]
fn test_downgrade_records_compiled_version() {
    let backend = MemoryBackend::new();
    backend.poke("nvs", "device", VERSION_KEY, Value::U32(5));

    let mut config = DeviceConfig::new(&backend, 3);
    config.init().expect("init");

    assert_eq!(config.calls, [(5, 3)]);
    assert_eq!(stored_version(&backend), Some(Value::U32(3)));
}

#[derive(Schema)]
struct DeviceConfigV2 {
    registry: Registry,
    port: Pref<u16>,
    retries: Pref<u8>,
}

impl DeviceConfigV2 {
    fn new(backend: &MemoryBackend) -> Self {
        let mut registry = Registry::new("device", 2, Arc::new(backend.clone())).expect("registry");
        Self {
            port: registry.declare("Port", 8080).expect("declare Port"),
            retries: registry.declare("Retries", 3).expect("declare Retries"),
            registry,
        }
    }
}

impl Prefs for DeviceConfigV2 {
    fn on_init(&mut self, stored: u32, compiled: u32) -> Result<(), Error> {
        if stored == 1 && compiled >= 2 {
            self.retries.set_default();
        }
        Ok(())
    }
}

#[test]
fn test_migration_initializes_added_variable() {
    let backend = MemoryBackend::new();
    let mut v1 = DeviceConfig::new(&backend, 1);
    v1.init().expect("v1 boot");
    v1.port.set(9090);
    v1.end();

    let mut v2 = DeviceConfigV2::new(&backend);
    v2.init().expect("v2 boot");

    assert_eq!(*v2.port, 9090);
    assert_eq!(
        backend.peek("nvs", "device", "Retries"),
        Some(Value::U8(3))
    );
    assert_eq!(stored_version(&backend), Some(Value::U32(2)));
}

#[test]
fn test_full_partition_is_erased_and_retried() {
    let backend = MemoryBackend::new();
    backend.poke("nvs", "device", VERSION_KEY, Value::U32(1));
    backend.poke("nvs", "device", "Port", Value::U16(9090));
    backend.push_init_fault(StoreError::NoFreePages);

    let mut config = DeviceConfig::new(&backend, 1);
    config.init().expect("init after erase");

    assert_eq!(config.calls, [(0, 1)]);
    assert_eq!(*config.port, 8080);
}

#[test]
fn test_incompatible_partition_is_erased_and_retried() {
    let backend = MemoryBackend::new();
    backend.push_init_fault(StoreError::NewVersionFound);

    let mut config = DeviceConfig::new(&backend, 1);
    config.init().expect("init after erase");
    assert_eq!(config.status(), Status::Ok);
}

#[test]
fn test_erase_is_retried_only_once() {
    let backend = MemoryBackend::new();
    backend.push_init_fault(StoreError::NoFreePages);
    backend.push_init_fault(StoreError::NoFreePages);

    let mut config = DeviceConfig::new(&backend, 1);
    let result = config.init();

    assert!(matches!(
        result,
        Err(Error::Partition {
            source: StoreError::NoFreePages,
            ..
        })
    ));
    assert_eq!(config.status(), Status::Failed);
    assert!(config.calls.is_empty());
}

#[test]
fn test_other_partition_errors_are_fatal() {
    let backend = MemoryBackend::new();
    backend.push_init_fault(StoreError::Injected("flash unavailable"));

    let mut config = DeviceConfig::new(&backend, 1);
    assert!(matches!(config.init(), Err(Error::Partition { .. })));
    assert_eq!(config.status(), Status::Failed);
    assert!(config.calls.is_empty());
}

#[test]
fn test_invalid_partition_name_fails() {
    let backend = MemoryBackend::new();
    let mut config = DeviceConfig::new(&backend, 1);

    assert!(matches!(
        config.init_in("partition_name_too_long"),
        Err(Error::Partition { .. })
    ));
    assert_eq!(config.status(), Status::Failed);
}

#[test]
fn test_namespace_open_failure_is_fatal() {
    let backend = MemoryBackend::new();
    backend.fail_open(true);

    let mut config = DeviceConfig::new(&backend, 1);
    assert!(matches!(config.init(), Err(Error::Namespace { .. })));
    assert_eq!(config.status(), Status::Failed);
    assert!(config.calls.is_empty());
}

#[test]
fn test_reinit_requires_end() {
    let backend = MemoryBackend::new();
    let mut config = DeviceConfig::new(&backend, 1);
    config.init().expect("init");

    assert!(matches!(
        config.init(),
        Err(Error::AlreadyInitialized(_))
    ));
    assert_eq!(config.status(), Status::Ok);

    config.end();
    config.end();
    assert_eq!(config.registry().partition(), None);

    config.init().expect("init after end");
    assert_eq!(config.calls, [(0, 1), (1, 1)]);
}

#[test]
fn test_custom_partition() {
    let backend = MemoryBackend::new();
    let mut config = DeviceConfig::new(&backend, 1);
    config.init_in("settings").expect("init");

    assert_eq!(config.registry().partition(), Some("settings"));
    assert_eq!(
        backend.peek("settings", "device", VERSION_KEY),
        Some(Value::U32(1))
    );
    assert_eq!(stored_version(&backend), None);
}

#[derive(Schema)]
struct Plain {
    registry: Registry,
    level: Pref<i32>,
}

impl Prefs for Plain {}

#[test]
fn test_default_hooks_leave_values_alone() {
    let backend = MemoryBackend::new();
    let mut registry = Registry::new("plain", 1, Arc::new(backend.clone())).unwrap();
    let mut plain = Plain {
        level: registry.declare("Level", -5).unwrap(),
        registry,
    };

    assert_eq!(plain.status(), Status::NotInitialized);
    plain.init().unwrap();
    plain.reset().unwrap();

    assert_eq!(plain.status(), Status::Ok);
    assert_eq!(backend.peek("nvs", "plain", "Level"), None);
    assert_eq!(*plain.level, -5);
}
