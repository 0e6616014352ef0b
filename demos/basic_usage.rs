use std::sync::Arc;

use next_prefs::{Error, FileBackend, Pref, Prefs, Registry, Schema};

/// Settings of a small networked device.
#[derive(Schema)]
struct DeviceConfig {
    registry: Registry,
    name: Pref<String>,
    port: Pref<u16>,
    debug: Pref<bool>,
    max_connections: Pref<u32>,
}

impl DeviceConfig {
    fn new(backend: Arc<FileBackend>) -> Result<Self, Error> {
        let mut registry = Registry::new("device", 1, backend)?;
        Ok(Self {
            name: registry.declare("Name", "MyDevice".to_string())?,
            port: registry.declare("Port", 8080)?,
            debug: registry.declare("Debug", false)?,
            max_connections: registry.declare("MaxConn", 100)?,
            registry,
        })
    }
}

impl Prefs for DeviceConfig {
    fn on_init(&mut self, stored: u32, _compiled: u32) -> Result<(), Error> {
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

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let backend = Arc::new(FileBackend::open(temp_dir.path())?);

    // Opens the "nvs" partition and runs the migration hook
    let mut config = DeviceConfig::new(backend.clone())?;
    config.init()?;

    println!("Initial config:");
    for (key, value) in config.values() {
        println!("  {key} = {value}");
    }

    // Each write is committed immediately
    config.name.set("MyAwesomeDevice".to_string());
    config.port.set(9090);
    config.set_from_string("Debug", "true");
    config.set_from_string("MaxConn", "0x1F4");
    config.end();

    // A fresh instance over the same directory sees the saved values
    let mut config = DeviceConfig::new(backend)?;
    config.init()?;

    println!("After restart:");
    for (key, value) in config.values() {
        println!("  {key} = {value}");
    }

    // Unknown keys are ignored
    let written = config.set_from_string("Missing", "1");
    println!("Writing an unknown key wrote {written} bytes");

    Ok(())
}
