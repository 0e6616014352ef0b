use std::sync::Arc;

use next_prefs::{Error, MemoryBackend, Pref, Prefs, Registry, Schema};

#[derive(Schema)]
struct ServerConfigV1 {
    registry: Registry,
    host: Pref<String>,
    port: Pref<u16>,
}

impl ServerConfigV1 {
    fn new(backend: Arc<MemoryBackend>) -> Result<Self, Error> {
        let mut registry = Registry::new("server", 1, backend)?;
        Ok(Self {
            host: registry.declare("Host", "localhost".to_string())?,
            port: registry.declare("Port", 8080)?,
            registry,
        })
    }
}

impl Prefs for ServerConfigV1 {
    fn on_init(&mut self, stored: u32, _compiled: u32) -> Result<(), Error> {
        if stored == 0 {
            self.restore_defaults();
        }
        Ok(())
    }
}

#[derive(Schema)]
struct ServerConfig {
    registry: Registry,
    host: Pref<String>,
    port: Pref<u16>,
    use_tls: Pref<bool>, // added in v2
}

impl ServerConfig {
    fn new(backend: Arc<MemoryBackend>) -> Result<Self, Error> {
        let mut registry = Registry::new("server", 2, backend)?;
        Ok(Self {
            host: registry.declare("Host", "localhost".to_string())?,
            port: registry.declare("Port", 8080)?,
            use_tls: registry.declare("UseTls", false)?,
            registry,
        })
    }
}

impl Prefs for ServerConfig {
    fn on_init(&mut self, stored: u32, compiled: u32) -> Result<(), Error> {
        if stored < compiled {
            println!("Migrating from v{stored} to v{compiled}");
        }
        match stored {
            0 => {
                self.reset()?;
            }
            1 => {
                // Servers configured under v1 were already behind TLS
                self.use_tls.set(true);
            }
            _ => {}
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.restore_defaults();
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let backend = Arc::new(MemoryBackend::new());

    let mut v1 = ServerConfigV1::new(backend.clone())?;
    v1.init()?;
    v1.host.set("production.example.com".to_string());
    v1.port.set(443);
    v1.end();

    println!("Before migration:");
    for (key, value) in v1.values() {
        println!("  {key} = {value}");
    }

    let mut config = ServerConfig::new(backend)?;
    config.init()?;

    println!("After migration:");
    for (key, value) in config.values() {
        println!("  {key} = {value}");
    }

    Ok(())
}
