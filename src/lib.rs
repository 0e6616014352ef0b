pub mod atomic;
pub mod convert;
pub mod error;
pub mod file;
pub mod pref;
pub mod prefs;
pub mod registry;
pub mod session;
pub mod store;
pub mod value;

pub use error::Error;
pub use file::{FileBackend, FileBackendOptions};
pub use pref::{Pref, Variable};
pub use prefs::{Prefs, Schema};
pub use registry::{Registry, Status, VERSION_KEY};
pub use session::{Getter, Session, Setter};
pub use store::{
    Backend, DEFAULT_PARTITION, MAX_NAME_LEN, MemoryBackend, Namespace, StoreError,
};
pub use value::{PrefValue, Value};

// re-export derive macro
pub use next_prefs_macros::Schema;
