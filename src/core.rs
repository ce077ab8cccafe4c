/*
 * The platform-agnostic backup engine. Configuration lives in `config_store`
 * (backed by `profiles` for persistence); a backup run is driven by
 * `run_controller`, which combines the generation table, the run lock, the sync
 * tool and the manifest store. History, search, prune and restore operate on the
 * same client directories afterwards.
 *
 * I/O seams are traits (`ProfileManagerOperations`, `SyncToolOperations`,
 * `ManifestStoreOperations`, `ClockOperations`, `NotifierOperations`) with `Core*`
 * or `System*` implementations, so the presenter can be tested with doubles.
 */
pub mod checksum_utils;
pub mod clock;
pub mod config_store;
pub mod destination;
pub mod error;
pub mod generations;
pub mod history;
pub mod manifest;
pub mod models;
pub mod notifier;
pub mod path_utils;
pub mod profiles;
pub mod restore;
pub mod ring_buffer;
pub mod run_controller;
pub mod run_lock;
pub mod search;
pub mod selector;
pub mod signals;
pub mod sync_tool;

pub use clock::{ClockOperations, SystemClock};
pub use manifest::CoreManifestStore;
pub use models::GlobalConfig;
pub use notifier::LogNotifier;
pub use profiles::{CoreProfileManager, ProfileManagerOperations};
pub use signals::InterruptMonitor;
pub use sync_tool::CoreSyncTool;
