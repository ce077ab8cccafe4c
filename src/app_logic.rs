/*
 * The presenter layer between the command line and the backup engine. `BackupApp`
 * turns one parsed `Invocation` into configuration updates and per-client engine
 * calls, and hands printable lines plus an exit status back to `main`.
 * Unit tests for `BackupApp` are in `handler_tests.rs`.
 */
pub mod bootstrap;
pub mod handler;
pub mod report;
pub mod settings;
pub mod texts;


pub use bootstrap::Console;
pub use handler::{AppServices, BackupApp, Command, ExitStatus, Invocation, RestoreOptions};
pub use settings::Settings;
