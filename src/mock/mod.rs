//! Test doubles
//!
//! In-process stand-ins for the external collaborators so the pipeline can
//! be exercised without a toolchain, network or FTP server:
//!
//! - [`ScriptedRunner`]: record-and-replay command runner
//! - [`MemoryObjectStore`]: folder/file store kept in memory
//! - [`FakeFtp`]: store/delete bookkeeping with injectable failure
//! - [`RecordingNotifier`]: captures sent messages

mod backends;
mod runner;

pub use backends::{FakeFtp, MemoryObjectStore, RecordingNotifier, StoredUpload};
pub use runner::{RecordedCall, ScriptedRunner};
