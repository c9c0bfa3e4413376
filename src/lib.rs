//! Device sync engine.
//!
//! Host applications depend on `device-sync` and reach the workspace crates
//! through this facade:
//!
//! - [`runtime`]: configuration, logging and the sync event stream
//! - [`codec`]: source decoding into device PCM
//! - [`sync`]: the incremental device sync itself

pub use core_codec as codec;
pub use core_runtime as runtime;
pub use core_sync as sync;

pub use core_codec::{PcmFormat, PcmTranscoder, SymphoniaTranscoder};
pub use core_runtime::config::CoreConfig;
pub use core_runtime::events::{EventBus, EventStream, FatalError, SyncEvent};
pub use core_sync::{
    DesiredFile, DesiredFolder, DesiredLayout, LibraryNode, SyncError, SyncOrchestrator,
    SyncReport, SyncRequest,
};
