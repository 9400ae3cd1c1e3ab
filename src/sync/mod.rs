pub mod error;
pub mod executor;
pub mod policy;
pub mod remote;

pub use error::{RemoteError, SyncFailure, SyncStage};
pub use executor::{SyncAck, SyncExecutor, SyncRequest, UploadPermit};
pub use policy::{SyncPolicy, SyncState};
pub use remote::{HttpRemoteStore, RemoteStore};
