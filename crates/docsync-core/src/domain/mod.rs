//! Domain model (IDs, lock records, jobs, errors).

pub mod errors;
pub mod ids;
pub mod job;
pub mod lock;
pub mod machine;

pub use errors::{
    ConfigError, CycleError, HistoryError, OutputError, SourceError, StoreError, TargetError,
    TransformError, UploadError,
};
pub use ids::{BatchId, Category, CycleId, JobId};
pub use job::{JobDescriptor, JobOutput, RawDocument, Row};
pub use lock::{LockRecord, LockStatus, LockUpdate};
pub use machine::MachineIdentity;
