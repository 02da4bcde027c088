//! Host paths staged into a private directory before being bind-mounted.

mod lock;
mod path_set;
mod space;

pub use lock::{StagingLock, StagingLocked};
pub use path_set::PathSet;
pub use space::{MountSpace, StagingCopyFailed, TMP_ROOT};
