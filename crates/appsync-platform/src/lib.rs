mod environment;
mod paths;

pub use environment::PlatformInfo;
pub use paths::{PathsError, SyncPaths};
