//! zsync client: reassembles a remote file from a control file, local seed
//! files and HTTP range requests.

pub mod config;
pub mod control;
pub mod delta;
pub mod error;
pub mod fs_util;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use config::{Config, HttpConfig};
pub use control::{ControlFile, Header};
pub use error::{Phase, Result, ZsyncError};
pub use sync::{zsync, EventDispatcher, Observer, Options, StatsObserver, Zsync, ZsyncEvent, ZsyncStats};
pub use transport::{ContentRange, Credentials};
