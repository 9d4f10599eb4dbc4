use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// `<path>.part`, the working name of a file under assembly
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Move a finished file to its destination, replacing any existing file
///
/// Uses `rename(2)`, which is atomic within one filesystem. When source and
/// destination sit on different devices the file is copied, synced and the
/// source removed instead; that fallback is not atomic.
pub fn promote(source: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                "{} and {} are on different devices, copying",
                source.display(),
                dest.display()
            );
            fs::copy(source, dest)?;
            fs::File::open(dest)?.sync_all()?;
            fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(err: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    err.raw_os_error() == Some(17)
}

/// Set the modification time of `path`
pub fn set_mtime(path: &Path, mtime: DateTime<Utc>) -> io::Result<()> {
    let time = filetime::FileTime::from_unix_time(mtime.timestamp(), mtime.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, time)
}
