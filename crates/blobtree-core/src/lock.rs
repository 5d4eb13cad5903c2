//! Cross-process advisory file locks.
//!
//! A lock is held on an open file description (`flock(2)` on unix), so it
//! excludes other processes and other handles in this process alike. It does
//! nothing against code that never asks for the lock.
//!
//! Lock files may be removed by their holder while other parties wait on
//! them. After every acquisition the holder checks that the path still names
//! the file it locked; a stale handle is dropped and, for blocking
//! acquisition, the whole open-and-lock sequence is repeated.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// How a lock is shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders at once, excludes `Exclusive`.
    Shared,
    /// A single holder.
    Exclusive,
}

/// An advisory lock tied to an open lock file.
///
/// Dropping the value closes the file and thereby releases the lock.
#[derive(Debug)]
pub struct AdvisoryLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl AdvisoryLock {
    /// Block until the lock on `path` is held, creating the file if needed.
    pub fn acquire(path: impl AsRef<Path>, mode: LockMode) -> io::Result<Self> {
        let path = path.as_ref();
        loop {
            let file = open_lock_file(path)?;
            sys::lock(&file, mode, true)?;
            if still_linked(&file, path)? {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                    mode,
                });
            }
            debug!(path = %path.display(), "lock file replaced while waiting; retrying");
        }
    }

    /// Try once to take the exclusive lock on `path`.
    ///
    /// Returns `Ok(None)` when someone else holds it.
    pub fn try_acquire(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;
        if !sys::lock(&file, LockMode::Exclusive, false)? {
            return Ok(None);
        }
        if !still_linked(&file, path)? {
            return Ok(None);
        }
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
            mode: LockMode::Exclusive,
        }))
    }

    /// Check whether someone holds the exclusive lock on `path` without
    /// creating or writing the file.
    ///
    /// Returns `Ok(None)` if the file does not exist. The check takes a
    /// shared lock for an instant, so a concurrent exclusive attempt may see
    /// the file as busy once.
    pub fn is_held(path: impl AsRef<Path>) -> io::Result<Option<bool>> {
        let file = match File::open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if !sys::lock(&file, LockMode::Shared, false)? {
            return Ok(Some(true));
        }
        sys::unlock(&file)?;
        Ok(Some(false))
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the lock is held in.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release the lock and leave the lock file in place.
    pub fn release(self) -> io::Result<()> {
        sys::unlock(&self.file)
    }

    /// Remove the lock file, then release the lock.
    ///
    /// Removal happens while the lock is still held so that waiters notice
    /// the unlinked file instead of racing a newcomer.
    pub fn release_and_remove(self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        sys::unlock(&self.file)
    }
}

/// Suffix of the sentinel that guards a leaf slot during splits and deletes.
pub const LOCK_SUFFIX: &str = ".lock";

/// Sentinel path for the node `name` inside `dir`.
pub fn sentinel_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}{LOCK_SUFFIX}"))
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    use super::LockMode;

    /// Returns `Ok(false)` when a non-blocking attempt finds the lock taken.
    pub(super) fn lock(file: &File, mode: LockMode, block: bool) -> io::Result<bool> {
        let mut op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        if !block {
            op |= libc::LOCK_NB;
        }
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
            if rc == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock if !block => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

// Other platforms get no cross-process exclusion; the in-process lock still applies.
#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;

    use super::LockMode;

    pub(super) fn lock(_file: &File, _mode: LockMode, _block: bool) -> io::Result<bool> {
        Ok(true)
    }

    pub(super) fn unlock(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn exclusive_excludes_second_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000001.lock");

        let held = AdvisoryLock::try_acquire(&path).unwrap().expect("first lock");
        assert!(AdvisoryLock::try_acquire(&path).unwrap().is_none());

        held.release().unwrap();
        assert!(AdvisoryLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn is_held_reports_without_creating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000002.lock");

        assert_eq!(AdvisoryLock::is_held(&path).unwrap(), None);
        assert!(!path.exists());

        let held = AdvisoryLock::try_acquire(&path).unwrap().expect("first lock");
        assert_eq!(AdvisoryLock::is_held(&path).unwrap(), Some(true));
        held.release().unwrap();
        assert_eq!(AdvisoryLock::is_held(&path).unwrap(), Some(false));

        // The check itself leaves the lock free.
        assert!(AdvisoryLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        {
            let _lock = AdvisoryLock::acquire(&path, LockMode::Exclusive).unwrap();
            assert!(path.exists());
        }
        assert!(AdvisoryLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn shared_blocks_exclusive_try() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".key.map.lock");
        let a = AdvisoryLock::acquire(&path, LockMode::Shared).unwrap();
        let b = AdvisoryLock::acquire(&path, LockMode::Shared).unwrap();
        assert_eq!(a.mode(), LockMode::Shared);
        assert!(AdvisoryLock::try_acquire(&path).unwrap().is_none());
        drop(a);
        drop(b);
        assert!(AdvisoryLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn release_and_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000007.lock");
        let lock = AdvisoryLock::try_acquire(&path).unwrap().unwrap();
        assert_eq!(lock.path(), path.as_path());
        lock.release_and_remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn waiter_retries_after_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000003.lock");
        let held = AdvisoryLock::try_acquire(&path).unwrap().unwrap();

        let waiter_path = path.clone();
        let waiter = std::thread::spawn(move || {
            AdvisoryLock::acquire(&waiter_path, LockMode::Exclusive).unwrap()
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        held.release_and_remove().unwrap();

        let lock = waiter.join().unwrap();
        // The waiter ends up holding a lock on a file that is linked at `path`.
        assert!(path.exists());
        assert!(still_linked(&lock.file, &path).unwrap());
    }
}
