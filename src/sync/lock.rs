use log::debug;
use proc_lock::{try_lock, LockPath};
use std::{
    collections::{hash_map::DefaultHasher, HashSet},
    hash::{Hash, Hasher},
    io,
    path::Path,
    sync::{Mutex, OnceLock, PoisonError},
};

use super::{Error, Result};

fn running() -> &'static Mutex<HashSet<String>> {
    static RUNNING: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    RUNNING.get_or_init(Default::default)
}

/// Registration of a running synchronization in the current process,
/// released on drop.
struct Running(String);

impl Running {
    fn register(key: String) -> Option<Self> {
        let mut running = running().lock().unwrap_or_else(PoisonError::into_inner);
        if running.insert(key.clone()) {
            Some(Self(key))
        } else {
            None
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        running()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.0);
    }
}

fn lock_name(store_path: &Path, mailbox: &str) -> String {
    let mut hasher = DefaultHasher::new();
    store_path.hash(&mut hasher);

    let mailbox: String = mailbox
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    format!("mailthread-sync-{:x}-{}.lock", hasher.finish(), mailbox)
}

/// Runs the given function while holding the synchronization lock of
/// the mailbox, both within the process and across processes sharing
/// the store. A busy mailbox fails right away with
/// [`Error::MailboxBusyError`].
pub fn with_mailbox_lock<T, F>(store_path: &Path, mailbox: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let name = lock_name(store_path, mailbox);

    let running =
        Running::register(name.clone()).ok_or_else(|| Error::MailboxBusyError(mailbox.to_owned()))?;

    let lock_path = LockPath::Tmp(name);
    let guard = try_lock(&lock_path).map_err(|err| match err.kind() {
        io::ErrorKind::WouldBlock => Error::MailboxBusyError(mailbox.to_owned()),
        _ => Error::LockMailboxError(err, mailbox.to_owned()),
    })?;
    debug!("synchronization lock of mailbox {} acquired", mailbox);

    let res = f();

    drop(guard);
    drop(running);
    debug!("synchronization lock of mailbox {} released", mailbox);

    res
}
