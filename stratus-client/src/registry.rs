use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Identity of one tracked asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Thumbnail sizes accepted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThumbSize {
    XSmall,
    Small,
    Medium,
    Large,
    XLarge,
}

impl ThumbSize {
    pub fn as_str(self) -> &'static str {
        match self {
            ThumbSize::XSmall => "xs",
            ThumbSize::Small => "s",
            ThumbSize::Medium => "m",
            ThumbSize::Large => "l",
            ThumbSize::XLarge => "xl",
        }
    }
}

/// Where an operation is tracked. The four spaces are independent; the
/// keyed ones are single-flight (at most one live operation per key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKey {
    Generic(OperationId),
    Download(String),
    Thumbnail(String, ThumbSize),
    Upload(String),
}

/// Key shape requested at track time; the generic space gets its id
/// assigned by the registry.
#[derive(Debug, Clone)]
pub enum TrackKey {
    Generic,
    Download(String),
    Thumbnail(String, ThumbSize),
    Upload(String),
}

/// Handed to the operation task: the resolved key plus the token that
/// gates every later callback for this operation.
#[derive(Debug, Clone)]
pub struct Handle {
    pub id: OperationId,
    pub key: OperationKey,
    pub token: CancellationToken,
}

#[derive(Debug, Clone)]
struct Entry {
    id: OperationId,
    token: CancellationToken,
}

#[derive(Debug)]
struct Spaces {
    /// Parent of every live operation token. `cancel_all` fires it, which
    /// also silences entries that were superseded out of the keyed maps.
    epoch: CancellationToken,
    generic: HashMap<OperationId, Entry>,
    downloads: HashMap<String, Entry>,
    thumbnails: HashMap<(String, ThumbSize), Entry>,
    uploads: HashMap<String, Entry>,
}

/// Owns every in-flight operation. The sole authority on whether an
/// operation is still live; all mutation goes through one mutex so a key
/// is never observed half-updated by a concurrent completion.
#[derive(Debug)]
pub struct Registry {
    spaces: Mutex<Spaces>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            spaces: Mutex::new(Spaces {
                epoch: CancellationToken::new(),
                generic: HashMap::new(),
                downloads: HashMap::new(),
                thumbnails: HashMap::new(),
                uploads: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Inserts a new operation and returns its handle.
    ///
    /// Hazard, preserved for compatibility: in the keyed spaces an existing
    /// entry under the same key is overwritten WITHOUT being cancelled. The
    /// superseded operation keeps running and still delivers its terminal
    /// event; callers who want it stopped must cancel it first.
    pub fn track(&self, key: TrackKey) -> Handle {
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut spaces = self.spaces.lock().expect("registry lock poisoned");
        let token = spaces.epoch.child_token();
        let entry = Entry {
            id,
            token: token.clone(),
        };
        let key = match key {
            TrackKey::Generic => {
                spaces.generic.insert(id, entry);
                OperationKey::Generic(id)
            }
            TrackKey::Download(path) => {
                spaces.downloads.insert(path.clone(), entry);
                OperationKey::Download(path)
            }
            TrackKey::Thumbnail(path, size) => {
                spaces.thumbnails.insert((path.clone(), size), entry);
                OperationKey::Thumbnail(path, size)
            }
            TrackKey::Upload(path) => {
                spaces.uploads.insert(path.clone(), entry);
                OperationKey::Upload(path)
            }
        };
        Handle { id, key, token }
    }

    /// Signals cancellation and removes the entry. No-op when absent.
    /// Returns whether an operation was actually cancelled.
    pub fn cancel(&self, key: &OperationKey) -> bool {
        let mut spaces = self.spaces.lock().expect("registry lock poisoned");
        let entry = match key {
            OperationKey::Generic(id) => spaces.generic.remove(id),
            OperationKey::Download(path) => spaces.downloads.remove(path),
            OperationKey::Thumbnail(path, size) => {
                spaces.thumbnails.remove(&(path.clone(), *size))
            }
            OperationKey::Upload(path) => spaces.uploads.remove(path),
        };
        match entry {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels and clears every entry across all four spaces. Safe during
    /// teardown, idempotent, and safe against in-flight completions:
    /// completions for cancelled operations are dropped, not delivered.
    pub fn cancel_all(&self) {
        let mut spaces = self.spaces.lock().expect("registry lock poisoned");
        spaces.epoch.cancel();
        spaces.epoch = CancellationToken::new();
        for entry in spaces.generic.values() {
            entry.token.cancel();
        }
        for entry in spaces.downloads.values() {
            entry.token.cancel();
        }
        for entry in spaces.thumbnails.values() {
            entry.token.cancel();
        }
        for entry in spaces.uploads.values() {
            entry.token.cancel();
        }
        spaces.generic.clear();
        spaces.downloads.clear();
        spaces.thumbnails.clear();
        spaces.uploads.clear();
    }

    /// Removes a finished operation from its key space. Only the entry with
    /// a matching id is removed: a superseded operation must not tear out
    /// its successor. Returns whether this handle's entry was still live.
    pub fn complete(&self, handle: &Handle) -> bool {
        let mut spaces = self.spaces.lock().expect("registry lock poisoned");
        Self::remove_entry(&mut spaces, handle)
    }

    /// Removes a finished operation and, unless it was cancelled, runs
    /// `notify` while still holding the registry lock. That makes delivery
    /// atomic with `cancel` and `cancel_all`: once either has returned, no
    /// notification for the affected operations can be sent afterwards.
    /// `notify` must not block (an unbounded channel send is fine).
    /// Returns whether `notify` ran.
    pub fn complete_with<F: FnOnce()>(&self, handle: &Handle, notify: F) -> bool {
        let mut spaces = self.spaces.lock().expect("registry lock poisoned");
        Self::remove_entry(&mut spaces, handle);
        let live = !handle.token.is_cancelled();
        if live {
            notify();
        }
        live
    }

    /// Runs `notify` under the registry lock when the operation has not
    /// been cancelled. Used for progress callbacks, which would otherwise
    /// race `cancel_all` the same way terminal delivery does.
    pub fn notify_if_live<F: FnOnce()>(&self, handle: &Handle, notify: F) -> bool {
        let _guard = self.spaces.lock().expect("registry lock poisoned");
        let live = !handle.token.is_cancelled();
        if live {
            notify();
        }
        live
    }

    fn remove_entry(spaces: &mut Spaces, handle: &Handle) -> bool {
        match &handle.key {
            OperationKey::Generic(id) => remove_if(&mut spaces.generic, id, handle.id),
            OperationKey::Download(path) => remove_if(&mut spaces.downloads, path, handle.id),
            OperationKey::Thumbnail(path, size) => {
                remove_if(&mut spaces.thumbnails, &(path.clone(), *size), handle.id)
            }
            OperationKey::Upload(path) => remove_if(&mut spaces.uploads, path, handle.id),
        }
    }

    /// Live entries across all four spaces; used for "any work
    /// outstanding" checks.
    pub fn count(&self) -> usize {
        let spaces = self.spaces.lock().expect("registry lock poisoned");
        spaces.generic.len()
            + spaces.downloads.len()
            + spaces.thumbnails.len()
            + spaces.uploads.len()
    }
}

fn remove_if<K>(map: &mut HashMap<K, Entry>, key: &K, id: OperationId) -> bool
where
    K: std::hash::Hash + Eq,
{
    if map.get(key).is_some_and(|entry| entry.id == id) {
        map.remove(key);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_space_allows_concurrent_operations_of_one_kind() {
        let registry = Registry::new();
        let a = registry.track(TrackKey::Generic);
        let b = registry.track(TrackKey::Generic);
        assert_ne!(a.id, b.id);
        assert_eq!(registry.count(), 2);
        assert!(registry.complete(&a));
        assert!(registry.complete(&b));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn cancel_removes_and_signals() {
        let registry = Registry::new();
        let handle = registry.track(TrackKey::Download("/x".into()));
        assert!(registry.cancel(&handle.key));
        assert!(handle.token.is_cancelled());
        assert_eq!(registry.count(), 0);
        // Second cancel is a no-op.
        assert!(!registry.cancel(&handle.key));
        // The dropped entry must not be completable.
        assert!(!registry.complete(&handle));
    }

    #[test]
    fn thumbnail_keys_are_path_and_size_composites() {
        let registry = Registry::new();
        let small = registry.track(TrackKey::Thumbnail("a.txt".into(), ThumbSize::Small));
        let large = registry.track(TrackKey::Thumbnail("a.txt".into(), ThumbSize::Large));
        assert_eq!(registry.count(), 2);

        assert!(registry.cancel(&large.key));
        assert!(!small.token.is_cancelled());
        assert_eq!(registry.count(), 1);
        assert!(registry.complete(&small));
    }

    #[test]
    fn duplicate_download_key_overwrites_without_cancelling() {
        let registry = Registry::new();
        let first = registry.track(TrackKey::Download("/x".into()));
        let second = registry.track(TrackKey::Download("/x".into()));

        // The superseded entry is replaced, never cancelled.
        assert_eq!(registry.count(), 1);
        assert!(!first.token.is_cancelled());

        // The predecessor's completion must not tear out the successor.
        assert!(!registry.complete(&first));
        assert_eq!(registry.count(), 1);
        assert!(registry.complete(&second));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn cancel_all_clears_everything_and_silences_superseded_entries() {
        let registry = Registry::new();
        let superseded = registry.track(TrackKey::Download("/x".into()));
        let _replacement = registry.track(TrackKey::Download("/x".into()));
        let generic = registry.track(TrackKey::Generic);
        let upload = registry.track(TrackKey::Upload("/dest/a.txt".into()));

        registry.cancel_all();
        assert_eq!(registry.count(), 0);
        assert!(generic.token.is_cancelled());
        assert!(upload.token.is_cancelled());
        // Superseded operations were previously tracked; they go silent too.
        assert!(superseded.token.is_cancelled());

        // Idempotent, and new work after teardown is unaffected.
        registry.cancel_all();
        let fresh = registry.track(TrackKey::Generic);
        assert!(!fresh.token.is_cancelled());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn complete_with_runs_notification_only_while_live() {
        let registry = Registry::new();
        let finished = registry.track(TrackKey::Generic);
        let mut delivered = false;
        assert!(registry.complete_with(&finished, || delivered = true));
        assert!(delivered);

        let cancelled = registry.track(TrackKey::Download("/x".into()));
        assert!(registry.cancel(&cancelled.key));
        let mut delivered = false;
        assert!(!registry.complete_with(&cancelled, || delivered = true));
        assert!(!delivered);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn notify_if_live_goes_quiet_after_cancel_all() {
        let registry = Registry::new();
        let handle = registry.track(TrackKey::Upload("/dest/a.txt".into()));
        let mut reports = 0;
        assert!(registry.notify_if_live(&handle, || reports += 1));
        registry.cancel_all();
        assert!(!registry.notify_if_live(&handle, || reports += 1));
        assert_eq!(reports, 1);
    }

    #[test]
    fn upload_keys_do_not_collide_with_download_keys() {
        let registry = Registry::new();
        let download = registry.track(TrackKey::Download("/same".into()));
        let upload = registry.track(TrackKey::Upload("/same".into()));
        assert_eq!(registry.count(), 2);
        assert!(registry.cancel(&download.key));
        assert!(!upload.token.is_cancelled());
    }
}
