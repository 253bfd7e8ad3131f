//! Victim selection and the hot-swappable eviction policy.
//!
//! A policy is a pure comparator over inode metadata snapshots. The
//! active policy lives in an [`arc_swap`] slot so it can be replaced
//! while reclaim scans are running: an in-flight scan keeps the policy
//! it loaded at the start and finishes under it, and
//! [`PolicySlot::install`] hands back the previous policy in the same
//! atomic step.

use crate::fs::QuicheFs;
use crate::inode::{Inode, InodeCache, InodeSlot};
use arc_swap::ArcSwapAny;
use qfs_error::{QfsError, Result};
use qfs_types::InodeNumber;
use std::sync::Arc;
use tracing::{debug, info};

/// Decides which of two regular files better deserves eviction.
pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Positive when `candidate` should replace `victim` as the
    /// eviction choice; zero or negative keeps the current victim.
    fn compare(&self, victim: &Inode, candidate: &Inode) -> i64;
}

/// Default policy: evict the least recently modified file.
#[derive(Debug, Default, Clone, Copy)]
pub struct OldestMtime;

impl EvictionPolicy for OldestMtime {
    fn name(&self) -> &'static str {
        "oldest_mtime"
    }

    fn compare(&self, victim: &Inode, candidate: &Inode) -> i64 {
        i64::from(victim.mtime) - i64::from(candidate.mtime)
    }
}

/// Evict the largest file, freeing the most blocks per eviction.
#[derive(Debug, Default, Clone, Copy)]
pub struct LargestSize;

impl EvictionPolicy for LargestSize {
    fn name(&self) -> &'static str {
        "largest_size"
    }

    fn compare(&self, victim: &Inode, candidate: &Inode) -> i64 {
        i64::from(candidate.size) - i64::from(victim.size)
    }
}

/// Look up a built-in policy by its registered name.
#[must_use]
pub fn policy_by_name(name: &str) -> Option<Arc<dyn EvictionPolicy>> {
    match name {
        "oldest_mtime" => Some(Arc::new(OldestMtime)),
        "largest_size" => Some(Arc::new(LargestSize)),
        _ => None,
    }
}

/// The mounted filesystem's active policy, swappable at runtime.
pub struct PolicySlot {
    // `arc_swap`'s `RefCnt` needs a sized pointee, so the trait-object
    // `Arc` is wrapped in one more `Arc` to make the stored type sized.
    inner: ArcSwapAny<Arc<Arc<dyn EvictionPolicy>>>,
}

impl Default for PolicySlot {
    fn default() -> Self {
        let initial: Arc<dyn EvictionPolicy> = Arc::new(OldestMtime);
        Self {
            inner: ArcSwapAny::new(Arc::new(initial)),
        }
    }
}

impl PolicySlot {
    /// The policy new reclaim scans will use.
    #[must_use]
    pub fn current(&self) -> Arc<dyn EvictionPolicy> {
        Arc::clone(&self.inner.load())
    }

    /// Atomically install `policy`, returning the one it replaced so
    /// the caller can restore it later.
    pub fn install(&self, policy: Arc<dyn EvictionPolicy>) -> Arc<dyn EvictionPolicy> {
        let previous = self.inner.swap(Arc::new(policy));
        info!(
            from = previous.name(),
            to = self.inner.load().name(),
            "eviction policy changed"
        );
        Arc::clone(&previous)
    }
}

struct Victim {
    slot: Arc<InodeSlot>,
    parent: Arc<InodeSlot>,
    snapshot: Inode,
}

impl QuicheFs {
    /// Swap the active eviction policy, returning the previous one.
    pub fn install_policy(&self, policy: Arc<dyn EvictionPolicy>) -> Arc<dyn EvictionPolicy> {
        self.policy().install(policy)
    }

    /// Evict one regular file from the tree rooted at `root`, chosen
    /// by the active policy, and return its inode number.
    ///
    /// Files held open are never picked. Directories are never
    /// victims; empty ones survive reclaim entirely. With no eligible
    /// file anywhere under `root` the error is [`QfsError::NoVictim`].
    pub fn reclaim_space(&self, root: InodeNumber) -> Result<InodeNumber> {
        let root_slot = self.iget(root)?;
        {
            let meta = root_slot.meta.lock();
            if !meta.is_dir() {
                return Err(QfsError::InvalidKind { mode: meta.mode });
            }
        }

        let policy = self.policy().current();
        let mut best: Option<Victim> = None;
        self.scan_directory(&root_slot, policy.as_ref(), &mut best)?;
        let victim = best.ok_or(QfsError::NoVictim)?;

        let ino = victim.slot.ino;
        info!(
            ino = ino.0,
            size = victim.snapshot.size,
            mtime = victim.snapshot.mtime,
            policy = policy.name(),
            "evicting file"
        );
        self.unlink_loaded(&victim.parent, &victim.slot)?;
        Ok(ino)
    }

    /// Depth-first walk. Each directory's table is snapshotted under
    /// its own lock, then the lock is dropped before descending, so
    /// the scan never holds more than one table lock at a time.
    fn scan_directory(
        &self,
        dir: &Arc<InodeSlot>,
        policy: &dyn EvictionPolicy,
        best: &mut Option<Victim>,
    ) -> Result<()> {
        let children: Vec<InodeNumber> = {
            let meta = dir.meta.lock();
            let table = self.read_table(&meta)?;
            table.live_entries().map(|e| e.inode).collect()
        };

        for ino in children {
            let child = self.iget(ino)?;
            let snapshot = child.meta.lock().clone();

            if snapshot.is_dir() {
                self.scan_directory(&child, policy, best)?;
                continue;
            }
            if !snapshot.is_regular() {
                continue;
            }
            if InodeCache::external_handles(&child) > 0 {
                debug!(ino = ino.0, "skipping in-use file");
                continue;
            }

            let replace = match best.as_ref() {
                None => true,
                Some(current) => policy.compare(&current.snapshot, &snapshot) > 0,
            };
            if replace {
                *best = Some(Victim {
                    slot: child,
                    parent: dir.clone(),
                    snapshot,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfs_ondisk::S_IFREG;
    use qfs_types::BlockNumber;

    fn file(ino: u32, size: u32, mtime: u32) -> Inode {
        Inode {
            ino: InodeNumber(ino),
            mode: S_IFREG | 0o644,
            uid: 0,
            gid: 0,
            size,
            ctime: 0,
            atime: 0,
            mtime,
            blocks: 1,
            nlink: 1,
            index_block: BlockNumber(0),
        }
    }

    #[test]
    fn oldest_mtime_prefers_older_candidate() {
        let policy = OldestMtime;
        let victim = file(1, 0, 100);
        assert!(policy.compare(&victim, &file(2, 0, 50)) > 0);
        assert!(policy.compare(&victim, &file(2, 0, 150)) < 0);
        // Equal timestamps keep the current victim.
        assert_eq!(policy.compare(&victim, &file(2, 0, 100)), 0);
    }

    #[test]
    fn largest_size_prefers_bigger_candidate() {
        let policy = LargestSize;
        let victim = file(1, 4096, 0);
        assert!(policy.compare(&victim, &file(2, 8192, 0)) > 0);
        assert!(policy.compare(&victim, &file(2, 1024, 0)) < 0);
        assert_eq!(policy.compare(&victim, &file(2, 4096, 0)), 0);
    }

    #[test]
    fn install_returns_the_previous_policy() {
        let slot = PolicySlot::default();
        assert_eq!(slot.current().name(), "oldest_mtime");

        let previous = slot.install(Arc::new(LargestSize));
        assert_eq!(previous.name(), "oldest_mtime");
        assert_eq!(slot.current().name(), "largest_size");

        // Restore the saved policy, round-tripping cleanly.
        let previous = slot.install(previous);
        assert_eq!(previous.name(), "largest_size");
        assert_eq!(slot.current().name(), "oldest_mtime");
    }

    #[test]
    fn policy_lookup_by_name() {
        assert_eq!(policy_by_name("oldest_mtime").unwrap().name(), "oldest_mtime");
        assert_eq!(policy_by_name("largest_size").unwrap().name(), "largest_size");
        assert!(policy_by_name("round_robin").is_none());
    }
}
