//! Directory-table operations: lookup, create, unlink, rmdir, rename.
//!
//! Every table mutation is a read-modify-write of the directory's
//! index block performed under that directory's meta lock, so the
//! packing invariant (no sentinel before a live entry) holds on disk
//! between operations. Operations touching two inodes take their
//! locks in ascending inode-number order.

use crate::fs::{DirEntryInfo, QuicheFs, RenameFlags};
use crate::inode::{unix_now, Inode, InodeSlot};
use qfs_error::{QfsError, Result};
use qfs_ondisk::{DirEntry, FileKind, S_IFDIR, S_IFREG};
use qfs_types::InodeNumber;
use std::sync::Arc;
use tracing::debug;

fn require_dir(meta: &Inode) -> Result<()> {
    if meta.is_dir() {
        Ok(())
    } else {
        Err(QfsError::InvalidKind { mode: meta.mode })
    }
}

fn not_found(name: &[u8]) -> QfsError {
    QfsError::NotFound(String::from_utf8_lossy(name).into_owned())
}

fn already_exists(name: &[u8]) -> QfsError {
    QfsError::AlreadyExists(String::from_utf8_lossy(name).into_owned())
}

impl QuicheFs {
    /// Find `name` in a directory, updating the directory's atime.
    pub fn lookup_child(&self, dir: InodeNumber, name: &[u8]) -> Result<InodeNumber> {
        Self::check_name(name)?;
        let slot = self.iget(dir)?;
        let mut meta = slot.meta.lock();
        require_dir(&meta)?;
        let table = self.read_table(&meta)?;
        let found = table
            .position_of_name(name)
            .map(|pos| table.entry(pos).inode);
        // The scan itself counts as an access: atime moves whether or
        // not the name is present.
        meta.atime = unix_now();
        self.write_inode(&meta)?;
        found.ok_or_else(|| not_found(name))
    }

    /// List a directory's live entries in slot order.
    pub fn read_dir(&self, dir: InodeNumber) -> Result<Vec<DirEntryInfo>> {
        let slot = self.iget(dir)?;
        let meta = slot.meta.lock();
        require_dir(&meta)?;
        let table = self.read_table(&meta)?;
        Ok(table
            .live_entries()
            .map(|e| DirEntryInfo {
                name: String::from_utf8_lossy(e.name()).into_owned(),
                ino: e.inode.0,
            })
            .collect())
    }

    /// Create a regular file with default permissions.
    pub fn create_file(&self, dir: InodeNumber, name: &[u8]) -> Result<InodeNumber> {
        self.create_entry(dir, name, S_IFREG | 0o644)
    }

    /// Create a subdirectory with default permissions.
    pub fn make_directory(&self, dir: InodeNumber, name: &[u8]) -> Result<InodeNumber> {
        self.create_entry(dir, name, S_IFDIR | 0o755)
    }

    /// Create a file or directory named `name` under `dir`.
    ///
    /// A full directory table does not fail the create outright: the
    /// reclamation engine first evicts one file from the tree rooted
    /// at `dir`, and the create retries against the (possibly still
    /// full) table. Nothing allocated for the new child survives a
    /// failure; the unwind runs in reverse allocation order.
    pub fn create_entry(&self, dir: InodeNumber, name: &[u8], mode: u32) -> Result<InodeNumber> {
        let kind = FileKind::from_mode(mode).ok_or(QfsError::InvalidKind { mode })?;
        Self::check_name(name)?;
        let dir_slot = self.iget(dir)?;

        let was_full = {
            let meta = dir_slot.meta.lock();
            require_dir(&meta)?;
            let table = self.read_table(&meta)?;
            if table.position_of_name(name).is_some() {
                return Err(already_exists(name));
            }
            table.is_full()
        };
        if was_full {
            let evicted = self.reclaim_space(dir)?;
            debug!(dir = dir.0, evicted = evicted.0, "reclaimed ahead of create");
        }

        let child = self.new_inode(kind)?;
        let child_ino = child.ino;

        let linked = (|| {
            {
                let mut child_meta = child.meta.lock();
                child_meta.mode = kind.mode_bits() | (mode & 0o7777);
                self.write_inode(&child_meta)?;
            }

            let mut meta = dir_slot.meta.lock();
            let mut table = self.read_table(&meta)?;
            if table.position_of_name(name).is_some() {
                return Err(already_exists(name));
            }
            if table.insert(DirEntry::new(child_ino, name)).is_none() {
                // Reclaim freed a slot somewhere below, but not in
                // this directory's own table.
                return Err(QfsError::DirectoryFull);
            }
            self.write_table(&meta, &table)?;

            meta.touch(unix_now());
            if kind == FileKind::Directory {
                meta.nlink += 1;
            }
            self.write_inode(&meta)
        })();
        if let Err(err) = linked {
            self.abandon_new_inode(&child);
            return Err(err);
        }

        debug!(
            dir = dir.0,
            ino = child_ino.0,
            name = %String::from_utf8_lossy(name),
            "created entry"
        );
        Ok(child_ino)
    }

    /// Unlink a regular file from a directory, destroying the inode
    /// when its last link goes.
    pub fn remove_entry(&self, dir: InodeNumber, name: &[u8]) -> Result<()> {
        let (parent, child) = self.resolve_pair(dir, name)?;
        {
            let meta = child.meta.lock();
            if meta.is_dir() {
                return Err(QfsError::InvalidKind { mode: meta.mode });
            }
        }
        self.unlink_loaded(&parent, &child)
    }

    /// Remove an empty subdirectory.
    pub fn remove_directory(&self, dir: InodeNumber, name: &[u8]) -> Result<()> {
        let (parent, child) = self.resolve_pair(dir, name)?;
        {
            let meta = child.meta.lock();
            require_dir(&meta)?;
            if meta.nlink > 2 {
                return Err(QfsError::NotEmpty);
            }
            let table = self.read_table(&meta)?;
            if !table.is_empty() {
                return Err(QfsError::NotEmpty);
            }
        }
        self.unlink_loaded(&parent, &child)
    }

    /// Move `old_name` in `old_dir` to `new_name` in `new_dir`.
    ///
    /// Exchange and whiteout semantics are not supported. A collision
    /// on the target name fails the whole operation with both tables
    /// untouched; the entry is inserted into the new directory before
    /// it is removed from the old one, so a crash in between leaves a
    /// double link rather than a lost file.
    pub fn rename_entry(
        &self,
        old_dir: InodeNumber,
        old_name: &[u8],
        new_dir: InodeNumber,
        new_name: &[u8],
        flags: RenameFlags,
    ) -> Result<()> {
        if flags.exchange || flags.whiteout {
            return Err(QfsError::Unsupported("rename exchange/whiteout"));
        }
        Self::check_name(old_name)?;
        Self::check_name(new_name)?;

        if old_dir == new_dir {
            return self.rename_in_place(old_dir, old_name, new_name);
        }

        let old_slot = self.iget(old_dir)?;
        let new_slot = self.iget(new_dir)?;
        let mut old_guard;
        let mut new_guard;
        if old_dir.0 < new_dir.0 {
            old_guard = old_slot.meta.lock();
            new_guard = new_slot.meta.lock();
        } else {
            new_guard = new_slot.meta.lock();
            old_guard = old_slot.meta.lock();
        }
        require_dir(&old_guard)?;
        require_dir(&new_guard)?;

        let mut old_table = self.read_table(&old_guard)?;
        let pos = old_table
            .position_of_name(old_name)
            .ok_or_else(|| not_found(old_name))?;
        let child_ino = old_table.entry(pos).inode;

        let mut new_table = self.read_table(&new_guard)?;
        if new_table.position_of_name(new_name).is_some() {
            return Err(already_exists(new_name));
        }

        let child_is_dir = {
            let child = self.iget(child_ino)?;
            let meta = child.meta.lock();
            meta.is_dir()
        };

        if new_table
            .insert(DirEntry::new(child_ino, new_name))
            .is_none()
        {
            return Err(QfsError::DirectoryFull);
        }
        self.write_table(&new_guard, &new_table)?;

        let now = unix_now();
        new_guard.touch(now);
        if child_is_dir {
            new_guard.nlink += 1;
        }
        self.write_inode(&new_guard)?;

        old_table.remove_at(pos);
        self.write_table(&old_guard, &old_table)?;
        old_guard.touch(now);
        if child_is_dir {
            old_guard.nlink -= 1;
        }
        self.write_inode(&old_guard)?;

        debug!(
            from = old_dir.0,
            to = new_dir.0,
            ino = child_ino.0,
            "renamed across directories"
        );
        Ok(())
    }

    /// Same-directory rename: overwrite the name in its slot. The
    /// slot keeps its position, so the table stays packed by
    /// construction, and no timestamps change.
    fn rename_in_place(&self, dir: InodeNumber, old_name: &[u8], new_name: &[u8]) -> Result<()> {
        let slot = self.iget(dir)?;
        let meta = slot.meta.lock();
        require_dir(&meta)?;
        let mut table = self.read_table(&meta)?;
        if old_name != new_name && table.position_of_name(new_name).is_some() {
            return Err(already_exists(new_name));
        }
        let pos = table
            .position_of_name(old_name)
            .ok_or_else(|| not_found(old_name))?;
        table.entry_mut(pos).set_name(new_name);
        self.write_table(&meta, &table)
    }

    /// Resolve `name` under `dir` to the loaded parent and child slots.
    fn resolve_pair(
        &self,
        dir: InodeNumber,
        name: &[u8],
    ) -> Result<(Arc<InodeSlot>, Arc<InodeSlot>)> {
        Self::check_name(name)?;
        let parent = self.iget(dir)?;
        let child_ino = {
            let meta = parent.meta.lock();
            require_dir(&meta)?;
            let table = self.read_table(&meta)?;
            let pos = table.position_of_name(name).ok_or_else(|| not_found(name))?;
            table.entry(pos).inode
        };
        let child = self.iget(child_ino)?;
        Ok((parent, child))
    }

    /// Drop the link from `parent` to `child` and dispose of the
    /// child: directories are destroyed outright (callers have
    /// verified emptiness), files lose one link and are destroyed at
    /// zero. Shared by unlink, rmdir, and the eviction engine.
    pub(crate) fn unlink_loaded(
        &self,
        parent: &Arc<InodeSlot>,
        child: &Arc<InodeSlot>,
    ) -> Result<()> {
        let mut parent_guard;
        let mut child_guard;
        if parent.ino.0 < child.ino.0 {
            parent_guard = parent.meta.lock();
            child_guard = child.meta.lock();
        } else {
            child_guard = child.meta.lock();
            parent_guard = parent.meta.lock();
        }

        let mut table = self.read_table(&parent_guard)?;
        let pos = table
            .position_of_inode(child.ino)
            .ok_or_else(|| QfsError::NotFound(format!("inode {}", child.ino)))?;
        table.remove_at(pos);
        self.write_table(&parent_guard, &table)?;

        let now = unix_now();
        let child_is_dir = child_guard.is_dir();
        parent_guard.touch(now);
        if child_is_dir {
            parent_guard.nlink -= 1;
        }
        self.write_inode(&parent_guard)?;

        if child_is_dir {
            self.destroy_inode(&mut child_guard)
        } else {
            child_guard.nlink = child_guard.nlink.saturating_sub(1);
            child_guard.ctime = now;
            if child_guard.nlink == 0 {
                self.destroy_inode(&mut child_guard)
            } else {
                self.write_inode(&child_guard)
            }
        }
    }
}
