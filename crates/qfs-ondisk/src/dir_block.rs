use qfs_types::{
    ensure_slice, read_le_u32, write_le_u32, InodeNumber, ParseError, DIR_ENTRY_SIZE, FILENAME_LEN,
    MAX_SUBFILES,
};

/// One directory-table entry: a child inode number and a fixed-width,
/// NUL-padded name. `inode == 0` marks the end-of-list sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: InodeNumber,
    name: [u8; FILENAME_LEN],
}

impl DirEntry {
    /// Build an entry. The caller must have validated the name length
    /// (`qfs-core` rejects long names with `NameTooLong` before any
    /// codec work happens).
    #[must_use]
    pub fn new(inode: InodeNumber, name: &[u8]) -> Self {
        let mut fixed = [0_u8; FILENAME_LEN];
        let len = name.len().min(FILENAME_LEN);
        fixed[..len].copy_from_slice(&name[..len]);
        Self { inode, name: fixed }
    }

    /// The sentinel: zero inode, zero name.
    #[must_use]
    pub fn sentinel() -> Self {
        Self {
            inode: InodeNumber(0),
            name: [0_u8; FILENAME_LEN],
        }
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.inode.0 == 0
    }

    /// Name bytes with the zero padding stripped.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(FILENAME_LEN);
        &self.name[..end]
    }

    /// Overwrite the name in place (same-directory rename).
    pub fn set_name(&mut self, name: &[u8]) {
        self.name = [0_u8; FILENAME_LEN];
        let len = name.len().min(FILENAME_LEN);
        self.name[..len].copy_from_slice(&name[..len]);
    }

    fn parse(bytes: &[u8], offset: usize) -> Result<Self, ParseError> {
        let inode = InodeNumber(read_le_u32(bytes, offset)?);
        let name_bytes = ensure_slice(bytes, offset + 4, FILENAME_LEN)?;
        let mut name = [0_u8; FILENAME_LEN];
        name.copy_from_slice(name_bytes);
        Ok(Self { inode, name })
    }

    fn encode(&self, bytes: &mut [u8], offset: usize) -> Result<(), ParseError> {
        write_le_u32(bytes, offset, self.inode.0)?;
        if offset + DIR_ENTRY_SIZE > bytes.len() {
            return Err(ParseError::InsufficientData {
                needed: DIR_ENTRY_SIZE,
                offset,
                actual: bytes.len().saturating_sub(offset),
            });
        }
        bytes[offset + 4..offset + DIR_ENTRY_SIZE].copy_from_slice(&self.name);
        Ok(())
    }
}

/// A directory's fixed-capacity table of children, decoded from its
/// index block.
///
/// Invariant: entries are packed, meaning no sentinel appears before a
/// non-sentinel entry. Every mutator here preserves that; the
/// directory manager in `qfs-core` performs the surrounding block
/// read-modify-write as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBlock {
    entries: Vec<DirEntry>,
}

impl DirBlock {
    /// An empty table (all sentinel slots).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: vec![DirEntry::sentinel(); MAX_SUBFILES],
        }
    }

    pub fn parse_from_block(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut entries = Vec::with_capacity(MAX_SUBFILES);
        for slot in 0..MAX_SUBFILES {
            entries.push(DirEntry::parse(bytes, slot * DIR_ENTRY_SIZE)?);
        }
        Ok(Self { entries })
    }

    pub fn encode_into(&self, bytes: &mut [u8]) -> Result<(), ParseError> {
        for (slot, entry) in self.entries.iter().enumerate() {
            entry.encode(bytes, slot * DIR_ENTRY_SIZE)?;
        }
        Ok(())
    }

    /// Live entries, in slot order, stopping at the sentinel.
    pub fn live_entries(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().take_while(|e| !e.is_sentinel())
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_entries().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries[0].is_sentinel()
    }

    /// Whether the table has no free slot left.
    #[must_use]
    pub fn is_full(&self) -> bool {
        !self.entries[MAX_SUBFILES - 1].is_sentinel()
    }

    /// Linear scan for a name among the live entries.
    #[must_use]
    pub fn position_of_name(&self, name: &[u8]) -> Option<usize> {
        self.live_entries().position(|e| e.name() == name)
    }

    /// Linear scan for a child inode number among the live entries.
    #[must_use]
    pub fn position_of_inode(&self, inode: InodeNumber) -> Option<usize> {
        self.live_entries().position(|e| e.inode == inode)
    }

    #[must_use]
    pub fn entry(&self, slot: usize) -> &DirEntry {
        &self.entries[slot]
    }

    #[must_use]
    pub fn entry_mut(&mut self, slot: usize) -> &mut DirEntry {
        &mut self.entries[slot]
    }

    /// Write into the first sentinel slot, preserving packing.
    /// Returns the slot used, or `None` when the table is full.
    pub fn insert(&mut self, entry: DirEntry) -> Option<usize> {
        let slot = self.entries.iter().position(DirEntry::is_sentinel)?;
        self.entries[slot] = entry;
        Some(slot)
    }

    /// Remove the entry at `slot`, shifting all later live entries
    /// left by one and clearing the vacated last slot.
    pub fn remove_at(&mut self, slot: usize) {
        let live = self.len();
        debug_assert!(slot < live, "remove_at on a sentinel slot");
        self.entries.copy_within(slot + 1..live, slot);
        self.entries[live - 1] = DirEntry::sentinel();
    }

    /// Packing check used by tests and debug assertions: once a
    /// sentinel appears, every later slot must also be a sentinel.
    #[must_use]
    pub fn is_packed(&self) -> bool {
        let live = self.len();
        self.entries[live..].iter().all(DirEntry::is_sentinel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qfs_types::BLOCK_SIZE;

    fn entry(ino: u32, name: &str) -> DirEntry {
        DirEntry::new(InodeNumber(ino), name.as_bytes())
    }

    #[test]
    fn encode_parse_round_trip() {
        let mut table = DirBlock::empty();
        table.insert(entry(3, "kernel.img")).unwrap();
        table.insert(entry(7, "notes")).unwrap();

        let mut block = vec![0_u8; BLOCK_SIZE];
        table.encode_into(&mut block).unwrap();
        let parsed = DirBlock::parse_from_block(&block).unwrap();
        assert_eq!(parsed, table);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.entry(0).name(), b"kernel.img");
    }

    #[test]
    fn remove_packs_the_table() {
        let mut table = DirBlock::empty();
        for i in 1..=5 {
            table.insert(entry(i, &format!("f{i}"))).unwrap();
        }

        table.remove_at(1);
        assert_eq!(table.len(), 4);
        assert!(table.is_packed());
        assert_eq!(table.entry(1).name(), b"f3");
        assert_eq!(table.entry(3).name(), b"f5");
        assert!(table.entry(4).is_sentinel());
    }

    #[test]
    fn remove_last_entry_clears_slot() {
        let mut table = DirBlock::empty();
        table.insert(entry(1, "only")).unwrap();
        table.remove_at(0);
        assert!(table.is_empty());
        assert!(table.is_packed());
    }

    #[test]
    fn insert_fails_when_full() {
        let mut table = DirBlock::empty();
        for i in 0..MAX_SUBFILES {
            assert!(table.insert(entry(i as u32 + 1, &format!("f{i}"))).is_some());
        }
        assert!(table.is_full());
        assert!(table.insert(entry(999, "overflow")).is_none());
    }

    #[test]
    fn name_lookup_stops_at_sentinel() {
        let mut table = DirBlock::empty();
        table.insert(entry(1, "a")).unwrap();
        // A stale name after the sentinel must be invisible.
        table.entry_mut(2).set_name(b"ghost");
        assert_eq!(table.position_of_name(b"a"), Some(0));
        assert_eq!(table.position_of_name(b"ghost"), None);
    }
}
