use qfs_types::{read_le_u32, write_le_u32, BlockNumber, ParseError, INDEX_SLOTS};

/// A regular file's index block: a flat array of 1024 block-number
/// slots, zero meaning unused. The file's data blocks occupy a prefix
/// of the slots; sparse files may leave holes (zero slots inside the
/// prefix), which every consumer must skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    slots: Vec<u32>,
}

impl IndexBlock {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            slots: vec![0_u32; INDEX_SLOTS],
        }
    }

    pub fn parse_from_block(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut slots = Vec::with_capacity(INDEX_SLOTS);
        for slot in 0..INDEX_SLOTS {
            slots.push(read_le_u32(bytes, slot * 4)?);
        }
        Ok(Self { slots })
    }

    pub fn encode_into(&self, bytes: &mut [u8]) -> Result<(), ParseError> {
        for (slot, value) in self.slots.iter().enumerate() {
            write_le_u32(bytes, slot * 4, *value)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn slot(&self, idx: usize) -> Option<BlockNumber> {
        let value = *self.slots.get(idx)?;
        (value != 0).then_some(BlockNumber(value))
    }

    pub fn set_slot(&mut self, idx: usize, block: BlockNumber) {
        self.slots[idx] = block.0;
    }

    /// First unused slot, if any.
    #[must_use]
    pub fn first_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|v| *v == 0)
    }

    /// Non-zero block numbers among the first `count` slots, in slot
    /// order. Used by destroy to scrub a file's data blocks.
    pub fn data_blocks(&self, count: usize) -> impl Iterator<Item = BlockNumber> + '_ {
        self.slots
            .iter()
            .take(count.min(INDEX_SLOTS))
            .filter(|v| **v != 0)
            .map(|v| BlockNumber(*v))
    }
}
