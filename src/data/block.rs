/// Number of samples held by a single [`Block`]. Compile-time fixed.
pub const BLOCK_SIZE: usize = 10_000;

/// Fixed index of the timestamp field within a sample.
pub const TIMESTAMP_FIELD: usize = 0;

/// A fixed-capacity chunk of a [`Run`](super::Run), stored column-major:
/// each field has its own contiguous `Vec<u64>` of length `len`, capacity
/// [`BLOCK_SIZE`]. Only the last block of a run may be partially filled.
pub struct Block {
    fields: Vec<Vec<u64>>,
    len: usize,
}

impl Block {
    /// Allocates an empty block with `nfields` columns.
    pub fn new(nfields: usize) -> Self {
        let fields = (0..nfields).map(|_| Vec::with_capacity(BLOCK_SIZE)).collect();
        Block { fields, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_full(&self) -> bool {
        self.len == BLOCK_SIZE
    }

    pub fn nfields(&self) -> usize {
        self.fields.len()
    }

    /// Appends one sample's worth of field values. `sample` must have
    /// exactly `nfields()` entries. Panics if the block is already full;
    /// callers (the run) are responsible for rotating to a fresh block
    /// first.
    pub fn push(&mut self, sample: &[u64]) {
        assert!(!self.is_full(), "push into a full block");
        assert_eq!(sample.len(), self.fields.len(), "sample field count mismatch");
        for (column, &value) in self.fields.iter_mut().zip(sample) {
            column.push(value);
        }
        self.len += 1;
    }

    /// Reads field `field` of sample `index` within this block.
    pub fn field(&self, field: usize, index: usize) -> u64 {
        self.fields[field][index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_block_is_empty_and_not_full() {
        let block = Block::new(2);
        assert_eq!(block.len(), 0);
        assert!(!block.is_full());
    }

    #[test]
    fn push_stores_fields_column_wise() {
        let mut block = Block::new(2);
        block.push(&[100, 5]);
        block.push(&[200, 7]);
        assert_eq!(block.len(), 2);
        assert_eq!(block.field(0, 0), 100);
        assert_eq!(block.field(0, 1), 200);
        assert_eq!(block.field(1, 0), 5);
        assert_eq!(block.field(1, 1), 7);
    }

    #[test]
    #[should_panic]
    fn push_into_full_block_panics() {
        let mut block = Block::new(1);
        for i in 0..BLOCK_SIZE as u64 {
            block.push(&[i]);
        }
        block.push(&[0]);
    }
}
