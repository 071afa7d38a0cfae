//! BitSet class; we use it to flag local vertices, such as the dangling ones.

/// Simple BitSet class, using 64-bit unsigned ints to track flags
#[derive(Clone, Debug)]
pub struct BitSet {
    bitfield: Vec<u64>,
    size: usize
}

impl BitSet {
    pub fn new(size: usize) -> Self {
        Self { bitfield: vec![0; (size / 64) + 1], size }
    }

    fn get_bit_idx(&self, idx: &usize) -> (usize, u64) {
        let field_offset = idx / 64;
        let bit_offset = idx % 64;
        (field_offset, 1u64 << bit_offset)
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_set(&self, idx: usize) -> bool {
        let (fo, bm) = self.get_bit_idx(&idx);
        (self.bitfield[fo] & bm) > 0
    }

    pub fn set_bit(&mut self, idx: usize) {
        debug_assert!(idx < self.size);
        let (fo, bm) = self.get_bit_idx(&idx);
        self.bitfield[fo] |= bm;
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.bitfield.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Indices of the set bits, ascending
    pub fn iter(&self) -> impl Iterator<Item=usize> + '_ {
        self.bitfield.iter().enumerate().flat_map(|(fo, word)| {
            let mut w = *word;
            std::iter::from_fn(move || {
                if w == 0 { return None }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(fo * 64 + bit)
            })
        })
    }

}
