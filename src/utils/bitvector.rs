use std::fmt;

const WORD_BITS: usize = 64;

/// Fixed-width bit vector used as the currency between the dataflow analyses.
///
/// - The width is chosen at construction. Only `merge` and `ensure_size` grow it;
///   the other binary operations treat missing bits of the narrower side as clear.
///
/// - Unlike a growable set, `set_all` and `complement` are well defined: the bits
///   past the width are always kept clear.
///
/// - Vectors are plain values: clone to snapshot, compare with `==`.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitVector {
    words: Vec<u64>,
    num_bits: usize,
}

impl BitVector {
    pub fn new(num_bits: usize) -> Self {
        Self {
            words: vec![0; words_for(num_bits)],
            num_bits,
        }
    }

    pub fn full(num_bits: usize) -> Self {
        let mut result = Self::new(num_bits);
        result.set_all();
        result
    }

    pub fn len(&self) -> usize {
        self.num_bits
    }

    pub fn get(&self, index: usize) -> bool {
        if index >= self.num_bits {
            return false;
        }

        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index)
    }

    /// Returns the previous value of the bit.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        assert!(index < self.num_bits, "bit {} out of range {}", index, self.num_bits);
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u64 << (index % WORD_BITS);
        let old = *word & mask != 0;

        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }

        old
    }

    pub fn clear(&mut self, index: usize) -> bool {
        self.set(index, false)
    }

    pub fn set_all(&mut self) {
        for word in self.words.iter_mut() {
            *word = !0;
        }

        self.trim();
    }

    pub fn clear_all(&mut self) {
        for word in self.words.iter_mut() {
            *word = 0;
        }
    }

    /// Grows the width; new bits are clear. Never shrinks.
    pub fn ensure_size(&mut self, num_bits: usize) {
        if num_bits <= self.num_bits {
            return;
        }

        self.words.resize(words_for(num_bits), 0);
        self.num_bits = num_bits;
    }

    /// `self |= other`. Grows `self` to the width of `other`.
    pub fn merge(&mut self, other: &Self) {
        self.ensure_size(other.num_bits);
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= *b;
        }
    }

    /// `self &= other`. Bits past the width of `other` are cleared.
    pub fn filter(&mut self, other: &Self) {
        for (i, a) in self.words.iter_mut().enumerate() {
            *a &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// `self -= other`
    pub fn exclude(&mut self, other: &Self) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= !*b;
        }
    }

    pub fn complement(&mut self) {
        for word in self.words.iter_mut() {
            *word = !*word;
        }

        self.trim();
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn bit_count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.words
            .iter()
            .enumerate()
            .all(|(i, a)| *a & !other.words.get(i).copied().unwrap_or(0) == 0)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| *a & *b != 0)
    }

    /// Index of the first bit at or after `index` equal to `value`, or `len()`.
    pub fn find_bit(&self, index: usize, value: bool) -> usize {
        (index..self.num_bits)
            .find(|bit| self.get(*bit) == value)
            .unwrap_or(self.num_bits)
    }

    pub fn iter(&self) -> BitVectorIter<'_> {
        BitVectorIter {
            vector: self,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    fn trim(&mut self) {
        let tail = self.num_bits % WORD_BITS;

        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}

fn words_for(num_bits: usize) -> usize {
    (num_bits + WORD_BITS - 1) / WORD_BITS
}

/// Iterates set bits in increasing order.
pub struct BitVectorIter<'a> {
    vector: &'a BitVector,
    word_index: usize,
    current: u64,
}

impl<'a> Iterator for BitVectorIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_index * WORD_BITS + bit);
            }

            self.word_index += 1;

            if self.word_index >= self.vector.words.len() {
                return None;
            }

            self.current = self.vector.words[self.word_index];
        }
    }
}

impl fmt::Debug for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
