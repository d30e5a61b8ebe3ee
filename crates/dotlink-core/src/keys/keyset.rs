//! A growable bitset of held key indices.

/// Set of key indices, stored as a packed bitset.
///
/// Routing groups can have more than 64 keys, so storage grows in 64-bit
/// words as needed.  Iteration is always in ascending index order.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    words: Vec<u64>,
}

impl PartialEq for KeySet {
    fn eq(&self, other: &Self) -> bool {
        let (short, long) = if self.words.len() <= other.words.len() {
            (&self.words, &other.words)
        } else {
            (&other.words, &self.words)
        };
        short.iter().zip(long.iter()).all(|(a, b)| a == b)
            && long[short.len()..].iter().all(|w| *w == 0)
    }
}

impl Eq for KeySet {}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from the low bits of `bits` (bit `n` = key `n`).
    pub fn from_bits(bits: u64) -> Self {
        let mut set = Self::new();
        if bits != 0 {
            set.words.push(bits);
        }
        set
    }

    /// Builds a set from a little-endian bit vector: bit 0 of byte 0 is key
    /// 0, bit 7 of byte 0 is key 7, bit 0 of byte 1 is key 8, and so on.
    /// Bits at or beyond `key_count` are ignored.
    pub fn from_bit_vector(bytes: &[u8], key_count: usize) -> Self {
        let mut set = Self::new();
        for key in 0..key_count.min(bytes.len() * 8) {
            if bytes[key / 8] & (1 << (key % 8)) != 0 {
                set.insert(key);
            }
        }
        set
    }

    pub fn insert(&mut self, key: usize) {
        let (word, bit) = (key / 64, key % 64);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << bit;
    }

    pub fn remove(&mut self, key: usize) {
        let (word, bit) = (key / 64, key % 64);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1 << bit);
        }
    }

    pub fn contains(&self, key: usize) -> bool {
        let (word, bit) = (key / 64, key % 64);
        self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }

    /// Held keys in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| i * 64 + bit)
        })
    }
}

impl FromIterator<usize> for KeySet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}
