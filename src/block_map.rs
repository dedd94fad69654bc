use std::sync::Mutex;

/// Conversion table between encoded (bit) and decoded (byte) offsets,
/// filled in ascending order while the stream is decoded for the first time
/// or loaded wholesale from an index.
///
/// Once finalized, the last entry is an end-of-stream sentinel whose decoded
/// size is zero.
pub struct BlockMap {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// (encoded offset in bits, decoded offset in bytes), both strictly
    /// increasing in the encoded component.
    offsets: Vec<(u64, u64)>,
    finalized: bool,
    last_encoded_size: u64,
    last_decoded_size: u64,
}

/// One resolved entry of the map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_index: usize,
    pub encoded_offset_bits: u64,
    pub encoded_size_bits: u64,
    pub decoded_offset_bytes: u64,
    pub decoded_size_bytes: u64,
}

impl BlockInfo {
    pub fn contains(&self, decoded_offset: u64) -> bool {
        self.decoded_offset_bytes <= decoded_offset
            && decoded_offset < self.decoded_offset_bytes + self.decoded_size_bytes
    }
}

impl BlockMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append a block; duplicates of the most recent block are tolerated.
    /// Returns the decoded offset of the block.
    pub fn push(&self, encoded_offset_bits: u64, encoded_size_bits: u64, decoded_size: u64) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        assert!(!inner.finalized, "push into finalized block map");

        let decoded_offset = match inner.offsets.last() {
            None => 0,
            Some(&(last_encoded, last_decoded)) => {
                if encoded_offset_bits == last_encoded {
                    // Re-push at the same offset: keep the single entry but
                    // adopt the new sizes (a zero-size placeholder may be
                    // superseded by the real block).
                    inner.last_encoded_size = encoded_size_bits;
                    inner.last_decoded_size = decoded_size;
                    return last_decoded;
                }
                assert!(
                    encoded_offset_bits > last_encoded,
                    "block offsets must be strictly increasing"
                );
                last_decoded + inner.last_decoded_size
            }
        };

        inner.offsets.push((encoded_offset_bits, decoded_offset));
        inner.last_encoded_size = encoded_size_bits;
        inner.last_decoded_size = decoded_size;
        decoded_offset
    }

    /// Append the end-of-stream sentinel implied by the last pushed block.
    pub fn finalize(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.finalized {
            return;
        }
        if let Some(&(last_encoded, last_decoded)) = inner.offsets.last() {
            if inner.last_encoded_size != 0 || inner.last_decoded_size != 0 {
                let sentinel = (
                    last_encoded + inner.last_encoded_size,
                    last_decoded + inner.last_decoded_size,
                );
                inner.offsets.push(sentinel);
            }
        }
        inner.last_encoded_size = 0;
        inner.last_decoded_size = 0;
        inner.finalized = true;
    }

    pub fn finalized(&self) -> bool {
        self.inner.lock().unwrap().finalized
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().offsets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().offsets.len()
    }

    /// Total decoded bytes covered so far (exact once finalized).
    pub fn decoded_size(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        match inner.offsets.last() {
            None => 0,
            Some(&(_, decoded)) => decoded + inner.last_decoded_size,
        }
    }

    /// The block containing `decoded_offset`. Returns the last block when
    /// the offset lies beyond the known data.
    pub fn find_data_offset(&self, decoded_offset: u64) -> Option<BlockInfo> {
        let inner = self.inner.lock().unwrap();
        if inner.offsets.is_empty() {
            return None;
        }
        // Bisect for the last entry with decoded offset <= target.
        let index = match inner
            .offsets
            .binary_search_by_key(&decoded_offset, |&(_, decoded)| decoded)
        {
            Ok(mut found) => {
                // Duplicated decoded offsets (zero-size members): take the
                // last matching entry.
                while found + 1 < inner.offsets.len() && inner.offsets[found + 1].1 == decoded_offset
                {
                    found += 1;
                }
                found
            }
            Err(insertion) => insertion.saturating_sub(1),
        };
        Some(inner.info_at(index))
    }

    /// Entry with exactly the given encoded offset.
    pub fn get_encoded_offset(&self, encoded_offset_bits: u64) -> Option<BlockInfo> {
        let inner = self.inner.lock().unwrap();
        let index = inner
            .offsets
            .binary_search_by_key(&encoded_offset_bits, |&(encoded, _)| encoded)
            .ok()?;
        Some(inner.info_at(index))
    }

    pub fn block_info(&self, index: usize) -> Option<BlockInfo> {
        let inner = self.inner.lock().unwrap();
        if index >= inner.offsets.len() {
            return None;
        }
        Some(inner.info_at(index))
    }

    /// Replace contents from an imported index (finalizes).
    pub fn set_block_offsets(&self, offsets: Vec<(u64, u64)>) {
        let mut inner = self.inner.lock().unwrap();
        inner.offsets = offsets;
        inner.last_encoded_size = 0;
        inner.last_decoded_size = 0;
        inner.finalized = true;
    }

    pub fn block_offsets(&self) -> Vec<(u64, u64)> {
        self.inner.lock().unwrap().offsets.clone()
    }

    pub fn back(&self) -> Option<(u64, u64)> {
        self.inner.lock().unwrap().offsets.last().copied()
    }
}

impl Inner {
    fn info_at(&self, index: usize) -> BlockInfo {
        let (encoded, decoded) = self.offsets[index];
        let (encoded_size, decoded_size) = if index + 1 < self.offsets.len() {
            let (next_encoded, next_decoded) = self.offsets[index + 1];
            (next_encoded - encoded, next_decoded - decoded)
        } else {
            (self.last_encoded_size, self.last_decoded_size)
        };
        BlockInfo {
            block_index: index,
            encoded_offset_bits: encoded,
            encoded_size_bits: encoded_size,
            decoded_offset_bytes: decoded,
            decoded_size_bytes: decoded_size,
        }
    }
}

impl Default for BlockMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_accumulates_decoded_offsets() {
        let map = BlockMap::new();
        assert_eq!(map.push(0, 800, 1000), 0);
        assert_eq!(map.push(800, 800, 500), 1000);
        assert_eq!(map.push(1600, 400, 0), 1500);
        assert_eq!(map.decoded_size(), 1500);
    }

    #[test]
    fn duplicate_push_is_ignored() {
        let map = BlockMap::new();
        map.push(0, 100, 10);
        assert_eq!(map.push(0, 100, 10), 0);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn finalize_appends_sentinel() {
        let map = BlockMap::new();
        map.push(0, 800, 1000);
        map.push(800, 200, 24);
        map.finalize();
        assert!(map.finalized());
        let offsets = map.block_offsets();
        assert_eq!(offsets.last(), Some(&(1000, 1024)));

        let last = map.block_info(offsets.len() - 1).unwrap();
        assert_eq!(last.decoded_size_bytes, 0);
    }

    #[test]
    fn find_data_offset_bisects() {
        let map = BlockMap::new();
        map.push(0, 800, 1000);
        map.push(800, 800, 500);
        map.finalize();

        let info = map.find_data_offset(0).unwrap();
        assert_eq!(info.block_index, 0);
        assert!(info.contains(999));

        let info = map.find_data_offset(1000).unwrap();
        assert_eq!(info.block_index, 1);
        assert_eq!(info.decoded_offset_bytes, 1000);
        assert_eq!(info.decoded_size_bytes, 500);

        // Beyond the end: the sentinel block.
        let info = map.find_data_offset(10_000).unwrap();
        assert_eq!(info.decoded_size_bytes, 0);
    }

    #[test]
    fn encoded_offset_lookup() {
        let map = BlockMap::new();
        map.push(0, 800, 1000);
        map.push(800, 800, 500);
        assert_eq!(
            map.get_encoded_offset(800).unwrap().decoded_offset_bytes,
            1000
        );
        assert!(map.get_encoded_offset(400).is_none());
    }
}
