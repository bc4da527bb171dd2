//! Shared-prefix (delta) key encoding state.
//!
//! Both sides keep the previously seen key and express the next key as a
//! shared-prefix length plus the unshared suffix. Resetting the state at a
//! restart point forces the next key to encode with a zero shared prefix,
//! which is what makes restart points self-contained scan origins.

/// Encoder-side state: remembers the last added key.
pub struct DeltaKeyEncoder {
    prev: Vec<u8>,
}

impl DeltaKeyEncoder {
    /// Creates an encoder sized for keys up to `max_key_length` bytes.
    pub fn new(max_key_length: usize) -> Self {
        Self { prev: Vec::with_capacity(max_key_length) }
    }

    /// Clears the comparison base; the next key shares nothing.
    pub fn reset(&mut self) {
        self.prev.clear();
    }

    /// Records `key` and returns the length of the prefix it shares with
    /// the previously added key.
    pub fn add(&mut self, key: &[u8]) -> usize {
        let shared = shared_prefix_len(&self.prev, key);
        self.prev.clear();
        self.prev.extend_from_slice(key);
        shared
    }

    /// The last key added since the last reset.
    pub fn last_key(&self) -> &[u8] {
        &self.prev
    }
}

/// Decoder-side state: rebuilds keys from shared/unshared parts.
pub struct DeltaKeyDecoder {
    key: Vec<u8>,
}

impl DeltaKeyDecoder {
    /// Creates a decoder sized for keys up to `max_key_length` bytes.
    pub fn new(max_key_length: usize) -> Self {
        Self { key: Vec::with_capacity(max_key_length) }
    }

    /// Clears the reconstruction state (restart point).
    pub fn reset(&mut self) {
        self.key.clear();
    }

    /// Length of the currently held key.
    pub fn len(&self) -> usize {
        self.key.len()
    }

    /// Returns true if no key is held.
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Rebuilds the next key: keeps the first `shared` bytes of the
    /// previous key and appends `unshared`. The rebuilt key becomes the new
    /// comparison base.
    pub fn apply(&mut self, shared: usize, unshared: &[u8]) -> &[u8] {
        debug_assert!(shared <= self.key.len());
        self.key.truncate(shared);
        self.key.extend_from_slice(unshared);
        &self.key
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let len = a.len().min(b.len());
    for i in 0..len {
        if a[i] != b[i] {
            return i;
        }
    }
    len
}
