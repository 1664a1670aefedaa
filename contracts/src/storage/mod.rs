//! Persistent storage owned by a single proxy instance.
//!
//! [`Storage`] is a sparse map of 32-byte words addressed by [`U256`] slots,
//! the same shape as EVM contract storage. Slots that were never written read
//! as zero, and writing zero clears the slot.
//!
//! Writes made while a [`Checkpoint`] is open are journaled, so a failed
//! invocation can roll back everything it touched with
//! [`Storage::revert_to`].
use std::collections::BTreeMap;

use alloy_primitives::{keccak256, Address, B256, U256};

pub mod layout;

pub use layout::{Field, FieldType, StorageLayout};

/// A value that fits in a single storage word.
pub trait StorageValue: Sized {
    /// Decodes the value from a storage word.
    fn from_word(word: B256) -> Self;

    /// Encodes the value into a storage word.
    fn into_word(self) -> B256;
}

impl StorageValue for B256 {
    fn from_word(word: B256) -> Self {
        word
    }

    fn into_word(self) -> B256 {
        self
    }
}

impl StorageValue for U256 {
    fn from_word(word: B256) -> Self {
        U256::from_be_bytes(word.0)
    }

    fn into_word(self) -> B256 {
        B256::from(self.to_be_bytes::<32>())
    }
}

impl StorageValue for Address {
    fn from_word(word: B256) -> Self {
        Address::from_slice(&word[12..])
    }

    fn into_word(self) -> B256 {
        B256::left_padding_from(self.as_slice())
    }
}

impl StorageValue for bool {
    fn from_word(word: B256) -> Self {
        !word.is_zero()
    }

    fn into_word(self) -> B256 {
        B256::with_last_byte(u8::from(self))
    }
}

impl StorageValue for u64 {
    fn from_word(word: B256) -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&word[24..]);
        u64::from_be_bytes(bytes)
    }

    fn into_word(self) -> B256 {
        U256::from(self).into_word()
    }
}

impl StorageValue for u128 {
    fn from_word(word: B256) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&word[16..]);
        u128::from_be_bytes(bytes)
    }

    fn into_word(self) -> B256 {
        U256::from(self).into_word()
    }
}

/// A position in the storage journal that writes can be rolled back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Checkpoint(usize);

/// Slot storage of a proxy instance.
#[derive(Debug, Clone, Default)]
pub struct Storage {
    slots: BTreeMap<U256, B256>,
    /// Previous word of every slot written since the outermost open
    /// checkpoint.
    journal: Vec<(U256, B256)>,
    open_checkpoints: usize,
}

impl Storage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw word at `slot`.
    ///
    /// # Arguments
    ///
    /// * `&self` - Read access to the storage.
    /// * `slot` - Slot to read.
    #[must_use]
    pub fn get_word(&self, slot: U256) -> B256 {
        self.slots.get(&slot).copied().unwrap_or_default()
    }

    /// Stores the raw `word` at `slot`.
    ///
    /// # Arguments
    ///
    /// * `&mut self` - Write access to the storage.
    /// * `slot` - Slot to write.
    /// * `word` - New contents of the slot.
    pub fn set_word(&mut self, slot: U256, word: B256) {
        let previous = self.write(slot, word);
        if self.open_checkpoints > 0 {
            self.journal.push((slot, previous));
        }
    }

    /// Reads the value stored at `slot`.
    #[must_use]
    pub fn get<T: StorageValue>(&self, slot: U256) -> T {
        T::from_word(self.get_word(slot))
    }

    /// Stores `value` at `slot`.
    pub fn set<T: StorageValue>(&mut self, slot: U256, value: T) {
        self.set_word(slot, value.into_word());
    }

    /// Returns the slot holding `key` of a mapping declared at `base`.
    ///
    /// The derivation is `keccak256(key ‖ base)`, the one Solidity uses, so
    /// entries of distinct mappings never collide with each other or with
    /// positional slots.
    #[must_use]
    pub fn mapping_slot<K: StorageValue>(base: U256, key: K) -> U256 {
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(key.into_word().as_slice());
        preimage[32..].copy_from_slice(&base.to_be_bytes::<32>());
        U256::from_be_bytes(keccak256(preimage).0)
    }

    /// Number of non-zero slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no slot holds a non-zero word.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates over non-zero slots in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&U256, &B256)> {
        self.slots.iter()
    }

    /// Opens a checkpoint. Every write from now on can be undone with
    /// [`Storage::revert_to`] until the checkpoint is closed.
    ///
    /// Checkpoints nest; each one must be closed by exactly one call to
    /// [`Storage::commit`] or [`Storage::revert_to`], innermost first.
    pub fn checkpoint(&mut self) -> Checkpoint {
        self.open_checkpoints += 1;
        Checkpoint(self.journal.len())
    }

    /// Undoes every write made since `checkpoint` was opened and closes it.
    pub fn revert_to(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            if let Some((slot, previous)) = self.journal.pop() {
                self.write(slot, previous);
            }
        }
        self.close();
    }

    /// Keeps every write made since `checkpoint` was opened and closes it.
    ///
    /// Writes stay revertible by enclosing checkpoints until the outermost
    /// one is committed.
    pub fn commit(&mut self, _checkpoint: Checkpoint) {
        self.close();
    }

    fn close(&mut self) {
        self.open_checkpoints = self.open_checkpoints.saturating_sub(1);
        if self.open_checkpoints == 0 {
            self.journal.clear();
        }
    }

    fn write(&mut self, slot: U256, word: B256) -> B256 {
        let previous = if word.is_zero() {
            self.slots.remove(&slot)
        } else {
            self.slots.insert(slot, word)
        };
        previous.unwrap_or_default()
    }
}
