//! Address Resolution
//!
//! Maps opaque node addresses (typically hardware addresses) to the dense
//! slot indices used by the position registry.

use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;

/// Resolves a node address to its slot index.
///
/// The registry only ever reads through this trait; the owner of the
/// implementation is free to update it concurrently.
pub trait AddressResolver: Send + Sync {
    /// Returns the index for `address`, or `None` if it is unknown
    fn resolve(&self, address: &str) -> Option<usize>;
}

impl AddressResolver for HashMap<String, usize> {
    fn resolve(&self, address: &str) -> Option<usize> {
        self.get(address).copied()
    }
}

// =============================================================================
// Address Book
// =============================================================================

/// Bidirectional address <-> index map bounded by a slot capacity
#[derive(Debug)]
pub struct AddressBook {
    capacity: usize,
    by_address: DashMap<String, usize>,
    by_index: DashMap<usize, String>,
}

impl AddressBook {
    /// Create an empty address book for `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            by_address: DashMap::with_capacity(capacity),
            by_index: DashMap::with_capacity(capacity),
        }
    }

    /// Build an address book assigning dense indices in iteration order
    pub fn from_addresses<I, S>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();
        let book = Self::new(addresses.len());
        for (index, address) in addresses.into_iter().enumerate() {
            book.insert(address, index)?;
        }
        Ok(book)
    }

    /// Map `address` to `index`.
    ///
    /// Re-inserting an identical pair is a no-op. An address may map to only
    /// one index and an index may carry only one address.
    pub fn insert(&self, address: impl Into<String>, index: usize) -> Result<()> {
        let address = address.into();
        if index >= self.capacity {
            return Err(Error::IndexOutOfRange {
                index,
                capacity: self.capacity,
            });
        }

        // Lock order: by_address entry, then by_index entry.
        match self.by_address.entry(address.clone()) {
            Entry::Occupied(existing) => {
                if *existing.get() == index {
                    Ok(())
                } else {
                    Err(Error::AddressAlreadyMapped {
                        address,
                        index: *existing.get(),
                    })
                }
            }
            Entry::Vacant(vacant) => match self.by_index.entry(index) {
                Entry::Occupied(_) => Err(Error::AddressAlreadyMapped { address, index }),
                Entry::Vacant(slot) => {
                    slot.insert(address);
                    vacant.insert(index);
                    Ok(())
                }
            },
        }
    }

    /// Address assigned to `index`, if any
    pub fn address_of(&self, index: usize) -> Option<String> {
        self.by_index.get(&index).map(|entry| entry.value().clone())
    }

    /// Number of slots this book can address
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of mapped addresses
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

impl AddressResolver for AddressBook {
    fn resolve(&self, address: &str) -> Option<usize> {
        self.by_address.get(address).map(|entry| *entry.value())
    }
}
