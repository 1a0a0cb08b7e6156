/*!
Index of the heaps of a process.
*/

use hashbrown::HashMap;
use log::{debug, warn};

use super::OsBackend;
use crate::types::range::HEAP_NAME_PREFIX;
use crate::types::Address;

/// Maps heap base addresses to their ordinal in the enumeration.
///
/// An index is only meaningful for the duration of a single region scan.
#[derive(Clone, Debug, Default)]
pub struct HeapIndex {
    heaps: HashMap<Address, usize>,
}

impl HeapIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Queries the heaps of the process behind `os`.
    ///
    /// A failing query is not an error, it just produces an empty index.
    pub fn query<B: OsBackend>(os: &mut B) -> Self {
        match os.heap_list() {
            Ok(list) => {
                let index = Self::from_bases(list);
                debug!("found {} heaps", index.len());
                index
            }
            Err(err) => {
                warn!("unable to enumerate heaps: {}", err);
                Self::empty()
            }
        }
    }

    /// Builds an index from heap bases in enumeration order.
    pub fn from_bases<I: IntoIterator<Item = Address>>(bases: I) -> Self {
        let heaps = bases
            .into_iter()
            .enumerate()
            .map(|(i, base)| (base, i))
            .collect();
        Self { heaps }
    }

    pub fn get(&self, base: Address) -> Option<usize> {
        self.heaps.get(&base).copied()
    }

    /// Returns the display name of the heap at `base`.
    pub fn name(&self, base: Address) -> Option<String> {
        self.get(base)
            .map(|idx| format!("{}{}", HEAP_NAME_PREFIX, idx))
    }

    pub fn len(&self) -> usize {
        self.heaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heaps.is_empty()
    }
}
