use memsc_lib::{ScanValue, ValueKind};

/// An address the user pinned, independent of the current match list.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedAddress {
    pub address: usize,
    pub kind: ValueKind,
    pub description: String,
    last: Option<ScanValue>,
}

/// One refreshed entry; `changed` is set when the value differs from the
/// previous refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedRow {
    pub index: usize,
    pub address: usize,
    pub kind: ValueKind,
    pub description: String,
    pub value: Result<ScanValue, String>,
    pub changed: bool,
}

#[derive(Debug, Default)]
pub struct SavedList {
    entries: Vec<SavedAddress>,
}

impl SavedList {
    /// Pins `address` as `kind` and returns its index. Keeping the same
    /// address and kind twice only updates the description.
    pub fn keep(&mut self, address: usize, kind: ValueKind, description: String) -> usize {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.address == address && entry.kind == kind)
        {
            self.entries[index].description = description;
            return index;
        }

        self.entries.push(SavedAddress {
            address,
            kind,
            description,
            last: None,
        });
        self.entries.len() - 1
    }

    pub fn unkeep(&mut self, index: usize) -> Option<SavedAddress> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<&SavedAddress> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Re-reads every entry through `read` and remembers the values for the
    /// next refresh.
    pub fn refresh<F, E>(&mut self, mut read: F) -> Vec<SavedRow>
    where
        F: FnMut(usize, ValueKind) -> Result<ScanValue, E>,
        E: std::fmt::Display,
    {
        self.entries
            .iter_mut()
            .enumerate()
            .map(|(index, entry)| {
                let value = read(entry.address, entry.kind).map_err(|e| e.to_string());
                let current = value.as_ref().ok().copied();
                let changed = entry.last.is_some() && entry.last != current;
                entry.last = current;

                SavedRow {
                    index,
                    address: entry.address,
                    kind: entry.kind,
                    description: entry.description.clone(),
                    value,
                    changed,
                }
            })
            .collect()
    }
}
