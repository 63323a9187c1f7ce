// GetNextVariableName cursor handling
// Shared by the stores that hold their variable names as an ordered list

use alloc::vec::Vec;
use shared::{EfiError, Guid, Result};
use spin::Mutex;

/// Name held in a cursor buffer, up to (not including) its terminator
pub(crate) fn cursor_name(buf: &[u16]) -> &[u16] {
    let end = buf.iter().position(|&unit| unit == 0).unwrap_or(buf.len());
    &buf[..end]
}

/// Advance the cursor in `name`/`vendor` over an ordered list of keys.
///
/// Each entry is a NUL-terminated name and its vendor. An empty cursor
/// starts from the first entry; a cursor naming no entry is
/// `InvalidParameter`. `name` is left untouched when it is too small.
pub(crate) fn advance_cursor<'a, I>(entries: I, name: &mut [u16], vendor: &mut Guid) -> Result<()>
where
    I: Iterator<Item = (&'a [u16], &'a Guid)> + Clone,
{
    let cursor = cursor_name(name);
    let next = if cursor.is_empty() {
        0
    } else {
        entries
            .clone()
            .position(|(entry, guid)| guid == vendor && entry.strip_suffix(&[0]) == Some(cursor))
            .ok_or(EfiError::InvalidParameter)?
            + 1
    };

    let (entry, guid) = entries.clone().nth(next).ok_or(EfiError::NotFound)?;
    if name.len() < entry.len() {
        return Err(EfiError::BufferTooSmall {
            required: entry.len(),
        });
    }
    name[..entry.len()].copy_from_slice(entry);
    *vendor = *guid;
    Ok(())
}

/// Snapshot of a store's keys, taken once per enumeration.
///
/// For backends that can only list every key at once. The snapshot is
/// refreshed when an enumeration restarts from an empty cursor and dropped
/// by [`KeySnapshot::invalidate`] whenever the store changes.
#[cfg_attr(not(any(target_os = "uefi", feature = "uefi")), allow(dead_code))]
#[derive(Debug, Default)]
pub(crate) struct KeySnapshot {
    keys: Mutex<Option<Vec<(Vec<u16>, Guid)>>>,
}

#[cfg_attr(not(any(target_os = "uefi", feature = "uefi")), allow(dead_code))]
impl KeySnapshot {
    pub(crate) const fn new() -> Self {
        Self {
            keys: Mutex::new(None),
        }
    }

    /// Advance the cursor, listing the keys through `fetch` only when needed
    pub(crate) fn advance<F>(&self, fetch: F, name: &mut [u16], vendor: &mut Guid) -> Result<()>
    where
        F: FnOnce() -> Result<Vec<(Vec<u16>, Guid)>>,
    {
        let mut keys = self.keys.lock();
        if keys.is_none() || cursor_name(name).is_empty() {
            *keys = Some(fetch()?);
        }
        let keys = keys.as_deref().unwrap_or(&[]);
        advance_cursor(
            keys.iter().map(|(entry, guid)| (entry.as_slice(), guid)),
            name,
            vendor,
        )
    }

    pub(crate) fn invalidate(&mut self) {
        *self.keys.get_mut() = None;
    }
}
