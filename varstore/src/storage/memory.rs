// In-memory variable store
// Backs the storage trait with a plain vector; used on hosts and as a test double

use super::cursor::advance_cursor;
use super::VariableStorage;
use alloc::vec::Vec;
use shared::{EfiError, Guid, Result};
use uefi::table::runtime::VariableAttributes;
use uefi::CStr16;

#[derive(Debug, Clone)]
struct Variable {
    /// Name with its NUL terminator
    name: Vec<u16>,
    vendor: Guid,
    attributes: VariableAttributes,
    data: Vec<u8>,
}

/// Variable store kept in memory.
///
/// Enumeration follows insertion order; replacing a variable keeps its slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryVariableStore {
    variables: Vec<Variable>,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    fn position(&self, name: &[u16], vendor: &Guid) -> Option<usize> {
        self.variables
            .iter()
            .position(|var| var.vendor == *vendor && var.name[..var.name.len() - 1] == *name)
    }
}

impl VariableStorage for MemoryVariableStore {
    fn get_variable(
        &self,
        name: &CStr16,
        vendor: &Guid,
        buf: &mut [u8],
    ) -> Result<(VariableAttributes, usize)> {
        let index = self
            .position(name.to_u16_slice(), vendor)
            .ok_or(EfiError::NotFound)?;
        let var = &self.variables[index];
        if buf.len() < var.data.len() {
            return Err(EfiError::BufferTooSmall {
                required: var.data.len(),
            });
        }
        buf[..var.data.len()].copy_from_slice(&var.data);
        Ok((var.attributes, var.data.len()))
    }

    fn next_variable_name(&self, name: &mut [u16], vendor: &mut Guid) -> Result<()> {
        let entries = self.variables.iter().map(|var| (var.name.as_slice(), &var.vendor));
        advance_cursor(entries, name, vendor)
    }

    fn set_variable(
        &mut self,
        name: &CStr16,
        vendor: &Guid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<()> {
        if name.num_chars() == 0 {
            return Err(EfiError::InvalidParameter);
        }
        let existing = self.position(name.to_u16_slice(), vendor);

        if data.is_empty() {
            let index = existing.ok_or(EfiError::NotFound)?;
            self.variables.remove(index);
            return Ok(());
        }

        let mut owned = Vec::new();
        owned
            .try_reserve_exact(data.len())
            .map_err(|_| EfiError::OutOfResources)?;
        owned.extend_from_slice(data);

        match existing {
            Some(index) => {
                let var = &mut self.variables[index];
                var.attributes = attributes;
                var.data = owned;
            }
            None => self.variables.push(Variable {
                name: name.to_u16_slice_with_nul().to_vec(),
                vendor: *vendor,
                attributes,
                data: owned,
            }),
        }
        Ok(())
    }
}
