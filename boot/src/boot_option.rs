// Boot option resolution
// Reads BootCurrent/BootOrder/Boot#### and extracts role-tagged device paths

use crate::config::BootManagerConfig;
use crate::load_option::LoadOption;
use alloc::format;
use alloc::vec::Vec;
use shared::{DevicePath, EfiError, Guid, Result, GLOBAL_VARIABLE_GUID};
use uefi::table::runtime::VariableAttributes;
use uefi::{cstr16, CStr16, CString16};
use varstore::{read_variable, VariableNames, VariableStorage};

/// Check whether `name` is exactly `Boot` followed by four uppercase hex
/// digits and a NUL terminator, returning the option index if so.
///
/// `name` is a UTF-16 buffer; units after the terminator are ignored.
pub fn is_load_option_name(name: &[u16]) -> Option<u16> {
    const PREFIX: [u16; 4] = [b'B' as u16, b'o' as u16, b'o' as u16, b't' as u16];

    if name.len() < 9 || name[..4] != PREFIX || name[8] != 0 {
        return None;
    }
    let mut index = 0u16;
    for &unit in &name[4..8] {
        let digit = match unit {
            0x30..=0x39 => unit - 0x30,
            0x41..=0x46 => unit - 0x41 + 10,
            _ => return None,
        };
        index = (index << 4) | digit;
    }
    Some(index)
}

/// Build `prefix` followed by `index` as four uppercase hex digits
pub fn indexed_name(prefix: &str, index: u16) -> Result<CString16> {
    CString16::try_from(format!("{}{:04X}", prefix, index).as_str())
        .map_err(|_| EfiError::InvalidParameter)
}

/// Boot manager view over a variable store
pub struct BootManager<S: VariableStorage> {
    storage: S,
    config: BootManagerConfig,
}

impl<S: VariableStorage> BootManager<S> {
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, BootManagerConfig::default())
    }

    pub fn with_config(storage: S, config: BootManagerConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &BootManagerConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    fn read_global(&self, name: &CStr16) -> Result<Vec<u8>> {
        read_variable(&self.storage, name, &GLOBAL_VARIABLE_GUID, self.config.max_variable_size)
    }

    /// Index stored in `BootCurrent`
    pub fn current_boot_index(&self) -> Result<u16> {
        let data = self.read_global(cstr16!("BootCurrent"))?;
        match data.as_slice() {
            [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => {
                log::warn!("BootCurrent has {} bytes, expected 2", data.len());
                Err(EfiError::InvalidParameter)
            }
        }
    }

    /// `Boot####` name of the option being booted
    pub fn current_boot_name(&self) -> Result<CString16> {
        indexed_name("Boot", self.current_boot_index()?)
    }

    /// Record `index` as the option being booted
    pub fn set_boot_current(&mut self, index: u16) -> Result<()> {
        self.storage.set_variable(
            cstr16!("BootCurrent"),
            &GLOBAL_VARIABLE_GUID,
            VariableAttributes::BOOTSERVICE_ACCESS | VariableAttributes::RUNTIME_ACCESS,
            &index.to_le_bytes(),
        )
    }

    /// Decode the `Boot####` variable for `index`
    pub fn load_option(&self, index: u16) -> Result<LoadOption> {
        let name = indexed_name("Boot", index)?;
        let data = self.read_global(&name)?;
        LoadOption::deserialize(&data)
    }

    /// Write `option` as the `Boot####` variable for `index`
    pub fn set_load_option(&mut self, index: u16, option: &LoadOption) -> Result<()> {
        let name = indexed_name("Boot", index)?;
        let data = option.serialize()?;
        self.storage.set_variable(
            &name,
            &GLOBAL_VARIABLE_GUID,
            VariableAttributes::NON_VOLATILE
                | VariableAttributes::BOOTSERVICE_ACCESS
                | VariableAttributes::RUNTIME_ACCESS,
            &data,
        )
    }

    /// Option indices listed in `BootOrder`
    pub fn boot_order(&self) -> Result<Vec<u16>> {
        let data = self.read_global(cstr16!("BootOrder"))?;
        if data.len() % 2 != 0 {
            return Err(EfiError::InvalidParameter);
        }
        Ok(data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Every decodable `Boot####` option in the store, in enumeration order.
    ///
    /// Options that fail to decode are skipped with a warning.
    pub fn load_options(&self) -> Result<Vec<(u16, LoadOption)>> {
        let mut options = Vec::new();
        for key in VariableNames::with_capacity(&self.storage, self.config.name_capacity) {
            let key = key?;
            if key.vendor != GLOBAL_VARIABLE_GUID {
                continue;
            }
            let Some(index) = is_load_option_name(key.name.to_u16_slice_with_nul()) else {
                continue;
            };
            match self.load_option(index) {
                Ok(option) => options.push((index, option)),
                Err(err) => log::warn!("{}: invalid load option ({})", key.name, err),
            }
        }
        Ok(options)
    }

    /// Resolve the device path tagged with `guid` in the current boot option.
    ///
    /// Fails if `BootCurrent` or the option is missing, if the option does
    /// not decode, or if no member carries the tag.
    pub fn resolve(&self, guid: &Guid) -> Result<DevicePath> {
        let name = self.current_boot_name()?;
        let data = self.read_global(&name)?;
        let option = LoadOption::deserialize(&data)?;
        option.device_path(Some(guid)).map_err(|err| {
            log::debug!("VenMedia({}) not found in {}", guid, option.description);
            err
        })
    }

    /// Device path of the initrd configured for the current boot option
    pub fn initrd_path(&self) -> Result<DevicePath> {
        self.resolve(&self.config.initrd_guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(core::iter::once(0)).collect()
    }

    #[test]
    fn test_is_load_option_name() {
        assert_eq!(is_load_option_name(&utf16("Boot0012")), Some(0x12));
        assert_eq!(is_load_option_name(&utf16("BootFFFF")), Some(0xffff));
        assert_eq!(is_load_option_name(&utf16("BootOrder")), None);
        assert_eq!(is_load_option_name(&utf16("boot0012")), None);
        assert_eq!(is_load_option_name(&utf16("Boot001")), None);
        assert_eq!(is_load_option_name(&utf16("Boot00012")), None);
        assert_eq!(is_load_option_name(&utf16("Boot00a1")), None);
        assert_eq!(is_load_option_name(&utf16("Boot00G1")), None);
        assert_eq!(is_load_option_name(&utf16("Driver0001")), None);
    }

    #[test]
    fn test_is_load_option_name_ignores_buffer_tail() {
        let mut name = utf16("Boot00A0");
        name.extend_from_slice(&[0x41, 0x42, 0]);
        assert_eq!(is_load_option_name(&name), Some(0xa0));
    }

    #[test]
    fn test_indexed_name() {
        assert_eq!(
            indexed_name("Boot", 0x2a).unwrap(),
            CString16::try_from("Boot002A").unwrap()
        );
        assert_eq!(
            indexed_name("Driver", 0xbeef).unwrap(),
            CString16::try_from("DriverBEEF").unwrap()
        );
    }
}
