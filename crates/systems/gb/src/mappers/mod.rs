//! Memory Bank Controllers (MBCs).
//!
//! The MBC sits on the cartridge and intercepts accesses to the two
//! cartridge windows: ROM plus banking registers at 0x0000-0x7FFF and
//! external RAM at 0xA000-0xBFFF. Banking registers multiplex ROM and RAM
//! banks into those windows; battery-backed variants keep their RAM
//! contents across power cycles through the save-RAM accessors.

mod mbc0;
mod mbc1;
mod mbc3;

pub use mbc0::Mbc0;
pub use mbc1::Mbc1;
pub use mbc3::Mbc3;

use crate::GbError;

pub(crate) const ROM_BANK_SIZE: usize = 16 * 1024;
pub(crate) const RAM_BANK_SIZE: usize = 8 * 1024;

// RAM size code -> number of 8 KiB banks
const RAM_BANK_COUNTS: [usize; 6] = [0, 1, 1, 4, 16, 8];

/// Unified mapper enum that dispatches to the variant implementations.
#[derive(Debug)]
pub enum Mapper {
    Mbc0(Mbc0),
    Mbc1(Mbc1),
    Mbc3(Mbc3),
}

impl Mapper {
    /// Select and build a mapper from the cartridge type byte.
    ///
    /// MBC5 cartridges (0x19-0x1B) and anything unrecognized are
    /// rejected up front; a bad mapper guess produces baffling emulation
    /// bugs much later otherwise.
    pub fn create(
        code: u8,
        rom_size_code: u8,
        ram_size_code: u8,
        rom_data: &[u8],
    ) -> Result<Self, GbError> {
        let rom_banks = 2usize << rom_size_code;
        let ram_banks = RAM_BANK_COUNTS
            .get(ram_size_code as usize)
            .copied()
            .unwrap_or(0);

        let mapper = match code {
            0x00 => Mapper::Mbc0(Mbc0::new(rom_data, false)),
            0x01 => Mapper::Mbc1(Mbc1::new(rom_data, rom_banks, ram_banks, false)),
            0x02 => Mapper::Mbc1(Mbc1::new(rom_data, rom_banks, ram_banks, false)),
            0x03 => Mapper::Mbc1(Mbc1::new(rom_data, rom_banks, ram_banks, true)),
            0x08 => Mapper::Mbc0(Mbc0::new(rom_data, true)),
            0x0F => Mapper::Mbc3(Mbc3::new(rom_data, rom_banks, ram_banks, true)),
            0x10 => Mapper::Mbc3(Mbc3::new(rom_data, rom_banks, ram_banks, true)),
            0x11 => Mapper::Mbc3(Mbc3::new(rom_data, rom_banks, ram_banks, false)),
            0x12 => Mapper::Mbc3(Mbc3::new(rom_data, rom_banks, ram_banks, false)),
            0x13 => Mapper::Mbc3(Mbc3::new(rom_data, rom_banks, ram_banks, true)),
            _ => return Err(GbError::UnsupportedMapper { code }),
        };

        log::info!(
            "mapper {}: {} ROM banks, {} RAM banks",
            mapper.name(),
            rom_banks,
            mapper.ram().len() / RAM_BANK_SIZE
        );

        Ok(mapper)
    }

    /// Read from the cartridge windows (0x0000-0x7FFF, 0xA000-0xBFFF).
    pub fn read(&self, addr: u16) -> u8 {
        match self {
            Mapper::Mbc0(m) => m.read(addr),
            Mapper::Mbc1(m) => m.read(addr),
            Mapper::Mbc3(m) => m.read(addr),
        }
    }

    /// Write to the banking registers or external RAM.
    pub fn write(&mut self, addr: u16, val: u8) {
        match self {
            Mapper::Mbc0(m) => m.write(addr, val),
            Mapper::Mbc1(m) => m.write(addr, val),
            Mapper::Mbc3(m) => m.write(addr, val),
        }
    }

    pub fn has_battery(&self) -> bool {
        match self {
            Mapper::Mbc0(_) => false,
            Mapper::Mbc1(m) => m.has_battery(),
            Mapper::Mbc3(m) => m.has_battery(),
        }
    }

    /// External RAM contents, bank 0 first.
    pub fn ram(&self) -> &[u8] {
        match self {
            Mapper::Mbc0(m) => m.ram(),
            Mapper::Mbc1(m) => m.ram(),
            Mapper::Mbc3(m) => m.ram(),
        }
    }

    /// Replace external RAM with a saved image; the length must match
    /// the configured bank count exactly.
    pub fn load_ram(&mut self, data: &[u8]) -> Result<(), GbError> {
        let ram = match self {
            Mapper::Mbc0(m) => m.ram_mut(),
            Mapper::Mbc1(m) => m.ram_mut(),
            Mapper::Mbc3(m) => m.ram_mut(),
        };

        if data.len() != ram.len() {
            return Err(GbError::SaveRamSize {
                expected: ram.len(),
                found: data.len(),
            });
        }

        ram.copy_from_slice(data);
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mapper::Mbc0(_) => "none",
            Mapper::Mbc1(_) => "MBC1",
            Mapper::Mbc3(_) => "MBC3",
        }
    }
}
