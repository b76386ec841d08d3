//! Memory bus: address decoding, work/high RAM, boot ROM overlay,
//! joypad, serial capture, OAM DMA, and the peripheral tick.
//!
//! Address map:
//!
//! - `0x0000-0x7FFF`: cartridge ROM through the mapper (first 256 bytes
//!   overlaid by the boot ROM until I/O 0x50 is written non-zero)
//! - `0x8000-0x9FFF`: PPU VRAM
//! - `0xA000-0xBFFF`: cartridge RAM through the mapper
//! - `0xC000-0xDFFF`: work RAM, mirrored at `0xE000-0xFDFF`
//! - `0xFE00-0xFE9F`: OAM (reads 0xFF while a DMA transfer runs)
//! - `0xFEA0-0xFEFF`: unusable, reads 0xFF
//! - `0xFF00-0xFF7F`: I/O (joypad, serial, timer, APU, PPU, boot latch)
//! - `0xFF80-0xFFFE`: high RAM
//! - `0xFFFF`: interrupt enable

use dotboy_core::cpu_sm83::{Interrupt, MemorySm83};
use dotboy_core::InputSource;

use crate::apu::Apu;
use crate::mappers::Mapper;
use crate::ppu::Ppu;
use crate::timer::Timer;

const DMA_LENGTH: u16 = 160;

pub struct GbBus {
    boot_rom: [u8; 0x100],
    iwram: [u8; 0x1000],
    ewram: [u8; 0x1000],
    hram: [u8; 0x7F],
    io: [u8; 0x80],
    ie: u8,

    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub mapper: Mapper,
    input: Box<dyn InputSource>,

    dma_active: bool,
    dma_src: u16,
    dma_count: u16,

    serial_out: Vec<u8>,
}

impl GbBus {
    pub fn new(mapper: Mapper, ppu: Ppu, apu: Apu, input: Box<dyn InputSource>) -> Self {
        Self {
            boot_rom: [0; 0x100],
            iwram: [0; 0x1000],
            ewram: [0; 0x1000],
            hram: [0; 0x7F],
            io: [0; 0x80],
            ie: 0,
            ppu,
            apu,
            timer: Timer::new(),
            mapper,
            input,
            dma_active: false,
            dma_src: 0,
            dma_count: 0,
            serial_out: Vec::new(),
        }
    }

    pub fn load_boot(&mut self, data: &[u8]) {
        self.boot_rom[..data.len()].copy_from_slice(data);
    }

    pub fn request_interrupt(&mut self, int: Interrupt) {
        self.io[0x0F] |= int.mask();
    }

    /// Bytes written out the serial port since the last call. Test ROMs
    /// report their results this way.
    pub fn take_serial(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.serial_out)
    }

    /// Advance every peripheral by one tick: pending DMA, PPU, APU (fed
    /// the pre-tick DIV), then the timer.
    pub fn tick(&mut self) {
        if self.dma_active {
            let byte = self.read(self.dma_src + self.dma_count);
            self.ppu.write_oam(0xFE00 + self.dma_count, byte);
            self.dma_count += 1;
            if self.dma_count == DMA_LENGTH {
                self.dma_active = false;
            }
        }

        self.ppu.tick();
        self.io[0x0F] |= self.ppu.take_irq();

        let div = self.timer.div();
        self.apu.tick(div);

        if self.timer.tick() {
            self.request_interrupt(Interrupt::Timer);
        }
    }

    fn read_joypad(&mut self) -> u8 {
        let old = self.io[0x00];
        let mut joyp = old;
        self.input.get_input(&mut joyp);
        self.io[0x00] = joyp;

        // Buttons pull their lines low, so any press lowers the value
        if old > joyp {
            self.request_interrupt(Interrupt::Joypad);
        }

        joyp
    }
}

impl MemorySm83 for GbBus {
    fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x00FF if self.io[0x50] == 0 => self.boot_rom[addr as usize],
            0x0000..=0x7FFF => self.mapper.read(addr),
            0x8000..=0x9FFF => self.ppu.read_vram(addr),
            0xA000..=0xBFFF => self.mapper.read(addr),
            0xC000..=0xCFFF => self.iwram[(addr - 0xC000) as usize],
            0xD000..=0xDFFF => self.ewram[(addr - 0xD000) as usize],
            // Echo RAM
            0xE000..=0xEFFF => self.iwram[(addr - 0xE000) as usize],
            0xF000..=0xFDFF => self.ewram[(addr - 0xF000) as usize],
            0xFE00..=0xFE9F => {
                if self.dma_active {
                    0xFF
                } else {
                    self.ppu.read_oam(addr)
                }
            }
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.read_joypad(),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF10..=0xFF3F => self.apu.read(addr),
            0xFF40..=0xFF4B => self.ppu.read_reg(addr),
            0xFF00..=0xFF7F => self.io[(addr - 0xFF00) as usize],
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie,
        }
    }

    fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => self.mapper.write(addr, val),
            0x8000..=0x9FFF => self.ppu.write_vram(addr, val),
            0xA000..=0xBFFF => self.mapper.write(addr, val),
            0xC000..=0xCFFF => self.iwram[(addr - 0xC000) as usize] = val,
            0xD000..=0xDFFF => self.ewram[(addr - 0xD000) as usize] = val,
            0xE000..=0xEFFF => self.iwram[(addr - 0xE000) as usize] = val,
            0xF000..=0xFDFF => self.ewram[(addr - 0xF000) as usize] = val,
            0xFE00..=0xFE9F => {
                if !self.dma_active {
                    self.ppu.write_oam(addr, val);
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF02 => {
                self.io[0x02] = val;
                // A transfer request with the internal clock: capture the
                // outgoing byte
                if val == 0x81 {
                    let byte = self.io[0x01];
                    self.serial_out.push(byte);
                    log::debug!("serial: {:#04X} ({:?})", byte, byte as char);
                }
            }
            0xFF04..=0xFF07 => self.timer.write(addr, val),
            0xFF10..=0xFF3F => self.apu.write(addr, val),
            0xFF46 => {
                self.ppu.write_reg(addr, val);
                self.dma_active = true;
                self.dma_src = (val as u16) << 8;
                self.dma_count = 0;
            }
            0xFF40..=0xFF4B => {
                self.ppu.write_reg(addr, val);
                self.io[0x0F] |= self.ppu.take_irq();
            }
            0xFF50 => {
                // The boot ROM disable latch cannot be cleared again
                if val != 0 {
                    self.io[0x50] = val;
                }
            }
            0xFF00..=0xFF7F => self.io[(addr - 0xFF00) as usize] = val,
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie = val,
        }
    }
}
