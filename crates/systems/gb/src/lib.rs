//! Game Boy (DMG) system implementation.
//!
//! The machine aggregates an SM83 CPU (which owns the memory bus, which
//! in turn owns the PPU, APU, timer and cartridge mapper) with the
//! two-clock scheduler from `dotboy_core`. The only way to drive it is
//! `run_for`: the scheduler interleaves CPU instructions with peripheral
//! ticks at cycle granularity, so timer interrupts, DMA and the pixel
//! pipeline stay in step with instruction execution.
//!
//! Frontends supply the three sinks at construction time and never see
//! the internals; video and audio flow out through `VideoSink` and
//! `AudioSink`, joypad state flows in through `InputSource`, and test
//! ROM output can be collected from the serial port with `take_serial`.

pub mod apu;
pub mod bus;
pub mod cartridge;
mod fetcher;
pub mod mappers;
pub mod ppu;
pub mod timer;

use dotboy_core::cpu_sm83::CpuSm83;
use dotboy_core::scheduler::Scheduler;
use dotboy_core::{AudioSink, InputSource, VideoSink};

use apu::Apu;
use bus::GbBus;
use cartridge::Cartridge;
use mappers::Mapper;
use ppu::Ppu;

pub use ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Master-clock ticks per frame: 154 lines of 456 ticks.
pub const CYCLES_PER_FRAME: u64 = 70224;

#[derive(thiserror::Error, Debug)]
pub enum GbError {
    #[error("ROM image too small to hold a cartridge header")]
    RomTooSmall,
    #[error("ROM image too large: {size} bytes")]
    RomTooLarge { size: usize },
    #[error("unsupported mapper type {code:#04X}")]
    UnsupportedMapper { code: u8 },
    #[error("boot ROM must be 256 bytes, got {size}")]
    BootRomSize { size: usize },
    #[error("save RAM size mismatch: expected {expected} bytes, got {found}")]
    SaveRamSize { expected: usize, found: usize },
}

/// Hardware revision. Only DMG behavior is emulated; CGB is recognized
/// from the header so color-aware cartridges still boot in DMG mode with
/// the CGB register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Dmg,
    Cgb,
}

/// Machine construction options.
pub struct GbConfig {
    pub model: Model,
    /// Use `model` as-is instead of auto-detecting from the header.
    pub force_model: bool,
    /// Force LY reads to 0x90 for deterministic headless logging.
    pub stub_ly: bool,
    /// 256-byte boot ROM image; without one, CPU and I/O start in the
    /// post-boot state.
    pub boot_rom: Option<Vec<u8>>,
}

impl Default for GbConfig {
    fn default() -> Self {
        Self {
            model: Model::Dmg,
            force_model: false,
            stub_ly: false,
            boot_rom: None,
        }
    }
}

pub struct GameBoy {
    cpu: CpuSm83<GbBus>,
    scheduler: Scheduler,
    model: Model,
    title: String,
}

impl GameBoy {
    pub fn new(
        rom: Vec<u8>,
        config: GbConfig,
        video: Box<dyn VideoSink>,
        audio: Box<dyn AudioSink>,
        input: Box<dyn InputSource>,
    ) -> Result<Self, GbError> {
        let cart = Cartridge::new(rom)?;

        let model = if config.force_model {
            config.model
        } else if cart.header.is_cgb() {
            Model::Cgb
        } else {
            Model::Dmg
        };

        let mapper = Mapper::create(
            cart.header.cart_type,
            cart.header.rom_size,
            cart.header.ram_size,
            &cart.rom,
        )?;

        let title = cart.header.title_string();
        log::info!("loaded \"{}\" ({:?})", title, model);

        let ppu = Ppu::new(video, config.stub_ly);
        let apu = Apu::new(audio);
        let bus = GbBus::new(mapper, ppu, apu, input);
        let cpu = CpuSm83::new(bus);

        let mut gb = Self {
            cpu,
            scheduler: Scheduler::new(),
            model,
            title,
        };

        match config.boot_rom {
            Some(data) => {
                if data.len() != 0x100 {
                    return Err(GbError::BootRomSize { size: data.len() });
                }
                gb.cpu.memory.load_boot(&data);
            }
            None => gb.post_boot_init(),
        }

        Ok(gb)
    }

    // Register and I/O state after the stock boot ROM has run
    fn post_boot_init(&mut self) {
        use dotboy_core::cpu_sm83::MemorySm83;

        match self.model {
            Model::Dmg => {
                self.cpu.set_af(0x01B0);
                self.cpu.set_bc(0x0013);
                self.cpu.set_de(0x00D8);
                self.cpu.set_hl(0x014D);
            }
            Model::Cgb => {
                self.cpu.set_af(0x1180);
                self.cpu.set_bc(0x0000);
                self.cpu.set_de(0xFF56);
                self.cpu.set_hl(0x000D);
            }
        }
        self.cpu.set_sp(0xFFFE);
        self.cpu.set_pc(0x0100);

        for (addr, val) in [
            (0xFF40u16, 0x91u8), // LCDC
            (0xFF47, 0xFC),      // BGP
            (0xFF48, 0xFF),      // OBP0
            (0xFF49, 0xFF),      // OBP1
            (0xFF50, 0x01),      // boot ROM off
        ] {
            self.cpu.memory.write(addr, val);
        }
    }

    /// Run until the CPU clock has advanced by `ticks` master-clock
    /// ticks (it may overshoot by the tail of one instruction).
    pub fn run_for(&mut self, ticks: u64) {
        self.scheduler
            .run_for(ticks, &mut self.cpu, Self::cpu_step, Self::ppu_step);
    }

    fn cpu_step(cpu: &mut CpuSm83<GbBus>) -> u64 {
        // While halted or stopped the CPU burns nop-equivalents instead
        // of fetching
        let mut cycles = if cpu.halted || cpu.stopped {
            cpu.nop_cycle()
        } else {
            cpu.step()
        };
        cycles += cpu.service_interrupts();
        cycles
    }

    fn ppu_step(cpu: &mut CpuSm83<GbBus>) -> u64 {
        // STOP freezes the peripherals; the clock still has to advance
        // or the scheduler would spin
        if !cpu.stopped {
            cpu.memory.tick();
        }
        1
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Serial bytes written since the last call.
    pub fn take_serial(&mut self) -> Vec<u8> {
        self.cpu.memory.take_serial()
    }

    /// Host hook: raise the Joypad interrupt on an input edge.
    ///
    /// The joypad register only consults the `InputSource` when the
    /// emulated program reads it, so a host that wants presses to wake
    /// HALT or STOP calls this when a button goes down.
    pub fn request_joypad_interrupt(&mut self) {
        self.cpu
            .memory
            .request_interrupt(dotboy_core::cpu_sm83::Interrupt::Joypad);
    }

    /// Whether the cartridge keeps its RAM across power cycles.
    pub fn has_battery(&self) -> bool {
        self.cpu.memory.mapper.has_battery()
    }

    /// External RAM contents (bank 0 first), for save-file persistence.
    pub fn ram(&self) -> &[u8] {
        self.cpu.memory.mapper.ram()
    }

    /// Restore external RAM from a save file; the length must match.
    pub fn load_ram(&mut self, data: &[u8]) -> Result<(), GbError> {
        self.cpu.memory.mapper.load_ram(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotboy_core::{NullAudioSink, NullInputSource, NullVideoSink};
    use std::cell::RefCell;
    use std::rc::Rc;

    // Minimal cartridge: spin in `JR -2` at the entry point
    fn spin_rom(cart_type: u8) -> Vec<u8> {
        let mut rom = vec![0; 0x8000];
        rom[0x100] = 0x18;
        rom[0x101] = 0xFE;
        rom[0x134..0x139].copy_from_slice(b"SPIN\0");
        rom[0x147] = cart_type;
        rom
    }

    fn machine(rom: Vec<u8>, config: GbConfig) -> Result<GameBoy, GbError> {
        GameBoy::new(
            rom,
            config,
            Box::new(NullVideoSink),
            Box::new(NullAudioSink),
            Box::new(NullInputSource),
        )
    }

    struct PresentCounter {
        presents: Rc<RefCell<u32>>,
    }

    impl VideoSink for PresentCounter {
        fn clear_screen(&mut self, _color: u32) {}
        fn draw_pixel(&mut self, _color: u32, _x: u32, _y: u32) {}
        fn present_screen(&mut self) {
            *self.presents.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_construction_and_title() {
        let gb = machine(spin_rom(0x00), GbConfig::default()).unwrap();
        assert_eq!(gb.title(), "SPIN");
        assert_eq!(gb.model(), Model::Dmg);
        assert!(!gb.has_battery());
    }

    #[test]
    fn test_model_autodetect_from_header() {
        let mut rom = spin_rom(0x00);
        rom[0x143] = 0x80;
        let gb = machine(rom, GbConfig::default()).unwrap();
        assert_eq!(gb.model(), Model::Cgb);

        let mut rom = spin_rom(0x00);
        rom[0x143] = 0x80;
        let gb = machine(
            rom,
            GbConfig {
                model: Model::Dmg,
                force_model: true,
                ..GbConfig::default()
            },
        )
        .unwrap();
        assert_eq!(gb.model(), Model::Dmg);
    }

    #[test]
    fn test_rejects_bad_boot_rom_size() {
        let result = machine(
            spin_rom(0x00),
            GbConfig {
                boot_rom: Some(vec![0; 0x80]),
                ..GbConfig::default()
            },
        );
        assert!(matches!(result, Err(GbError::BootRomSize { size: 0x80 })));
    }

    #[test]
    fn test_rejects_unsupported_mapper() {
        let result = machine(spin_rom(0x19), GbConfig::default());
        assert!(matches!(
            result,
            Err(GbError::UnsupportedMapper { code: 0x19 })
        ));
    }

    #[test]
    fn test_vblank_interrupt_cadence() {
        let mut gb = machine(spin_rom(0x00), GbConfig::default()).unwrap();
        use dotboy_core::cpu_sm83::MemorySm83;

        // Exactly one VBlank request per frame, every 70224 ticks
        gb.run_for(CYCLES_PER_FRAME);
        let if_reg = gb.cpu.memory.read(0xFF0F);
        assert_ne!(if_reg & 0x01, 0);

        gb.cpu.memory.write(0xFF0F, 0);
        gb.run_for(CYCLES_PER_FRAME);
        assert_ne!(gb.cpu.memory.read(0xFF0F) & 0x01, 0);
    }

    #[test]
    fn test_one_present_per_frame() {
        let presents = Rc::new(RefCell::new(0u32));
        let mut gb = GameBoy::new(
            spin_rom(0x00),
            GbConfig::default(),
            Box::new(PresentCounter {
                presents: presents.clone(),
            }),
            Box::new(NullAudioSink),
            Box::new(NullInputSource),
        )
        .unwrap();

        gb.run_for(10 * CYCLES_PER_FRAME);
        let count = *presents.borrow();
        assert!((9..=11).contains(&count), "presents = {count}");
    }

    #[test]
    fn test_chunked_runs_match_one_run() {
        let run = |chunks: &[u64]| {
            let mut gb = machine(spin_rom(0x00), GbConfig::default()).unwrap();
            for &n in chunks {
                gb.run_for(n);
            }
            (
                gb.cpu.pc(),
                gb.cpu.af(),
                gb.cpu.memory.ppu.ly(),
                gb.cpu.memory.timer.div(),
            )
        };

        let whole = run(&[100_000]);
        assert_eq!(whole, run(&[50_000, 50_000]));
        assert_eq!(whole, run(&[1, 33_333, 66_666]));
    }

    #[test]
    fn test_halt_until_timer_interrupt() {
        // EI; enable the timer interrupt; fastest TIMA rate; HALT; then
        // mark arrival at the handler address.
        let mut rom = spin_rom(0x00);
        let program = [
            0x3E, 0x04, // LD A,0x04
            0xE0, 0xFF, // LDH (0xFF),A   ; IE = timer
            0x3E, 0x05, // LD A,0x05
            0xE0, 0x07, // LDH (0x07),A   ; TAC = enabled, fast
            0xFB, // EI
            0x76, // HALT
            0x18, 0xFE, // JR -2
        ];
        rom[0x100..0x100 + program.len()].copy_from_slice(&program);
        // Timer vector: spin
        rom[0x50] = 0x18;
        rom[0x51] = 0xFE;

        let mut gb = machine(rom, GbConfig::default()).unwrap();
        gb.run_for(20_000);
        assert_eq!(gb.cpu.pc(), 0x0050);
        assert!(!gb.cpu.halted);
    }

    #[test]
    fn test_serial_passthrough() {
        // Write 'A' out the serial port, then spin
        let mut rom = spin_rom(0x00);
        let program = [
            0x3E, 0x41, // LD A,'A'
            0xE0, 0x01, // LDH (0x01),A
            0x3E, 0x81, // LD A,0x81
            0xE0, 0x02, // LDH (0x02),A
            0x18, 0xFE, // JR -2
        ];
        rom[0x100..0x100 + program.len()].copy_from_slice(&program);

        let mut gb = machine(rom, GbConfig::default()).unwrap();
        gb.run_for(1000);
        assert_eq!(gb.take_serial(), b"A".to_vec());
    }

    #[test]
    fn test_save_ram_round_trip() {
        let mut rom = spin_rom(0x03); // MBC1 + RAM + battery
        rom[0x149] = 0x02; // one bank
        let mut gb = machine(rom.clone(), GbConfig::default()).unwrap();
        assert!(gb.has_battery());
        assert_eq!(gb.ram().len(), 8 * 1024);

        let saved = vec![0x5A; 8 * 1024];
        gb.load_ram(&saved).unwrap();
        assert_eq!(gb.ram(), &saved[..]);

        assert!(matches!(
            gb.load_ram(&[0; 100]),
            Err(GbError::SaveRamSize { .. })
        ));
    }

    #[test]
    fn test_boot_rom_takes_over_reset_vector() {
        use dotboy_core::cpu_sm83::MemorySm83;

        let mut boot = vec![0; 0x100];
        boot[0] = 0x18; // JR -2
        boot[1] = 0xFE;

        let mut gb = machine(
            spin_rom(0x00),
            GbConfig {
                boot_rom: Some(boot),
                ..GbConfig::default()
            },
        )
        .unwrap();

        // With a boot ROM the CPU starts at 0x0000
        assert_eq!(gb.cpu.pc(), 0x0000);
        gb.run_for(100);
        assert_eq!(gb.cpu.pc(), 0x0000);
        assert_eq!(gb.cpu.memory.read(0x0000), 0x18);
    }

    #[test]
    fn test_stop_freezes_peripherals() {
        let mut rom = spin_rom(0x00);
        rom[0x100] = 0x10; // STOP
        rom[0x101] = 0x00;

        let mut gb = machine(rom, GbConfig::default()).unwrap();
        gb.run_for(10_000);
        assert!(gb.cpu.stopped);
        // DIV never advanced past the few pre-STOP ticks
        assert_eq!(gb.cpu.memory.timer.div(), 0);
    }
}
