use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use minifb::{Key, Scale, Window, WindowOptions};

use dotboy_core::{NullAudioSink, NullInputSource, NullVideoSink};
use dotboy_gb::{GameBoy, GbConfig, Model, CYCLES_PER_FRAME, SCREEN_HEIGHT, SCREEN_WIDTH};

mod audio;
mod input;
mod video;

use audio::{QueueSink, QueueSource};
use input::KeyboardInput;
use video::WindowVideo;

#[derive(Parser)]
#[command(name = "dotboy", version, about = "Game Boy (DMG) emulator")]
struct Args {
    /// Path to a 256-byte boot ROM image
    #[arg(short = 'b', long)]
    boot_rom: Option<PathBuf>,

    /// Run without a window; serial output goes to stdout
    #[arg(long)]
    headless: bool,

    /// Force LY reads to 0x90 for deterministic test logs (headless)
    #[arg(long)]
    stub_ly: bool,

    /// Skip loading and saving battery-backed cartridge RAM
    #[arg(long)]
    no_save: bool,

    /// Force the hardware model instead of auto-detecting it from the
    /// cartridge header
    #[arg(short = 'f', long, value_enum)]
    force_model: Option<ModelArg>,

    /// Stop after this many frames (0 = run until the window closes)
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// ROM file to load
    rom: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    Dmg,
    Cgb,
}

impl From<ModelArg> for Model {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Dmg => Model::Dmg,
            ModelArg::Cgb => Model::Cgb,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let rom = fs::read(&args.rom)
        .with_context(|| format!("failed to read ROM {}", args.rom.display()))?;

    let boot_rom = match &args.boot_rom {
        Some(path) => Some(
            fs::read(path)
                .with_context(|| format!("failed to read boot ROM {}", path.display()))?,
        ),
        None => None,
    };

    let config = GbConfig {
        model: args.force_model.map(Model::from).unwrap_or(Model::Dmg),
        force_model: args.force_model.is_some(),
        stub_ly: args.stub_ly,
        boot_rom,
    };

    if args.headless {
        run_headless(rom, config, args.frames)
    } else {
        run_windowed(rom, config, &args)
    }
}

fn run_headless(rom: Vec<u8>, config: GbConfig, frames: u64) -> Result<()> {
    let mut gb = GameBoy::new(
        rom,
        config,
        Box::new(NullVideoSink),
        Box::new(NullAudioSink),
        Box::new(NullInputSource),
    )?;

    let mut stdout = std::io::stdout();
    let mut frame = 0u64;

    loop {
        gb.run_for(CYCLES_PER_FRAME);

        let serial = gb.take_serial();
        if !serial.is_empty() {
            stdout.write_all(&serial)?;
            stdout.flush()?;
        }

        frame += 1;
        if frames != 0 && frame >= frames {
            break;
        }
    }

    Ok(())
}

fn run_windowed(rom: Vec<u8>, config: GbConfig, args: &Args) -> Result<()> {
    let (video, frame) = WindowVideo::new();
    let (audio_sink, queue) = QueueSink::new();
    let (input_source, buttons) = KeyboardInput::new();

    let mut gb = GameBoy::new(
        rom,
        config,
        Box::new(video),
        Box::new(audio_sink),
        Box::new(input_source),
    )?;

    let save = save_path(&args.rom);
    if !args.no_save {
        load_save_ram(&mut gb, &save)?;
    }

    let mut window = Window::new(
        &format!("dotboy - {}", gb.title()),
        SCREEN_WIDTH as usize,
        SCREEN_HEIGHT as usize,
        WindowOptions {
            scale: Scale::X4,
            ..WindowOptions::default()
        },
    )?;
    // ~59.73 Hz frame pacing
    window.limit_update_rate(Some(Duration::from_micros(16_742)));

    let (_stream, stream_handle) =
        rodio::OutputStream::try_default().context("failed to open an audio output")?;
    stream_handle.play_raw(rodio::source::Source::convert_samples(QueueSource::new(
        queue,
    )))?;

    let mut frame_count = 0u64;
    let mut last_buttons = 0u8;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        let pressed = input::read_buttons(&window);
        *buttons.borrow_mut() = pressed;
        // A fresh press wakes HALT/STOP even before the ROM polls P1
        if pressed & !last_buttons != 0 {
            gb.request_joypad_interrupt();
        }
        last_buttons = pressed;

        gb.run_for(CYCLES_PER_FRAME);

        {
            let mut frame = frame.borrow_mut();
            if frame.ready {
                window.update_with_buffer(
                    &frame.buffer,
                    SCREEN_WIDTH as usize,
                    SCREEN_HEIGHT as usize,
                )?;
                frame.ready = false;
            } else {
                window.update();
            }
        }

        frame_count += 1;
        if args.frames != 0 && frame_count >= args.frames {
            break;
        }
    }

    if !args.no_save {
        save_ram(&gb, &save)?;
    }

    Ok(())
}

fn save_path(rom: &Path) -> PathBuf {
    rom.with_extension("ram")
}

fn load_save_ram(gb: &mut GameBoy, path: &Path) -> Result<()> {
    if !gb.has_battery() || gb.ram().is_empty() || !path.exists() {
        return Ok(());
    }

    let data =
        fs::read(path).with_context(|| format!("failed to read save RAM {}", path.display()))?;
    gb.load_ram(&data)
        .with_context(|| format!("save RAM {} does not match the cartridge", path.display()))?;
    log::info!("loaded save RAM from {}", path.display());
    Ok(())
}

// Written atomically: a torn save file is worse than a stale one
fn save_ram(gb: &GameBoy, path: &Path) -> Result<()> {
    if !gb.has_battery() || gb.ram().is_empty() {
        return Ok(());
    }

    let tmp = path.with_extension("ram.tmp");
    fs::write(&tmp, gb.ram())
        .with_context(|| format!("failed to write save RAM {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace save RAM {}", path.display()))?;
    log::info!("saved cartridge RAM to {}", path.display());
    Ok(())
}
