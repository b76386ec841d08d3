//! Audio Processing Unit: four generators and the stereo mixer.
//!
//! Register map:
//!
//! - `0xFF10-0xFF14`: pulse 1 (sweep, duty/length, envelope, frequency)
//! - `0xFF16-0xFF19`: pulse 2 (same, no sweep)
//! - `0xFF1A-0xFF1E`: wave (DAC, length, output level, frequency)
//! - `0xFF20-0xFF23`: noise (length, envelope, polynomial, control)
//! - `0xFF24`: NR50 master volume, `0xFF25`: NR51 panning,
//!   `0xFF26`: NR52 power/status
//! - `0xFF30-0xFF3F`: wave pattern RAM
//!
//! The frame sequencer advances on falling edges of DIV bit 4 (512 Hz):
//! steps 0/2/4/6 clock the length counters, 2/6 also clock pulse 1's
//! sweep, step 7 clocks the volume envelopes.
//!
//! One stereo sample is delivered every `CYCLES_PER_SAMPLE` ticks;
//! between sample points the per-channel amplitudes are averaged, which
//! suppresses the aliasing audible with plain decimation.

mod noise;
mod pulse;
mod wave;

use dotboy_core::AudioSink;

use noise::NoiseChannel;
use pulse::PulseChannel;
use wave::WaveChannel;

/// 4,194,304 Hz / 44,100 Hz, rounded down.
pub const CYCLES_PER_SAMPLE: u8 = 95;

pub struct Apu {
    pulse1: PulseChannel,
    pulse2: PulseChannel,
    wave: WaveChannel,
    noise: NoiseChannel,
    nr50: u8,
    nr51: u8,
    nr52: u8,

    avg_left: f32,
    avg_right: f32,
    sample_counter: u8,
    frame_seq: u8,
    last_div: u8,
    sink: Box<dyn AudioSink>,
}

impl Apu {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            pulse1: PulseChannel::default(),
            pulse2: PulseChannel::default(),
            wave: WaveChannel::default(),
            noise: NoiseChannel::default(),
            nr50: 0,
            nr51: 0,
            nr52: 0x80,
            avg_left: 0.0,
            avg_right: 0.0,
            sample_counter: CYCLES_PER_SAMPLE,
            frame_seq: 0,
            last_div: 0,
            sink,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        // With the master switch off only NR52 and wave RAM respond
        if self.nr52 & 0x80 == 0 && addr != 0xFF26 && !(0xFF30..=0xFF3F).contains(&addr) {
            return;
        }

        match addr {
            0xFF10..=0xFF14 => self.pulse1.write(addr, val),
            0xFF16..=0xFF19 => self.pulse2.write(addr, val),
            0xFF1A..=0xFF1E | 0xFF30..=0xFF3F => self.wave.write(addr, val),
            0xFF20..=0xFF23 => self.noise.write(addr, val),
            0xFF24 => self.nr50 = val,
            0xFF25 => self.nr51 = val,
            0xFF26 => {
                self.nr52 = val & 0x80;
                if val & 0x80 == 0 {
                    self.power_off();
                }
            }
            _ => {}
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF10..=0xFF14 => self.pulse1.read(addr),
            0xFF16..=0xFF19 => self.pulse2.read(addr),
            0xFF1A..=0xFF1E | 0xFF30..=0xFF3F => self.wave.read(addr),
            0xFF20..=0xFF23 => self.noise.read(addr),
            0xFF24 => self.nr50,
            0xFF25 => self.nr51,
            0xFF26 => {
                self.nr52
                    | 0x70
                    | (self.noise.is_running() as u8) << 3
                    | (self.wave.is_running() as u8) << 2
                    | (self.pulse2.is_running() as u8) << 1
                    | self.pulse1.is_running() as u8
            }
            _ => 0xFF,
        }
    }

    fn power_off(&mut self) {
        self.pulse1.reset();
        self.pulse2.reset();
        self.wave.reset();
        self.noise.reset();
        self.nr50 = 0;
        self.nr51 = 0;
    }

    /// Advance one tick. `div` is the timer's DIV snapshot, sampled
    /// before the timer itself ticks.
    pub fn tick(&mut self, div: u8) {
        if self.nr52 & 0x80 != 0 {
            // DIV bit 4 falls every 8192 ticks, the 512 Hz sequencer rate
            if self.last_div >> 4 & 1 == 1 && div >> 4 & 1 == 0 {
                self.clock_frame_sequencer();
            }
            self.last_div = div;

            self.pulse1.tick();
            self.pulse2.tick();
            self.wave.tick();
            self.noise.tick();
        }

        self.avg_right += self.mix_side(0) / 15.0;
        self.avg_left += self.mix_side(4) / 15.0;

        self.sample_counter -= 1;
        if self.sample_counter == 0 {
            self.push_sample();
            self.sample_counter = CYCLES_PER_SAMPLE;
        }
    }

    fn clock_frame_sequencer(&mut self) {
        match self.frame_seq {
            0 | 4 => self.clock_lengths(),
            2 | 6 => {
                self.pulse1.clock_sweep();
                self.clock_lengths();
            }
            7 => {
                self.pulse1.clock_volume();
                self.pulse2.clock_volume();
                self.noise.clock_volume();
            }
            _ => {}
        }

        self.frame_seq = (self.frame_seq + 1) % 8;
    }

    fn clock_lengths(&mut self) {
        self.pulse1.clock_length();
        self.pulse2.clock_length();
        self.wave.clock_length();
        self.noise.clock_length();
    }

    // Average the channels routed to one side by NR51 (shift 0 = right,
    // 4 = left), in DAC units 0-15
    fn mix_side(&self, shift: u8) -> f32 {
        let mask = self.nr51 >> shift;
        let mut sample = 0.0f32;
        let mut routed = 0u32;

        if mask & 0x01 != 0 {
            sample += self.pulse1.amplitude() as f32;
            routed += 1;
        }
        if mask & 0x02 != 0 {
            sample += self.pulse2.amplitude() as f32;
            routed += 1;
        }
        if mask & 0x04 != 0 {
            sample += self.wave.amplitude() as f32;
            routed += 1;
        }
        if mask & 0x08 != 0 {
            sample += self.noise.amplitude() as f32;
            routed += 1;
        }

        if routed == 0 {
            0.0
        } else {
            sample / routed as f32
        }
    }

    fn push_sample(&mut self) {
        let right_vol = (self.nr50 & 0x07) as f32;
        let left_vol = (self.nr50 >> 4 & 0x07) as f32;

        let mut right = self.avg_right / CYCLES_PER_SAMPLE as f32 * (right_vol / 7.0);
        let mut left = self.avg_left / CYCLES_PER_SAMPLE as f32 * (left_vol / 7.0);

        // [0, 1] -> [-1, 1]
        right = right * 2.0 - 1.0;
        left = left * 2.0 - 1.0;

        self.sink
            .push_sample((left * 32767.0) as i16, (right * 32767.0) as i16);

        self.avg_left = 0.0;
        self.avg_right = 0.0;
    }
}
