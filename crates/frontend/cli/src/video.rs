//! Video sink backed by a framebuffer shared with the window loop.
//!
//! The PPU draws into the buffer from inside `run_for`; the main loop
//! blits it to the minifb window once a frame has been presented.

use std::cell::RefCell;
use std::rc::Rc;

use dotboy_core::VideoSink;
use dotboy_gb::{SCREEN_HEIGHT, SCREEN_WIDTH};

pub struct SharedFrame {
    /// 0RGB pixels, minifb's native layout.
    pub buffer: Vec<u32>,
    /// Set on `present_screen`, cleared after the blit.
    pub ready: bool,
}

pub struct WindowVideo {
    frame: Rc<RefCell<SharedFrame>>,
}

impl WindowVideo {
    pub fn new() -> (Self, Rc<RefCell<SharedFrame>>) {
        let frame = Rc::new(RefCell::new(SharedFrame {
            buffer: vec![0; (SCREEN_WIDTH * SCREEN_HEIGHT) as usize],
            ready: false,
        }));
        (
            Self {
                frame: frame.clone(),
            },
            frame,
        )
    }
}

// The core hands out RGBA8
fn to_0rgb(color: u32) -> u32 {
    color >> 8
}

impl VideoSink for WindowVideo {
    fn clear_screen(&mut self, color: u32) {
        let mut frame = self.frame.borrow_mut();
        frame.buffer.fill(to_0rgb(color));
    }

    fn draw_pixel(&mut self, color: u32, x: u32, y: u32) {
        let mut frame = self.frame.borrow_mut();
        frame.buffer[(y * SCREEN_WIDTH + x) as usize] = to_0rgb(color);
    }

    fn present_screen(&mut self) {
        self.frame.borrow_mut().ready = true;
    }
}
