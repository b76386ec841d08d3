//! Keyboard input source.
//!
//! The window loop refreshes a shared button-state byte once per frame;
//! the bus polls it through `InputSource` on joypad reads and gets the
//! low nibble rewritten for whichever matrix group P1 has selected.

use std::cell::RefCell;
use std::rc::Rc;

use dotboy_core::InputSource;
use minifb::{Key, Window};

/// Pressed-button bits: 0=Right, 1=Left, 2=Up, 3=Down, 4=A, 5=B,
/// 6=Select, 7=Start. A set bit means pressed.
pub type ButtonState = Rc<RefCell<u8>>;

pub struct KeyboardInput {
    buttons: ButtonState,
}

impl KeyboardInput {
    pub fn new() -> (Self, ButtonState) {
        let buttons = Rc::new(RefCell::new(0));
        (
            Self {
                buttons: buttons.clone(),
            },
            buttons,
        )
    }
}

impl InputSource for KeyboardInput {
    fn get_input(&mut self, joyp: &mut u8) {
        let buttons = *self.buttons.borrow();
        let select_dpad = *joyp & 0x10 == 0;
        let select_buttons = *joyp & 0x20 == 0;

        // Input lines are active-low
        let mut low = 0x0F;
        if select_dpad {
            low &= !(buttons & 0x0F);
        }
        if select_buttons {
            low &= !(buttons >> 4);
        }

        *joyp = (*joyp & 0xF0) | (low & 0x0F);
    }
}

const KEY_MAP: [(Key, u8); 8] = [
    (Key::Right, 0),
    (Key::Left, 1),
    (Key::Up, 2),
    (Key::Down, 3),
    (Key::Z, 4),
    (Key::X, 5),
    (Key::Backspace, 6),
    (Key::Enter, 7),
];

pub fn read_buttons(window: &Window) -> u8 {
    let mut state = 0;
    for (key, bit) in KEY_MAP {
        if window.is_key_down(key) {
            state |= 1 << bit;
        }
    }
    state
}
