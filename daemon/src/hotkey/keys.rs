//! Logical keys, their bindings and modifier tracking
//!
//! Key codes are macOS virtual key codes, as delivered by the event tap.

use serde::{Deserialize, Serialize};

/// Keys the controller reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Hold to talk
    Talk,
    /// Quit combination
    Quit,
    /// Enter the game
    Game,
    /// Enter the screensaver
    Screensaver,
    /// Leave the game or screensaver
    Cancel,
    /// Paddle left
    Left,
    /// Paddle right
    Right,
}

/// Virtual key codes for the default bindings
pub mod codes {
    pub const Q: u16 = 12;
    pub const G: u16 = 5;
    pub const DIGIT_4: u16 = 21;
    pub const SPACE: u16 = 49;
    pub const ESCAPE: u16 = 53;
    pub const LEFT_ARROW: u16 = 123;
    pub const RIGHT_ARROW: u16 = 124;
}

/// A physical key, optionally requiring Control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub code: u16,
    #[serde(default)]
    pub control: bool,
}

impl Binding {
    pub const fn key(code: u16) -> Self {
        Self { code, control: false }
    }

    pub const fn with_control(code: u16) -> Self {
        Self { code, control: true }
    }
}

/// Physical binding of each logical key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub talk: Binding,
    pub quit: Binding,
    pub game: Binding,
    pub screensaver: Binding,
    pub cancel: Binding,
    pub left: Binding,
    pub right: Binding,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            talk: Binding::key(codes::SPACE),
            quit: Binding::with_control(codes::Q),
            game: Binding::key(codes::G),
            screensaver: Binding::key(codes::DIGIT_4),
            cancel: Binding::key(codes::ESCAPE),
            left: Binding::key(codes::LEFT_ARROW),
            right: Binding::key(codes::RIGHT_ARROW),
        }
    }
}

impl KeyBindings {
    pub fn binding(&self, key: Key) -> Binding {
        match key {
            Key::Talk => self.talk,
            Key::Quit => self.quit,
            Key::Game => self.game,
            Key::Screensaver => self.screensaver,
            Key::Cancel => self.cancel,
            Key::Left => self.left,
            Key::Right => self.right,
        }
    }
}

/// Modifier keys that bindings can require
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    /// Control key is held
    pub control: bool,
}

impl ModifierState {
    /// Whether the modifiers satisfy a binding
    pub fn satisfies(&self, binding: Binding) -> bool {
        !binding.control || self.control
    }
}

#[cfg(target_os = "macos")]
impl ModifierState {
    /// Create a new ModifierState from CGEventFlags
    pub fn from_flags(flags: core_graphics::event::CGEventFlags) -> Self {
        use core_graphics::event::CGEventFlags;

        Self {
            control: flags.contains(CGEventFlags::CGEventFlagControl),
        }
    }
}
