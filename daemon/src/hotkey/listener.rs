//! Global key listener
//!
//! On macOS a CGEventTap on a dedicated thread with its own CFRunLoop keeps
//! the shared [`PressedKeys`] set current. Other platforms have no listener;
//! the daemon then runs without keyboard input.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::keys::{Key, KeyBindings, ModifierState};
use super::sampler::{InputError, KeySource};

/// Errors that can occur in the key listener
#[derive(Debug, thiserror::Error)]
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub enum HotkeyError {
    #[error("key listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("global key capture is not supported on this platform")]
    Unsupported,
}

#[derive(Debug, Default)]
struct KeyboardState {
    down: HashSet<u16>,
    modifiers: ModifierState,
}

/// Keys currently held down, shared between the listener and the sampler
#[derive(Debug, Clone, Default)]
pub struct PressedKeys {
    state: Arc<Mutex<KeyboardState>>,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
impl PressedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, code: u16) {
        if let Ok(mut state) = self.state.lock() {
            state.down.insert(code);
        }
    }

    pub fn release(&self, code: u16) {
        if let Ok(mut state) = self.state.lock() {
            state.down.remove(&code);
        }
    }

    pub fn set_modifiers(&self, modifiers: ModifierState) {
        if let Ok(mut state) = self.state.lock() {
            state.modifiers = modifiers;
        }
    }

    /// Forget every held key, for when key-up events may have been missed
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.down.clear();
            state.modifiers = ModifierState::default();
        }
    }

    /// View the pressed set through a set of bindings
    pub fn bind(&self, bindings: KeyBindings) -> BoundKeys {
        BoundKeys {
            keys: self.clone(),
            bindings,
        }
    }
}

/// [`KeySource`] over the listener's pressed-key set
#[derive(Debug, Clone)]
pub struct BoundKeys {
    keys: PressedKeys,
    bindings: KeyBindings,
}

impl KeySource for BoundKeys {
    fn is_pressed(&self, key: Key) -> Result<bool, InputError> {
        let state = self
            .keys
            .state
            .lock()
            .map_err(|_| InputError::Unavailable("keyboard state poisoned".to_string()))?;
        let binding = self.bindings.binding(key);
        Ok(state.down.contains(&binding.code) && state.modifiers.satisfies(binding))
    }
}

/// Global key listener feeding a [`PressedKeys`] set
pub struct HotkeyListener {
    keys: PressedKeys,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    /// Create a new key listener
    pub fn new(keys: PressedKeys) -> Self {
        Self {
            keys,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the key listener
    ///
    /// This spawns a dedicated thread that runs a CFRunLoop to receive
    /// CGEventTap callbacks. The listener runs until `stop()` is called
    /// or the program exits.
    #[cfg(target_os = "macos")]
    pub fn start(&self) -> Result<(), HotkeyError> {
        use tracing::{error, info};

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let keys = self.keys.clone();
        let running = Arc::clone(&self.running);

        std::thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");

                if let Err(e) = tap::run_event_loop(keys, running.clone()) {
                    error!(?e, "hotkey listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    pub fn start(&self) -> Result<(), HotkeyError> {
        let _ = &self.keys;
        Err(HotkeyError::Unsupported)
    }

    /// Stop the key listener; the run loop exits on its next slice
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(target_os = "macos")]
mod tap {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
        CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
    };
    use tracing::{error, info, trace, warn};

    use super::{HotkeyError, PressedKeys};
    use crate::hotkey::keys::ModifierState;

    enum RawKeyEvent {
        Down(u16),
        Up(u16),
        Flags(CGEventFlags),
        Disabled,
    }

    /// Run the CFRunLoop with the event tap
    pub(super) fn run_event_loop(
        keys: PressedKeys,
        running: Arc<AtomicBool>,
    ) -> Result<(), HotkeyError> {
        let (callback_tx, callback_rx) = std::sync::mpsc::channel::<RawKeyEvent>();

        // CGEventTap callback - must be fast and non-blocking
        let callback = move |_proxy: CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
                             -> Option<CGEvent> {
            let code = || event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
            match event_type {
                CGEventType::KeyDown => {
                    let _ = callback_tx.send(RawKeyEvent::Down(code()));
                }
                CGEventType::KeyUp => {
                    let _ = callback_tx.send(RawKeyEvent::Up(code()));
                }
                CGEventType::FlagsChanged => {
                    let _ = callback_tx.send(RawKeyEvent::Flags(event.get_flags()));
                }
                CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                    warn!(?event_type, "event tap disabled, will re-enable");
                    let _ = callback_tx.send(RawKeyEvent::Disabled);
                }
                _ => {}
            }
            Some(event.clone())
        };

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            vec![
                CGEventType::KeyDown,
                CGEventType::KeyUp,
                CGEventType::FlagsChanged,
            ],
            callback,
        )
        .map_err(|_| {
            error!("failed to create event tap - is Accessibility permission granted?");
            HotkeyError::EventTapCreation
        })?;

        tap.enable();

        let run_loop_source = tap
            .mach_port
            .create_runloop_source(0)
            .map_err(|_| HotkeyError::EventTapCreation)?;
        let run_loop = CFRunLoop::get_current();

        unsafe {
            run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
        }

        info!("event tap created and enabled");

        while running.load(Ordering::SeqCst) {
            unsafe {
                CFRunLoop::run_in_mode(
                    kCFRunLoopDefaultMode,
                    std::time::Duration::from_millis(100),
                    true,
                );
            }

            while let Ok(event) = callback_rx.try_recv() {
                match event {
                    RawKeyEvent::Down(code) => keys.press(code),
                    RawKeyEvent::Up(code) => keys.release(code),
                    RawKeyEvent::Flags(flags) => {
                        let modifiers = ModifierState::from_flags(flags);
                        trace!(?modifiers, "modifier state changed");
                        keys.set_modifiers(modifiers);
                    }
                    RawKeyEvent::Disabled => {
                        // Key-ups may have been lost while the tap was off
                        keys.clear();
                        tap.enable();
                        info!("event tap re-enabled");
                    }
                }
            }
        }

        Ok(())
    }
}
