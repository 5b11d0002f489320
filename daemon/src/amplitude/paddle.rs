/// Game paddle position, driven by the direction keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paddle {
    position: u8,
    step: u8,
    home: u8,
}

impl Paddle {
    pub fn new(home: u8, step: u8) -> Self {
        Self {
            position: home,
            step,
            home,
        }
    }

    /// Move back to the starting position
    pub fn reset(&mut self) -> u8 {
        self.position = self.home;
        self.position
    }

    /// Step once for the held direction; left wins if both are held
    ///
    /// Returns the new position when a direction key is held, `None` when the
    /// paddle was left alone.
    pub fn advance(&mut self, left: bool, right: bool) -> Option<u8> {
        if left {
            self.position = self.position.saturating_sub(self.step);
        } else if right {
            self.position = self.position.saturating_add(self.step);
        } else {
            return None;
        }
        Some(self.position)
    }
}
