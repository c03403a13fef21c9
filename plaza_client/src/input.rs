//! Input handling.
//!
//! The host owns the keyboard; the core only asks whether each of the four
//! movement keys is held, once per tick.

/// Logical movement keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKey {
    Left,
    Right,
    Up,
    Down,
}

impl MoveKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Some(MoveKey::Left),
            "right" => Some(MoveKey::Right),
            "up" => Some(MoveKey::Up),
            "down" => Some(MoveKey::Down),
            _ => None,
        }
    }
}

/// Input collaborator.
pub trait InputSource {
    fn is_key_down(&self, key: MoveKey) -> bool;
}

bitflags::bitflags! {
    /// Held movement keys as a bit set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeldKeys: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const UP = 1 << 2;
        const DOWN = 1 << 3;
    }
}

impl HeldKeys {
    pub fn flag(key: MoveKey) -> Self {
        match key {
            MoveKey::Left => HeldKeys::LEFT,
            MoveKey::Right => HeldKeys::RIGHT,
            MoveKey::Up => HeldKeys::UP,
            MoveKey::Down => HeldKeys::DOWN,
        }
    }
}

impl InputSource for HeldKeys {
    fn is_key_down(&self, key: MoveKey) -> bool {
        self.contains(HeldKeys::flag(key))
    }
}

/// Movement wanted this tick, each axis in `{-1, 0, 1}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionalIntent {
    pub vx: i8,
    pub vy: i8,
}

impl DirectionalIntent {
    pub const NONE: Self = Self { vx: 0, vy: 0 };

    pub fn is_zero(self) -> bool {
        self.vx == 0 && self.vy == 0
    }
}

/// Samples the held keys. Left beats right and up beats down; a suppressed
/// sampler (a modal overlay has focus) always yields no movement.
pub fn sample(input: &dyn InputSource, suppressed: bool) -> DirectionalIntent {
    if suppressed {
        return DirectionalIntent::NONE;
    }
    let vx = if input.is_key_down(MoveKey::Left) {
        -1
    } else if input.is_key_down(MoveKey::Right) {
        1
    } else {
        0
    };
    let vy = if input.is_key_down(MoveKey::Up) {
        -1
    } else if input.is_key_down(MoveKey::Down) {
        1
    } else {
        0
    };
    DirectionalIntent { vx, vy }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposing_keys_resolve_to_first_of_pair() {
        let keys = HeldKeys::LEFT | HeldKeys::RIGHT | HeldKeys::DOWN;
        assert_eq!(sample(&keys, false), DirectionalIntent { vx: -1, vy: 1 });

        let keys = HeldKeys::UP | HeldKeys::DOWN;
        assert_eq!(sample(&keys, false), DirectionalIntent { vx: 0, vy: -1 });
    }

    #[test]
    fn suppressed_input_is_zero() {
        let keys = HeldKeys::all();
        assert!(sample(&keys, true).is_zero());
        assert!(sample(&HeldKeys::empty(), false).is_zero());
    }
}
