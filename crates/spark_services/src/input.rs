//! Keyboard polling and one-shot triggers

use std::collections::HashSet;

use winit::keyboard::KeyCode;

/// Keys currently held, fed from window key events and polled by the simulation step.
#[derive(Debug, Clone, Default)]
pub struct KeyboardState {
    pressed: HashSet<KeyCode>,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            self.pressed.insert(key);
        } else {
            self.pressed.remove(&key);
        }
    }

    pub fn is_down(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }

    /// Forget every held key (focus loss drops the release events).
    pub fn clear(&mut self) {
        self.pressed.clear();
    }
}

/// Edge detector that fires once per physical press of a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaptureTrigger {
    /// Key released
    #[default]
    Idle,
    /// Key went down on this step
    Pressed,
    /// Key still held, press already reported
    Handled,
}

impl CaptureTrigger {
    /// Advance by one simulation step; returns `true` on the rising edge only.
    pub fn update(&mut self, key_down: bool) -> bool {
        *self = match (key_down, *self) {
            (false, _) => CaptureTrigger::Idle,
            (true, CaptureTrigger::Idle) => CaptureTrigger::Pressed,
            (true, _) => CaptureTrigger::Handled,
        };
        *self == CaptureTrigger::Pressed
    }

    pub fn fired(&self) -> bool {
        *self == CaptureTrigger::Pressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holding_the_key_fires_once() {
        let mut trigger = CaptureTrigger::default();
        let fired: usize = (0..50).map(|_| trigger.update(true) as usize).sum();
        assert_eq!(fired, 1);
        assert_eq!(trigger, CaptureTrigger::Handled);
    }

    #[test]
    fn fires_on_the_first_step_of_the_hold() {
        let mut trigger = CaptureTrigger::default();
        assert!(!trigger.update(false));
        assert!(trigger.update(true));
        assert!(trigger.fired());
        assert!(!trigger.update(true));
        assert!(!trigger.fired());
    }

    #[test]
    fn release_rearms() {
        let mut trigger = CaptureTrigger::default();
        let pattern = [true, true, false, true, false, false, true, true, true];
        let fired: Vec<bool> = pattern.iter().map(|&down| trigger.update(down)).collect();
        assert_eq!(
            fired,
            [true, false, false, true, false, false, true, false, false]
        );
    }

    #[test]
    fn keyboard_tracks_press_and_release() {
        let mut keyboard = KeyboardState::new();
        assert!(!keyboard.is_down(KeyCode::KeyS));
        keyboard.set(KeyCode::KeyS, true);
        assert!(keyboard.is_down(KeyCode::KeyS));
        keyboard.set(KeyCode::KeyS, false);
        assert!(!keyboard.is_down(KeyCode::KeyS));

        keyboard.set(KeyCode::KeyA, true);
        keyboard.clear();
        assert!(!keyboard.is_down(KeyCode::KeyA));
    }
}
