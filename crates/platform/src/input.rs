//! Input tracking for the orbit camera and key toggles.

use std::collections::HashSet;

use glam::Vec2;

pub use winit::keyboard::KeyCode;

/// Mouse buttons the application reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn from_winit(button: winit::event::MouseButton) -> Option<Self> {
        match button {
            winit::event::MouseButton::Left => Some(MouseButton::Left),
            winit::event::MouseButton::Right => Some(MouseButton::Right),
            winit::event::MouseButton::Middle => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

/// Input accumulated since the previous frame.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameInput {
    /// Cursor movement while the left button was held, in pixels
    pub drag: Vec2,
    /// Scroll lines, positive away from the user
    pub scroll: f32,
    /// Keys pressed this frame, in press order
    pub pressed: Vec<KeyCode>,
}

impl FrameInput {
    pub fn was_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }
}

/// Collects window events between frames.
#[derive(Debug, Default)]
pub struct InputState {
    held_keys: HashSet<KeyCode>,
    held_buttons: HashSet<MouseButton>,
    cursor: Option<Vec2>,
    frame: FrameInput,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a key transition. Auto-repeat presses are ignored.
    pub fn on_key(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            if self.held_keys.insert(key) {
                self.frame.pressed.push(key);
            }
        } else {
            self.held_keys.remove(&key);
        }
    }

    pub fn on_mouse_button(&mut self, button: MouseButton, pressed: bool) {
        if pressed {
            self.held_buttons.insert(button);
        } else {
            self.held_buttons.remove(&button);
        }
    }

    pub fn on_cursor_moved(&mut self, x: f32, y: f32) {
        let position = Vec2::new(x, y);
        if let Some(last) = self.cursor
            && self.held_buttons.contains(&MouseButton::Left)
        {
            self.frame.drag += position - last;
        }
        self.cursor = Some(position);
    }

    pub fn on_cursor_left(&mut self) {
        self.cursor = None;
    }

    pub fn on_scroll(&mut self, lines: f32) {
        self.frame.scroll += lines;
    }

    pub fn is_key_held(&self, key: KeyCode) -> bool {
        self.held_keys.contains(&key)
    }

    /// Returns the input gathered since the last call and starts a new frame.
    pub fn take_frame(&mut self) -> FrameInput {
        std::mem::take(&mut self.frame)
    }
}
