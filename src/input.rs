use std::collections::HashSet;
use std::hash::Hash;

use glam::Vec2;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Pixels per scroll line for touchpads reporting pixel deltas.
const PIXELS_PER_LINE: f32 = 120.0;

/// Held buttons plus the press edges seen since the last frame boundary.
#[derive(Debug)]
struct Buttons<T> {
    held: HashSet<T>,
    edges: HashSet<T>,
}

impl<T> Default for Buttons<T> {
    fn default() -> Self {
        Self {
            held: HashSet::new(),
            edges: HashSet::new(),
        }
    }
}

impl<T: Copy + Eq + Hash> Buttons<T> {
    fn set(&mut self, button: T, state: ElementState) {
        match state {
            // Auto-repeat arrives as another press of a held button.
            ElementState::Pressed => {
                if self.held.insert(button) {
                    self.edges.insert(button);
                }
            }
            ElementState::Released => {
                self.held.remove(&button);
            }
        }
    }

    fn release_all(&mut self) {
        self.held.clear();
    }

    fn next_frame(&mut self) {
        self.edges.clear();
    }
}

/// Keyboard and mouse state, fed from window events.
///
/// Press queries report edges since the last [`begin_frame`](Self::begin_frame),
/// so a key bound to a toggle fires once per physical press.
#[derive(Debug, Default)]
pub struct Input {
    keys: Buttons<KeyCode>,
    mouse: Buttons<MouseButton>,
    cursor: Option<Vec2>,
    motion: Vec2,
    scroll: Vec2,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new frame: drops press edges and accumulated motion.
    pub fn begin_frame(&mut self) {
        self.keys.next_frame();
        self.mouse.next_frame();
        self.motion = Vec2::ZERO;
        self.scroll = Vec2::ZERO;
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.keys.set(key, event.state);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => self.mouse.set(*button, *state),
            WindowEvent::CursorMoved { position, .. } => {
                let position = Vec2::new(position.x as f32, position.y as f32);
                if let Some(last) = self.cursor.replace(position) {
                    self.move_mouse(position - last);
                }
            }
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            WindowEvent::MouseWheel { delta, .. } => self.scroll(match delta {
                MouseScrollDelta::LineDelta(x, y) => Vec2::new(*x, *y),
                MouseScrollDelta::PixelDelta(pos) => {
                    Vec2::new(pos.x as f32, pos.y as f32) / PIXELS_PER_LINE
                }
            }),
            // Releases that happen while unfocused never arrive.
            WindowEvent::Focused(false) => {
                self.keys.release_all();
                self.mouse.release_all();
            }
            _ => {}
        }
    }

    pub fn press_key(&mut self, key: KeyCode) {
        self.keys.set(key, ElementState::Pressed);
    }

    pub fn release_key(&mut self, key: KeyCode) {
        self.keys.set(key, ElementState::Released);
    }

    pub fn press_mouse(&mut self, button: MouseButton) {
        self.mouse.set(button, ElementState::Pressed);
    }

    pub fn release_mouse(&mut self, button: MouseButton) {
        self.mouse.set(button, ElementState::Released);
    }

    pub fn move_mouse(&mut self, delta: Vec2) {
        self.motion += delta;
    }

    /// Adds wheel movement, in lines.
    pub fn scroll(&mut self, lines: Vec2) {
        self.scroll += lines;
    }

    pub fn key_down(&self, key: KeyCode) -> bool {
        self.keys.held.contains(&key)
    }

    /// True once per physical press, in the frame it happened.
    pub fn key_pressed(&self, key: KeyCode) -> bool {
        self.keys.edges.contains(&key)
    }

    pub fn mouse_down(&self, button: MouseButton) -> bool {
        self.mouse.held.contains(&button)
    }

    pub fn mouse_pressed(&self, button: MouseButton) -> bool {
        self.mouse.edges.contains(&button)
    }

    /// Last known cursor position, `None` while outside the window.
    pub fn cursor(&self) -> Option<Vec2> {
        self.cursor
    }

    pub fn mouse_delta(&self) -> Vec2 {
        self.motion
    }

    pub fn scroll_delta(&self) -> Vec2 {
        self.scroll
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_fires_once_until_released() {
        let mut input = Input::new();
        input.press_key(KeyCode::KeyW);
        assert!(input.key_pressed(KeyCode::KeyW));
        assert!(input.key_down(KeyCode::KeyW));

        input.begin_frame();
        input.press_key(KeyCode::KeyW);
        assert!(!input.key_pressed(KeyCode::KeyW));
        assert!(input.key_down(KeyCode::KeyW));

        input.release_key(KeyCode::KeyW);
        input.begin_frame();
        input.press_key(KeyCode::KeyW);
        assert!(input.key_pressed(KeyCode::KeyW));
    }

    #[test]
    fn mouse_buttons_track_edges() {
        let mut input = Input::new();
        input.press_mouse(MouseButton::Left);
        assert!(input.mouse_pressed(MouseButton::Left));
        input.begin_frame();
        assert!(input.mouse_down(MouseButton::Left));
        assert!(!input.mouse_pressed(MouseButton::Left));
        input.release_mouse(MouseButton::Left);
        assert!(!input.mouse_down(MouseButton::Left));
    }

    #[test]
    fn focus_loss_releases_everything() {
        let mut input = Input::new();
        input.press_key(KeyCode::Space);
        input.press_mouse(MouseButton::Right);
        input.handle_event(&WindowEvent::Focused(false));
        assert!(!input.key_down(KeyCode::Space));
        assert!(!input.mouse_down(MouseButton::Right));
    }

    #[test]
    fn deltas_reset_each_frame() {
        let mut input = Input::new();
        input.move_mouse(Vec2::new(3.0, 4.0));
        input.scroll(Vec2::new(0.0, 1.0));
        assert_eq!(input.mouse_delta(), Vec2::new(3.0, 4.0));
        assert_eq!(input.scroll_delta(), Vec2::new(0.0, 1.0));

        input.begin_frame();
        assert_eq!(input.mouse_delta(), Vec2::ZERO);
        assert_eq!(input.scroll_delta(), Vec2::ZERO);
    }
}
