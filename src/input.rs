// Operator input device
//
// The control loop polls an InputDevice once per cycle for stick axes and
// button state. The shipped implementation drives the axes from the
// keyboard in raw mode: W/S deflect the left side, I/K the right, [ and ]
// step the throttle scale, Q or Esc quits.

use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::tty::IsTty;
use tracing::info;

/// How long a drive key keeps its axis deflected without a repeat event
const KEY_HOLD: Duration = Duration::from_millis(150);

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("no operator input device: {0}")]
    Unavailable(String),

    #[error("input device error: {0}")]
    Io(#[from] std::io::Error),
}

/// One sample of operator intent
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    /// Stick deflections in [-1, 1]
    pub left_axis: f32,
    pub right_axis: f32,
    /// Throttle-scale button edges
    pub scale_up: bool,
    pub scale_down: bool,
    /// Operator asked to quit
    pub quit: bool,
}

/// Anything that can act as the operator's input device
pub trait InputDevice {
    /// Sample the device. Non-blocking; called once per control cycle.
    fn poll(&mut self) -> Result<InputState, InputError>;
}

/// A latched axis driven by key presses. Keys have no release edge we can
/// rely on across terminals, so the axis decays to neutral once the key
/// stops auto-repeating.
struct AxisKey {
    value: f32,
    pressed_at: Option<Instant>,
}

impl AxisKey {
    fn new() -> Self {
        Self {
            value: 0.0,
            pressed_at: None,
        }
    }

    fn press(&mut self, value: f32) {
        self.value = value;
        self.pressed_at = Some(Instant::now());
    }

    fn sample(&mut self) -> f32 {
        if let Some(at) = self.pressed_at {
            if at.elapsed() > KEY_HOLD {
                self.value = 0.0;
                self.pressed_at = None;
            }
        }
        self.value
    }
}

/// Keyboard-as-joystick operator input
pub struct KeyboardInput {
    left: AxisKey,
    right: AxisKey,
}

impl KeyboardInput {
    /// Take over the terminal. Fails when the process has no interactive
    /// terminal to read from (e.g. running detached).
    pub fn open() -> Result<Self, InputError> {
        if !std::io::stdin().is_tty() {
            return Err(InputError::Unavailable("stdin is not a terminal".into()));
        }
        enable_raw_mode()?;
        info!("Keyboard input ready: W/S left, I/K right, [ ] scale, Q quits");
        Ok(Self {
            left: AxisKey::new(),
            right: AxisKey::new(),
        })
    }
}

impl InputDevice for KeyboardInput {
    fn poll(&mut self) -> Result<InputState, InputError> {
        let mut state = InputState::default();

        // Drain everything queued since the last cycle
        while event::poll(Duration::ZERO)? {
            if let Event::Key(KeyEvent {
                code,
                kind,
                modifiers,
                ..
            }) = event::read()?
            {
                if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
                    continue;
                }
                match code {
                    KeyCode::Char('w') => self.left.press(1.0),
                    KeyCode::Char('s') => self.left.press(-1.0),
                    KeyCode::Char('i') => self.right.press(1.0),
                    KeyCode::Char('k') => self.right.press(-1.0),
                    KeyCode::Char(']') => state.scale_up = true,
                    KeyCode::Char('[') => state.scale_down = true,
                    // Raw mode swallows the interrupt signal, so ctrl-c
                    // arrives here as a key event
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                        state.quit = true;
                    }
                    KeyCode::Char('q') | KeyCode::Esc => state.quit = true,
                    _ => {}
                }
            }
        }

        state.left_axis = self.left.sample();
        state.right_axis = self.right.sample();
        Ok(state)
    }
}

impl Drop for KeyboardInput {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}
