// Joystick teleoperation client for Motile crawler robots
//
// Provides:
// - A command codec and XBee radio transport for the basestation link
// - A per-robot command session with a confirmed gains handshake
// - The fixed-cadence control loop mapping operator input to thrust

pub mod config;
pub mod input;
pub mod link;
pub mod robot;
pub mod runtime;
pub mod throttle;

pub use link::{Address, Command, LinkError, Radio};
pub use robot::{Robot, SessionError, SetupState};
pub use throttle::{ThrottlePair, ThrottleScale};
