// Radio link layer
//
// Provides:
// - Application command framing (status byte, command id, i16 payload)
// - XBee API-mode framing and inbound stream reassembly
// - Addressed transport with the capped confirmation/resend loop

pub mod frame;
pub mod radio;
pub mod xbee;

pub use frame::{Command, FrameError};
pub use radio::{Address, Channel, Inbound, LinkError, Radio};
