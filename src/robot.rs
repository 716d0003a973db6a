// Robot command session
//
// High-level operations on one robot over the shared radio link. Drive
// commands are fire-and-forget; the gains handshake is the one confirmed
// exchange, and a robot whose gains were never confirmed must not be
// driven.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::timeout;
use tracing::{info, warn};

use crate::config;
use crate::link::frame::{self, Command, FrameError};
use crate::link::radio::{Address, LinkError, Radio};

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("robot {address:04X} never confirmed its gains ({attempts} attempts)")]
    SetupFailed { address: Address, attempts: u32 },

    #[error("robot {address:04X} did not answer the link check")]
    LinkVerification { address: Address },
}

/// Setup progress for one robot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Uninitialized,
    ResetSent,
    GainsPending,
    GainsConfirmed,
    Operational,
    /// Terminal: the gains handshake exhausted its retries. Do not drive.
    SetupFailed,
}

/// Session handle for a single robot on the radio network
pub struct Robot {
    address: Address,
    radio: Arc<Radio>,
    state: SetupState,
    gains_confirmed: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl Robot {
    /// Create a session for the robot at `address` and hook its
    /// acknowledgement handlers into the radio's receive path.
    pub fn new(address: Address, radio: Arc<Radio>) -> Self {
        let gains_confirmed = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&gains_confirmed);
        radio.on_frame(Command::SetPidGains.id(), move |inbound| {
            if inbound.source == address {
                info!("Robot {:04X} confirmed motor gains", address);
                flag.store(true, Ordering::Release);
            }
        });

        let flag = Arc::clone(&alive);
        radio.on_frame(Command::WhoAmI.id(), move |inbound| {
            if inbound.source == address {
                info!("Robot {:04X} answered: {:?}", address, inbound.values);
                flag.store(true, Ordering::Release);
            }
        });

        Self {
            address,
            radio,
            state: SetupState::Uninitialized,
            gains_confirmed,
            alive,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    /// Reboot the robot's controller. Fire-and-forget.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        info!("Resetting robot {:04X}", self.address);
        let payload = frame::encode(Command::SoftwareReset, &[0])?;
        self.radio.send(self.address, &payload)?;
        self.state = SetupState::ResetSent;
        Ok(())
    }

    /// Send PID gains (five per motor) and wait for the robot to confirm
    /// them, resending up to `retries` times. Exhausting the budget leaves
    /// the session in the terminal `SetupFailed` state; the caller must
    /// abort startup rather than drive with unconfirmed gains.
    pub async fn set_motor_gains(
        &mut self,
        gains: &[i16; 10],
        retries: u32,
    ) -> Result<(), SessionError> {
        let payload = frame::encode(Command::SetPidGains, gains.as_slice())?;
        self.gains_confirmed.store(false, Ordering::Release);
        self.state = SetupState::GainsPending;
        info!("Setting motor gains on robot {:04X}", self.address);

        let flag = Arc::clone(&self.gains_confirmed);
        let result = self
            .radio
            .send_with_confirmation(
                self.address,
                &payload,
                move || flag.load(Ordering::Acquire),
                retries,
            )
            .await;

        match result {
            Ok(()) => {
                self.state = SetupState::GainsConfirmed;
                Ok(())
            }
            Err(LinkError::AckTimeout { attempts }) => {
                self.state = SetupState::SetupFailed;
                Err(SessionError::SetupFailed {
                    address: self.address,
                    attempts,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Open-loop throttle for both sides. Fire-and-forget: the next
    /// control cycle supersedes a dropped frame.
    pub fn set_motor_speeds(&self, left: i16, right: i16) -> Result<(), SessionError> {
        let payload = frame::encode(Command::SetThrustOpenLoop, &[left, right])?;
        self.radio.send(self.address, &payload)?;
        Ok(())
    }

    /// Closed-loop thrust setpoints. Fire-and-forget.
    pub fn set_thrust_closed_loop(&self, thrust: &[i16; 5]) -> Result<(), SessionError> {
        let payload = frame::encode(Command::SetThrustClosedLoop, thrust.as_slice())?;
        self.radio.send(self.address, &payload)?;
        Ok(())
    }

    /// Verify the robot is reachable before entering the control loop.
    pub async fn query(&mut self) -> Result<(), SessionError> {
        self.alive.store(false, Ordering::Release);
        let payload = frame::encode(Command::WhoAmI, &[])?;
        self.radio.send(self.address, &payload)?;

        let flag = Arc::clone(&self.alive);
        match timeout(
            config::QUERY_TIMEOUT,
            self.radio.wait_for(move || flag.load(Ordering::Acquire)),
        )
        .await
        {
            Ok(()) => {
                self.state = SetupState::Operational;
                Ok(())
            }
            Err(_) => Err(SessionError::LinkVerification {
                address: self.address,
            }),
        }
    }

    /// Best-effort zero throttle, for shutdown paths.
    pub fn stop(&self) {
        if let Err(e) = self.set_motor_speeds(0, 0) {
            warn!("failed to stop robot {:04X}: {}", self.address, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::radio::testing::MockChannel;
    use crate::link::xbee::ApiFrame;
    use std::time::Duration;

    const ROBOT: Address = 0x2052;
    const OTHER_ROBOT: Address = 0x2072;

    fn ack(source: Address, command: Command, values: &[i16]) -> ApiFrame {
        ApiFrame::Rx {
            source,
            rssi: 40,
            payload: frame::encode(command, values).expect("valid ack"),
        }
    }

    fn mock_robot() -> (Robot, crate::link::radio::testing::SentFrames, Arc<Radio>) {
        let (channel, sent) = MockChannel::new();
        let radio = Radio::from_channel(Box::new(channel), Duration::from_millis(20));
        let robot = Robot::new(ROBOT, Arc::clone(&radio));
        (robot, sent, radio)
    }

    fn payload_of(wire_frame: &[u8]) -> &[u8] {
        // Strip the radio header (delimiter, length, api id, frame id,
        // address, options) and trailing checksum
        &wire_frame[8..wire_frame.len() - 1]
    }

    #[tokio::test]
    async fn test_reset_transitions_and_sends_zero_payload() {
        let (mut robot, sent, _radio) = mock_robot();
        assert_eq!(robot.state(), SetupState::Uninitialized);

        robot.reset().unwrap();

        assert_eq!(robot.state(), SetupState::ResetSent);
        let frames = sent.lock().unwrap();
        assert_eq!(payload_of(&frames[0]), &[0x00, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_gains_exhaustion_is_terminal_setup_failure() {
        let (mut robot, sent, _radio) = mock_robot();

        let result = robot.set_motor_gains(&[1; 10], 8).await;

        assert!(matches!(
            result,
            Err(SessionError::SetupFailed {
                address: ROBOT,
                attempts: 9
            })
        ));
        assert_eq!(robot.state(), SetupState::SetupFailed);
        // 8 retries means 9 sends total
        assert_eq!(sent.lock().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_gains_confirmed_by_matching_ack() {
        let (mut robot, _sent, radio) = mock_robot();

        let injector = Arc::clone(&radio);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            // An ack from a different robot must not satisfy the handshake
            injector.handle_api(ack(OTHER_ROBOT, Command::SetPidGains, &[0; 10]));
            injector.handle_api(ack(ROBOT, Command::SetPidGains, &[0; 10]));
        });

        robot
            .set_motor_gains(&config::DEFAULT_MOTOR_GAINS, 8)
            .await
            .unwrap();
        assert_eq!(robot.state(), SetupState::GainsConfirmed);
    }

    #[tokio::test]
    async fn test_foreign_ack_does_not_confirm() {
        let (mut robot, sent, radio) = mock_robot();

        let injector = Arc::clone(&radio);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            injector.handle_api(ack(OTHER_ROBOT, Command::SetPidGains, &[0; 10]));
        });

        let result = robot.set_motor_gains(&[1; 10], 1).await;

        assert!(matches!(result, Err(SessionError::SetupFailed { .. })));
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_set_motor_speeds_encodes_open_loop_thrust() {
        let (robot, sent, _radio) = mock_robot();

        robot.set_motor_speeds(150, -75).unwrap();

        let frames = sent.lock().unwrap();
        assert_eq!(payload_of(&frames[0]), &[0x00, 0x02, 0x96, 0x00, 0xB5, 0xFF]);
    }

    #[tokio::test]
    async fn test_query_marks_operational_on_answer() {
        let (mut robot, _sent, radio) = mock_robot();

        let injector = Arc::clone(&radio);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            injector.handle_api(ack(ROBOT, Command::WhoAmI, &[]));
        });

        robot.query().await.unwrap();
        assert_eq!(robot.state(), SetupState::Operational);
    }

    #[tokio::test]
    async fn test_stop_sends_zero_throttle() {
        let (robot, sent, _radio) = mock_robot();

        robot.stop();

        let frames = sent.lock().unwrap();
        assert_eq!(payload_of(&frames[0]), &[0x00, 0x02, 0x00, 0x00, 0x00, 0x00]);
    }
}
