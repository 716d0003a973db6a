// Fixed-cadence teleoperation loop
//
// Brings the robot up (reset, gains handshake, link check), then polls the
// operator input at LOOP_HZ and streams open-loop thrust frames. Drive
// frames are fire-and-forget; a lost one is superseded by the next tick.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{LOOP_HZ, RESET_SETTLE, Settings};
use crate::input::{InputDevice, InputError};
use crate::link::radio::{LinkError, Radio};
use crate::robot::{Robot, SessionError};
use crate::throttle::{ThrottleScale, throttle_pair};

#[derive(Debug, thiserror::Error)]
pub enum TeleopError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Run the teleop session until the operator quits or the link dies.
pub async fn run(
    settings: &Settings,
    radio: Arc<Radio>,
    input: &mut dyn InputDevice,
) -> Result<(), TeleopError> {
    let mut robot = Robot::new(settings.address, Arc::clone(&radio));

    // A termination signal must be able to unblock the setup waits
    tokio::select! {
        result = setup(&mut robot, settings) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted during setup");
            return Ok(());
        }
    }

    info!("Entering control loop at {} Hz", LOOP_HZ);
    let mut scale = ThrottleScale::default();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let state = input.poll()?;
                if state.quit {
                    info!("Operator quit");
                    break;
                }
                if state.scale_up {
                    scale.increase();
                }
                if state.scale_down {
                    scale.decrease();
                }

                let pair = throttle_pair(state.left_axis, state.right_axis, scale.get());
                robot.set_motor_speeds(pair.left, pair.right)?;
                print_status(pair.left, pair.right, scale.get());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        }
    }

    robot.stop();
    Ok(())
}

async fn setup(robot: &mut Robot, settings: &Settings) -> Result<(), TeleopError> {
    robot.reset()?;
    tokio::time::sleep(RESET_SETTLE).await;

    if settings.open_loop {
        warn!("Open-loop mode: skipping gains handshake and link check");
        return Ok(());
    }

    robot.set_motor_gains(&settings.gains, settings.gain_retries).await?;
    robot.query().await?;
    Ok(())
}

/// One status line, overwritten in place. Best-effort; never blocks the
/// loop on console state.
fn print_status(left: i16, right: i16, scale: i16) {
    let mut out = std::io::stdout();
    let _ = write!(out, "\rL: {:4}  |  R: {:4}   (scale {:3})  ", left, right, scale);
    let _ = out.flush();
}
