// Link check: verify a robot answers before running the teleop client.
//
// Usage: cargo run --bin radio_check -- [port] [address]
// Example: cargo run --bin radio_check -- /dev/ttyUSB0 2052

use std::process::ExitCode;
use std::sync::Arc;

use motile_teleop::config;
use motile_teleop::link::radio::Radio;
use motile_teleop::robot::Robot;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_PORT.to_string());
    let address = match std::env::args().nth(2) {
        Some(text) => match config::parse_address(&text) {
            Ok(address) => address,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => config::DEFAULT_DEST_ADDR,
    };

    println!("Checking robot {:04X} via {}...", address, port);
    let radio = match Radio::open(&port, config::DEFAULT_BAUDRATE) {
        Ok(radio) => radio,
        Err(e) => {
            eprintln!("Cannot open radio link: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut robot = Robot::new(address, Arc::clone(&radio));
    let outcome = robot.query().await;
    radio.close();

    match outcome {
        Ok(()) => {
            println!("Robot {:04X} is alive.", address);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("No answer: {}", e);
            ExitCode::FAILURE
        }
    }
}
