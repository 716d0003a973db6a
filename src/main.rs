use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use motile_teleop::config::{self, FileConfig, Settings};
use motile_teleop::input::KeyboardInput;
use motile_teleop::link::radio::Radio;
use motile_teleop::runtime::{self, TeleopError};

#[derive(Parser, Debug)]
#[command(name = "motile-teleop", version, about = "Joystick teleoperation client for Motile robots")]
struct Args {
    /// Serial port of the radio basestation
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate for the basestation link
    #[arg(short, long)]
    baud: Option<u32>,

    /// Destination robot address, hex (e.g. 2052)
    #[arg(short, long)]
    address: Option<String>,

    /// Resend budget for the gains handshake
    #[arg(long)]
    gain_retries: Option<u32>,

    /// Raw open-loop driving only: skip the gains handshake and link check
    #[arg(long)]
    open_loop: bool,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

fn resolve_settings(args: Args) -> Result<Settings, config::ConfigError> {
    let mut settings = Settings::default();
    if let Some(path) = &args.config {
        let file = FileConfig::load(path)?;
        settings.apply_file(file)?;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(baud) = args.baud {
        settings.baudrate = baud;
    }
    if let Some(address) = &args.address {
        settings.address = config::parse_address(address)?;
    }
    if let Some(retries) = args.gain_retries {
        settings.gain_retries = retries;
    }
    if args.open_loop {
        settings.open_loop = true;
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let settings = match resolve_settings(Args::parse()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Bad configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let radio = match Radio::open(&settings.port, settings.baudrate) {
        Ok(radio) => radio,
        Err(e) => {
            error!("Cannot open radio link: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // The input device comes up before any command frame goes out, so a
    // missing joystick leaves the robot untouched.
    let mut input = match KeyboardInput::open() {
        Ok(input) => input,
        Err(e) => {
            error!("No operator input: {}", e);
            radio.close();
            return ExitCode::FAILURE;
        }
    };

    let result = runtime::run(&settings, Arc::clone(&radio), &mut input).await;

    // Clean shutdown on every path; a dead link still gets a close attempt
    radio.close();
    drop(input);
    println!();

    match result {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(TeleopError::Input(e)) => {
            error!("Input device failed: {}", e);
            ExitCode::FAILURE
        }
        Err(TeleopError::Session(e)) => {
            error!("Robot setup failed: {}", e);
            ExitCode::FAILURE
        }
        Err(TeleopError::Link(e)) => {
            error!("Radio link failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
