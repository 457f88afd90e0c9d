use clap::Parser;
use servobank::utils::built_info;
use servobank::{Config, ServoBank, ServoBankError};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

const WATCH_TICK: Duration = Duration::from_millis(100);

/// Simple program to move one servo of a PCA9685 servo bank
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Servo index within the bank
    #[arg()]
    index: usize,

    /// Angle (degrees); values outside [0, 180] extrapolate the calibration
    #[arg(allow_negative_numbers = true)]
    degrees: i32,

    /// Path to configuration file
    #[arg(long, default_value = "/etc/servobank.yaml")]
    config_file_path: String,

    /// Use simulated PCA9685s instead of the I2C device
    #[arg(long)]
    mock: bool,

    /// Keep sweeping for idle servos for this many seconds
    #[arg(long, default_value_t = 0)]
    watch_secs: u64,
}

fn exit_code(error: &ServoBankError) -> exitcode::ExitCode {
    match error {
        ServoBankError::InvalidChannel { .. } => exitcode::USAGE,
        ServoBankError::InvalidConfiguration(_) | ServoBankError::ConfigLoadError { .. } => {
            exitcode::CONFIG
        }
        ServoBankError::BusCommunicationError { .. } | ServoBankError::NotSetUp => {
            exitcode::IOERR
        }
    }
}

fn run(args: &Args) -> Result<(), ServoBankError> {
    let config = Config::load_from_file(&args.config_file_path)?;

    // Only ARM boards carry the I2C bus the chips hang off
    let force_mock = cfg!(not(any(target_arch = "arm", target_arch = "aarch64")));

    let mut bank = if args.mock || force_mock {
        log::warn!(target: "tester", "Using simulated PCA9685 driver.");
        ServoBank::mock(&config)?
    } else {
        ServoBank::new(&config)?
    };

    bank.setup()?;

    let pulse = bank.set_degrees(args.index, args.degrees)?;
    log::info!(
        target: "tester",
        "Servo {} set to {} degrees ({} counts)", args.index, args.degrees, pulse
    );

    let started = Instant::now();
    let watch = Duration::from_secs(args.watch_secs);
    let mut switched_off = false;
    while started.elapsed() < watch {
        let idle = bank.idle_sweep()?;
        if !switched_off && idle.contains(&args.index) {
            log::info!(target: "tester", "Servo {} switched off after idling", args.index);
            switched_off = true;
        }

        thread::sleep(WATCH_TICK);
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    log::info!(target: "tester", "servobank-tester {}", built_info::PKG_VERSION);

    if let Err(error) = run(&args) {
        log::error!(target: "tester", "{}", error);
        process::exit(exit_code(&error));
    }
}
