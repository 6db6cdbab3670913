use std::env;
use std::error::Error;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chip8_drive::config::DriveConfig;
use chip8_drive::display::MonoTermDisplay;
use chip8_drive::error::ConfigError;
use chip8_drive::ffi::ForeignLibrary;
use chip8_drive::frame::PacedFrames;
use chip8_drive::input::{HostEvent, Input, StdinInput};
use chip8_drive::session::SessionManager;
use chip8_drive::sound::fallback_opener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: chip8-drive <library> [--config FILE] [--log FILE] \
                     [--rate N] [--layout qwerty|qwertz] [--carry] [--no-telemetry] \
                     <program>...";

/// pull `flag VALUE` out of `args`
fn take_flag(args: &mut Vec<String>, flag: &str) -> Result<Option<String>, ConfigError> {
    let Some(at) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if at + 1 >= args.len() {
        return Err(ConfigError::Usage(format!("{flag} needs a value")));
    }
    let value = args.remove(at + 1);
    args.remove(at);
    Ok(Some(value))
}

/// NB. the terminal belongs to the display, so logs go to a file or nowhere
fn init_logging(path: Option<&str>) -> Result<(), Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chip8_drive=info"));
    match path {
        Some(path) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(File::create(path)?))
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .init(),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let log_path = take_flag(&mut args, "--log")?;
    let config_path = take_flag(&mut args, "--config")?;
    init_logging(log_path.as_deref())?;

    if args.is_empty() || args[0].starts_with("--") {
        return Err(USAGE.into());
    }
    let library = PathBuf::from(args.remove(0));
    let mut config = match config_path {
        Some(path) => DriveConfig::load(Path::new(&path))?,
        None => DriveConfig::default(),
    };
    config.apply_args(&args)?;
    let first = config
        .programs
        .first()
        .cloned()
        .ok_or_else(|| ConfigError::Usage(USAGE.into()))?;

    // initialise
    let factory = ForeignLibrary::open(&library)?;
    let display = MonoTermDisplay::new()?;
    let mut input = StdinInput::new(config.key_hold_ms)?;
    let frames = PacedFrames::new(config.frame_rate);
    let mut manager = SessionManager::new(
        &config,
        factory,
        frames,
        Box::new(display),
        fallback_opener(config.tone_hz),
    );
    info!(library = %library.display(), programs = config.programs.len(), "starting");

    let mut events = Vec::new();
    let mut visible = true;
    let result: Result<(), Box<dyn Error>> = 'run: {
        if let Err(e) = manager.start(&first) {
            break 'run Err(e.into());
        }
        loop {
            let now = manager.frames().now_ms();
            if let Err(e) = input.poll_events(now, &mut events) {
                break 'run Err(e.into());
            }
            for event in events.drain(..) {
                let handled = match event {
                    HostEvent::Quit => break 'run Ok(()),
                    HostEvent::Key(key, edge) => {
                        manager.key(key, edge);
                        Ok(())
                    }
                    HostEvent::ToggleVisibility => {
                        visible = !visible;
                        if visible {
                            manager.resume()
                        } else {
                            manager.pause()
                        }
                    }
                    HostEvent::NextProgram => manager.next_program(),
                    HostEvent::PreviousProgram => manager.previous_program(),
                };
                // a program that fails to load leaves us stopped; pick another
                if let Err(e) = handled {
                    error!("{}", e);
                }
            }
            // sleeps out the frame even while stopped, so input keeps polling
            // a fault only stops its own program; Tab/BackTab can move on
            if let Some((frame, now)) = manager.frames_mut().wait_next() {
                if let Err(e) = manager.tick(frame, now) {
                    error!("{}", e);
                }
            }
        }
    };

    // give the terminal back before anything is printed
    drop(manager);
    drop(input);
    if let Err(e) = &result {
        error!("stopped: {}", e);
    }
    result
}
