use flexi_logger::{FileSpec, Logger, WriteMode};
use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use wsdga::cinfo;
use wsdga::param;

fn main() -> ExitCode {
    let param_file = std::env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());

    let param = match param::get(param_file.clone()) {
        Ok(param) => param,
        Err(e) => {
            eprintln!("Cannot read parameters from {}: {}", param_file, e);
            return ExitCode::FAILURE;
        }
    };

    let logger = match Logger::try_with_env_or_str(&param.general.log_level) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Invalid log level '{}': {}", param.general.log_level, e);
            return ExitCode::FAILURE;
        }
    };
    let logger = if param.general.log_base.is_empty() {
        logger.start()
    } else {
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(&param.general.log_base)
                    .suffix(&param.general.log_suffix),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .start()
    };
    let _logger = match logger {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Cannot start logger: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("wsdga v{} | parameters from {}", env!("CARGO_PKG_VERSION"), param_file);

    // Stop the evolution after the current generation on SIGINT/SIGTERM
    let running = Arc::new(AtomicBool::new(true));
    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            let r = Arc::clone(&running);
            thread::spawn(move || {
                for sig in signals.forever() {
                    warn!("Received signal {:?}, finishing current generation...", sig);
                    r.store(false, Ordering::Relaxed);
                }
            });
        }
        Err(e) => warn!("Cannot install signal handler: {}", e),
    }

    let experiment = match wsdga::run(&param, running) {
        Ok(experiment) => experiment,
        Err(e) => {
            error!("Run failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    cinfo!(param.general.display_colorful, "{}", experiment.display_results());

    if !param.general.save_exp.is_empty() {
        match experiment.save_auto(&param.general.save_exp) {
            Ok(()) => info!("Experiment saved to {}", param.general.save_exp),
            Err(e) => error!("Failed to save experiment: {}", e),
        }
    }

    ExitCode::SUCCESS
}
