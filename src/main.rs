mod scenarios;

use nashbid::config::EngineConfig;
use nashbid::logger::{sanitize_filename, ConsoleReceiver, FileReceiver, LogEvent, Logger};
use nashbid::utils::{RAND_SEED, VERBOSE_AUCTION};
use nashbid::{charts, log, logln};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use scenarios::get_scenario_catalog;

fn usage() {
    eprintln!("Usage:");
    eprintln!("  nashbid <scenario|all> [iterations] [start_iteration] [--config path] [--fastbreak] [--verbose auction]");
    eprintln!("  nashbid charts [--config path]");
    eprintln!("Available scenarios:");
    for s in get_scenario_catalog() {
        eprintln!("  - {}", s.short_name);
    }
}

fn parse_number(args: &[String], index: usize, name: &str, default: u64) -> u64 {
    match args.get(index) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                eprintln!("Error: Invalid {} parameter '{}'. Expected a number.", name, raw);
                std::process::exit(1);
            }
        },
        None => default,
    }
}

fn main() {
    let raw_args: Vec<String> = std::env::args().collect();

    // Pull the flags out, positional arguments stay in order
    let mut args = Vec::new();
    let mut fastbreak = false;
    let mut config_path: Option<PathBuf> = None;
    let mut i = 0;
    while i < raw_args.len() {
        let arg = &raw_args[i];
        if arg == "--verbose" {
            if raw_args.get(i + 1).map(String::as_str) == Some("auction") {
                VERBOSE_AUCTION.store(true, Ordering::Relaxed);
                i += 1;
            }
        } else if arg == "--fastbreak" {
            fastbreak = true;
        } else if arg == "--config" {
            match raw_args.get(i + 1) {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => {
                    eprintln!("Error: --config needs a path");
                    std::process::exit(1);
                }
            }
            i += 1;
        } else {
            args.push(arg.clone());
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => match EngineConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    let scenario_arg = match args.get(1) {
        Some(arg) => arg.clone(),
        None => {
            usage();
            std::process::exit(1);
        }
    };

    if scenario_arg == "charts" {
        match charts::generate_all_charts(config.bid_levels) {
            Ok(()) => println!("All chart generation completed successfully."),
            Err(e) => {
                eprintln!("Error generating charts: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let iterations = parse_number(&args, 2, "iterations", 1);
    let start_iteration = parse_number(&args, 3, "start iteration", 0);

    let all_scenarios = get_scenario_catalog();
    let scenarios: Vec<_> = if scenario_arg == "all" {
        all_scenarios
    } else {
        match all_scenarios.iter().find(|s| s.short_name == scenario_arg) {
            Some(scenario) => vec![scenario.clone()],
            None => {
                eprintln!("Error: Scenario '{}' not found.", scenario_arg);
                usage();
                std::process::exit(1);
            }
        }
    };

    // Scenario narration goes to the console only for a single run of a single scenario
    let logger = Arc::new(Logger::new());
    if scenario_arg != "all" && iterations == 1 {
        logger.add_receiver(ConsoleReceiver::new(vec![LogEvent::Validation, LogEvent::Scenario]));
    } else {
        logger.add_receiver(ConsoleReceiver::new(vec![LogEvent::Validation]));
    }
    match FileReceiver::new(&PathBuf::from("log/summary.log"), vec![LogEvent::Validation]) {
        Ok(receiver) => {
            logger.add_receiver(receiver);
        }
        Err(e) => eprintln!("Warning: cannot write log/summary.log: {}", e),
    }

    if scenario_arg == "all" {
        logln!(logger, LogEvent::Validation, "Running all scenarios {} time(s)...\n", iterations);
    } else {
        logln!(logger, LogEvent::Validation, "Running scenario '{}' {} time(s)...\n", scenario_arg, iterations);
    }

    let mut failures = 0;
    'scenarios: for scenario in &scenarios {
        log!(logger, LogEvent::Validation, "{}: ", scenario.short_name);

        // Everything below Validation for this scenario lands in its own log
        let scenario_log = PathBuf::from(format!("log/{}/scenario.log", sanitize_filename(scenario.short_name)));
        let scenario_receiver_id = match FileReceiver::new(&scenario_log, vec![LogEvent::Scenario, LogEvent::Optimization, LogEvent::Model, LogEvent::Auction]) {
            Ok(receiver) => Some(logger.add_receiver(receiver)),
            Err(e) => {
                eprintln!("Warning: cannot write {}: {}", scenario_log.display(), e);
                None
            }
        };

        for i in start_iteration..(start_iteration + iterations) {
            if iterations > 1 {
                log!(logger, LogEvent::Validation, "[{}/{}] ", i - start_iteration + 1, iterations);
            }

            RAND_SEED.store(i, Ordering::Relaxed);

            match (scenario.run)(scenario.short_name, &config, &logger) {
                Ok(()) => {
                    if iterations > 1 {
                        logln!(logger, LogEvent::Validation, "✓");
                    } else {
                        logln!(logger, LogEvent::Validation, "✓ PASSED");
                    }
                }
                Err(e) => {
                    failures += 1;
                    if iterations > 1 {
                        logln!(logger, LogEvent::Validation, "✗");
                    } else {
                        logln!(logger, LogEvent::Validation, "✗ FAILED: {}", e);
                    }

                    if fastbreak {
                        if let Some(id) = scenario_receiver_id {
                            logger.remove_receiver(id);
                        }
                        logln!(logger, LogEvent::Validation, "\nStopping scenario execution due to failure (--fastbreak enabled)");
                        logln!(logger, LogEvent::Validation, "Error at iteration {} (seed {}): {}", i - start_iteration + 1, i, e);
                        break 'scenarios;
                    }
                }
            }

            let _ = logger.flush();
        }

        if let Some(id) = scenario_receiver_id {
            logger.remove_receiver(id);
        }
    }

    logln!(logger, LogEvent::Validation, "\nFailed runs: {}", failures);
    let _ = logger.flush();
    if failures > 0 {
        std::process::exit(1);
    }
}
