// SPDX-License-Identifier: Apache-2.0
//
// Platen, a standalone IPP server that impersonates a network printer.
//
// Entry point: parses arguments, loads configuration, initialises
// logging, and runs the server until interrupted.

use std::path::PathBuf;
use std::process::exit;

use platen_core::ServerConfig;

fn main() {
    let mut config_path: Option<PathBuf> = None;
    let mut port: Option<u16> = None;
    let mut name: Option<String> = None;
    let mut spool: Option<PathBuf> = None;
    let mut command: Option<PathBuf> = None;
    let mut keep_files = false;
    let mut verbosity = 0u32;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg == "--help" {
            usage(0);
        } else if arg.starts_with("--") {
            eprintln!("ERROR: Unknown option '{arg}'.");
            usage(1);
        } else if let Some(flags) = arg.strip_prefix('-') {
            for flag in flags.chars() {
                match flag {
                    'c' => config_path = Some(PathBuf::from(next_value(&args, &mut i))),
                    'p' => match next_value(&args, &mut i).parse() {
                        Ok(value) => port = Some(value),
                        Err(_) => {
                            eprintln!("ERROR: Bad port value.");
                            usage(1);
                        }
                    },
                    'n' => name = Some(next_value(&args, &mut i)),
                    'd' => spool = Some(PathBuf::from(next_value(&args, &mut i))),
                    'x' => command = Some(PathBuf::from(next_value(&args, &mut i))),
                    'k' => keep_files = true,
                    'v' => verbosity += 1,
                    other => {
                        eprintln!("ERROR: Unknown option '-{other}'.");
                        usage(1);
                    }
                }
            }
        } else {
            usage(1);
        }
        i += 1;
    }

    init_logging(verbosity);

    let mut config = match config_path {
        Some(path) => match ServerConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ERROR: {e}");
                exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(name) = name {
        config.printer_name = name;
    }
    if let Some(spool) = spool {
        config.spool_directory = spool;
    }
    if let Some(command) = command {
        config.command = Some(command);
    }
    if keep_files {
        config.keep_files = true;
    }

    tracing::info!(printer = %config.printer_name, port = config.port, "Platen starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    if let Err(e) = runtime.block_on(platen_server::run(config)) {
        eprintln!("ERROR: {e}");
        exit(1);
    }
}

fn next_value(args: &[String], i: &mut usize) -> String {
    *i += 1;
    match args.get(*i) {
        Some(value) => value.clone(),
        None => usage(1),
    }
}

fn init_logging(verbosity: u32) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn usage(status: i32) -> ! {
    println!("Usage: platen [options]");
    println!("Options:");
    println!("  --help");
    println!("  -c config.json");
    println!("  -d spool-directory");
    println!("  -k (keep spool files)");
    println!("  -n printer-name");
    println!("  -p port");
    println!("  -x transform-command");
    println!("  -v");
    exit(status);
}
