// SPDX-License-Identifier: Apache-2.0
//
// ipptransform: convert a PDF or JPEG document into PWG Raster or PCL.
//
// Run by the server as a subprocess with the job's attributes in `IPP_*`
// environment variables; also usable standalone for testing.

use std::io::Write;
use std::net::TcpStream;
use std::process::exit;
use std::time::Duration;

use platen_raster::{run_transform, Options, TransformSpec};

fn main() {
    let mut options = Options::new();
    options.load_env();

    let mut filename: Option<String> = None;
    let mut content_type = std::env::var("CONTENT_TYPE").ok();
    let mut device_uri = std::env::var("DEVICE_URI").ok();
    let mut output_type = std::env::var("OUTPUT_TYPE").ok();
    let mut resolutions = std::env::var("PWG_RASTER_DOCUMENT_RESOLUTION_SUPPORTED").ok();
    let mut sheet_back = std::env::var("PWG_RASTER_DOCUMENT_SHEET_BACK").ok();
    let mut types = std::env::var("PWG_RASTER_DOCUMENT_TYPE_SUPPORTED").ok();

    let mut verbosity = match std::env::var("SERVER_LOGLEVEL").as_deref() {
        Ok("debug") => 2,
        Ok("info") => 1,
        _ => 0,
    };

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
                    'd' => device_uri = Some(next_value(&args, &mut i)),
                    'i' => content_type = Some(next_value(&args, &mut i)),
                    'm' => output_type = Some(next_value(&args, &mut i)),
                    'o' => options.parse(&next_value(&args, &mut i)),
                    'r' => resolutions = Some(next_value(&args, &mut i)),
                    's' => sheet_back = Some(next_value(&args, &mut i)),
                    't' => types = Some(next_value(&args, &mut i)),
                    'v' => verbosity += 1,
                    other => {
                        eprintln!("ERROR: Unknown option '-{other}'.");
                        usage(1);
                    }
                }
            }
        } else if filename.is_none() {
            filename = Some(arg.clone());
        } else {
            usage(1);
        }
        i += 1;
    }

    init_logging(verbosity);

    let Some(filename) = filename else {
        usage(1);
    };

    // Infer the source format from the filename when not specified.
    let content_type = content_type.or_else(|| {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            Some("application/pdf".into())
        } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            Some("image/jpeg".into())
        } else {
            None
        }
    });
    let Some(content_type) = content_type else {
        eprintln!("ERROR: Unknown format for \"{filename}\", please specify with '-i' option.");
        usage(1);
    };

    let Some(output_type) = output_type else {
        eprintln!("ERROR: Unknown output format, please specify with '-m' option.");
        usage(1);
    };

    let spec = TransformSpec {
        content_type,
        output_type,
        resolutions: split_list(resolutions.as_deref().unwrap_or("300dpi")),
        types: split_list(types.as_deref().unwrap_or("sgray_8")),
        sheet_back: sheet_back.unwrap_or_else(|| "normal".into()),
        options,
    };

    // Output sink: stdout, or a raw socket when a device URI is given.
    let mut sink: Box<dyn Write> = match device_uri.as_deref() {
        Some(uri) => match open_device(uri) {
            Ok(stream) => Box::new(stream),
            Err(message) => {
                eprintln!("ERROR: {message}");
                exit(1);
            }
        },
        None => Box::new(std::io::stdout().lock()),
    };

    match run_transform(&filename, &spec, &mut sink) {
        Ok(_) => exit(0),
        Err(e) => {
            eprintln!("ERROR: {e}");
            exit(1);
        }
    }
}

fn next_value(args: &[String], i: &mut usize) -> String {
    *i += 1;
    match args.get(*i) {
        Some(value) => value.clone(),
        None => usage(1),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Open a `socket://host:port` device connection.
fn open_device(uri: &str) -> Result<TcpStream, String> {
    let rest = uri
        .strip_prefix("socket://")
        .ok_or_else(|| format!("Unsupported device URI scheme \"{uri}\"."))?;
    let address = rest.trim_end_matches('/');

    let mut last_error = format!("Unable to lookup device URI host \"{address}\".");
    for addr in std::net::ToSocketAddrs::to_socket_addrs(address)
        .map_err(|e| format!("Unable to lookup device URI host \"{address}\": {e}"))?
    {
        match TcpStream::connect_timeout(&addr, Duration::from_secs(30)) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = format!("Unable to connect to \"{address}\": {e}"),
        }
    }
    Err(last_error)
}

fn init_logging(verbosity: u32) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn usage(status: i32) -> ! {
    println!("Usage: ipptransform [options] filename");
    println!("Options:");
    println!("  --help");
    println!("  -d device-uri");
    println!("  -i input/format");
    println!("  -m output/format");
    println!("  -o \"name=value [... name=value]\"");
    println!("  -r resolution[,...,resolution]");
    println!("  -s {{flipped|manual-tumble|normal|rotated}}");
    println!("  -t sgray_8[,srgb_8]");
    println!("  -v");
    exit(status);
}
