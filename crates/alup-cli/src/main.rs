//! Interactive console for driving a single ALUP device, in the spirit
//! of `ALUP-Controller.py`'s `connect`/`set`/`setall`/`clear`/`config`
//! dialogue, built the way `dxkb-split-link-tester` wires up `clap` +
//! `env_logger` + `rustyline`. Exists only to exercise `alup-core`; it
//! carries no transport logic of its own.

use std::time::Duration;

use alup_core::{Session, SessionError};
use alup_proto::Color;
use clap::Parser;
use log::LevelFilter;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Connects to one ALUP device over serial or TCP and drops into an
/// interactive shell.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial port path (e.g. /dev/ttyUSB0), or host[:port] with --tcp
    address: String,

    /// Baud rate for the serial connection; ignored with --tcp
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Connect over TCP instead of a local serial port
    #[arg(long)]
    tcp: bool,

    /// TCP port to use with --tcp, if not already part of `address`
    #[arg(long, default_value_t = alup_core::DEFAULT_PORT)]
    port: u16,

    /// Handshake/round-trip timeout, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,

    /// Increase log verbosity (-v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all but error-level logs
    #[arg(short = 'q', long)]
    quiet: bool,
}

fn level_filter(args: &Args) -> LevelFilter {
    if args.quiet {
        return LevelFilter::Error;
    }
    match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(level_filter(&args))
        .parse_default_env()
        .init();

    let timeout = Duration::from_millis(args.timeout_ms);
    log::info!("connecting to {}...", args.address);

    let session = if args.tcp {
        let (host, port) = split_host_port(&args.address, args.port);
        Session::connect_tcp(host, port, timeout)
    } else {
        Session::connect_serial(&args.address, args.baud, timeout)
    };

    let session = match session {
        Ok(session) => session,
        Err(err) => {
            eprintln!("could not connect: {err}");
            std::process::exit(1);
        }
    };

    println!(
        "connected to \"{}\" ({} leds, buffer {})",
        session.configuration().device_name,
        session.configuration().led_count,
        session.configuration().frame_buffer_size
    );

    run_shell(&session);

    if let Err(err) = session.disconnect() {
        log::warn!("error while disconnecting: {err}");
    }
}

fn split_host_port(address: &str, default_port: u16) -> (&str, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(default_port)),
        None => (address, default_port),
    }
}

fn run_shell(session: &Session) {
    let mut rl = DefaultEditor::new().expect("failed to initialize line editor");
    let prompt = format!("{}> ", session.configuration().device_name);

    loop {
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("readline error: {err}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["disconnect"] | ["exit"] | ["quit"] => {
                if words[0] == "exit" {
                    report(session.clear());
                }
                break;
            }
            ["set", index, r, g, b] => handle_set(session, index, r, g, b),
            ["setall", r, g, b] => handle_setall(session, r, g, b),
            ["clear"] => report(session.clear()),
            ["config"] => print_config(session),
            ["calibrate"] => report(session.calibrate(alup_core::DEFAULT_CALIBRATION_FRAMES)),
            ["calibrate", n] => match n.parse() {
                Ok(n) => report(session.calibrate(n)),
                Err(_) => println!("calibrate takes an integer frame count"),
            },
            ["ping"] => handle_ping(session, 1),
            ["ping", n] => match n.parse() {
                Ok(n) => handle_ping(session, n),
                Err(_) => println!("ping takes an integer repeat count"),
            },
            ["help"] => print_help(),
            _ => println!("unknown command; type \"help\" for a list"),
        }
    }
}

fn handle_set(session: &Session, index: &str, r: &str, g: &str, b: &str) {
    let (Ok(index), Ok(r), Ok(g), Ok(b)) = (index.parse::<u16>(), r.parse::<u8>(), g.parse::<u8>(), b.parse::<u8>())
    else {
        println!("usage: set <index> <r> <g> <b>  (r/g/b in 0-255)");
        return;
    };
    let mut frame = alup_proto::Frame::with_colors(vec![Color::new(r, g, b)]);
    frame.offset = index;
    report(session.send(frame).map(|_| ()));
}

fn handle_setall(session: &Session, r: &str, g: &str, b: &str) {
    let (Ok(r), Ok(g), Ok(b)) = (r.parse::<u8>(), g.parse::<u8>(), b.parse::<u8>()) else {
        println!("usage: setall <r> <g> <b>  (r/g/b in 0-255)");
        return;
    };
    let led_count = session.configuration().led_count as usize;
    let colors = vec![Color::new(r, g, b); led_count];
    report(session.set_colors(colors).map(|_| ()));
}

fn handle_ping(session: &Session, n: u32) {
    match session.ping(n, Duration::from_millis(50)) {
        Ok(reports) => {
            for (i, report) in reports.iter().enumerate() {
                println!("ping {i}: {}ms (tx {}ms, rx {}ms)", report.latency_ms, report.tx_latency_ms, report.rx_latency_ms);
            }
        }
        Err(err) => println!("ping failed: {err}"),
    }
}

fn print_config(session: &Session) {
    let config = session.configuration();
    println!("device name:       {}", config.device_name);
    println!("protocol version:  {}.{}.{}", config.protocol_version.0, config.protocol_version.1, config.protocol_version.2);
    println!("led count:         {}", config.led_count);
    println!("data/clock pins:   {}/{}", config.data_pin, config.clock_pin);
    println!("frame buffer size: {}", config.frame_buffer_size);
    println!("extra values:      {:?}", config.extra_values);
    println!("clock delta:       {}ms", session.time_delta_ms());
    println!("last latency:      {}ms", session.last_latency_ms());
}

fn print_help() {
    println!("--- Available Commands: ---");
    println!("set <i> <r> <g> <b>  : set led i to the given color (0-255 per channel)");
    println!("setall <r> <g> <b>   : set every led to the given color");
    println!("clear                : send the CLEAR command");
    println!("config               : print the device configuration");
    println!("calibrate [n]        : send n empty frames to warm the clock-delta estimator");
    println!("ping [n]             : send n PING frames and report round-trip timing");
    println!("disconnect           : close the connection without resetting the leds");
    println!("exit                 : clear the leds, then close the connection");
    println!("help                 : show this message");
}

fn report(result: Result<(), SessionError>) {
    if let Err(err) = result {
        println!("error: {err}");
    }
}
