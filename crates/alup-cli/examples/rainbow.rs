//! Illustrative producer: scrolls a rainbow across the strip forever.
//! Not part of any crate's public surface — animations/effects are an
//! explicit Non-goal (spec.md §1); this only demonstrates driving a
//! `Session` from a plain color-sequence producer.

use std::time::Duration;

use alup_core::Session;
use alup_proto::Color;
use clap::Parser;

#[derive(Parser)]
struct Args {
    /// Serial port path, or host[:port] with --tcp
    address: String,
    #[arg(long, default_value_t = 115_200)]
    baud: u32,
    #[arg(long)]
    tcp: bool,
    #[arg(long, default_value_t = alup_core::DEFAULT_PORT)]
    port: u16,
}

/// HSV, with `h` in `[0, 360)`, `s` and `v` in `[0, 1]`, to RGB.
fn hsv_to_color(h: f32, s: f32, v: f32) -> Color {
    let c = v * s;
    let h_prime = h / 60.0;
    let x = c * (1.0 - (h_prime.rem_euclid(2.0) - 1.0).abs());
    let (r1, g1, b1) = match h_prime as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    Color::new(((r1 + m) * 255.0) as u8, ((g1 + m) * 255.0) as u8, ((b1 + m) * 255.0) as u8)
}

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Info).parse_default_env().init();
    let args = Args::parse();

    let session = if args.tcp {
        let (host, port) = match args.address.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().unwrap_or(args.port)),
            None => (args.address.as_str(), args.port),
        };
        Session::connect_tcp(host, port, Duration::from_secs(5))
    } else {
        Session::connect_serial(&args.address, args.baud, Duration::from_secs(5))
    }
    .expect("failed to connect");

    let led_count = session.configuration().led_count as usize;
    println!("scrolling a rainbow across {led_count} leds, ctrl-c to stop");

    let mut phase = 0.0f32;
    loop {
        let colors: Vec<Color> = (0..led_count)
            .map(|i| {
                let hue = (phase + (i as f32 / led_count.max(1) as f32) * 360.0).rem_euclid(360.0);
                hsv_to_color(hue, 1.0, 1.0)
            })
            .collect();

        if let Err(err) = session.set_colors(colors) {
            eprintln!("send failed: {err}");
            break;
        }

        phase = (phase + 4.0).rem_euclid(360.0);
        std::thread::sleep(Duration::from_millis(30));
    }
}
