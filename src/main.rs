use std::process::exit;

use anyhow::{bail, Context, Result};
use clap::Parser;

use mercury236::{
    init_logging, poll, Measurements, Phases, PhasesWithSum, SerialSettings, SerialTransport,
    SessionConfig, DEFAULT_ACCESS_LEVEL,
};

#[derive(Parser, Debug)]
#[command(
    name = "mercury236",
    about = "Read grid measurements from a Mercury 236 power meter over RS485"
)]
struct Args {
    /// Serial device of the RS485 dongle
    #[arg(long, default_value = mercury236::transport::DEFAULT_PORT)]
    port: String,
    /// Line speed
    #[arg(long, default_value_t = mercury236::transport::DEFAULT_BAUD_RATE)]
    baud: u32,
    /// RS485 address of the meter (decimal or 0x-prefixed hex)
    #[arg(long, default_value = "0", value_parser = parse_address)]
    address: u8,
    /// Six-digit user password
    #[arg(long, default_value = "111111", value_parser = parse_password)]
    password: [u8; 6],
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
    /// Print every frame sent and received
    #[arg(long)]
    debug: bool,
}

fn parse_address(s: &str) -> Result<u8> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    value.with_context(|| format!("invalid meter address '{s}'"))
}

fn parse_password(s: &str) -> Result<[u8; 6]> {
    let digits: Vec<u8> = s
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()
        .with_context(|| format!("password '{s}' must contain digits only"))?;
    match <[u8; 6]>::try_from(digits) {
        Ok(password) => Ok(password),
        Err(d) => bail!("password must be 6 digits, got {}", d.len()),
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let settings = SerialSettings {
        path: args.port.clone(),
        baud_rate: args.baud,
    };
    let transport = SerialTransport::open(&settings)
        .with_context(|| format!("cannot open {}", settings.path))?;

    let config = SessionConfig::default()
        .with_address(args.address)
        .with_credential(DEFAULT_ACCESS_LEVEL, args.password)
        .with_trace_frames(args.debug);

    let report = poll(transport, config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&report.measurements);
    }
    Ok(())
}

fn phases(label: &str, v: &Phases) {
    println!("{label:<9}{:8.2} {:8.2} {:8.2}", v.p1, v.p2, v.p3);
}

fn phases_sum(label: &str, v: &PhasesWithSum) {
    println!(
        "{label:<9}{:8.2} {:8.2} {:8.2} ({:8.2})",
        v.p1, v.p2, v.p3, v.sum
    );
}

fn print_table(m: &Measurements) {
    phases("U (V):", &m.voltage);
    phases("I (A):", &m.current);
    phases_sum("Cos(f):", &m.power_factor);
    println!("{:<9}{:8.2}", "F (Hz):", m.frequency);
    phases("A (deg):", &m.phase_angles);
    phases_sum("P (W):", &m.active_power);
    phases_sum("S (VA):", &m.reactive_power);
    phases_sum("PR (KW):", &m.energy_from_reset);
    phases_sum("PY (KW):", &m.energy_yesterday);
    phases_sum("PT (KW):", &m.energy_today);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_accept_decimal_and_hex() {
        assert_eq!(parse_address("0").unwrap(), 0);
        assert_eq!(parse_address("42").unwrap(), 42);
        assert_eq!(parse_address("0x2A").unwrap(), 42);
        assert!(parse_address("256").is_err());
    }

    #[test]
    fn password_is_six_digits() {
        assert_eq!(parse_password("111111").unwrap(), [1; 6]);
        assert_eq!(parse_password("123450").unwrap(), [1, 2, 3, 4, 5, 0]);
        assert!(parse_password("12345").is_err());
        assert!(parse_password("12a456").is_err());
    }

    #[test]
    fn cli_defaults() {
        let args = Args::try_parse_from(["mercury236"]).unwrap();
        assert_eq!(args.port, "/dev/ttyUSB0");
        assert_eq!(args.baud, 9600);
        assert_eq!(args.address, 0);
        assert_eq!(args.password, [1; 6]);
        assert!(!args.debug && !args.json);
    }
}
