//! Command-line options.

use std::time::Duration;

use advmon::config::{DEFAULT_BAUDRATE, DEFAULT_DURATION_SECS, DEFAULT_TCP_PORT};
use advmon::{Address, Mode, Selector, SessionConfig};
use clap::{ArgGroup, Parser};

#[derive(Debug, Parser)]
#[command(name = "advmon")]
#[command(about = "Watch BLE advertisers through a BGAPI controller, optionally triggering OTA")]
#[command(group(ArgGroup::new("link").required(true).args(["uart", "tcp"])))]
#[command(group(ArgGroup::new("selector").args(["address", "name", "service"])))]
pub struct Cli {
    /// Serial device of the NCP (e.g. /dev/ttyACM0).
    #[arg(short = 'u', long)]
    pub uart: Option<String>,

    /// Host name or IP of a network-attached NCP.
    #[arg(short = 't', long)]
    pub tcp: Option<String>,

    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    pub tcp_port: u16,

    #[arg(short = 'b', long, default_value_t = DEFAULT_BAUDRATE)]
    pub baudrate: u32,

    /// Select the target by address (aa:bb:cc:dd:ee:ff).
    #[arg(short = 'a', long, value_parser = parse_address)]
    pub address: Option<Address>,

    /// Select the target by exact complete local name.
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Select the target by advertised 16-bit service UUID [default: 1509].
    #[arg(short = 's', long, value_parser = parse_uuid16)]
    pub service: Option<u16>,

    /// Length of each observation window in seconds.
    #[arg(short = 'd', long, default_value_t = DEFAULT_DURATION_SECS, value_parser = parse_duration)]
    pub duration: f64,

    /// List every advertiser instead of tracking one.
    #[arg(short = 'l', long, conflicts_with_all = ["selector", "ota"])]
    pub list: bool,

    /// After the first window, reboot the target into its bootloader and
    /// measure again.
    #[arg(long)]
    pub ota: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_uuid16(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|_| format!("'{s}' is not a 16-bit hex UUID"))
}

fn parse_duration(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("duration must be a positive number of seconds, got {s}"));
    }
    Ok(secs)
}

impl Cli {
    pub fn selector(&self) -> Selector {
        if let Some(address) = self.address {
            Selector::Address(address)
        } else if let Some(name) = &self.name {
            Selector::Name(name.clone())
        } else if let Some(uuid) = self.service {
            Selector::Service(uuid)
        } else {
            Selector::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mode = if self.list {
            Mode::List
        } else {
            Mode::Match { ota: self.ota }
        };
        SessionConfig {
            mode,
            selector: self.selector(),
            duration: Duration::from_secs_f64(self.duration),
        }
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("advmon").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_to_bootloader_service() {
        let cli = parse(&["-u", "/dev/ttyACM0"]).unwrap();
        let config = cli.session_config();
        assert_eq!(config.mode, Mode::Match { ota: false });
        assert_eq!(config.selector, Selector::Service(0x1509));
        assert_eq!(config.duration, Duration::from_secs(10));
        assert_eq!(cli.baudrate, 115_200);
        assert_eq!(cli.log_filter(), "info");
    }

    #[test]
    fn transport_is_required_and_exclusive() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["-u", "/dev/ttyACM0", "-t", "10.0.0.2"]).is_err());
        let cli = parse(&["-t", "10.0.0.2", "--tcp-port", "4902"]).unwrap();
        assert_eq!(cli.tcp.as_deref(), Some("10.0.0.2"));
        assert_eq!(cli.tcp_port, 4902);
    }

    #[test]
    fn selectors_are_exclusive() {
        assert!(parse(&["-u", "x", "-n", "DevKit", "-s", "180f"]).is_err());
        let cli = parse(&["-u", "x", "-a", "84:2e:14:31:a9:c0"]).unwrap();
        assert_eq!(
            cli.selector(),
            Selector::Address("84:2e:14:31:a9:c0".parse().unwrap())
        );
        let cli = parse(&["-u", "x", "-s", "0x180F"]).unwrap();
        assert_eq!(cli.selector(), Selector::Service(0x180F));
        let cli = parse(&["-u", "x", "-n", "DevKit"]).unwrap();
        assert_eq!(cli.selector(), Selector::Name("DevKit".into()));
    }

    #[test]
    fn list_mode_excludes_ota_and_selectors() {
        let cli = parse(&["-u", "x", "-l"]).unwrap();
        assert_eq!(cli.session_config().mode, Mode::List);
        assert!(parse(&["-u", "x", "-l", "--ota"]).is_err());
        assert!(parse(&["-u", "x", "-l", "-n", "DevKit"]).is_err());
    }

    #[test]
    fn ota_mode_and_duration() {
        let cli = parse(&["-u", "x", "--ota", "-d", "2.5", "-v"]).unwrap();
        let config = cli.session_config();
        assert_eq!(config.mode, Mode::Match { ota: true });
        assert_eq!(config.duration, Duration::from_millis(2500));
        assert_eq!(cli.log_filter(), "debug");
    }

    #[test]
    fn bad_values_are_rejected() {
        for bad in ["0", "-1", "nan", "inf", "soon"] {
            assert!(parse(&["-u", "x", "-d", bad]).is_err(), "{bad}");
        }
        assert!(parse(&["-u", "x", "-s", "12345"]).is_err());
        assert!(parse(&["-u", "x", "-a", "84:2e:14"]).is_err());
    }
}
