// Copyright 2025-2026 CEMAXECUTER LLC

mod pipeline;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

use iq_dsp::downsampler::Downsampler;
use iq_output::UdpSink;
use iq_sdr::Source;

/// When no buffer time is given the writer thread still smooths
/// short network stalls with a quarter-million-sample cushion.
const DEFAULT_OUTPUTBUF_SAMPLES: usize = 250_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum DeviceType {
    Rtlsdr,
    Hackrf,
    Airspy,
    Bladerf,
    File,
}

#[derive(Parser, Debug)]
#[command(name = "iqdaemon")]
#[command(about = "Collect I/Q samples from an SDR device and stream them over UDP")]
struct Cli {
    /// Device type
    #[arg(short = 't', long = "devtype", value_enum)]
    devtype: DeviceType,

    /// Device configuration: comma-separated key=value pairs
    #[arg(short = 'c', long = "config", default_value = "")]
    config: String,

    /// Device index, or 'list' to enumerate attached devices
    #[arg(short = 'd', long = "dev", default_value = "0")]
    devidx: String,

    /// Reference rate in Hz used to size the output buffer ('k' suffix allowed)
    #[arg(short = 'r', long = "pcmrate", value_parser = parse_rate, default_value = "48000")]
    pcmrate: u32,

    /// Accepted for command-line compatibility, no effect on I/Q streaming
    #[arg(short = 'M', long = "mono")]
    mono: bool,

    /// Output buffer size in seconds (0 writes directly to the network)
    #[arg(short = 'b', long = "buffer")]
    bufsecs: Option<f64>,

    /// IP address or host name samples are sent to
    #[arg(short = 'I', long = "address", default_value = "127.0.0.1")]
    address: String,

    /// UDP data port
    #[arg(short = 'D', long = "dport", default_value_t = 9090)]
    dataport: u16,

    /// Configuration port (reserved)
    #[arg(short = 'C', long = "cport", default_value_t = 9091)]
    cfgport: u16,
}

/// Parse a rate argument, allowing a 'k' suffix for multiples of 1000.
fn parse_rate(s: &str) -> Result<u32, String> {
    let (digits, mult) = match s.strip_suffix('k') {
        Some(d) => (d, 1000u32),
        None => (s, 1),
    };
    let value: u32 = digits
        .parse()
        .map_err(|_| format!("invalid rate '{}'", s))?;
    let rate = value
        .checked_mul(mult)
        .ok_or_else(|| format!("rate '{}' out of range", s))?;
    if rate == 0 {
        return Err(format!("rate must be positive, got '{}'", s));
    }
    Ok(rate)
}

/// Enumerate device names for a family, or explain the family is
/// unavailable in this build.
fn device_names(devtype: DeviceType) -> Result<Vec<String>, String> {
    match devtype {
        #[cfg(feature = "rtlsdr")]
        DeviceType::Rtlsdr => iq_sdr::rtlsdr::get_device_names().map_err(|e| e.to_string()),
        #[cfg(feature = "hackrf")]
        DeviceType::Hackrf => iq_sdr::hackrf::get_device_names().map_err(|e| e.to_string()),
        #[cfg(feature = "airspy")]
        DeviceType::Airspy => iq_sdr::airspy::get_device_names().map_err(|e| e.to_string()),
        #[cfg(feature = "bladerf")]
        DeviceType::Bladerf => iq_sdr::bladerf::get_device_names().map_err(|e| e.to_string()),
        DeviceType::File => Ok(vec!["I/Q file (set the path with -c path=...)".to_string()]),
        #[allow(unreachable_patterns)]
        other => Err(format!(
            "{:?} support is not compiled in",
            other
        )),
    }
}

/// Open a source bound to one physical unit (or the file backend).
fn open_source(devtype: DeviceType, devidx: u32) -> Result<Box<dyn Source>, String> {
    match devtype {
        #[cfg(feature = "rtlsdr")]
        DeviceType::Rtlsdr => iq_sdr::rtlsdr::RtlSdrSource::open(devidx)
            .map(|s| Box::new(s) as Box<dyn Source>)
            .map_err(|e| e.to_string()),
        #[cfg(feature = "hackrf")]
        DeviceType::Hackrf => iq_sdr::hackrf::HackRfSource::open(devidx)
            .map(|s| Box::new(s) as Box<dyn Source>)
            .map_err(|e| e.to_string()),
        #[cfg(feature = "airspy")]
        DeviceType::Airspy => iq_sdr::airspy::AirspySource::open(devidx)
            .map(|s| Box::new(s) as Box<dyn Source>)
            .map_err(|e| e.to_string()),
        #[cfg(feature = "bladerf")]
        DeviceType::Bladerf => iq_sdr::bladerf::BladeRfSource::open(devidx)
            .map(|s| Box::new(s) as Box<dyn Source>)
            .map_err(|e| e.to_string()),
        DeviceType::File => Ok(Box::new(iq_sdr::file::FileSource::new())),
        #[allow(unreachable_patterns)]
        other => Err(format!(
            "{:?} support is not compiled in",
            other
        )),
    }
}

fn print_device_list(devtype: DeviceType) {
    match device_names(devtype) {
        Ok(names) if names.is_empty() => eprintln!("no devices found"),
        Ok(names) => {
            for (i, name) in names.iter().enumerate() {
                eprintln!("{}: {}", i, name);
            }
        }
        Err(e) => eprintln!("error: {}", e),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    log::info!("iqdaemon starting");

    if cli.mono {
        log::warn!("-M has no effect in I/Q streaming mode");
    }
    if cli.cfgport != 9091 {
        log::warn!("configuration port is reserved and not implemented");
    }

    if cli.devidx == "list" {
        print_device_list(cli.devtype);
        std::process::exit(1);
    }
    let devidx: u32 = match cli.devidx.parse() {
        Ok(i) => i,
        Err(_) => {
            eprintln!("invalid device index '{}'", cli.devidx);
            print_device_list(cli.devtype);
            std::process::exit(1);
        }
    };

    let outputbuf_samples = match cli.bufsecs {
        Some(secs) if secs < 0.0 => {
            eprintln!("buffer time must not be negative");
            std::process::exit(1);
        }
        Some(secs) => (secs * f64::from(cli.pcmrate)) as usize,
        None => DEFAULT_OUTPUTBUF_SAMPLES,
    };

    // First SIGINT/SIGTERM requests a clean shutdown; a second one,
    // arriving while drain is still in progress, terminates the process.
    let stop = Arc::new(AtomicBool::new(false));
    for sig in [SIGINT, SIGTERM] {
        if let Err(e) = flag::register_conditional_shutdown(sig, 1, Arc::clone(&stop)) {
            eprintln!("cannot install handler for signal {}: {}", sig, e);
            std::process::exit(1);
        }
        if let Err(e) = flag::register(sig, Arc::clone(&stop)) {
            eprintln!("cannot install handler for signal {}: {}", sig, e);
            std::process::exit(1);
        }
    }

    if cli.devtype != DeviceType::File {
        match device_names(cli.devtype) {
            Ok(names) => {
                if (devidx as usize) >= names.len() {
                    eprintln!("device index {} out of range", devidx);
                    print_device_list(cli.devtype);
                    std::process::exit(1);
                }
                log::info!("using device {}: {}", devidx, names[devidx as usize]);
            }
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut source = match open_source(cli.devtype, devidx) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    let sink = match UdpSink::new(&cli.address, cli.dataport) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = source.configure(&cli.config) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    log::info!(
        "tuned for {:.6} MHz",
        source.get_configured_frequency() * 1.0e-6
    );
    if source.get_frequency() != source.get_configured_frequency() {
        log::info!("device tuned for {:.6} MHz", source.get_frequency() * 1.0e-6);
    }
    log::info!("IF sample rate {:.0} Hz", source.get_sample_rate());
    source.log_specific_parms();

    let downsampler = match Downsampler::new(source.get_decimation(), source.get_fc_pos()) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = pipeline::run(source, downsampler, Box::new(sink), outputbuf_samples, stop) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    log::info!("iqdaemon stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_plain() {
        assert_eq!(parse_rate("48000"), Ok(48000));
    }

    #[test]
    fn test_parse_rate_k_suffix() {
        assert_eq!(parse_rate("48k"), Ok(48000));
        assert_eq!(parse_rate("192k"), Ok(192_000));
    }

    #[test]
    fn test_parse_rate_rejects_garbage() {
        assert!(parse_rate("fast").is_err());
        assert!(parse_rate("48kk").is_err());
        assert!(parse_rate("").is_err());
    }

    #[test]
    fn test_parse_rate_rejects_zero_and_overflow() {
        assert!(parse_rate("0").is_err());
        assert!(parse_rate("5000000k").is_err());
    }
}
