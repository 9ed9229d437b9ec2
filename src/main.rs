use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use c2flash::{
    Config, DeviceSession, FirmwareRecord,
    config::parse_size,
    format::{self, FirmwareFormat},
    transport::SerialTransport,
};

#[derive(Parser)]
#[command(
    name = "c2flash",
    version,
    about = "Program EFM8 MCUs through a serial C2 bridge"
)]
struct Cli {
    /// Serial port of the bridge, e.g. /dev/ttyACM0 or COM4
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate of the bridge
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// YAML config file with `link` and `protocol` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device id the target must report
    #[arg(long, global = true, value_parser = parse_u8)]
    device_id: Option<u8>,

    /// Milliseconds to wait after opening the port
    #[arg(long, global = true)]
    settle_ms: Option<u64>,

    /// More output, repeat for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the bridge answers
    Ping {},
    /// Get info about the connected device
    Info {},
    /// Erase the code flash
    Erase {},
    /// Reset the bridge out of programming mode
    Reset {},
    /// Dump the code flash to a .hex or .bin file
    Read {
        path: PathBuf,
        /// First address to read
        #[arg(long, value_parser = parse_u32)]
        start: Option<u32>,
        /// Number of bytes to read
        #[arg(long, value_parser = parse_u32)]
        size: Option<u32>,
        /// Bytes per read command and per record
        #[arg(long, value_parser = parse_u8)]
        chunk_size: Option<u8>,
    },
    /// Erase, program and verify the code flash, then reset
    Write {
        /// Intel HEX or raw binary firmware
        path: PathBuf,
    },
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let n = parse_size(s)?;
    u32::try_from(n).map_err(|_| format!("{s} is out of range"))
}

fn parse_u8(s: &str) -> std::result::Result<u8, String> {
    let n = parse_size(s)?;
    u8::try_from(n).map_err(|_| format!("{s} is out of range"))
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(bar)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if cli.port.is_some() {
        config.link.port = cli.port.clone();
    }
    if let Some(baud) = cli.baud {
        config.link.baudrate = baud;
    }
    if let Some(settle_ms) = cli.settle_ms {
        config.link.settle_ms = settle_ms;
    }
    if let Some(device_id) = cli.device_id {
        config.protocol.expected_device_id = device_id;
    }
    if let Commands::Read {
        start,
        size,
        chunk_size,
        ..
    } = &cli.command
    {
        config.protocol.read_start = start.unwrap_or(config.protocol.read_start);
        config.protocol.read_size = size.unwrap_or(config.protocol.read_size);
        config.protocol.chunk_size = chunk_size.unwrap_or(config.protocol.chunk_size);
    }

    // Parse the firmware before touching the device
    let firmware = match &cli.command {
        Commands::Write { path } => {
            let records = format::read_firmware_from_file(path, config.protocol.chunk_size)
                .with_context(|| format!("cannot load firmware from {}", path.display()))?;
            let size: usize = records.iter().filter(|r| r.is_data()).map(|r| r.data.len()).sum();
            log::info!("Firmware size: {}", size);
            Some(records)
        }
        _ => None,
    };

    let transport = SerialTransport::open(&config.link)?;
    let mut session = DeviceSession::new(transport, config.protocol.clone())?;

    match cli.command {
        Commands::Ping {} => {
            session.ping()?;
        }
        Commands::Reset {} => {
            session.reset()?;
        }
        Commands::Info {} => {
            let result = session.connect().and_then(|_| session.identify());
            let identity = session.finish(result)?;
            log::info!("Device {} detected", identity);
        }
        Commands::Erase {} => {
            let result = session
                .connect()
                .and_then(|_| session.identify())
                .and_then(|_| session.erase_all());
            session.finish(result)?;
        }
        Commands::Read { path, .. } => {
            let result = session
                .connect()
                .and_then(|_| session.identify())
                .map_err(anyhow::Error::from)
                .and_then(|_| dump(&mut session, &path));
            let reset = session.finish(Ok(()));
            result?;
            reset?;
            log::info!("Dumped to {}", path.display());
        }
        Commands::Write { .. } => {
            let records = firmware.unwrap_or_default();
            let total = records.iter().filter(|r| r.is_data()).map(|r| r.data.len() as u64).sum();
            let bar = progress_bar(total)?;
            let result = session
                .connect()
                .and_then(|_| session.identify())
                .and_then(|_| session.erase_all())
                .and_then(|_| {
                    session.write_all_with(&records, |record: &FirmwareRecord| {
                        if record.is_data() {
                            bar.inc(record.data.len() as u64);
                        }
                    })
                });
            bar.finish();
            let summary = session.finish(result)?;
            log::info!(
                "Flashed and verified {} bytes in {} records",
                summary.bytes_written,
                summary.records_written
            );
        }
    }

    Ok(())
}

fn dump(session: &mut DeviceSession<SerialTransport>, path: &Path) -> Result<()> {
    let size = session.config().read_size;
    let bar = progress_bar(size as u64)?;

    let mut records = Vec::new();
    for record in session.read_configured()? {
        let record = record?;
        bar.inc(record.data.len() as u64);
        records.push(record);
    }
    bar.finish();

    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let output = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("bin") => FirmwareFormat::Binary,
        _ => FirmwareFormat::IntelHex,
    };
    match output {
        FirmwareFormat::IntelHex => {
            let lines = records
                .iter()
                .map(|r| r.to_line())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            format::write_ihex(BufWriter::new(file), &lines)?;
        }
        FirmwareFormat::Binary => {
            use std::io::Write;

            let mut w = BufWriter::new(file);
            for record in &records {
                w.write_all(&record.data)?;
            }
            w.flush()?;
        }
    }
    Ok(())
}
