//! CLI Entry Point for awg_supervision
//!
//! One-shot commands against a Keysight M8195A:
//!
//! ```bash
//! awg_supervision identify
//! awg_supervision init
//! awg_supervision load pulse.csv --start
//! awg_supervision amplitude 0.5
//! awg_supervision --simulate errors
//! ```
//!
//! Connection settings come from `config/awg.toml` and `AWG_*` environment
//! variables; `--address` overrides the configured resource string.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use awg_supervision::config::{AwgConfig, DEFAULT_CONFIG_PATH};
use awg_supervision::hardware::{Connector, SimulatedConnector, VisaConnector};
use awg_supervision::instrument::Awg8195a;

#[derive(Parser)]
#[command(name = "awg_supervision")]
#[command(about = "Control a Keysight M8195A arbitrary waveform generator", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// VISA resource string (overrides the configuration)
    #[arg(long)]
    address: Option<String>,

    /// Use the built-in simulated instrument instead of VISA
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the instrument identity
    Identify,

    /// Stop, reset and prepare the configured channel
    Init,

    /// Load a two-column `time,voltage` CSV into the configured segment
    Load {
        /// CSV file with times in seconds and voltages in volts
        file: PathBuf,

        /// Start generation after loading
        #[arg(long)]
        start: bool,
    },

    /// Select the configured segment and start generation
    Start,

    /// Stop generation
    Stop,

    /// Set the output amplitude in volts (0.075 - 1.0)
    Amplitude { volts: f64 },

    /// Set the internal trigger frequency in Hz
    TriggerFrequency { hz: f64 },

    /// Drain and print the instrument error queue
    Errors,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AwgConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(address) = cli.address.clone() {
        config.instrument.address = address;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let connector: Arc<dyn Connector> = if cli.simulate {
        Arc::new(SimulatedConnector::new())
    } else {
        Arc::new(VisaConnector::new())
    };

    let mut awg = Awg8195a::new(connector).with_timeout(config.instrument.timeout());
    let result = run(&mut awg, &config, cli.command).await;
    awg.close().await;
    result
}

async fn run(awg: &mut Awg8195a, config: &AwgConfig, command: Commands) -> Result<()> {
    let instrument = &config.instrument;
    let address = instrument.address.as_str();
    let (channel, segment) = (instrument.channel, instrument.segment);

    // init opens its own session as part of the reset sequence
    if !matches!(command, Commands::Init) {
        awg.connect(address).await?;
    }

    match command {
        Commands::Identify => println!("{}", awg.identity().await?),
        Commands::Init => {
            awg.connect_and_reset(address, channel).await?;
            println!("{} ready on channel {}", address, channel);
        }
        Commands::Load { file, start } => {
            let (times, voltages) = read_waveform_csv(&file)?;
            info!(file = %file.display(), samples = voltages.len(), "Waveform file read");
            awg.load_waveform(&times, &voltages, channel, segment).await?;
            println!("Loaded {} samples into channel {} segment {}", voltages.len(), channel, segment);
            if start {
                awg.start_signal_generation(channel, segment).await?;
                println!("Signal generation started");
            }
        }
        Commands::Start => {
            awg.start_signal_generation(channel, segment).await?;
            println!("Signal generation started");
        }
        Commands::Stop => {
            awg.stop_generation().await?;
            println!("Signal generation stopped");
        }
        Commands::Amplitude { volts } => {
            let setting = awg.set_output_amplitude(channel, volts).await?;
            if setting.coerced {
                println!("Requested {} V is out of range; applied {:.3} V", volts, setting.applied);
            } else {
                println!("Amplitude set to {:.3} V", setting.applied);
            }
        }
        Commands::TriggerFrequency { hz } => {
            if !hz.is_finite() || hz <= 0.0 {
                bail!("Trigger frequency must be a positive number, got {}", hz);
            }
            awg.set_trigger_frequency(hz).await?;
            println!("Trigger frequency set to {} Hz", hz);
        }
        Commands::Errors => {
            let errors = awg.drain_errors().await?;
            if errors.is_empty() {
                println!("No errors");
            }
            for error in errors {
                println!("{}", error.raw);
            }
        }
    }

    Ok(())
}

/// Read `time,voltage` rows. A non-numeric first row is treated as a header.
fn read_waveform_csv(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut times = Vec::new();
    let mut voltages = Vec::new();

    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read row {}", index + 1))?;
        let (Some(time), Some(voltage)) = (record.get(0), record.get(1)) else {
            bail!("Row {} needs two columns", index + 1);
        };
        match (time.parse::<f64>(), voltage.parse::<f64>()) {
            (Ok(time), Ok(voltage)) => {
                times.push(time);
                voltages.push(voltage);
            }
            _ if index == 0 => continue,
            _ => bail!("Row {} is not numeric: {:?}", index + 1, record),
        }
    }

    Ok((times, voltages))
}
