use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use cost_table::{
    Architecture, MeasureMethod, NetFamily, PositionSelection, SamplerConfig, Sweep, SweepConfig,
    TableFormat, TableStore,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Net {
    Wrn,
    Mobilenetv1,
}

impl From<Net> for NetFamily {
    fn from(net: Net) -> Self {
        match net {
            Net::Wrn => NetFamily::WideResNet,
            Net::Mobilenetv1 => NetFamily::MobileNetV1,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Method {
    Burn,
    Tract,
    ExternalMobile,
    ExternalDesktop,
}

impl From<Method> for MeasureMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Burn => MeasureMethod::Burn,
            Method::Tract => MeasureMethod::Tract,
            Method::ExternalMobile => MeasureMethod::ExternalMobile,
            Method::ExternalDesktop => MeasureMethod::ExternalDesktop,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Msgpack,
    Json,
    Csv,
}

impl From<Format> for TableFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Msgpack => TableFormat::MessagePack,
            Format::Json => TableFormat::Json,
            Format::Csv => TableFormat::Csv,
        }
    }
}

/// Measure per-layer latency tables of a reference network.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Name of the output file, without extension.
    #[arg(short, long, env, default_value = "saveto")]
    save_file: String,

    /// Network family.
    #[arg(short, long, env, value_enum, default_value_t = Net::Wrn)]
    net: Net,

    /// Depth of the network; wide resnets need 6n+4.
    #[arg(short, long, env, default_value_t = 40)]
    depth: usize,

    /// Width multiplier of the stage channels.
    #[arg(short, long, env, default_value_t = 2.0)]
    width: f64,

    /// Latency samples per table cell.
    #[arg(long, env, default_value_t = 11)]
    samples: usize,

    /// Input image size.
    #[arg(long, env, default_value_t = 32)]
    img: usize,

    #[arg(long, env, default_value_t = 10)]
    classes: usize,

    #[arg(short, long, env, default_value_t = 1)]
    batch: usize,

    /// How latencies are measured.
    #[arg(short, long, env, value_enum, default_value_t = Method::Burn)]
    method: Method,

    /// Where models are staged for the external benchmark tools.
    #[arg(long, env, default_value = "/dev/shm/tmp_models")]
    staging: PathBuf,

    #[arg(long, env, default_value = "./benchmark_model_mobile")]
    mobile_benchmark: PathBuf,

    #[arg(long, env, default_value = "./benchmark_model_desktop")]
    desktop_benchmark: PathBuf,

    /// Comma separated positions to sweep; all of them when absent.
    #[arg(short, long, env, value_delimiter = ',')]
    positions: Vec<String>,

    #[arg(short, long, env, default_value = "perf_tables")]
    output_dir: PathBuf,

    #[arg(short, long, env, value_enum, default_value_t = Format::Msgpack)]
    format: Format,

    /// Seed for random weights and inputs.
    #[arg(long, env)]
    seed: Option<u64>,

    /// Log the positions that would be swept and exit.
    #[arg(long, env)]
    list_positions: bool,
}

impl Args {
    fn sweep_config(&self) -> SweepConfig {
        let selection = if self.positions.is_empty() {
            PositionSelection::All
        } else {
            PositionSelection::Named(self.positions.clone())
        };
        SweepConfig {
            architecture: Architecture {
                family: self.net.into(),
                depth: self.depth,
                width: self.width,
                img_size: self.img,
                num_classes: self.classes,
            },
            selection,
            samples: self.samples,
            batch: self.batch,
        }
    }

    fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            method: self.method.into(),
            seed: self.seed,
            staging_dir: self.staging.clone(),
            mobile_benchmark: self.mobile_benchmark.clone(),
            desktop_benchmark: self.desktop_benchmark.clone(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_target(false)
        .without_time()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Setting up logging failed")?;

    let args = Args::parse();
    let config = args.sweep_config();
    let sweep = Sweep::new(&config).context("invalid sweep configuration")?;

    if args.list_positions {
        for p in sweep.positions() {
            info!(
                "{}: {} width={} in={} out={} ({} measurements)",
                p.name,
                p.kind,
                p.width,
                p.max_in_channels,
                p.max_out_channels,
                utils::format_count(p.num_measurements())
            );
        }
        return Ok(());
    }

    info!(
        "measuring {} {}-{}x{} with {}",
        config.architecture.family,
        config.architecture.depth,
        config.architecture.width,
        config.architecture.img_size,
        MeasureMethod::from(args.method)
    );
    let mut sampler = args
        .sampler_config()
        .build()
        .context("building latency sampler")?;
    let store = TableStore::new(args.output_dir.clone(), args.format.into());
    let path = sweep
        .run_and_save(&mut sampler, &store, &args.save_file)
        .context("computing cost tables")?;
    info!("cost tables written to {}", path.display());
    Ok(())
}
