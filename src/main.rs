mod load_config;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use command::{Statistics, TextSink, WithStats, write_trace};
use pipeline::{Generated, Layout, SetShape};
use serde::Serialize;
use tracing::info;

use crate::load_config::{GeneratorConfig, load_config_from_file};

#[derive(Parser)]
#[command(about = "Generate the PIM command trace of one attention layer on HBM3")]
struct Opts {
    #[arg(long)]
    /// Head dimension [default: 128].
    dhead: Option<u64>,

    #[arg(long)]
    /// Attention heads mapped onto one device [default: 64].
    nhead: Option<u64>,

    #[arg(long)]
    /// Sequence length [default: 2048].
    seqlen: Option<u64>,

    #[arg(long)]
    /// Longest sequence the key/value layout is sized for [default: 4096].
    maxlen: Option<u64>,

    #[arg(long)]
    /// Bytes per element [default: 2].
    dbyte: Option<u64>,

    #[arg(long, short, default_value = "attacc_bank.trace")]
    /// Path of the generated trace. Overwritten if it exists.
    output: PathBuf,

    #[arg(long)]
    /// TOML configuration. Command line values take precedence.
    config: Option<PathBuf>,

    #[arg(long)]
    /// HBM3 organization preset, e.g. HBM3_8Gb_2R.
    preset: Option<String>,

    #[arg(long)]
    /// Write a JSON report of the command set shapes and opcode counts.
    report: Option<PathBuf>,

    #[arg(long, short)]
    /// Quiet mode: no logging.
    quiet: bool,
}

impl Opts {
    fn config(&self) -> Result<GeneratorConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from_file(path)?,
            None => GeneratorConfig::default(),
        };

        let model = &mut config.model;
        for (field, value) in [
            (&mut model.head_dim, self.dhead),
            (&mut model.heads_per_device, self.nhead),
            (&mut model.seq_len, self.seqlen),
            (&mut model.max_seq_len, self.maxlen),
            (&mut model.element_bytes, self.dbyte),
        ] {
            if let Some(value) = value {
                *field = value;
            }
        }
        if let Some(preset) = &self.preset {
            config.geometry.preset = preset.clone();
        }
        Ok(config)
    }
}

fn init_logging(disable: bool) {
    use tracing_subscriber::EnvFilter;

    if disable {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Serialize)]
struct WaveReport {
    wave: u64,
    valid_channels: u64,
    key_base: u64,
    value_base: u64,
    shape: SetShape,
}

#[derive(Serialize)]
struct Report<'a> {
    config: &'a GeneratorConfig,
    layout: Layout,
    waves: Vec<WaveReport>,
    statistics: Statistics,
}

fn write_report(
    path: &Path,
    config: &GeneratorConfig,
    generated: &Generated,
    statistics: Statistics,
) -> Result<()> {
    let waves = generated
        .sets
        .iter()
        .map(|set| WaveReport {
            wave: set.wave(),
            valid_channels: set.valid_channels(),
            key_base: set.key_base(),
            value_base: set.value_base(),
            shape: set.shape(),
        })
        .collect();
    let report = Report {
        config,
        layout: generated.layout,
        waves,
        statistics,
    };

    let file = File::create(path)
        .with_context(|| format!("failed to create report {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &report)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(())
}

fn run(opts: &Opts) -> Result<Statistics> {
    let config = opts.config()?;
    let geometry = config.geometry.build()?;
    let generated = pipeline::generate(&geometry, &config.model, &config.pipeline)
        .context("failed to generate trace")?;

    // The trace is complete before the output file is touched.
    let sink = TextSink::create(&opts.output)
        .with_context(|| format!("failed to create {}", opts.output.display()))?;
    let mut sink = WithStats::new(sink);
    write_trace(&generated.trace, &mut sink)
        .with_context(|| format!("failed to write {}", opts.output.display()))?;
    let statistics = sink.statistics();
    info!(
        "wrote {} commands to {}: {} MAC, {} barrier",
        statistics.total(),
        opts.output.display(),
        statistics.multiply_accumulate,
        statistics.barrier
    );

    if let Some(path) = &opts.report {
        write_report(path, &config, &generated, statistics)?;
        info!("report written to {}", path.display());
    }
    Ok(statistics)
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logging(opts.quiet);
    run(&opts)?;
    Ok(())
}
