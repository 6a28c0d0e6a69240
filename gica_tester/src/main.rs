use anyhow::{bail, Context};
use gica::core_modules::utils::image_helper::image_helper::{save_float_map, save_map};
use gica::{
    split_channels, AnalysisConfig, GammaNorm, IntensityPlane, MeasurementLog, Region, ScanOutcome,
};
use std::env;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: gica_tester <output_dir> <image>... \
[--threshold <factor>] [--region <x,y,w,h>] [--seed <n>] [--topology] [--full]\n\
A single color image is split into its RGB channels; several images are read as \
one grayscale channel each.";

struct Options {
    output_dir: PathBuf,
    inputs: Vec<PathBuf>,
    region: Option<Region>,
    topology: bool,
    config: AnalysisConfig,
}

fn parse_region(value: &str) -> anyhow::Result<Region> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("bad region `{value}`"))?;
    match parts.as_slice() {
        [x, y, w, h] => Ok(Region::new(*x, *y, *w, *h)),
        _ => bail!("region needs four values x,y,w,h, got `{value}`"),
    }
}

fn parse_args() -> anyhow::Result<Option<Options>> {
    let mut args = env::args().skip(1);
    let mut positional = Vec::new();
    let mut region = None;
    let mut topology = false;
    let mut config = AnalysisConfig::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--threshold" => {
                let value = args.next().context("--threshold needs a value")?;
                config.threshold_factor = value.parse().context("--threshold is not a number")?;
            }
            "--region" => {
                let value = args.next().context("--region needs a value")?;
                region = Some(parse_region(&value)?);
            }
            "--seed" => {
                let value = args.next().context("--seed needs a value")?;
                config.seed = Some(value.parse().context("--seed is not an integer")?);
            }
            "--topology" => topology = true,
            "--full" => config.full_results = true,
            "-h" | "--help" => return Ok(None),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    if positional.len() < 2 {
        return Ok(None);
    }
    let output_dir = positional.remove(0);
    Ok(Some(Options {
        output_dir,
        inputs: positional,
        region,
        topology,
        config,
    }))
}

fn load_planes(inputs: &[PathBuf]) -> anyhow::Result<Vec<IntensityPlane>> {
    if let [single] = inputs {
        let image = image::open(single).with_context(|| format!("opening {}", single.display()))?;
        return Ok(split_channels(&image)?);
    }
    inputs
        .iter()
        .map(|path| {
            let image = image::open(path).with_context(|| format!("opening {}", path.display()))?;
            IntensityPlane::from_dynamic(&image)
                .with_context(|| format!("{} is not a grayscale channel", path.display()))
        })
        .collect()
}

fn file_name(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{cleaned}.png")
}

async fn run_topology(analysis: &GammaNorm, output_dir: &Path) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scanner = analysis.topology_scanner()?.with_progress(tx);

    let cancel = scanner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling topology scan");
            cancel.cancel();
        }
    });
    let reporter = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            info!("topology rows {}/{}", progress.completed, progress.total);
        }
    });

    let outcome = scanner.run().await?;
    drop(scanner);
    let _ = reporter.await;

    let result = match outcome {
        ScanOutcome::Completed(result) => result,
        ScanOutcome::Cancelled => {
            println!("Topology scan cancelled, nothing written.");
            return Ok(());
        }
    };

    save_float_map(output_dir.join("gamma_topology.png"), &result.normalized)?;
    save_float_map(output_dir.join("gamma_topology_abs.png"), &result.absolute)?;
    for pair in &result.pairs {
        save_float_map(output_dir.join(file_name(&pair.label())), &pair.normalized)?;
        save_float_map(output_dir.join(file_name(&pair.absolute_label())), &pair.absolute)?;
    }
    for (label, image) in &result.intermediates {
        save_float_map(output_dir.join(file_name(label)), image)?;
    }
    println!("Topology written to {}", output_dir.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- 1. Argument Parsing & Setup ---
    let Some(options) = parse_args()? else {
        println!("{USAGE}");
        return Ok(());
    };
    std::fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("creating {}", options.output_dir.display()))?;

    // --- 2. Channel Loading & Thresholding ---
    let planes = load_planes(&options.inputs)?;
    let analysis = GammaNorm::from_planes(&planes, options.config)?;
    let channels = analysis.channels();
    for (i, channel) in channels.channels().iter().enumerate() {
        let stats = channel.stats();
        info!(
            channel = i,
            threshold = stats.threshold,
            active = stats.active,
            "channel thresholded"
        );
        save_map(options.output_dir.join(format!("activation_ch{i}.png")), channel)?;
    }
    save_map(options.output_dir.join("coloc.png"), channels.coloc())?;

    // --- 3. Region Measurement ---
    let region = options
        .region
        .unwrap_or_else(|| Region::full(channels.width(), channels.height()));
    let label = options
        .inputs
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("+");
    let mut log = MeasurementLog::new();
    log.push(analysis.measure_region_async(region, label, None).await?);
    print!("{log}");

    // --- 4. Topology ---
    if options.topology {
        run_topology(&analysis, &options.output_dir).await?;
    }
    Ok(())
}
