use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::Sender;
use serde_json::json;
use tracing::{info, warn, Level};

use flowtween::config::Settings;
use flowtween::device::capability;
use flowtween::device::{DeviceRegistry, OpenOptions};
use flowtween::frame::io::{load_frame, save_frame};
use flowtween::{InterpolationPipeline, PixelBuffer, TimeStepPlanner};

#[derive(Parser)]
#[command(author, version, about = "Motion-compensated frame interpolation", long_about = None)]
struct Cli {
    /// JSON settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Device index to bind; defaults to the first compatible device
    #[arg(short, long, global = true)]
    device: Option<usize>,
    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List execution devices and whether each passes the capability gate
    Devices,
    /// Write N intermediate frames between two images
    Interpolate {
        first: PathBuf,
        second: PathBuf,
        #[arg(short = 'n', long, default_value_t = 1)]
        frames: usize,
        /// Time increment between frames instead of a frame count
        #[arg(long, conflicts_with = "frames")]
        step: Option<f32>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Interpolate every consecutive pair of a numbered image sequence
    Sequence {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short = 'n', long, default_value_t = 1)]
        frames: usize,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Render the forward flow between two images as a color image
    Flow {
        first: PathBuf,
        second: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Settings::default(),
    };
    if cli.device.is_some() {
        settings.device = cli.device;
    }

    match &cli.command {
        Commands::Devices => list_devices(&settings)?,
        Commands::Interpolate {
            first,
            second,
            frames,
            step,
            output,
        } => {
            let steps = match step {
                Some(step) => TimeStepPlanner::every(*step)?,
                None => TimeStepPlanner::plan(*frames),
            };
            interpolate_pair(&settings, first, second, steps, output)?
        }
        Commands::Sequence { input, frames, output } => interpolate_sequence(&settings, input, *frames, output)?,
        Commands::Flow { first, second, output } => render_flow(&settings, first, second, output)?,
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_registry(settings: &Settings) -> DeviceRegistry {
    DeviceRegistry::system(OpenOptions {
        kernel_cache: settings.kernel_cache_or_default(),
        threads: settings.threads,
    })
}

fn build_pipeline(settings: &Settings) -> Result<InterpolationPipeline> {
    let mut pipeline = InterpolationPipeline::new(build_registry(settings), settings.flow.clone())?;
    let index = pipeline.select_device(settings.device)?;
    if let Some(device) = pipeline.registry().current_device() {
        info!("Using device {}: {}", index, device);
    }
    Ok(pipeline)
}

fn list_devices(settings: &Settings) -> Result<()> {
    let mut registry = build_registry(settings);
    let requirement = registry.requirement().clone();
    let selected = match settings.device {
        Some(index) => Some(index),
        None => registry.first_compatible()?,
    };

    let devices = registry.enumerate()?;
    let report: Vec<_> = devices
        .iter()
        .map(|device| {
            let unmet = capability::evaluate(device, &requirement);
            json!({
                "selected": selected == Some(device.index),
                "compatible": unmet.is_empty(),
                "unmet": unmet,
                "device": device,
            })
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "requirement": requirement,
            "devices": report,
        }))?
    );
    Ok(())
}

fn interpolate_pair(settings: &Settings, first: &Path, second: &Path, steps: Vec<f32>, output: &Path) -> Result<()> {
    let a = load_frame(first).with_context(|| format!("reading {}", first.display()))?;
    let b = load_frame(second).with_context(|| format!("reading {}", second.display()))?;
    let mut pipeline = build_pipeline(settings)?;

    let start = Instant::now();
    let results = pipeline
        .begin_steps(&a, &b, steps)?
        .collect::<Result<Vec<_>, _>>()?;
    info!("Interpolated {} frame(s) in {:?}", results.len(), start.elapsed());

    std::fs::create_dir_all(output)?;
    for (i, frame) in results.iter().enumerate() {
        let path = output.join(format!("frame_{:04}.png", i + 1));
        save_frame(frame, &path).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

/// Numbered frame output on a dedicated writer thread.
struct FrameSink {
    tx: Sender<(PathBuf, PixelBuffer)>,
    writer: JoinHandle<Result<usize>>,
    dir: PathBuf,
    next: usize,
}

impl FrameSink {
    fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        // Bounded so decoding and estimation never run far ahead of the disk
        let (tx, rx) = crossbeam_channel::bounded::<(PathBuf, PixelBuffer)>(8);
        let writer = std::thread::spawn(move || -> Result<usize> {
            let mut written = 0;
            for (path, frame) in rx {
                save_frame(&frame, &path).with_context(|| format!("writing {}", path.display()))?;
                written += 1;
            }
            Ok(written)
        });
        Ok(Self {
            tx,
            writer,
            dir: dir.to_path_buf(),
            next: 0,
        })
    }

    fn push(&mut self, frame: PixelBuffer) -> Result<()> {
        self.next += 1;
        let path = self.dir.join(format!("{:06}.png", self.next));
        self.tx
            .send((path, frame))
            .map_err(|_| anyhow!("frame writer stopped early"))
    }

    fn finish(self) -> Result<usize> {
        drop(self.tx);
        self.writer.join().map_err(|_| anyhow!("frame writer panicked"))?
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp" | "tif" | "tiff"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn interpolate_sequence(settings: &Settings, input: &Path, frames: usize, output: &Path) -> Result<()> {
    let files = list_images(input)?;
    if files.is_empty() {
        bail!("No images found in {}", input.display());
    }
    let mut pipeline = build_pipeline(settings)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error registering Ctrl-C handler")?;

    let mut sink = FrameSink::new(output)?;
    let start = Instant::now();
    let mut current = load_frame(&files[0]).with_context(|| format!("reading {}", files[0].display()))?;

    'pairs: for path in &files[1..] {
        let next = load_frame(path).with_context(|| format!("reading {}", path.display()))?;
        sink.push(current.clone())?;

        let mut run = pipeline.begin(&current, &next, frames)?;
        while running.load(Ordering::SeqCst) {
            match run.next() {
                Some(frame) => sink.push(frame.with_context(|| format!("interpolating towards {}", path.display()))?)?,
                None => break,
            }
        }
        drop(run);
        if !running.load(Ordering::SeqCst) {
            warn!("Interrupted; stopping after {} frame(s)", sink.next);
            break 'pairs;
        }
        current = next;
    }
    if running.load(Ordering::SeqCst) {
        sink.push(current)?;
    }

    let written = sink.finish()?;
    info!(
        "Wrote {} frame(s) from {} source frame(s) in {:?}",
        written,
        files.len(),
        start.elapsed()
    );
    Ok(())
}

fn render_flow(settings: &Settings, first: &Path, second: &Path, output: &Path) -> Result<()> {
    let a = load_frame(first).with_context(|| format!("reading {}", first.display()))?;
    let b = load_frame(second).with_context(|| format!("reading {}", second.display()))?;
    let pipeline = build_pipeline(settings)?;

    let flows = pipeline.estimator().estimate(pipeline.registry(), &a, &b)?;
    let (mean_dx, mean_dy) = flows.forward.region_mean(0, 0, flows.width(), flows.height());
    info!("Mean forward displacement ({:.3}, {:.3})", mean_dx, mean_dy);
    save_frame(&flows.forward.visualize()?, output).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}
