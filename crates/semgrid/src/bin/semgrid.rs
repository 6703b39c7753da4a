use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use semgrid::core::ImageRecord;
use semgrid::discover::{self, Discovery, DiscoveryConfig, ModeClassifier, MixStrategy};
use semgrid::register::{Registrar, RegistrarParams};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// Registration and collection discovery for SEM micrographs
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: LevelFilter,

    /// Emit structured JSON logs through `tracing`
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cluster session pools and write a JSON report of discovered collections
    Discover {
        /// Run configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Report path, overriding the configuration
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip image decoding; pyramids need pixels and are not searched
        #[arg(long)]
        no_images: bool,
    },
    /// Place detail images on an overview and print the result
    Place {
        /// Overview record (JSON)
        #[arg(long)]
        overview: PathBuf,

        /// Detail records (JSON), one or more
        #[arg(long, required = true, num_args = 1..)]
        detail: Vec<PathBuf>,

        /// Directory the record ids resolve against (default: the overview's directory)
        #[arg(long)]
        images: Option<PathBuf>,

        /// Print placements as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the mode label of every record in a pool
    Modes {
        /// Pool file: JSON array of records
        #[arg(short, long)]
        pool: PathBuf,

        /// Treat every mixed-detector image as generic topography
        #[arg(long)]
        generic_topo: bool,
    },
}

fn load_record(path: &Path) -> Result<ImageRecord, Box<dyn Error>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run_discover(
    config: &Path,
    output: Option<PathBuf>,
    no_images: bool,
) -> Result<(), Box<dyn Error>> {
    let cfg = DiscoveryConfig::load_json(config)?;
    let base = parent_dir(config);
    let pools = cfg.load_pools(&base)?;
    let discovery = Discovery::from_config(&cfg);

    let image_root = cfg
        .image_root
        .as_ref()
        .map(|r| base.join(r))
        .unwrap_or_else(|| base.clone());
    let mut report = discover_pools(&discovery, &pools, &image_root, no_images);
    report.config_path = Some(config.to_string_lossy().into_owned());

    let out = output.unwrap_or_else(|| cfg.output_path());
    report.write_json(&out)?;
    info!("report written to {}", out.display());
    println!(
        "{} session(s), {} collection(s) -> {}",
        report.sessions.len(),
        report.collections.len(),
        out.display()
    );
    Ok(())
}

#[cfg(feature = "image")]
fn discover_pools(
    discovery: &Discovery,
    pools: &[discover::SessionPool],
    image_root: &Path,
    no_images: bool,
) -> discover::DiscoveryReport {
    if no_images {
        discovery.run(pools, None)
    } else {
        semgrid::images::discover_with_images(discovery, pools, image_root)
    }
}

#[cfg(not(feature = "image"))]
fn discover_pools(
    discovery: &Discovery,
    pools: &[discover::SessionPool],
    _image_root: &Path,
    _no_images: bool,
) -> discover::DiscoveryReport {
    discovery.run(pools, None)
}

fn run_place(
    overview: &Path,
    details: &[PathBuf],
    images: Option<PathBuf>,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let overview_rec = load_record(overview)?;
    let detail_recs = details
        .iter()
        .map(|p| load_record(p))
        .collect::<Result<Vec<_>, _>>()?;
    let root = images.unwrap_or_else(|| parent_dir(overview));
    let registrar = Registrar::new(RegistrarParams::default());
    place(&registrar, &overview_rec, &detail_recs, &root, json)
}

#[cfg(feature = "image")]
fn place(
    registrar: &Registrar,
    overview: &ImageRecord,
    details: &[ImageRecord],
    root: &Path,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let results = semgrid::images::place_files(registrar, overview, details, root);
    for (detail, result) in details.iter().zip(results) {
        match result {
            Ok(p) if json => println!("{}", serde_json::to_string(&p)?),
            Ok(p) => {
                let check = match p.consistency {
                    Some(c) if c.consistent => format!("consistent ({:.1} px)", c.distance_px),
                    Some(c) => format!("INCONSISTENT ({:.1} px)", c.distance_px),
                    None => "no prediction".to_string(),
                };
                println!(
                    "{}\tcenter=({:.1}, {:.1})\tconfidence={:.3} {:?}\t{}",
                    p.detail_id,
                    p.center_px.x,
                    p.center_px.y,
                    p.alignment.confidence,
                    p.band(),
                    check
                );
            }
            Err(err) => eprintln!("{}\tnot placed: {err}", detail.id),
        }
    }
    Ok(())
}

#[cfg(not(feature = "image"))]
fn place(
    registrar: &Registrar,
    overview: &ImageRecord,
    details: &[ImageRecord],
    _root: &Path,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    for detail in details {
        match registrar.predict_center(overview, detail) {
            Ok(p) if json => println!(
                "{}",
                serde_json::json!({ "detail_id": detail.id, "predicted_px": p })
            ),
            Ok(p) => println!("{}\tpredicted=({:.1}, {:.1})", detail.id, p.x, p.y),
            Err(err) => eprintln!("{}\tnot placed: {err}", detail.id),
        }
    }
    Ok(())
}

fn run_modes(pool: &Path, generic_topo: bool) -> Result<(), Box<dyn Error>> {
    let records = discover::load_records(pool)?;
    let classifier = if generic_topo {
        ModeClassifier::new(MixStrategy::GenericTopography)
    } else {
        ModeClassifier::default()
    };
    for record in &records {
        let label = classifier.classify(record);
        println!("{}\t{}\t{}", record.id, label.key, label.display);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    #[cfg(feature = "tracing")]
    if args.json_logs {
        semgrid::core::init_tracing(args.log_level, true);
    } else {
        semgrid::core::init_with_level(args.log_level)?;
    }
    #[cfg(not(feature = "tracing"))]
    semgrid::core::init_with_level(args.log_level)?;

    match args.command {
        Command::Discover {
            config,
            output,
            no_images,
        } => run_discover(&config, output, no_images),
        Command::Place {
            overview,
            detail,
            images,
            json,
        } => run_place(&overview, &detail, images, json),
        Command::Modes { pool, generic_topo } => run_modes(&pool, generic_topo),
    }
}
