#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use natord::compare;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use pebmatrix::atlas::{AtlasTable, CoordinateLookup};
use pebmatrix::batch::{BatchCatalog, run_batch};
use pebmatrix::config::PlotParameters;
use pebmatrix::data::PebType;
use pebmatrix::export::{export_all_covariates, safe_covariate_name, write_edge_table, write_node_table};
use pebmatrix::filter::{ConnectionFilter, ConnectionType};
use pebmatrix::organize::FigureMapping;
use pebmatrix::posterior::load_connectivity;
use pebmatrix::progress::{AnalysisOutcome, BatchProgressObserver};

#[derive(Args, Clone)]
pub struct ParamArgs {
    /// TOML file with processing parameters; flags below override it
    #[arg(long, value_name = "PATH")]
    pub params: Option<PathBuf>,

    /// Variable holding the posterior (default: BMA)
    #[arg(long)]
    pub model: Option<String>,

    /// Posterior probability threshold (default: 0.99)
    #[arg(long, value_name = "P")]
    pub pp_threshold: Option<f64>,

    /// Override the PEB type stored in the file (change, behav_associations, groupmean)
    #[arg(long)]
    pub peb_type: Option<PebType>,

    /// Keep self-connections on DCM's log scale
    #[arg(long)]
    pub no_revert_diag: bool,

    /// Region permutation, e.g. 3,1,2 (1-based when every index is at least 1)
    #[arg(long, value_delimiter = ',', value_name = "INDICES")]
    pub roi_reorder: Option<Vec<usize>>,

    /// Refuse to place constrained parameters without Pnames
    #[arg(long)]
    pub no_sequential_fallback: bool,
}

impl ParamArgs {
    fn resolve(&self) -> Result<PlotParameters, Box<dyn std::error::Error>> {
        self.apply_flags(self.base_parameters()?)
    }

    fn base_parameters(&self) -> Result<PlotParameters, Box<dyn std::error::Error>> {
        Ok(match &self.params {
            Some(path) => PlotParameters::load(path)?,
            None => PlotParameters::default(),
        })
    }

    /// Flags given on the command line win over every file-based setting.
    fn apply_flags(
        &self,
        mut params: PlotParameters,
    ) -> Result<PlotParameters, Box<dyn std::error::Error>> {
        if let Some(model) = &self.model {
            params.model = model.clone();
        }
        if let Some(threshold) = self.pp_threshold {
            params.pp_threshold = threshold;
        }
        if self.no_revert_diag {
            params.revert_diag = false;
        }
        if let Some(order) = &self.roi_reorder {
            params.roi_reorder = Some(order.clone());
        }
        if self.no_sequential_fallback {
            params.allow_sequential_fallback = false;
        }
        params.validate()?;
        Ok(params)
    }
}

#[derive(Args)]
pub struct ReshapeArgs {
    /// PEB result file, or a directory of .toml PEB results
    #[arg(value_name = "PEB_PATH")]
    pub path: PathBuf,

    /// Directory receiving the heatmap tables
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub params: ParamArgs,
}

#[derive(Args)]
pub struct ConnectomeArgs {
    /// PEB result file
    #[arg(value_name = "PEB_PATH")]
    pub path: PathBuf,

    /// Region coordinate table (TSV with label, x, y, z)
    #[arg(long, value_name = "TSV")]
    pub atlas: PathBuf,

    /// Covariate index to export
    #[arg(long, default_value = "0", conflicts_with = "covariate_name")]
    pub covariate: usize,

    /// Covariate to export, by name
    #[arg(long)]
    pub covariate_name: Option<String>,

    /// Source region name fragment (repeatable)
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Target region name fragment (repeatable)
    #[arg(long = "target")]
    pub targets: Vec<String>,

    #[arg(long, default_value_t = ConnectionType::Outgoing)]
    pub connection_type: ConnectionType,

    /// Minimum absolute connection strength
    #[arg(long, default_value = "0.0")]
    pub strength_threshold: f64,

    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub params: ParamArgs,
}

#[derive(Parser)]
#[command(
    name = "pebmatrix",
    about = "Connectivity matrices from DCM/PEB posterior estimates",
    long_about = "Reshapes the flat posterior of a Parametric Empirical Bayes analysis into \
                 directed region-by-region connectivity matrices and exports them as tables."
)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reshape PEB results into per-covariate heatmap tables
    #[command(about = "Reshape PEB results (outputs: <stem>_<covariate>.tsv)")]
    Reshape(ReshapeArgs),

    /// Export a filtered connectome edge list with region coordinates
    #[command(about = "Export connectome edges and nodes (outputs: <stem>_<covariate>_edges.tsv)")]
    Connectome(ConnectomeArgs),

    /// Generate the matrices of every analysis in a catalog
    #[command(about = "Run a batch catalog")]
    Batch {
        /// Catalog TOML listing the analyses
        #[arg(long, value_name = "PATH")]
        catalog: PathBuf,

        /// Process every analysis, not only those needed for the paper
        #[arg(long)]
        full: bool,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Copy generated outputs into grouped directories
    #[command(about = "Organize outputs according to a mapping file")]
    Organize {
        /// Mapping TOML
        #[arg(long, value_name = "PATH")]
        mapping: PathBuf,
    },

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    let cli = Cli::parse();
    let Cli { log_level, command } = cli;

    let level = log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|err| {
            eprintln!("Warning: Invalid log level '{log_level}' ({err}). Defaulting to info.");
            log::LevelFilter::Info
        });
    env_logger::Builder::new().filter_level(level).init();

    let result = match command {
        Some(Commands::Reshape(args)) => run_reshape(args),
        Some(Commands::Connectome(args)) => run_connectome(args),
        Some(Commands::Batch {
            catalog,
            full,
            params,
        }) => run_batch_catalog(catalog, full, params),
        Some(Commands::Organize { mapping }) => run_organize(mapping),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(|err| Box::new(err) as Box<dyn std::error::Error>),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn create_progress_bar(len: u64, message: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    pb.set_style(
        ProgressStyle::with_template(
            "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )?
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    pb.set_message(message.to_string());
    Ok(pb)
}

/// PEB files to process: the path itself, or every `.toml` in a directory in
/// natural order.
fn collect_peb_files(path: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    if files.is_empty() {
        return Err(format!("No .toml PEB files found in directory '{}'.", path.display()).into());
    }
    files.sort_by(|a, b| compare(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "peb".to_string())
}

fn run_reshape(args: ReshapeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let params = args.params.resolve()?;
    let files = collect_peb_files(&args.path)?;
    println!(
        "Reshaping {} PEB file(s) with Pp threshold {}",
        files.len(),
        params.pp_threshold
    );

    let pb = create_progress_bar(files.len() as u64, "reshaping")?;
    let mut written = 0usize;
    let mut failures = Vec::new();
    for path in &files {
        pb.set_message(file_stem(path));
        let outcome = load_connectivity(path, &params, args.params.peb_type)
            .map_err(|err| err.to_string())
            .and_then(|result| {
                export_all_covariates(&result, &args.output_dir, &file_stem(path))
                    .map_err(|err| err.to_string())
            });
        match outcome {
            Ok(paths) => written += paths.len(),
            Err(err) => {
                log::error!("{}: {err}", path.display());
                failures.push(path.display().to_string());
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "Wrote {written} table(s) to {} ({} of {} file(s) failed)",
        args.output_dir.display(),
        failures.len(),
        files.len()
    );
    if failures.len() == files.len() {
        return Err(format!("Every PEB file failed: {}", failures.join(", ")).into());
    }
    Ok(())
}

fn run_connectome(args: ConnectomeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let params = args.params.resolve()?;
    let result = load_connectivity(&args.path, &params, args.params.peb_type)?;
    let atlas = AtlasTable::load(&args.atlas)?;

    let index = match &args.covariate_name {
        Some(name) => result
            .covariate_index(name)
            .ok_or_else(|| format!("No covariate named '{name}'; available: {:?}", result.covariate_names))?,
        None => args.covariate,
    };
    let matrix = result.covariate(index);
    let covariate_name = result
        .covariate_names
        .get(index)
        .unwrap_or(&result.covariate_names[0]);

    let filter = ConnectionFilter {
        source_regions: args.sources,
        target_regions: args.targets,
        connection_type: args.connection_type,
        strength_threshold: args.strength_threshold,
    };
    let filtered = filter.apply(matrix, &result.roi_names);
    let coords = atlas.coordinates(&result.roi_names);

    fs::create_dir_all(&args.output_dir)?;
    let stem = file_stem(&args.path);
    let edges_path = args.output_dir.join(format!(
        "{stem}_{}_edges.tsv",
        safe_covariate_name(covariate_name)
    ));
    let nodes_path = args.output_dir.join(format!("{stem}_nodes.tsv"));
    let edges = write_edge_table(&edges_path, filtered.view(), &result.roi_names, coords.view())?;
    write_node_table(&nodes_path, &result.roi_names, coords.view())?;

    println!("Wrote {edges} connection(s) to {}", edges_path.display());
    println!("Wrote {} region(s) to {}", result.roi_n(), nodes_path.display());
    Ok(())
}

struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BatchProgressObserver for BarProgress {
    fn on_batch_start(&mut self, total_analyses: usize) {
        match create_progress_bar(total_analyses as u64, "batch") {
            Ok(bar) => self.bar = Some(bar),
            Err(err) => log::debug!("Progress bar unavailable: {err}"),
        }
    }

    fn on_analysis_start(&mut self, code: &str, name: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{code}: {name}"));
        }
    }

    fn on_analysis_finish(&mut self, code: &str, outcome: AnalysisOutcome) {
        if let Some(bar) = &self.bar {
            if outcome != AnalysisOutcome::Generated {
                bar.println(format!("[{outcome}] {code}"));
            }
            bar.inc(1);
        }
    }

    fn on_batch_finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn run_batch_catalog(
    catalog_path: PathBuf,
    full: bool,
    params: ParamArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if params.peb_type.is_some() {
        return Err("--peb-type does not apply to batch runs; each catalog entry sets its own type".into());
    }
    let catalog = BatchCatalog::load(&catalog_path)?;
    let params = params.apply_flags(catalog.plot_parameters(&params.base_parameters()?))?;
    println!(
        "Mode: {}",
        if full {
            "FULL (all matrices)"
        } else {
            "PAPER (panel matrices only)"
        }
    );

    let mut observer = BarProgress { bar: None };
    let report = run_batch(&catalog, full, &params, &mut observer);

    println!("Generated: {}", report.stats.generated);
    println!("Missing:   {}", report.stats.missing);
    println!("Errors:    {}", report.stats.errors);
    if !report.generated_files.is_empty() {
        println!("\nGenerated {} file(s):", report.generated_files.len());
        for file in &report.generated_files {
            println!("  {}", file.display());
        }
    }
    Ok(())
}

fn run_organize(mapping_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mapping = FigureMapping::load(&mapping_path)?;
    let stats = mapping.organize();
    println!("Copied:  {}", stats.copied);
    println!("Missing: {}", stats.missing);
    println!("Errors:  {}", stats.errors);
    println!("Output in {}", mapping.destination_root.display());
    Ok(())
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const WEEK: u64 = 7 * DAY;

    if seconds < MINUTE {
        format!("{} seconds ago", seconds)
    } else if seconds < HOUR {
        format!("{:.1} minutes ago", seconds as f64 / MINUTE as f64)
    } else if seconds < DAY {
        format!("{:.1} hours ago", seconds as f64 / HOUR as f64)
    } else if seconds < WEEK {
        format!("{:.1} days ago", seconds as f64 / DAY as f64)
    } else {
        format!("{:.1} weeks ago", seconds as f64 / WEEK as f64)
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let build_timestamp: u64 = env!("PEBMATRIX_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("pebmatrix {}", version);

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}
