use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use bamtrack::cache::{slice_file_name, sweep};
use bamtrack::group::{
    CommandStructuralMatcher, CommandVariantMatcher, GroupMode, StructuralEvent, Variant,
};
use bamtrack::ingest::{AlignmentSource, CancelToken, CommandSource, MemorySource};
use bamtrack::layout::RowWindow;
use bamtrack::reference::{CommandReference, ReferenceGenome, ReferenceSource};
use bamtrack::region::RegionRequest;
use bamtrack::{TrackConfig, TrackEngine, TrackRequest};

#[derive(Parser)]
#[command(
    name = "bamtrack",
    about = "Lay out aligned reads as a genome-browser read track",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the read-track layout for one or more regions and print it as JSON
    Layout(LayoutArgs),

    /// Run one eviction sweep over the slice cache
    SweepCache {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Cache directory (overrides the config)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Print the cache file name of a slice
    SliceName {
        token: String,
        source_id: String,
        /// Slice position, e.g. chr1:1000-2000
        position: String,
    },
}

#[derive(Args)]
struct LayoutArgs {
    /// Regions to show (format: chr:start-end, 0-based half-open)
    #[arg(required = true)]
    regions: Vec<String>,

    /// Pixel width of each region
    #[arg(short, long, default_value = "1000")]
    width: u32,

    /// SAM text file with the reads
    #[arg(long, conflicts_with = "bam", required_unless_present = "bam")]
    sam: Option<PathBuf>,

    /// Indexed BAM file, read through samtools
    #[arg(short, long)]
    bam: Option<PathBuf>,

    /// Reference FASTA for mismatch annotation
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Fetch reference bases with `samtools faidx` instead of loading the FASTA
    #[arg(long, requires = "reference")]
    faidx: bool,

    /// Assemble read pairs by name
    #[arg(short, long)]
    paired: bool,

    /// Only lay out these stack rows (format: start-stop, inclusive)
    #[arg(long)]
    rows: Option<RowWindow>,

    /// Only return this group
    #[arg(short, long)]
    group: Option<String>,

    /// Variant to classify reads against, as JSON: {"chrom","pos","ref","alts"}
    #[arg(long, conflicts_with = "event", requires = "matcher")]
    variant: Option<String>,

    /// Structural event to classify reads against, as JSON: {"left","right"}
    #[arg(long, requires = "matcher")]
    event: Option<String>,

    /// Matcher program for --variant or --event
    #[arg(long)]
    matcher: Option<String>,

    /// Keep unmapped reads placed at their mate's position
    #[arg(long)]
    keep_unmapped: bool,

    /// Keep boxes outside the view window
    #[arg(long)]
    keep_all_boxes: bool,

    /// Record mate positions of paired reads
    #[arg(long)]
    mate_positions: bool,

    /// Read-count ceiling (overrides the config)
    #[arg(long)]
    read_ceiling: Option<u64>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fail instead of printing a partial track from a truncated file
    #[arg(long)]
    strict: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<TrackConfig> {
    match path {
        Some(path) => TrackConfig::from_json_file(path).context("failed to load config"),
        None => Ok(TrackConfig::default()),
    }
}

fn run_layout(args: LayoutArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(ceiling) = args.read_ceiling {
        config.read_ceiling = ceiling;
    }

    let regions = args
        .regions
        .iter()
        .map(|r| RegionRequest::parse_with_width(r, args.width))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse region")?;

    let source: Box<dyn AlignmentSource> = match (&args.sam, &args.bam) {
        (Some(sam), _) => {
            let text = std::fs::read_to_string(sam)
                .with_context(|| format!("failed to read SAM file {}", sam.display()))?;
            Box::new(MemorySource::from_sam_text(&text))
        }
        (None, Some(bam)) => Box::new(CommandSource::samtools(bam)),
        (None, None) => anyhow::bail!("either --sam or --bam is required"),
    };

    let mut engine = TrackEngine::new(source, config);
    if let Some(fasta) = &args.reference {
        let reference: Box<dyn ReferenceSource> = if args.faidx {
            Box::new(CommandReference::samtools(fasta))
        } else {
            Box::new(ReferenceGenome::from_file(fasta).context("failed to load reference")?)
        };
        engine = engine.with_reference(reference);
    }

    let mode = match (&args.variant, &args.event) {
        (Some(json), _) => {
            let variant: Variant = serde_json::from_str(json).context("invalid --variant")?;
            GroupMode::Variant {
                variant,
                allele_sequences: Vec::new(),
            }
        }
        (None, Some(json)) => {
            let event: StructuralEvent = serde_json::from_str(json).context("invalid --event")?;
            GroupMode::Structural(event)
        }
        (None, None) => GroupMode::Default,
    };
    if let Some(program) = &args.matcher {
        engine = match &mode {
            GroupMode::Structural(_) => engine.with_structural_matcher(Box::new(
                CommandStructuralMatcher::new(program.clone(), Vec::new()),
            )),
            _ => engine.with_variant_matcher(Box::new(CommandVariantMatcher::new(
                program.clone(),
                Vec::new(),
            ))),
        };
    }

    let request = TrackRequest {
        regions,
        paired: args.paired,
        mode,
        rows: args.rows,
        only_group: args.group,
        keep_all_boxes: args.keep_all_boxes,
        keep_mate_position: args.mate_positions,
        keep_unmapped: args.keep_unmapped,
        fail_on_truncation: args.strict,
    };

    let layout = match engine.render(&request, &CancelToken::new()) {
        Ok(layout) => layout,
        Err(e) if e.is_empty_result() => {
            eprintln!("{e}");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to build read track"),
    };
    let json = if args.pretty {
        serde_json::to_string_pretty(&layout)?
    } else {
        serde_json::to_string(&layout)?
    };
    println!("{json}");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Layout(args) => run_layout(args)?,

        Commands::SweepCache { config, root } => {
            let mut cache = load_config(config.as_ref())?.cache;
            if let Some(root) = root {
                cache.root = root;
            }
            info!(root = %cache.root.display(), "sweeping slice cache");
            let report = sweep(&cache, SystemTime::now());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::SliceName {
            token,
            source_id,
            position,
        } => {
            println!("{}", slice_file_name(&token, &source_id, &position));
        }
    }

    Ok(())
}
