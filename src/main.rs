mod startup;

use clap::{Args, Parser, Subcommand};
use divseq::{config, MashConfig, MaxConfig, MaxObjective, MoleculeType, Stat};
use startup::{Common, TreeFormat};
use std::process;

/// Select divergent sequences and build guide trees from k-mer statistics
#[derive(Parser, Debug)]
#[command(name = "divseq")]
#[command(about = "Alignment-free diverse sequence selection and clustering", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Input FASTA file
    #[arg(short, long)]
    input: String,

    /// Molecule type of every record (dna, rna, protein)
    #[arg(long, default_value = "dna")]
    moltype: MoleculeType,

    /// K-mer length
    #[arg(short, default_value_t = 6)]
    k: usize,

    /// Output file (stdout if omitted)
    #[arg(short, long)]
    output: Option<String>,
}

impl From<CommonArgs> for Common {
    fn from(args: CommonArgs) -> Self {
        Self {
            input: args.input,
            moltype: args.moltype,
            k: args.k,
            output: args.output,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// The n records contributing most to the collection's divergence
    Nmost {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of records to select
        #[arg(short, long)]
        n: usize,

        /// Divergence statistic (jsd, stdev)
        #[arg(long, default_value = "stdev")]
        stat: Stat,

        /// Seed for tie-breaking (input order if omitted)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// A maximally divergent subset of bounded size
    Max {
        #[command(flatten)]
        common: CommonArgs,

        /// Minimum subset size
        #[arg(long, default_value_t = 2)]
        min_size: usize,

        /// Maximum subset size (all records if omitted)
        #[arg(long)]
        max_size: Option<usize>,

        /// Divergence statistic (jsd, stdev)
        #[arg(long, default_value = "stdev")]
        stat: Stat,

        /// Quantity to maximise (total, mean, mean-delta)
        #[arg(long, default_value = "total")]
        objective: MaxObjective,

        /// Smallest objective gain admitting a record past min_size
        #[arg(long, default_value_t = 0.0)]
        threshold: f64,

        /// Maximum number of drop-phase swaps
        #[arg(long, default_value_t = config::DEFAULT_SWAP_LIMIT)]
        swap_limit: usize,

        /// Shrink the result to the size with the highest divergence
        #[arg(long, default_value = "false")]
        trim: bool,

        /// Seed for the starting record and tie-breaking
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Average-linkage guide tree
    Tree {
        #[command(flatten)]
        common: CommonArgs,

        /// Divergence statistic (jsd, stdev)
        #[arg(long, default_value = "jsd")]
        stat: Stat,

        /// Build an approximate tree from this many partitions in parallel
        #[arg(short = 't', long)]
        workers: Option<usize>,

        /// Seed for partition assignment
        #[arg(long)]
        seed: Option<u64>,

        /// Output format
        #[arg(long, value_enum, default_value_t = TreeFormat::Newick)]
        format: TreeFormat,
    },

    /// Pairwise distance matrix as TSV
    Dist {
        #[command(flatten)]
        common: CommonArgs,

        /// Distance (jsd, stdev, euclidean, mash)
        #[arg(long, default_value = "mash")]
        metric: String,

        /// Mash sketch size
        #[arg(long, default_value_t = 2000)]
        sketch_size: usize,

        /// Use canonical k-mers for mash (nucleotides only)
        #[arg(long, default_value = "false")]
        canonical: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Nmost {
            common,
            n,
            stat,
            seed,
        } => startup::run_nmost(&common.into(), n, stat, seed),
        Commands::Max {
            common,
            min_size,
            max_size,
            stat,
            objective,
            threshold,
            swap_limit,
            trim,
            seed,
        } => {
            let config = MaxConfig {
                min_size,
                max_size: max_size.unwrap_or(usize::MAX),
                objective,
                threshold,
                swap_limit,
                trim,
                ..MaxConfig::default()
            };
            startup::run_max(&common.into(), &config, stat, seed)
        }
        Commands::Tree {
            common,
            stat,
            workers,
            seed,
            format,
        } => startup::run_tree(&common.into(), stat, workers, seed, format),
        Commands::Dist {
            common,
            metric,
            sketch_size,
            canonical,
        } => {
            let mash = MashConfig {
                sketch_size,
                canonical,
            };
            startup::run_dist(&common.into(), &metric, &mash)
        }
    }
}
