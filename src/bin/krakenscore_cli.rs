use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use krakenscore_rs::config::{DEFAULT_SCORE_FORMAT, DEFAULT_SUMMARY_FORMAT};
use krakenscore_rs::kraken_file::sample_id;
use krakenscore_rs::{
    annotate_lineage, filter_reads, save_kmer_summary, save_rank_summary, score_reads_to_file,
    summarize_kmers, summarize_ranks, CollapseKey, Error, FilterThresholds, InMemoryResolver,
    LineageResolver, PassConfig, ResolverConfig, Result, TaxonkitResolver,
};

/// Scores and summarizes the k-mer level assignments in Kraken2 output.
#[derive(Parser)]
#[command(name = "krakenscore-rs", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ResolverArgs {
    /// The path to the taxonomy dumps.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// The taxonomic ranks to consider, as a taxonkit format string.
    #[arg(short, long)]
    format: Option<String>,

    /// Use a precomputed `taxid<TAB>lineage<TAB>taxid lineage` table instead of taxonkit.
    #[arg(long)]
    lineages: Option<PathBuf>,
}

#[derive(Args)]
struct KrakenArgs {
    /// Kraken2 output file (plain or .gz).
    input: PathBuf,

    /// The assigned taxon column holds names (`kraken2 --use-names`).
    #[arg(long)]
    named: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CollapseKeyArg {
    Reference,
    Kmer,
}

impl From<CollapseKeyArg> for CollapseKey {
    fn from(arg: CollapseKeyArg) -> Self {
        match arg {
            CollapseKeyArg::Reference => CollapseKey::Reference,
            CollapseKeyArg::Kmer => CollapseKey::Kmer,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Score every classified read (consistency, confidence, multiplicity, entropy).
    Score {
        #[command(flatten)]
        kraken: KrakenArgs,
        #[command(flatten)]
        resolver: ResolverArgs,
        /// The output file (CSV format).
        #[arg(long, default_value = "mapping_scores.csv")]
        out: PathBuf,
    },
    /// Keep only reads whose k-mer assignments are consistent and unambiguous.
    Filter {
        #[command(flatten)]
        kraken: KrakenArgs,
        #[command(flatten)]
        resolver: ResolverArgs,
        /// The output file (Kraken format).
        #[arg(long, default_value = "filtered.k2")]
        out: PathBuf,
        /// Maximum entropy for k-mer classifications at the classified rank.
        #[arg(long, default_value_t = 0.1)]
        max_entropy: f64,
        /// Minimum consistency of the read classification.
        #[arg(long, default_value_t = 0.9)]
        min_consistency: f64,
        /// Maximum number of alternative classifications at the classified rank.
        #[arg(long, default_value_t = 2)]
        max_multiplicity: u32,
    },
    /// Summarize k-mer assignments for each classified taxon.
    Kmers {
        #[command(flatten)]
        kraken: KrakenArgs,
        /// The output file (CSV format).
        #[arg(long, default_value = "mapping_kmers.csv")]
        out: PathBuf,
    },
    /// Summarize k-mer assignments for each classified taxon on taxonomic ranks.
    Summary {
        #[command(flatten)]
        kraken: KrakenArgs,
        #[command(flatten)]
        resolver: ResolverArgs,
        /// The output file (CSV format).
        #[arg(long, default_value = "mapping_summary.csv")]
        out: PathBuf,
        /// Which lineage names the rank buckets.
        #[arg(long, value_enum, default_value_t = CollapseKeyArg::Reference)]
        collapse_key: CollapseKeyArg,
    },
    /// Add lineage columns to a table of taxon IDs (e.g. Bracken output).
    Lineage {
        /// Input table.
        input: PathBuf,
        #[command(flatten)]
        resolver: ResolverArgs,
        /// Column holding the taxon IDs.
        #[arg(long, default_value = "taxonomy_id")]
        column: String,
        /// The input is tab-separated.
        #[arg(long)]
        tsv: bool,
        /// The filename of the output CSV.
        #[arg(short, long, default_value = "annotated.csv")]
        out: PathBuf,
    },
}

fn spinner(color: &str, msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = format!("{{spinner:.{color}}} {{msg}}");
    if let Ok(style) = ProgressStyle::default_spinner().template(&template) {
        spinner.set_style(style.tick_strings(&[
            "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿",
        ]));
    }
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner.set_message(msg.to_string());
    spinner
}

impl ResolverArgs {
    fn config(&self, default_format: &str) -> ResolverConfig {
        ResolverConfig {
            data_dir: self.data_dir.clone(),
            format: self.format.clone().unwrap_or_else(|| default_format.to_string()),
        }
    }

    /// Builds the resolver and checks that it is usable before any pass runs.
    fn resolver(&self, config: &ResolverConfig) -> Result<Box<dyn LineageResolver>> {
        if let Some(table) = &self.lineages {
            let file = File::open(table).map_err(|source| Error::Open {
                path: table.clone(),
                source,
            })?;
            let resolver = InMemoryResolver::from_table(BufReader::new(file))?;
            log::info!("Using lineages from {}.", table.display());
            return Ok(Box::new(resolver));
        }

        let resolver = TaxonkitResolver::new(config);
        let version = resolver.check()?;
        log::info!("Found taxonkit={}.", version);
        Ok(Box::new(resolver))
    }
}

impl KrakenArgs {
    fn pass_config(&self) -> PassConfig {
        if self.named {
            log::info!("Expecting Kraken2 output with taxon names.");
        }
        PassConfig::default().named(self.named)
    }
}

fn done(spinner: ProgressBar, out: &Path) {
    spinner.finish_with_message(format!("Wrote {}.", out.display()));
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Score { kraken, resolver, out } => {
            let config = resolver.config(DEFAULT_SCORE_FORMAT);
            let lineages = resolver.resolver(&config)?;
            let pass = kraken.pass_config();

            let spinner = spinner("green", "Scoring reads...");
            score_reads_to_file(&kraken.input, &out, &pass, &*lineages, &config.format)?;
            done(spinner, &out);
        }
        Commands::Filter {
            kraken,
            resolver,
            out,
            max_entropy,
            min_consistency,
            max_multiplicity,
        } => {
            let config = resolver.config(DEFAULT_SCORE_FORMAT);
            let lineages = resolver.resolver(&config)?;
            let pass = kraken.pass_config();
            let thresholds = FilterThresholds {
                min_consistency,
                max_entropy,
                max_multiplicity,
            };

            let spinner = spinner("green", "Filtering reads...");
            let stats = filter_reads(&kraken.input, &out, &pass, &thresholds, &*lineages, &config.format)?;
            spinner.finish_with_message(format!(
                "{}/{} reads passed the filter, written to {}.",
                stats.passed,
                stats.reads,
                out.display()
            ));
        }
        Commands::Kmers { kraken, out } => {
            let pass = kraken.pass_config();

            let spinner = spinner("blue", "Summarizing k-mer assignments...");
            let mapping = summarize_kmers(&kraken.input, &pass)?;
            log::info!("Saving map to {}.", out.display());
            save_kmer_summary(&mapping, &out, &sample_id(&kraken.input))?;
            done(spinner, &out);
        }
        Commands::Summary {
            kraken,
            resolver,
            out,
            collapse_key,
        } => {
            let config = resolver.config(DEFAULT_SUMMARY_FORMAT);
            let lineages = resolver.resolver(&config)?;
            let pass = kraken.pass_config();

            let spinner = spinner("yellow", "Collapsing k-mer assignments on ranks...");
            let collapsed = summarize_ranks(
                &kraken.input,
                &pass,
                &*lineages,
                &config.format,
                collapse_key.into(),
            )?;
            log::info!("Saving map to {}.", out.display());
            save_rank_summary(&collapsed, &out, &sample_id(&kraken.input))?;
            done(spinner, &out);
        }
        Commands::Lineage {
            input,
            resolver,
            column,
            tsv,
            out,
        } => {
            let config = resolver.config(DEFAULT_SUMMARY_FORMAT);
            let lineages = resolver.resolver(&config)?;
            let delimiter = if tsv { b'\t' } else { b',' };

            let spinner = spinner("cyan", "Annotating lineages...");
            annotate_lineage(&input, &out, &column, delimiter, &*lineages, &config.format)?;
            done(spinner, &out);
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        log::error!("{}", e);
        process::exit(1);
    }
}
