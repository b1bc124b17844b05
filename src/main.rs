use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use peptide_fm::config::{IndexParams, MatchingRules};
use peptide_fm::index::fm::FMIndex;
use peptide_fm::io::variants::read_variants;
use peptide_fm::search::cache::ShardedTagCache;
use peptide_fm::search::engine::SearchEngine;
use peptide_fm::search::mapping::Mapping;
use peptide_fm::search::tag::Tag;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "peptide-fm", author, version, about = "Protein FM-index for peptide and mass-tag mapping", arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Protein FASTA file; the index is stored next to it as <name>.fmi
    fasta: PathBuf,
    /// Residues per shard
    #[arg(long = "chunk-size", default_value_t = 100_000_000)]
    chunk_size: usize,
    /// Keep one suffix array row every 2^N
    #[arg(long = "sampling-shift", default_value_t = 3)]
    sampling_shift: u8,
    /// Tab-separated fixed variants (accession, position, reference, alternative)
    #[arg(long)]
    variants: Option<PathBuf>,
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    threads: usize,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build (or refresh) the index of a protein database
    Index {
        #[command(flatten)]
        index: IndexArgs,
        /// Rebuild even when an up-to-date index exists
        #[arg(long)]
        force: bool,
    },
    /// Map peptides and tags to proteins
    Map {
        #[command(flatten)]
        index: IndexArgs,
        /// Matching rules (JSON)
        #[arg(short, long)]
        rules: Option<PathBuf>,
        /// Peptide sequence, may be repeated
        #[arg(short, long = "peptide")]
        peptides: Vec<String>,
        /// Tag such as `[201.0957]AV[227.1270]`, may be repeated
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// File with one peptide or tag per line
        #[arg(short, long)]
        queries: Option<PathBuf>,
        /// Emit one JSON object per mapping
        #[arg(long)]
        json: bool,
        /// Cache results of gap-literal-gap tags
        #[arg(long)]
        cache: bool,
    },
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
        Commands::Index { index, force } => run_index(&index, force),
        Commands::Map { index, rules, peptides, tags, queries, json, cache } => {
            let mut all: Vec<String> = peptides;
            all.extend(tags);
            if let Some(path) = queries {
                all.extend(read_queries(&path)?);
            }
            run_map(&index, rules.as_deref(), &all, json, cache)
        }
    }
}

fn index_params(args: &IndexArgs) -> Result<IndexParams> {
    let fixed_variants = match &args.variants {
        Some(path) => {
            let f = std::fs::File::open(path).with_context(|| format!("cannot open variant table '{}'", path.display()))?;
            read_variants(std::io::BufReader::new(f))?
        }
        None => Vec::new(),
    };
    Ok(IndexParams {
        chunk_size: args.chunk_size,
        sampling_shift: args.sampling_shift,
        threads: args.threads,
        fixed_variants,
    })
}

fn run_index(args: &IndexArgs, force: bool) -> Result<()> {
    let params = index_params(args)?;
    let sidecar = FMIndex::sidecar_path(&args.fasta);
    if force && sidecar.exists() {
        std::fs::remove_file(&sidecar).with_context(|| format!("cannot remove '{}'", sidecar.display()))?;
    }
    let index = FMIndex::open(&args.fasta, &params, None)?;

    println!("reference: {}", args.fasta.display());
    println!("proteins: {}", index.protein_count());
    println!("decoys: {}", index.get_decoy_accessions().len());
    println!("shards: {}", index.shards().len());
    println!("index: {}", sidecar.display());
    Ok(())
}

fn read_queries(path: &Path) -> Result<Vec<String>> {
    let f = std::fs::File::open(path).with_context(|| format!("cannot open query file '{}'", path.display()))?;
    let mut out = Vec::new();
    for line in std::io::BufReader::new(f).lines() {
        let line = line?;
        let q = line.trim();
        if !q.is_empty() && !q.starts_with('#') {
            out.push(q.to_string());
        }
    }
    Ok(out)
}

fn run_map(args: &IndexArgs, rules: Option<&Path>, queries: &[String], json: bool, cache: bool) -> Result<()> {
    let rules = match rules {
        Some(path) => MatchingRules::from_json_file(path).with_context(|| format!("cannot load rules '{}'", path.display()))?,
        None => MatchingRules::default(),
    };
    let index = FMIndex::open(&args.fasta, &index_params(args)?, None)?;
    let mut engine = SearchEngine::new(rules);
    if cache {
        engine = engine.with_cache(Arc::new(ShardedTagCache::new()));
    }

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let mut total = 0usize;
    for q in queries {
        let hits: Vec<Mapping> = if q.contains('[') {
            let tag = Tag::parse(q, engine.rules()).with_context(|| format!("invalid tag '{q}'"))?;
            index.map_tag(&tag, &engine)
        } else {
            index.map_peptide(q, &engine)
        };
        total += hits.len();
        for m in &hits {
            if json {
                serde_json::to_writer(&mut out, m)?;
                writeln!(out)?;
            } else {
                writeln!(out, "{q}\t{m}")?;
            }
        }
    }
    out.flush()?;
    info!(queries = queries.len(), mappings = total, "mapping finished");
    Ok(())
}
