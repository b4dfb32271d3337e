//! rollzk-bench: drive the rollzk pipeline over a synthetic transfer batch.
//!
//! Commands:
//!   run       — compile, lazify, set up, prove and verify one session
//!   compress  — report what lazification does to a batch of a given size
//!   prove     — re-prove an already set-up session N times and report throughput
//!   verify    — verify the proof stored for a session

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::OsRng;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use rollzk_core::pipeline::stats_of;
use rollzk_core::{Config, Session, TransferBatch};
use rollzk_cs::{lazify, HintRegistry};
use rollzk_groth16::groth16::{DecodePolicy, Encoding};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rollzk-bench", about = "rollzk pipeline test/benchmark utility")]
struct Cli {
    /// TOML configuration; defaults apply when the file does not exist.
    #[arg(short, long, default_value = "rollzk.toml")]
    config: PathBuf,

    /// Segment directory (overrides `[store] dir`).
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Session tag (overrides `[store] session`).
    #[arg(long)]
    session: Option<String>,

    /// Log level (overrides `[logging] level`).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every pipeline stage for one batch.
    Run {
        #[command(flatten)]
        batch: BatchArgs,

        /// Keep every constraint explicit.
        #[arg(long)]
        no_lazify: bool,

        /// Point encoding for key and proof segments.
        #[arg(long, value_enum)]
        encoding: Option<EncodingArg>,

        /// Skip subgroup checks when reading key segments back.
        #[arg(long)]
        unchecked: bool,

        /// Seed for setup and proof randomness; OS entropy when absent.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Compile a batch and report the effect of lazification.
    Compress {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Prove an already set-up session repeatedly.
    Prove {
        /// Number of proofs to roll.
        #[arg(short = 'n', long, default_value = "3")]
        count: u32,
    },

    /// Verify the stored proof of a session.
    Verify,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct BatchArgs {
    /// Number of transfers in the batch.
    #[arg(short, long, default_value = "1024")]
    transfers: usize,

    /// Fee charged per transfer.
    #[arg(long, default_value = "1")]
    fee: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum EncodingArg {
    Raw,
    Compressed,
}

impl From<EncodingArg> for Encoding {
    fn from(e: EncodingArg) -> Self {
        match e {
            EncodingArg::Raw => Encoding::Raw,
            EncodingArg::Compressed => Encoding::Compressed,
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("failed to load config from {:?}", cli.config))?
    } else {
        Config::default()
    };
    if let Some(dir) = &cli.dir {
        config.store.dir = dir.clone();
    }
    if let Some(session) = &cli.session {
        config.store.session = session.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

fn init_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true);
    match config.logging.format.as_deref() {
        Some("compact") => builder.compact().init(),
        _ => builder.init(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    init_logging(&config);

    match cli.command {
        Commands::Run {
            batch,
            no_lazify,
            encoding,
            unchecked,
            seed,
        } => {
            if no_lazify {
                config.lazify.enabled = false;
            }
            if let Some(e) = encoding {
                config.codec.encoding = e.into();
            }
            if unchecked {
                config.codec.decode = DecodePolicy::Unchecked;
            }
            let mut rng = match seed {
                Some(seed) => XorShiftRng::seed_from_u64(seed),
                None => XorShiftRng::from_rng(OsRng).context("failed to seed rng")?,
            };

            let circuit = TransferBatch::new(batch.transfers, batch.fee);
            info!(transfers = batch.transfers, fee = batch.fee, "building transfer batch");
            let cs = circuit.build()?;

            let mut session = Session::open(config)?;
            let report = session.run(cs, &circuit.inputs(), &mut rng)?;
            println!("=== Session Report ===");
            println!("{report}");
        }

        Commands::Compress { batch } => {
            let circuit = TransferBatch::new(batch.transfers, batch.fee);
            let mut cs = circuit.build()?;
            let before = stats_of(&cs);

            let start = Instant::now();
            let report = lazify(&mut cs, &config.lazify.to_lazify_config());
            let elapsed = start.elapsed();
            let after = stats_of(&cs);

            let solved = rollzk_cs::solve(&cs, &circuit.inputs(), &HintRegistry::with_defaults())
                .context("lazified batch failed to solve")?;
            if !solved.is_satisfied(&cs) {
                bail!("lazified batch is not satisfied");
            }

            println!("=== Compression ===");
            println!("transfers:     {}", batch.transfers);
            println!("constraints:   {}", after.nb_constraints);
            println!("explicit:      {} -> {}", before.nb_explicit, after.nb_explicit);
            println!("templates:     {}", report.templates_added);
            println!("compressed:    {}", report.compressed());
            println!(
                "system bytes:  {} -> {} ({:.1}x)",
                before.memory_bytes,
                after.memory_bytes,
                before.memory_bytes as f64 / after.memory_bytes.max(1) as f64
            );
            println!("lazify time:   {:.1}ms", elapsed.as_secs_f64() * 1000.0);
        }

        Commands::Prove { count } => {
            let mut session = Session::open(config)?;
            let batch_start = Instant::now();
            let mut times = Vec::with_capacity(count as usize);
            for i in 0..count {
                let start = Instant::now();
                let bytes = session.prove(&mut OsRng)?;
                let elapsed = start.elapsed();
                println!("[{}/{}] {} bytes in {:.2}s", i + 1, count, bytes, elapsed.as_secs_f64());
                times.push(elapsed.as_secs_f64());
            }

            let batch_elapsed = batch_start.elapsed();
            if !times.is_empty() {
                let avg = times.iter().sum::<f64>() / times.len() as f64;
                let min = times.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                println!();
                println!("=== Prove Summary ===");
                println!("total time:    {:.1}s", batch_elapsed.as_secs_f64());
                println!("prove time:    avg={:.2}s min={:.2}s max={:.2}s", avg, min, max);
                println!(
                    "throughput:    {:.3} proofs/min",
                    times.len() as f64 / batch_elapsed.as_secs_f64() * 60.0
                );
            }
        }

        Commands::Verify => {
            let mut session = Session::open(config)?;
            let ok = session.verify()?;
            println!("session {}: {}", session.session(), if ok { "valid" } else { "INVALID" });
            if !ok {
                bail!("proof did not verify");
            }
        }
    }

    Ok(())
}
