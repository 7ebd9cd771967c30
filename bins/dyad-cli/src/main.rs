use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dyad_core::{ConsumeOutcome, DyadConfig, ManagedContext, ProduceOutcome};
use dyad_kvs::RemoteStore;
use dyad_utils::{create_directory_tree, write_file_atomic, STAGING_DIR_MODE};

/// Publish and fetch files through a dyad broker.
#[derive(Parser, Debug)]
#[command(name = "dyad-cli", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "DYAD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a file this participant finished writing.
    Produce { file: PathBuf },
    /// Wait for a file and fetch it if it lives elsewhere.
    Consume { file: PathBuf },
    /// Write `data{seed}.txt`: ten little-endian i32 values starting at seed*10.
    Generate {
        #[arg(long)]
        seed: i32,
        #[arg(long)]
        dir: PathBuf,
    },
    /// Print the default configuration.
    DumpConfig,
}

fn generated_contents(seed: i32) -> Vec<u8> {
    let start = seed.wrapping_mul(10);
    (0..10).flat_map(|i: i32| start.wrapping_add(i).to_le_bytes()).collect()
}

fn generate(seed: i32, dir: &Path) -> anyhow::Result<PathBuf> {
    create_directory_tree(dir, STAGING_DIR_MODE)?;
    let path = dir.join(format!("data{}.txt", seed));
    write_file_atomic(&path, &generated_contents(seed))?;
    Ok(path)
}

async fn context(config: DyadConfig) -> anyhow::Result<ManagedContext> {
    let store = RemoteStore::new(
        config.participant(),
        config.broker_address()?,
        config.service_address()?,
    );
    Ok(ManagedContext::init(config, Arc::new(store)).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DyadConfig::load(path)?,
        None => DyadConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    config.log = std::mem::take(&mut config.log).with_debug(cli.verbose);
    let _guard = dyad_logging::init_logging(&config.log)?;

    match cli.command {
        Command::DumpConfig => print!("{}", config.to_toml_string()?),
        Command::Generate { seed, dir } => {
            let path = generate(seed, &dir)?;
            println!("{}", path.display());
        }
        Command::Produce { file } => {
            let ctx = context(config).await?;
            let outcome = ctx.produce(&file).await;
            ctx.finalize().await?;
            match outcome? {
                ProduceOutcome::Published { key } => println!("published {} as {}", file.display(), key),
                ProduceOutcome::NotManaged => println!("{} is not under the producer path", file.display()),
            }
        }
        Command::Consume { file } => {
            let ctx = context(config).await?;
            let outcome = ctx.consume(&file).await;
            ctx.finalize().await?;
            match outcome? {
                ConsumeOutcome::NotManaged => println!("{} is not under the consumer path", file.display()),
                ConsumeOutcome::Local { owner } => println!("{} is local (owner {})", file.display(), owner),
                ConsumeOutcome::SharedDevice { owner } => {
                    println!("{} is on a device shared with {}", file.display(), owner)
                }
                ConsumeOutcome::Fetched { owner, bytes } => {
                    println!("fetched {} bytes of {} from {}", bytes, file.display(), owner)
                }
            }
        }
    }
    Ok(())
}
