use camino::Utf8PathBuf;
use clap::Parser;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use tsumiki::{Config, Project, TsumikiError};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Task to run: `default` (or `watch`), `build` or `serve`.
    #[arg(index = 1, default_value = "default")]
    task: String,

    /// Project directory.
    #[arg(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Config file, `<root>/tsumiki.toml` when present otherwise.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Print the task graph and exit.
    #[arg(long)]
    list: bool,
}

fn init_logging() {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();
    run(args)?;
    Ok(())
}

fn run(args: Args) -> Result<(), TsumikiError> {
    let config = Config::load(args.root.clone(), args.config.as_deref())?;
    let project = Project::new(config);

    if args.list {
        print!("{}", project.graph()?);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(TsumikiError::RuntimeBuild)?;

    runtime.block_on(async {
        tokio::select! {
            result = project.run(&args.task) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                Ok(())
            }
        }
    })
}
