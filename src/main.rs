use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

use tdms2csv::config::Config;
use tdms2csv::logging;
use tdms2csv::pipeline::{self, UploadedFile};
use tdms2csv::server;
use tdms2csv::storage::JobStore;

#[derive(Parser)]
#[command(name = "tdms2csv")]
#[command(about = "Converts TDMS measurement files into CSV archives")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP conversion service
    Serve {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Convert local TDMS files without starting the server
    Convert {
        /// TDMS files to convert
        files: Vec<PathBuf>,
        /// Directory receiving the job output
        #[arg(long, default_value = "output")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            server::start_server(&config).await?;
        }
        Commands::Convert { files, output } => {
            let store = JobStore::new(&output)?;
            let mut batch = Vec::with_capacity(files.len());
            for path in &files {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("invalid file path: {}", path.display()))?;
                batch.push(UploadedFile::new(name, std::fs::read(path)?));
            }
            match pipeline::convert_batch(&store, &batch) {
                Ok(archive) => {
                    let path = store
                        .root()
                        .join(&archive.job_id)
                        .join(&archive.archive_name);
                    println!("✅ Converted {} file(s): {}", archive.entries, path.display());
                }
                Err(e) => {
                    error!("Conversion failed: {e}");
                    println!("❌ Conversion failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}
