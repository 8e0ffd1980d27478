use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

use stream_vault::config::{AppConfig, DEFAULT_CONFIG_PATH};
use stream_vault::constants::{generate_key_material, DEFAULT_STORE_NAME, SEGMENT_TABLE};
use stream_vault::credentials;
use stream_vault::db::StoreRegistry;
use stream_vault::ingest::{self, IngestRequest};
use stream_vault::serve;
use stream_vault::shard;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sharded HLS segment store, manifest and key server")]
struct Args {
    /// Path to config file (TOML format)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve manifests, keys and the ingestion API over HTTP
    Serve,
    /// Create key and segment shard tables
    InitSchema {
        /// Only this store (default: every configured store)
        #[arg(long)]
        store: Option<String>,
    },
    /// Store the segments and key described by a JSON ingestion request
    Ingest {
        /// JSON file with video_id, key, iv and ts_data
        #[arg(short, long)]
        file: PathBuf,

        /// Application whose store receives the video
        #[arg(long)]
        app: Option<String>,
    },
    /// Print the physical segment table of a video
    Route {
        #[arg(long)]
        video_id: String,

        /// Shard count (default: as configured for the default store)
        #[arg(long)]
        shards: Option<u32>,

        /// Logical table name
        #[arg(long, default_value = SEGMENT_TABLE)]
        base: String,
    },
    /// Print a random AES-128 key and IV, hex encoded
    Keygen,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Serve => serve::serve(AppConfig::load(&args.config)?),
        Command::InitSchema { store } => init_schema(&args.config, store),
        Command::Ingest { file, app } => ingest_file(&args.config, &file, app),
        Command::Route {
            video_id,
            shards,
            base,
        } => {
            let shards = match shards {
                Some(n) => n,
                None => AppConfig::load(&args.config)?
                    .database
                    .get(DEFAULT_STORE_NAME)
                    .map(|db| db.sharding_num(&base))
                    .unwrap_or(0),
            };
            println!("{}", shard::route(&video_id, shards, &base));
            Ok(())
        }
        Command::Keygen => {
            let (key, iv) = generate_key_material();
            println!("key = {}", key);
            println!("iv  = {}", iv);
            Ok(())
        }
    }
}

fn open_registry(
    rt: &tokio::runtime::Runtime,
    config: &AppConfig,
) -> Result<StoreRegistry, Box<dyn std::error::Error>> {
    let creds = credentials::load_credentials().map_err(|e| e.to_string())?;
    Ok(rt.block_on(StoreRegistry::open(config, &creds))?)
}

fn init_schema(config_path: &Path, store: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(config_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    let registry = open_registry(&rt, &config)?;
    let result = rt.block_on(registry.init_schema(store.as_deref()));
    rt.block_on(registry.close());
    result?;
    println!("Schema ready for: {}", store.as_deref().unwrap_or("all stores"));
    Ok(())
}

fn ingest_file(
    config_path: &Path,
    file: &Path,
    app: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(config_path)?;
    let content = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read ingestion file '{}': {}", file.display(), e))?;
    let request: IngestRequest = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse ingestion file '{}': {}", file.display(), e))?;

    let rt = tokio::runtime::Runtime::new()?;
    let registry = open_registry(&rt, &config)?;
    let request_id = uuid::Uuid::new_v4().to_string();
    let result = rt.block_on(async {
        registry.init_schema(None).await?;
        ingest::ingest(&registry, app.as_deref(), &request, &request_id).await
    });
    rt.block_on(registry.close());
    let stored = result?;
    info!("Ingested {} segment(s) for video {}", stored, request.video_id);
    println!("{} segment(s) stored for {}", stored, request.video_id);
    Ok(())
}
