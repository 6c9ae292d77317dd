//! feedfetch CLI
//!
//! Usage:
//!   feedfetch get <url> <out>                     Fetch one feed to a file
//!   feedfetch put <store> <key> <file>            Upload a file
//!   feedfetch ls <store> [prefix]                 List keys
//!   feedfetch presign <store> <key>               Print a signed read URL
//!   feedfetch sync-down <store> <prefix> <dir>    Download a prefix
//!   feedfetch sync-up <dir> <store> <prefix>      Upload a directory

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use feedfetch::{
    authenticated_request_to_file, create_signed_url, download_all, open_store_with_secret, upload_all, AuthType,
    Context, FeedAuthorization, FetchConfig, Request, Secret,
};

#[derive(Parser)]
#[command(
    name = "feedfetch",
    about = "Authenticated feed retrieval over HTTP, FTP, S3, Azure Blob and local storage",
    version
)]
struct Cli {
    /// JSON file with credentials (key, username, password, aws_*, azure_*)
    #[arg(long, global = true)]
    secret_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL to a local file
    Get {
        url: String,
        out: PathBuf,
        /// none, query_param, path_segment, header, basic_auth or replace_url
        #[arg(long, default_value = "none")]
        auth_type: String,
        #[arg(long, default_value = "")]
        param_name: String,
        /// Maximum body size in bytes (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_size: u64,
        #[arg(long)]
        allow_ftp: bool,
        #[arg(long)]
        allow_s3: bool,
        #[arg(long)]
        allow_local: bool,
    },
    /// Upload a local file to a store
    Put { store: String, key: String, file: PathBuf },
    /// List keys in a store
    Ls {
        store: String,
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Create a presigned read URL
    Presign {
        store: String,
        key: String,
        /// Attachment file name (default: last key segment)
        #[arg(long, default_value = "")]
        filename: String,
    },
    /// Download everything under a prefix
    SyncDown { store: String, prefix: String, dir: PathBuf },
    /// Upload everything under a directory
    SyncUp { dir: PathBuf, store: String, prefix: String },
}

fn load_secret(path: Option<&Path>) -> Result<Option<Secret>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let secret = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(secret))
}

async fn run(cli: Cli) -> Result<()> {
    let secret = load_secret(cli.secret_file.as_deref())?;
    let config = FetchConfig::from_env();
    let ctx = Context::background();

    match cli.command {
        Commands::Get {
            url,
            out,
            auth_type,
            param_name,
            max_size,
            allow_ftp,
            allow_s3,
            allow_local,
        } => {
            let request = Request::new(url)
                .allow_ftp(allow_ftp)
                .allow_s3(allow_s3)
                .allow_local(allow_local)
                .max_size(max_size)
                .secret(secret.unwrap_or_default())
                .auth(FeedAuthorization::new(AuthType::from(auth_type), param_name));
            let result = authenticated_request_to_file(&ctx, &out, &request, &config).await?;
            if let Some(err) = result.fetch_error {
                bail!("fetch of {} failed (status {}): {}", result.url, result.response_code, err);
            }
            println!(
                "{}\t{}\t{}\t{}ms",
                result.response_code, result.response_size, result.response_sha1, result.fetch_time_ms
            );
        }
        Commands::Put { store, key, file } => {
            let bucket = open_store_with_secret(&store, secret.as_ref())?;
            let reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            bucket.upload(&ctx, &key, Box::pin(reader)).await?;
            println!("{}", key);
        }
        Commands::Ls { store, prefix } => {
            let bucket = open_store_with_secret(&store, secret.as_ref())?;
            for key in bucket.list_keys(&ctx, &prefix).await? {
                println!("{}", key);
            }
        }
        Commands::Presign { store, key, filename } => {
            let bucket = open_store_with_secret(&store, secret.as_ref())?;
            println!("{}", create_signed_url(&ctx, bucket.as_ref(), &key, &filename).await?);
        }
        Commands::SyncDown { store, prefix, dir } => {
            let bucket = open_store_with_secret(&store, secret.as_ref())?;
            for key in download_all(&ctx, bucket.as_ref(), &prefix, &dir, |_| true).await? {
                println!("{}", key);
            }
        }
        Commands::SyncUp { dir, store, prefix } => {
            let bucket = open_store_with_secret(&store, secret.as_ref())?;
            for key in upload_all(&ctx, bucket.as_ref(), &dir, &prefix, |_| true).await? {
                println!("{}", key);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedfetch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
