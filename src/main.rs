use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3cap::s3::{CollectBuckets, MultipartConfig, S3Client, DEFAULT_PART_SIZE};

#[derive(Parser)]
#[command(name = "s3cap")]
#[command(version, about = "Capability-style S3 client with a SigV4 signing proxy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Disable SSL certificate verification
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List buckets
    Ls,

    /// Show object metadata (HEAD)
    Stat {
        /// S3 path (s3://bucket/key)
        path: String,
    },

    /// Download an object to a local file
    Get {
        /// S3 path (s3://bucket/key)
        path: String,

        /// Destination file
        dest: String,
    },

    /// Upload a local file
    Put {
        /// Source file
        source: String,

        /// S3 path (s3://bucket/key)
        path: String,

        /// Part size in bytes for multipart uploads
        #[arg(long, default_value_t = DEFAULT_PART_SIZE)]
        part_size: usize,

        /// Maximum concurrent part uploads
        #[arg(long, default_value_t = 1)]
        max_inflight: usize,
    },

    /// Delete an object
    Rm {
        /// S3 path (s3://bucket/key)
        path: String,
    },

    /// Run the signing proxy front-end
    Proxy {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8000")]
        listen: String,

        /// Upstream endpoint (defaults to the profile endpoint or the
        /// AWS service root for the configured region)
        #[arg(long)]
        upstream: Option<String>,
    },

    /// Run the in-memory S3 facade
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:9000")]
        listen: String,

        /// Buckets to pre-create
        #[arg(long)]
        bucket: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if cli.insecure {
        std::env::set_var("S3CAP_INSECURE_TLS", "true");
    }

    // One-shot commands run on a current-thread runtime; the servers get
    // the multi-thread runtime.
    let is_server = matches!(cli.command, Commands::Proxy { .. } | Commands::Serve { .. });

    let runtime = if is_server {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
    };

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // The in-memory facade needs no credentials
    if let Commands::Serve { listen, bucket } = &cli.command {
        let store = s3cap::mem::MemoryStore::new();
        for name in bucket {
            store.create_bucket(name);
        }
        let listener = tokio::net::TcpListener::bind(listen)
            .await
            .context(format!("Failed to bind to {}", listen))?;
        return s3cap::mem::server::serve(listener, store).await;
    }

    let config = s3cap::config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    let profile = config
        .get_profile(None)
        .context("No profile found in configuration")?;
    let client = S3Client::from_profile(profile);

    match cli.command {
        Commands::Ls => {
            let mut collected = CollectBuckets::default();
            client.list_buckets(&mut collected).await?;
            for name in collected.names {
                println!("{}", name);
            }
        }
        Commands::Stat { path } => {
            let (bucket, key) = parse_s3_path(&path)?;
            let headers = client.head_object(&bucket, &key).await?;
            for (name, value) in headers.iter() {
                println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
            }
        }
        Commands::Get { path, dest } => {
            let (bucket, key) = parse_s3_path(&path)?;
            let mut file = tokio::fs::File::create(&dest)
                .await
                .context(format!("Failed to create {}", dest))?;
            let output = client.get_object(&bucket, &key, None, &mut file).await?;
            if let Some(length) = output.length {
                tracing::info!(bytes = length, dest = %dest, "downloaded");
            }
        }
        Commands::Put {
            source,
            path,
            part_size,
            max_inflight,
        } => {
            let (bucket, key) = parse_s3_path(&path)?;
            let metadata = tokio::fs::metadata(&source)
                .await
                .context(format!("Failed to stat {}", source))?;

            let config = MultipartConfig::default()
                .with_part_size(part_size)
                .with_max_inflight(max_inflight);

            if (metadata.len() as usize) <= config.part_size {
                let data = tokio::fs::read(&source).await?;
                client.put_object(&bucket, &key, Bytes::from(data)).await?;
            } else {
                upload_multipart(&client, &bucket, &key, &source, config).await?;
            }
        }
        Commands::Rm { path } => {
            let (bucket, key) = parse_s3_path(&path)?;
            client.delete_object(&bucket, &key).await?;
        }
        Commands::Proxy { listen, upstream } => {
            let upstream = upstream
                .or_else(|| config.proxy.upstream.clone())
                .or_else(|| profile.endpoint.clone())
                .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", profile.region));

            let provider = std::sync::Arc::new(s3cap::auth::StaticCredentials::new(
                profile.access_key.clone(),
                profile.secret_key.clone(),
                profile.session_token.clone(),
            ));
            let proxy = s3cap::proxy::SigningProxy::new(provider, &profile.region);
            let server = s3cap::proxy::ProxyServer::new(proxy, upstream, listen);
            server.run().await?;
        }
        Commands::Serve { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Stream a local file through the multipart sink.
async fn upload_multipart(
    client: &S3Client,
    bucket: &str,
    key: &str,
    source: &str,
    config: MultipartConfig,
) -> Result<()> {
    use tokio::io::AsyncReadExt;

    let mut stream = client.start_multipart(bucket, key, config).await?;
    let upload_id = stream.upload_id().to_string();

    let file = tokio::fs::File::open(source).await?;
    let mut reader = tokio::io::BufReader::new(file);
    let mut chunk = vec![0u8; 1024 * 1024];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if let Err(e) = stream.write(&chunk[..n]).await {
            // Leave server-side cleanup to an explicit abort
            let _ = client.abort_multipart_upload(bucket, key, &upload_id).await;
            return Err(e.into());
        }
    }

    match stream.end().await {
        Ok(etag) => {
            tracing::info!(etag = %etag, "multipart upload complete");
            Ok(())
        }
        Err(e) => {
            let _ = client.abort_multipart_upload(bucket, key, &upload_id).await;
            Err(e.into())
        }
    }
}

/// Split `s3://bucket/key` into its parts.
fn parse_s3_path(path: &str) -> Result<(String, String)> {
    let stripped = path
        .strip_prefix("s3://")
        .context("S3 paths must start with s3://")?;
    match stripped.find('/') {
        Some(pos) if pos + 1 < stripped.len() => Ok((
            stripped[..pos].to_string(),
            stripped[pos + 1..].to_string(),
        )),
        _ => bail!("S3 path must name both a bucket and a key: {}", path),
    }
}
