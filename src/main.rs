//! CLI entry point for the graphdrive tool.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use futures_util::TryStreamExt;
use graphdrive_core::{BackendError, BackendOptions, GraphBackend};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(command = ?args.command, "CLI arguments parsed");

    if args.command == Command::Options {
        print_supported_options();
        return Ok(());
    }

    let url = args
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("a connection URL is required (--url onedrivev2://<folder>)"))?;
    let backend = GraphBackend::new(url, &args.backend_options())?;
    let cancel = backend.shutdown_token();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let result = run(&backend, &args.command, &cancel).await;
    backend.dispose();

    if let Err(error) = &result
        && let Some(BackendError::FolderMissing { path, .. }) = error.downcast_ref::<BackendError>()
    {
        eprintln!("hint: folder `{path}` does not exist, create it with `graphdrive --url {url} mkdir`");
    }
    result
}

async fn run(backend: &GraphBackend, command: &Command, cancel: &CancellationToken) -> Result<()> {
    match command {
        Command::List => {
            let mut files = std::pin::pin!(backend.list());
            let mut count = 0usize;
            while let Some(file) = files.try_next().await? {
                println!(
                    "{}\t{}\t{}",
                    file.last_modified.to_rfc3339(),
                    file.size,
                    file.name
                );
                count += 1;
            }
            info!(files = count, "listing complete");
        }
        Command::Get { remote, local } => {
            let bytes = backend.fetch_to_file(remote, local).await?;
            info!(remote = %remote, local = %local.display(), bytes, "downloaded");
        }
        Command::Put { local, remote } => {
            let name = match remote {
                Some(name) => name.clone(),
                None => default_remote_name(local)?,
            };
            backend.store_file(&name, local, cancel).await?;
            info!(remote = %name, local = %local.display(), "uploaded");
        }
        Command::Delete { remote } => backend.delete(remote).await?,
        Command::Rename { old, new } => backend.rename(old, new).await?,
        Command::Mkdir => backend.create_folder().await?,
        Command::Quota => match backend.quota().await? {
            Some(quota) => println!("total\t{}\nremaining\t{}", quota.total, quota.remaining),
            None => println!("quota unknown"),
        },
        Command::Test => {
            backend.test_connectivity().await?;
            println!("ok\t{}", backend.root());
        }
        Command::Endpoints => {
            for host in backend.discover_network_endpoints().await? {
                println!("{host}");
            }
        }
        Command::Options => print_supported_options(),
    }
    Ok(())
}

fn default_remote_name(local: &Path) -> Result<String> {
    local
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive a remote name from {}", local.display()))
}

fn print_supported_options() {
    for option in BackendOptions::supported_options() {
        match option.default {
            Some(default) => println!("{}\t{} (default: {default})", option.key, option.description),
            None => println!("{}\t{}", option.key, option.description),
        }
    }
}
