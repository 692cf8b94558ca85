//! CLI argument definitions using clap derive macros.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Move backup volumes to and from a Microsoft Graph drive.
///
/// The connection URL names the backend root, e.g.
/// `onedrivev2://backups/laptop` stores under `/backups/laptop`.
#[derive(Parser, Debug)]
#[command(name = "graphdrive")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Connection URL of the backend root
    #[arg(short = 'u', long, global = true)]
    pub url: Option<String>,

    /// Bearer credential (overrides `-o authid=...`)
    #[arg(long, global = true)]
    pub authid: Option<String>,

    /// Backend option as key=value (repeatable, see `graphdrive options`)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_key_value, global = true)]
    pub options: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Command,
}

/// Backend operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List files under the root
    List,
    /// Download a remote file
    Get {
        /// Remote name, relative to the root
        remote: String,
        /// Local destination path
        local: PathBuf,
    },
    /// Upload a local file
    Put {
        /// Local source path
        local: PathBuf,
        /// Remote name (defaults to the local file name)
        remote: Option<String>,
    },
    /// Delete a remote file
    Delete {
        /// Remote name
        remote: String,
    },
    /// Rename a remote file
    Rename {
        /// Current name
        old: String,
        /// New name
        new: String,
    },
    /// Create the root folder path
    Mkdir,
    /// Show drive quota
    Quota,
    /// Check that the root folder is reachable
    Test,
    /// Show the host names used by this backend
    Endpoints,
    /// List supported backend options
    Options,
}

impl Args {
    /// Flat option map handed to the backend; `--authid` wins over `-o authid=`.
    #[must_use]
    pub fn backend_options(&self) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = self.options.iter().cloned().collect();
        if let Some(authid) = &self.authid {
            map.insert("authid".to_string(), authid.clone());
        }
        map
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty option key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
