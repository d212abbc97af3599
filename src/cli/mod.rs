//! Command-line interface for mdsctl.

mod commands;

pub use self::commands::execute;

use crate::config::humantime_serde::parse_duration;
use crate::config::ConfigOverrides;
use crate::output::OutputFormat;
use crate::types::{FsId, InodeId};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// mdsctl - administer a sharded metadata-server cluster.
#[derive(Parser, Debug)]
#[command(name = "mdsctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, env = "MDSCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// MDS addresses, comma separated (host:port)
    #[arg(long = "mds-addr", env = "MDSCTL_MDS_ADDRS", value_delimiter = ',')]
    pub mds_addrs: Vec<String>,

    /// Per-call timeout (e.g. 500ms, 3s)
    #[arg(long, env = "MDSCTL_TIMEOUT", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Retries per address
    #[arg(long, env = "MDSCTL_RETRY_TIMES")]
    pub retry_times: Option<u32>,

    /// Pause between retries
    #[arg(long, env = "MDSCTL_RETRY_DELAY", value_parser = parse_duration)]
    pub retry_delay: Option<Duration>,

    /// Concurrent directory expansions for tree walks
    #[arg(long, env = "MDSCTL_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "MDSCTL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Report retries and per-address failures
    #[arg(long)]
    pub diagnostics: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// MDS cluster commands
    Mds {
        #[command(subcommand)]
        command: MdsCommands,
    },

    /// Filesystem commands
    Fs {
        #[command(subcommand)]
        command: FsCommands,
    },

    /// Quota commands
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum MdsCommands {
    /// List MDS nodes and their roles
    List,
}

#[derive(Subcommand, Debug)]
pub enum FsCommands {
    /// Show filesystem descriptors
    Info {
        /// Filesystem ids, comma separated
        #[arg(long = "fsid", value_delimiter = ',', required_unless_present = "name")]
        fs_ids: Vec<FsId>,

        /// Filesystem name
        #[arg(long, conflicts_with = "fs_ids")]
        name: Option<String>,
    },

    /// Show which MDS node owns an inode
    Route {
        #[arg(long = "fsid")]
        fs_id: FsId,

        /// Inode ids, comma separated
        #[arg(long = "inode", value_delimiter = ',', required = true)]
        inodes: Vec<InodeId>,
    },

    /// Sum file lengths and count entries under a path
    Usage {
        #[arg(long = "fsid")]
        fs_id: FsId,

        #[arg(default_value = "/")]
        path: String,

        /// Count hard-linked files once
        #[arg(long)]
        dedup: bool,
    },

    /// Remove a path recursively
    Rm {
        #[arg(long = "fsid")]
        fs_id: FsId,

        path: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum QuotaCommands {
    /// Show a filesystem or directory quota
    Get {
        #[arg(long = "fsid")]
        fs_id: FsId,

        /// Directory path; the filesystem quota when absent
        #[arg(long)]
        path: Option<String>,
    },

    /// Change a filesystem or directory quota
    Set {
        #[arg(long = "fsid")]
        fs_id: FsId,

        /// Directory path; the filesystem quota when absent
        #[arg(long)]
        path: Option<String>,

        /// Byte limit (0 = unlimited)
        #[arg(long)]
        capacity: Option<u64>,

        /// Inode limit (0 = unlimited)
        #[arg(long)]
        inodes: Option<u64>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Flag and environment values that override the config file.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            mds_addrs: (!self.mds_addrs.is_empty()).then(|| self.mds_addrs.clone()),
            timeout: self.timeout,
            retry_times: self.retry_times,
            retry_delay: self.retry_delay,
            max_concurrency: self.max_concurrency,
            log_level: self.log_level.clone(),
            show_diagnostics: self.diagnostics,
            json_logs: self.json_logs,
        }
    }
}
