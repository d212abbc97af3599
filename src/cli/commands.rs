//! Command execution.

use super::{Cli, Commands, FsCommands, MdsCommands, QuotaCommands};
use crate::client::MdsClient;
use crate::config::ClientConfig;
use crate::error::{most_important, CmdError, Result};
use crate::output::{self, format_bytes, format_limit, OutputFormat};
use crate::types::{FsId, FsInfo, PartitionPolicy, Quota};
use crate::walker::TraversalSummary;
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Serialize, Tabled)]
struct NodeRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Address")]
    addr: String,
    #[tabled(rename = "Status Address")]
    dummy_addr: String,
    #[tabled(rename = "Role")]
    role: String,
}

#[derive(Debug, Serialize, Tabled)]
struct FsRow {
    #[tabled(rename = "FsId")]
    fs_id: FsId,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Epoch")]
    epoch: u64,
    #[tabled(rename = "Partition")]
    partition: String,
    #[tabled(rename = "Capacity")]
    capacity: String,
    #[tabled(rename = "Owner")]
    owner: String,
}

impl From<FsInfo> for FsRow {
    fn from(info: FsInfo) -> Self {
        let partition = match &info.partition_policy {
            PartitionPolicy::Mono { mds_id } => format!("mono(mds {})", mds_id),
            PartitionPolicy::ParentIdHash {
                bucket_num,
                distributions,
            } => format!("hash({} buckets, {} mds)", bucket_num, distributions.len()),
        };
        Self {
            fs_id: info.fs_id,
            name: info.fs_name,
            epoch: info.epoch,
            partition,
            capacity: format_limit(info.capacity, true),
            owner: info.owner,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct RouteRow {
    #[tabled(rename = "Inode")]
    inode: u64,
    #[tabled(rename = "MDS")]
    mds_id: u64,
    #[tabled(rename = "Address")]
    addr: String,
}

#[derive(Debug, Serialize, Tabled)]
struct SummaryRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Length")]
    length: String,
    #[tabled(rename = "Entries")]
    entries: u64,
}

impl SummaryRow {
    fn new(path: &str, summary: TraversalSummary) -> Self {
        Self {
            path: path.to_string(),
            length: format_bytes(summary.length),
            entries: summary.entries,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct QuotaRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Max Bytes")]
    max_bytes: String,
    #[tabled(rename = "Used Bytes")]
    used_bytes: i64,
    #[tabled(rename = "Max Inodes")]
    max_inodes: String,
    #[tabled(rename = "Used Inodes")]
    used_inodes: i64,
}

impl QuotaRow {
    fn new(target: String, quota: Quota) -> Self {
        Self {
            target,
            max_bytes: format_limit(quota.max_bytes, true),
            used_bytes: quota.used_bytes,
            max_inodes: format_limit(quota.max_inodes, false),
            used_inodes: quota.used_inodes,
        }
    }
}

/// Run the parsed command.
pub async fn execute(cli: Cli, config: ClientConfig) -> Result<()> {
    let client = MdsClient::new(config)?;
    let format = cli.format;

    match cli.command {
        Commands::Mds {
            command: MdsCommands::List,
        } => list_mds(&client, format).await,
        Commands::Fs { command } => match command {
            FsCommands::Info { fs_ids, name } => fs_info(&client, &fs_ids, name, format).await,
            FsCommands::Route { fs_id, inodes } => {
                let mut rows = Vec::with_capacity(inodes.len());
                for inode in inodes {
                    let (_, node) = client.route(fs_id, inode).await?;
                    rows.push(RouteRow {
                        inode,
                        mds_id: node.id,
                        addr: node.addr,
                    });
                }
                output::print_output(&rows, format)
            }
            FsCommands::Usage { fs_id, path, dedup } => {
                let summary = client.usage(fs_id, &path, dedup).await.map_err(|e| {
                    let partial = e.partial;
                    e.error.context(format!(
                        "usage of {} stopped after {} entries",
                        path, partial.entries
                    ))
                })?;
                output::print_output(&[SummaryRow::new(&path, summary)], format)
            }
            FsCommands::Rm { fs_id, path } => {
                let removed = client.remove_recursive(fs_id, &path).await.map_err(|e| {
                    let partial = e.partial;
                    e.error.context(format!(
                        "removing {} stopped after {} entries",
                        path, partial.entries
                    ))
                })?;
                match format {
                    OutputFormat::Table => {
                        output::success(format!("removed {} ({} entries)", path, removed.entries));
                        Ok(())
                    }
                    OutputFormat::Json => output::print_output(&[SummaryRow::new(&path, removed)], format),
                }
            }
        },
        Commands::Quota { command } => match command {
            QuotaCommands::Get { fs_id, path } => {
                let row = match path {
                    Some(path) => {
                        let dir = client.lookup_path(fs_id, &path).await?;
                        QuotaRow::new(path, client.dir_quota(fs_id, dir.inode).await?)
                    }
                    None => QuotaRow::new(format!("fsid {}", fs_id), client.fs_quota(fs_id).await?),
                };
                output::print_output(&[row], format)
            }
            QuotaCommands::Set {
                fs_id,
                path,
                capacity,
                inodes,
            } => {
                if capacity.is_none() && inodes.is_none() {
                    return Err(CmdError::internal("nothing to set: pass --capacity or --inodes"));
                }
                let target = match path {
                    Some(path) => {
                        let dir = client.lookup_path(fs_id, &path).await?;
                        client.set_dir_quota(fs_id, dir.inode, capacity, inodes).await?;
                        path
                    }
                    None => {
                        client.set_fs_quota(fs_id, capacity, inodes).await?;
                        format!("fsid {}", fs_id)
                    }
                };
                output::success(format!("quota of {} updated", target));
                Ok(())
            }
        },
    }
}

async fn list_mds(client: &MdsClient, format: OutputFormat) -> Result<()> {
    let statuses = client.mds_status().await?;
    let rows: Vec<NodeRow> = statuses
        .into_iter()
        .map(|s| NodeRow {
            id: s.node.id,
            addr: s.node.addr,
            dummy_addr: s.node.dummy_addr.unwrap_or_else(|| "-".to_string()),
            role: match s.role {
                Ok(role) => role.to_string(),
                Err(e) => format!("unknown ({})", e.code()),
            },
        })
        .collect();
    output::print_output(&rows, format)
}

/// Descriptors for several filesystems. Printed rows cover the ones that
/// answered; the most important failure decides the outcome.
async fn fs_info(
    client: &MdsClient,
    fs_ids: &[FsId],
    name: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    if let Some(name) = name {
        let info = client.fs_info_by_name(&name).await?;
        return output::print_output(&[FsRow::from(info)], format);
    }

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for result in client.fs_infos(fs_ids).await {
        match result {
            Ok(info) => rows.push(FsRow::from(info)),
            Err(e) => {
                output::error(&e);
                errors.push(e);
            }
        }
    }
    output::print_output(&rows, format)?;
    most_important(&errors).into_result()
}
