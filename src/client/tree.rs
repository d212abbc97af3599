//! Walker plumbing backed by the metadata client.

use super::MdsClient;
use crate::error::Result;
use crate::types::{Dentry, FsId};
use crate::walker::{DirectorySource, SummaryDelta, Visitor};
use async_trait::async_trait;

/// Directory listings of one filesystem.
pub struct FsTree {
    client: MdsClient,
    fs_id: FsId,
}

impl FsTree {
    pub fn new(client: MdsClient, fs_id: FsId) -> Self {
        Self { client, fs_id }
    }
}

#[async_trait]
impl DirectorySource for FsTree {
    async fn list_children(&self, dir: &Dentry) -> Result<Vec<Dentry>> {
        self.client.list_dentry(self.fs_id, dir.inode).await
    }
}

/// Sums file lengths; every file and directory counts as one entry.
pub struct UsageVisitor {
    client: MdsClient,
    fs_id: FsId,
}

impl UsageVisitor {
    pub fn new(client: MdsClient, fs_id: FsId) -> Self {
        Self { client, fs_id }
    }
}

#[async_trait]
impl Visitor for UsageVisitor {
    async fn visit_leaf(&self, entry: &Dentry) -> Result<SummaryDelta> {
        let attr = self.client.get_inode(self.fs_id, entry.inode).await?;
        Ok(SummaryDelta::new(attr.length, 1))
    }

    async fn leave_dir(&self, _dir: &Dentry) -> Result<SummaryDelta> {
        Ok(SummaryDelta::new(0, 1))
    }
}

/// Unlinks files and removes directories once they are empty.
pub struct RemoveVisitor {
    client: MdsClient,
    fs_id: FsId,
}

impl RemoveVisitor {
    pub fn new(client: MdsClient, fs_id: FsId) -> Self {
        Self { client, fs_id }
    }
}

#[async_trait]
impl Visitor for RemoveVisitor {
    async fn visit_leaf(&self, entry: &Dentry) -> Result<SummaryDelta> {
        self.client.unlink(self.fs_id, entry.parent, &entry.name).await?;
        Ok(SummaryDelta::new(0, 1))
    }

    async fn leave_dir(&self, dir: &Dentry) -> Result<SummaryDelta> {
        self.client
            .remove_directory(self.fs_id, dir.parent, &dir.name)
            .await?;
        Ok(SummaryDelta::new(0, 1))
    }
}
