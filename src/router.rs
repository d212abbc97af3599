//! Shard routing: which MDS node owns an inode.
//!
//! A [`ShardRouter`] is built from the node list and the filesystem's
//! [`PartitionPolicy`]. With the hash policy the owning bucket is
//! `id % bucket_num`; with the mono policy one node owns everything. The
//! router is never patched in place. When the filesystem epoch changes the
//! caller rebuilds it, which [`RouterRegistry::ensure`] does per fsid.

use crate::error::{CmdError, Result};
use crate::types::{Epoch, FsId, InodeId, MdsId, MdsNode, PartitionPolicy};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
enum Assignment {
    Empty,
    Mono(MdsNode),
    Hash { buckets: Vec<MdsNode> },
}

/// Maps identifiers to the MDS node responsible for them.
#[derive(Debug)]
pub struct ShardRouter {
    assignment: RwLock<Assignment>,
}

impl Default for ShardRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardRouter {
    pub fn new() -> Self {
        Self {
            assignment: RwLock::new(Assignment::Empty),
        }
    }

    /// Build a router in one step.
    pub fn build(nodes: &[MdsNode], policy: &PartitionPolicy) -> Result<Self> {
        let router = Self::new();
        router.init(nodes, policy)?;
        Ok(router)
    }

    /// Replace the assignment. On error the previous assignment is kept.
    pub fn init(&self, nodes: &[MdsNode], policy: &PartitionPolicy) -> Result<()> {
        let by_id: HashMap<MdsId, &MdsNode> = nodes.iter().map(|n| (n.id, n)).collect();
        let lookup = |id: MdsId| {
            by_id.get(&id).map(|n| (*n).clone()).ok_or_else(|| {
                CmdError::internal(format!("partition policy references unknown mds {}", id))
            })
        };

        let assignment = match policy {
            PartitionPolicy::Mono { mds_id } => Assignment::Mono(lookup(*mds_id)?),
            PartitionPolicy::ParentIdHash {
                bucket_num,
                distributions,
            } => {
                if *bucket_num == 0 {
                    return Err(CmdError::internal("partition policy has zero buckets"));
                }
                // Every bucket needs an owner, so the assigned buckets bound
                // the table size before anything is allocated.
                let assigned: usize = distributions.values().map(BTreeSet::len).sum();
                let bucket_count = usize::try_from(*bucket_num)
                    .ok()
                    .filter(|&n| n <= assigned)
                    .ok_or_else(|| {
                        CmdError::internal(format!(
                            "partition policy declares {} buckets but assigns {}",
                            bucket_num, assigned
                        ))
                    })?;
                let mut slots: Vec<Option<MdsNode>> = vec![None; bucket_count];
                for (mds_id, buckets) in distributions {
                    let node = lookup(*mds_id)?;
                    for &bucket in buckets {
                        let slot = slots.get_mut(bucket as usize).ok_or_else(|| {
                            CmdError::internal(format!(
                                "bucket {} of mds {} out of range 0..{}",
                                bucket, mds_id, bucket_num
                            ))
                        })?;
                        *slot = Some(node.clone());
                    }
                }
                let buckets = slots
                    .into_iter()
                    .enumerate()
                    .map(|(bucket, node)| {
                        node.ok_or_else(|| {
                            CmdError::internal(format!("bucket {} has no owner", bucket))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Assignment::Hash { buckets }
            }
        };

        debug!(policy = policy.name(), nodes = nodes.len(), "Built shard router");
        *self.assignment.write() = assignment;
        Ok(())
    }

    /// Owner of `id`, or `None` before a successful `init`.
    pub fn route(&self, id: InodeId) -> Option<MdsNode> {
        match &*self.assignment.read() {
            Assignment::Empty => None,
            Assignment::Mono(node) => Some(node.clone()),
            Assignment::Hash { buckets } => {
                let bucket = (id % buckets.len() as u64) as usize;
                buckets.get(bucket).cloned()
            }
        }
    }
}

/// One router per filesystem, rebuilt when the epoch moves.
#[derive(Debug, Default)]
pub struct RouterRegistry {
    routers: RwLock<HashMap<FsId, (Epoch, Arc<ShardRouter>)>>,
}

impl RouterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router for `fs_id` at `epoch`, building it if missing or stale.
    pub fn ensure(
        &self,
        fs_id: FsId,
        epoch: Epoch,
        nodes: &[MdsNode],
        policy: &PartitionPolicy,
    ) -> Result<Arc<ShardRouter>> {
        if let Some((cached, router)) = self.routers.read().get(&fs_id) {
            if *cached == epoch {
                return Ok(Arc::clone(router));
            }
        }

        let router = Arc::new(ShardRouter::build(nodes, policy)?);
        debug!(fs_id, epoch, "Rebuilt router for new epoch");
        self.routers
            .write()
            .insert(fs_id, (epoch, Arc::clone(&router)));
        Ok(router)
    }

    pub fn get(&self, fs_id: FsId) -> Option<(Epoch, Arc<ShardRouter>)> {
        self.routers
            .read()
            .get(&fs_id)
            .map(|(epoch, router)| (*epoch, Arc::clone(router)))
    }

    pub fn invalidate(&self, fs_id: FsId) {
        self.routers.write().remove(&fs_id);
    }
}
