use std::collections::{BTreeMap, BTreeSet};

use crate::config::TopologyConfig;
use crate::error::CasResult;

/// Bucket of out-of-band backups (referential database dumps).
pub const BACKUP_BUCKET: &str = "backup";
/// File bucket of backups. Each backup file is its own archive.
pub const BACKUP_FILE_BUCKET: &str = "backup";

#[derive(Clone, Debug)]
struct FileBucket {
    bucket: String,
    containers: BTreeSet<String>,
}

/// Static file bucket ⇄ container mapping. No I/O.
#[derive(Clone, Debug)]
pub struct BucketTopologyHelper {
    file_buckets: BTreeMap<String, FileBucket>,
    container_to_file_bucket: BTreeMap<String, String>,
}

impl BucketTopologyHelper {
    pub fn new(config: &TopologyConfig) -> CasResult<Self> {
        config.validate()?;

        let mut file_buckets = BTreeMap::new();
        let mut container_to_file_bucket = BTreeMap::new();
        for (bucket, tenants) in &config.buckets {
            for (file_bucket, categories) in &config.file_buckets {
                let file_bucket_id = format!("{bucket}-{file_bucket}");
                let mut containers = BTreeSet::new();
                for tenant in tenants {
                    for category in categories {
                        let container = format!("{tenant}_{category}");
                        container_to_file_bucket.insert(container.clone(), file_bucket_id.clone());
                        containers.insert(container);
                    }
                }
                file_buckets.insert(
                    file_bucket_id,
                    FileBucket {
                        bucket: bucket.clone(),
                        containers,
                    },
                );
            }
        }
        Ok(Self {
            file_buckets,
            container_to_file_bucket,
        })
    }

    /// File buckets packed by a tar creator. The backup file bucket is not
    /// listed: it has no containers.
    pub fn list_file_bucket_ids(&self) -> impl Iterator<Item = &str> {
        self.file_buckets.keys().map(String::as_str)
    }

    /// Containers aggregated by a file bucket; empty if unknown.
    pub fn list_container_names(&self, file_bucket_id: &str) -> BTreeSet<String> {
        self.file_buckets
            .get(file_bucket_id)
            .map(|fb| fb.containers.clone())
            .unwrap_or_default()
    }

    pub fn file_bucket_id_for_container(&self, container_name: &str) -> Option<&str> {
        self.container_to_file_bucket
            .get(container_name)
            .map(String::as_str)
    }

    pub fn bucket_for_file_bucket(&self, file_bucket_id: &str) -> Option<&str> {
        if file_bucket_id == BACKUP_FILE_BUCKET {
            return Some(BACKUP_BUCKET);
        }
        self.file_buckets
            .get(file_bucket_id)
            .map(|fb| fb.bucket.as_str())
    }
}
