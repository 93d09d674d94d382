use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tcas_docstore::{JournalConfig, SyncMode};
use tcas_types::DigestType;

use crate::error::{CasError, CasResult};

/// Offer configuration, usually read from a TOML file.
///
/// ```toml
/// input_root = "/var/lib/tcas/staging"
/// referential_dir = "/var/lib/tcas/referential"
/// tar_max_size = 1073741824
/// tar_max_age = 300
///
/// [topology.buckets]
/// prod = [0, 1]
///
/// [topology.file_buckets]
/// metadata = ["unit", "objectGroup"]
/// objects = ["object"]
///
/// [server]
/// bind_addr = "0.0.0.0:8080"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferConfig {
    /// Staging root: `<input_root>/<fileBucketId>/{input,tar}`.
    pub input_root: PathBuf,
    /// Directory holding the referential and queue journals.
    pub referential_dir: PathBuf,
    /// Flush an archive once it reaches this many bytes.
    pub tar_max_size: u64,
    /// Flush an archive this many seconds after its first object.
    pub tar_max_age: u64,
    pub digest_type: DigestType,
    /// `fsync` every journal append.
    pub sync_journal: bool,
    pub topology: TopologyConfig,
    pub server: ServerSettings,
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("staging"),
            referential_dir: PathBuf::from("referential"),
            tar_max_size: 1024 * 1024 * 1024,
            tar_max_age: 300,
            digest_type: DigestType::Sha512,
            sync_journal: true,
            topology: TopologyConfig::default(),
            server: ServerSettings::default(),
        }
    }
}

impl OfferConfig {
    /// Staging and journals rooted under one directory.
    pub fn with_root(root: &Path) -> Self {
        Self {
            input_root: root.join("staging"),
            referential_dir: root.join("referential"),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> CasResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CasError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| CasError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CasResult<()> {
        if self.tar_max_size == 0 {
            return Err(CasError::Config("tar_max_size must be positive".into()));
        }
        if self.tar_max_age == 0 {
            return Err(CasError::Config("tar_max_age must be positive".into()));
        }
        self.topology.validate()
    }

    pub fn tar_max_age(&self) -> Duration {
        Duration::from_secs(self.tar_max_age)
    }

    pub fn journal_config(&self) -> JournalConfig {
        JournalConfig {
            sync_mode: if self.sync_journal {
                SyncMode::EveryWrite
            } else {
                SyncMode::OsDefault
            },
        }
    }
}

/// Buckets group tenants; file buckets group data categories.
///
/// A container is `<tenant>_<category>` and belongs to file bucket
/// `<bucket>-<fileBucket>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub buckets: BTreeMap<String, Vec<u32>>,
    pub file_buckets: BTreeMap<String, Vec<String>>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::from([("default".to_string(), vec![0])]),
            file_buckets: BTreeMap::from([
                (
                    "metadata".to_string(),
                    vec!["unit".to_string(), "objectGroup".to_string()],
                ),
                ("objects".to_string(), vec!["object".to_string()]),
            ]),
        }
    }
}

impl TopologyConfig {
    pub fn validate(&self) -> CasResult<()> {
        let names = self.buckets.keys().chain(self.file_buckets.keys());
        for name in names {
            if name.is_empty() || name.contains(['-', '/', '_']) {
                return Err(CasError::Config(format!(
                    "invalid bucket name {name:?}: must be non-empty without '-', '_' or '/'"
                )));
            }
        }
        if self.file_buckets.contains_key(crate::topology::BACKUP_FILE_BUCKET)
            || self.buckets.contains_key(crate::topology::BACKUP_BUCKET)
        {
            return Err(CasError::Config(format!(
                "{:?} is reserved for backups",
                crate::topology::BACKUP_FILE_BUCKET
            )));
        }

        let mut tenants = BTreeMap::new();
        for (bucket, list) in &self.buckets {
            for tenant in list {
                if let Some(other) = tenants.insert(*tenant, bucket) {
                    return Err(CasError::Config(format!(
                        "tenant {tenant} is in both {other:?} and {bucket:?}"
                    )));
                }
            }
        }

        let mut categories = BTreeMap::new();
        for (file_bucket, list) in &self.file_buckets {
            if list.is_empty() {
                return Err(CasError::Config(format!("file bucket {file_bucket:?} has no category")));
            }
            for category in list {
                if category.is_empty() || category.contains('/') {
                    return Err(CasError::Config(format!("invalid category {category:?}")));
                }
                if let Some(other) = categories.insert(category.as_str(), file_bucket) {
                    return Err(CasError::Config(format!(
                        "category {category:?} is in both {other:?} and {file_bucket:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Admin HTTP surface settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    /// Largest accepted request body, in bytes.
    pub max_upload_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_upload_size: 256 * 1024 * 1024,
        }
    }
}
