//! amiclean core types: inventory model, derived group keys and errors.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod config;

pub use config::{CleanupConfig, MappingConfig, MappingMode, RawConfig};

pub type ImageId = String;
pub type SnapshotId = String;

/// Snapshot state that makes a snapshot eligible for any decision.
pub const SNAPSHOT_COMPLETED: &str = "completed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// One volume mapping entry of an image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BlockDevice {
    pub device_name: Option<String>,
    pub snapshot_id: Option<SnapshotId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub name: String,
    /// `None` when the provider omitted the date or it did not parse.
    pub creation_date: Option<DateTime<Utc>>,
    pub tags: SmallVec<[Tag; 4]>,
    pub block_devices: SmallVec<[BlockDevice; 2]>,
}

impl Image {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|t| t.key == key).map(|t| t.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "shutting-down" => Some(Self::ShuttingDown),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub image_id: ImageId,
    pub state: Option<InstanceState>,
}

impl Instance {
    /// Anything not yet terminated may still boot from its image.
    pub fn is_live(&self) -> bool { self.state != Some(InstanceState::Terminated) }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoScalingAttachment {
    pub group_name: String,
    pub desired_capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfiguration {
    pub name: String,
    pub image_id: ImageId,
    pub autoscaling: Option<AutoScalingAttachment>,
}

impl LaunchConfiguration {
    /// Attached to an autoscaling group that currently wants at least one instance.
    pub fn is_live(&self) -> bool {
        self.autoscaling.as_ref().map(|a| a.desired_capacity > 0).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub state: String,
    pub description: String,
    /// GiB
    pub volume_size: u64,
    pub owner_id: Option<String>,
}

impl Snapshot {
    pub fn is_completed(&self) -> bool { self.state == SNAPSHOT_COMPLETED }
}

/// Point-in-time view of everything the engine reasons about.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Inventory {
    pub images: Vec<Image>,
    pub instances: Vec<Instance>,
    pub launch_configs: Vec<LaunchConfiguration>,
    pub snapshots: Vec<Snapshot>,
}

/// Result of mapping an image to a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum GroupKey {
    Matched(String),
    Unmatched,
}

impl GroupKey {
    pub fn is_unmatched(&self) -> bool { matches!(self, GroupKey::Unmatched) }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GroupKey::Matched(k) => Some(k.as_str()),
            GroupKey::Unmatched => None,
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKey::Matched(k) => f.write_str(k),
            GroupKey::Unmatched => f.write_str("<unmatched>"),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("malformed snapshot description on {snapshot_id}: {description:?}")]
    MalformedSnapshotDescription { snapshot_id: SnapshotId, description: String },
}

pub type Result<T> = std::result::Result<T, Error>;
