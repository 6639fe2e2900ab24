//! amiclean inventory: decode AWS CLI `describe-*` output into the core model.
//!
//! Each document may carry any subset of `Images`, `Reservations`,
//! `LaunchConfigurations`, `AutoScalingGroups` and `Snapshots`, so the raw
//! output of separate CLI calls can be fed in one after another. The builder
//! remembers which sections it has seen, since a missing section and an empty
//! one mean different things to the engine (see [`Coverage`]).

#![forbid(unsafe_code)]

use std::path::Path;

use amiclean_core::{
    AutoScalingAttachment, BlockDevice, Image, Instance, InstanceState, Inventory, LaunchConfiguration, Snapshot, Tag,
};
use anyhow::{bail, Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// `None` means the section was absent from the document, not empty.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Document {
    pub images: Option<Vec<AwsImage>>,
    pub reservations: Option<Vec<AwsReservation>>,
    pub launch_configurations: Option<Vec<AwsLaunchConfiguration>>,
    pub auto_scaling_groups: Option<Vec<AwsAutoScalingGroup>>,
    pub snapshots: Option<Vec<AwsSnapshot>>,
}

/// Sections present in at least one loaded document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coverage {
    pub images: bool,
    pub reservations: bool,
    pub launch_configurations: bool,
    pub auto_scaling_groups: bool,
    pub snapshots: bool,
}

impl Coverage {
    /// Usage sections that were never loaded; without them nothing they reference is protected.
    pub fn missing_usage(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.reservations { out.push("Reservations"); }
        if !self.launch_configurations { out.push("LaunchConfigurations"); }
        if !self.auto_scaling_groups { out.push("AutoScalingGroups"); }
        out
    }

    /// Refuse inventories that would turn absence into deletion decisions.
    ///
    /// Without `Images` every `CreateImage` snapshot looks orphaned. Missing usage
    /// sections fail unless `allow_missing_usage`, in which case they are logged.
    pub fn check(&self, allow_missing_usage: bool) -> Result<()> {
        if !self.images {
            bail!("no Images section loaded; refusing to plan (pass describe-images output with -i)");
        }
        let missing = self.missing_usage();
        if missing.is_empty() { return Ok(()); }
        if !allow_missing_usage {
            bail!("inventory lacks {}; images in use could not be protected (pass the matching describe output or --allow-missing-usage)", missing.join(", "));
        }
        warn!(missing = ?missing, "usage sections absent; images they reference are unprotected");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsImage {
    pub image_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<AwsTag>,
    #[serde(default)]
    pub block_device_mappings: Vec<AwsBlockDeviceMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsTag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsBlockDeviceMapping {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub ebs: Option<AwsEbs>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsEbs {
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsReservation {
    #[serde(default)]
    pub instances: Vec<AwsInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsInstance {
    pub instance_id: String,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub state: Option<AwsInstanceState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsInstanceState {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsLaunchConfiguration {
    pub launch_configuration_name: String,
    #[serde(default)]
    pub image_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsAutoScalingGroup {
    pub auto_scaling_group_name: String,
    #[serde(default)]
    pub launch_configuration_name: Option<String>,
    #[serde(default)]
    pub desired_capacity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsSnapshot {
    pub snapshot_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub volume_size: Option<u64>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

fn parse_creation_date(image_id: &str, raw: Option<&str>) -> Option<chrono::DateTime<chrono::Utc>> {
    let s = raw?;
    match chrono::DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Some(dt.with_timezone(&chrono::Utc)),
        Err(e) => {
            debug!(image = %image_id, raw = %s, error = %e, "unparseable creation date; treating as unknown");
            None
        }
    }
}

impl From<AwsImage> for Image {
    fn from(a: AwsImage) -> Self {
        let creation_date = parse_creation_date(&a.image_id, a.creation_date.as_deref());
        Image {
            name: a.name.unwrap_or_default(),
            creation_date,
            tags: a.tags.into_iter().map(|t| Tag::new(t.key, t.value)).collect(),
            block_devices: a
                .block_device_mappings
                .into_iter()
                .map(|m| BlockDevice { device_name: m.device_name, snapshot_id: m.ebs.and_then(|e| e.snapshot_id) })
                .collect(),
            id: a.image_id,
        }
    }
}

impl From<AwsSnapshot> for Snapshot {
    fn from(a: AwsSnapshot) -> Self {
        Snapshot {
            id: a.snapshot_id,
            state: a.state,
            description: a.description.unwrap_or_default(),
            volume_size: a.volume_size.unwrap_or(0),
            owner_id: a.owner_id,
        }
    }
}

/// Accumulates documents and joins launch configurations with their autoscaling groups.
#[derive(Debug, Default)]
pub struct InventoryBuilder {
    images: Vec<Image>,
    seen_images: FxHashSet<String>,
    instances: Vec<Instance>,
    launch_configs: Vec<AwsLaunchConfiguration>,
    groups: Vec<AwsAutoScalingGroup>,
    snapshots: Vec<Snapshot>,
    documents: usize,
    coverage: Coverage,
}

impl InventoryBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn add_document(&mut self, doc: Document) -> &mut Self {
        self.documents += 1;
        self.coverage.images |= doc.images.is_some();
        self.coverage.reservations |= doc.reservations.is_some();
        self.coverage.launch_configurations |= doc.launch_configurations.is_some();
        self.coverage.auto_scaling_groups |= doc.auto_scaling_groups.is_some();
        self.coverage.snapshots |= doc.snapshots.is_some();
        for img in doc.images.unwrap_or_default() {
            if !self.seen_images.insert(img.image_id.clone()) {
                debug!(image = %img.image_id, "duplicate image in inventory; keeping first");
                continue;
            }
            self.images.push(Image::from(img));
        }
        for inst in doc.reservations.unwrap_or_default().into_iter().flat_map(|r| r.instances) {
            let Some(image_id) = inst.image_id else { continue };
            let state = inst.state.as_ref().and_then(|s| InstanceState::parse(&s.name));
            if state.is_none() {
                if let Some(s) = inst.state.as_ref() {
                    warn!(instance = %inst.instance_id, state = %s.name, "unknown instance state; treating as live");
                }
            }
            self.instances.push(Instance { id: inst.instance_id, image_id, state });
        }
        self.launch_configs.extend(doc.launch_configurations.unwrap_or_default());
        self.groups.extend(doc.auto_scaling_groups.unwrap_or_default());
        self.snapshots.extend(doc.snapshots.unwrap_or_default().into_iter().map(Snapshot::from));
        self
    }

    pub fn add_json(&mut self, text: &str) -> Result<&mut Self> {
        let doc: Document = serde_json::from_str(text).context("decoding inventory json")?;
        Ok(self.add_document(doc))
    }

    pub fn add_yaml(&mut self, text: &str) -> Result<&mut Self> {
        let doc: Document = serde_yaml::from_str(text).context("decoding inventory yaml")?;
        Ok(self.add_document(doc))
    }

    /// Load one file; `.yaml`/`.yml` decode as YAML, everything else as JSON.
    pub fn add_path(&mut self, path: &Path) -> Result<&mut Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading inventory {}", path.display()))?;
        let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
        if is_yaml {
            self.add_yaml(&text).with_context(|| format!("in {}", path.display()))
        } else {
            self.add_json(&text).with_context(|| format!("in {}", path.display()))
        }
    }

    pub fn coverage(&self) -> Coverage { self.coverage }

    /// Autoscaling groups that name no launch configuration (e.g. launch-template backed).
    /// Images they run are only protected through their instances.
    pub fn groups_without_launch_config(&self) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|g| g.launch_configuration_name.is_none())
            .map(|g| g.auto_scaling_group_name.as_str())
            .collect()
    }

    pub fn build(self) -> Inventory {
        for name in self.groups_without_launch_config() {
            warn!(group = %name, "autoscaling group has no launch configuration (launch template?); its images are not protected by it");
        }
        // A config may back several groups; the largest desired capacity decides.
        let mut attachment: FxHashMap<&str, AutoScalingAttachment> = FxHashMap::default();
        for g in &self.groups {
            let Some(lc) = g.launch_configuration_name.as_deref() else { continue };
            let replace = attachment.get(lc).map(|a| g.desired_capacity > a.desired_capacity).unwrap_or(true);
            if replace {
                attachment.insert(lc, AutoScalingAttachment {
                    group_name: g.auto_scaling_group_name.clone(),
                    desired_capacity: g.desired_capacity,
                });
            }
        }
        let launch_configs: Vec<LaunchConfiguration> = self
            .launch_configs
            .iter()
            .filter_map(|lc| {
                let image_id = lc.image_id.clone()?;
                Some(LaunchConfiguration {
                    name: lc.launch_configuration_name.clone(),
                    image_id,
                    autoscaling: attachment.get(lc.launch_configuration_name.as_str()).cloned(),
                })
            })
            .collect();
        info!(
            documents = self.documents,
            images = self.images.len(),
            instances = self.instances.len(),
            launch_configs = launch_configs.len(),
            snapshots = self.snapshots.len(),
            "inventory loaded"
        );
        Inventory { images: self.images, instances: self.instances, launch_configs, snapshots: self.snapshots }
    }
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub inventory: Inventory,
    pub coverage: Coverage,
}

/// Convenience: load and merge several files.
pub fn load_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Loaded> {
    let mut b = InventoryBuilder::new();
    for p in paths {
        b.add_path(p.as_ref())?;
    }
    let coverage = b.coverage();
    Ok(Loaded { inventory: b.build(), coverage })
}
