//! Full pipeline: inventory + config -> cleanup plan.

use amiclean_core::{CleanupConfig, Error, GroupKey, Image, ImageId, Inventory, SnapshotId};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::group::{group_images, Group};
use crate::protect::{protected_images, ImageIdSet};
use crate::reconcile::{attached_snapshots, find_orphans, OrphanSnapshot};
use crate::retention::{Reduced, RetentionPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateImage {
    pub id: ImageId,
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub snapshot_ids: Vec<SnapshotId>,
}

impl CandidateImage {
    fn from_image(image: &Image) -> Self {
        Self {
            id: image.id.clone(),
            name: image.name.clone(),
            creation_date: image.creation_date,
            snapshot_ids: attached_snapshots(image),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupReport {
    pub key: GroupKey,
    pub total: usize,
    pub protected: usize,
    pub candidate_count: usize,
    pub candidates: Vec<CandidateImage>,
    /// Unprotected members that survive retention.
    pub retained: Vec<CandidateImage>,
}

impl GroupReport {
    fn new(group: &Group<'_>, reduced: &Reduced<'_>) -> Self {
        Self {
            key: group.key.clone(),
            total: group.len(),
            protected: reduced.protected.len(),
            candidate_count: reduced.candidates.len(),
            candidates: reduced.candidates.iter().map(|i| CandidateImage::from_image(i)).collect(),
            retained: reduced.retained.iter().map(|i| CandidateImage::from_image(i)).collect(),
        }
    }

    fn empty_unmatched() -> Self {
        Self {
            key: GroupKey::Unmatched,
            total: 0,
            protected: 0,
            candidate_count: 0,
            candidates: Vec::new(),
            retained: Vec::new(),
        }
    }
}

/// Decisions for one run. Nothing here has been executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupPlan {
    pub generated_at: DateTime<Utc>,
    pub keep_previous: usize,
    /// Matched groups sorted by key.
    pub groups: Vec<GroupReport>,
    pub unmatched: GroupReport,
    /// Candidates from an explicit id list; empty unless `from_ids` was set.
    pub forced: Vec<CandidateImage>,
    pub orphans: Vec<OrphanSnapshot>,
}

impl CleanupPlan {
    pub fn candidates(&self) -> impl Iterator<Item = &CandidateImage> {
        self.groups.iter().flat_map(|g| g.candidates.iter()).chain(self.forced.iter())
    }

    /// Images to deregister.
    pub fn image_ids(&self) -> Vec<ImageId> { self.candidates().map(|c| c.id.clone()).collect() }

    /// Snapshots to delete: those of candidate images, then orphans. No duplicates.
    pub fn snapshot_ids(&self) -> Vec<SnapshotId> {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        self.candidates()
            .flat_map(|c| c.snapshot_ids.iter())
            .chain(self.orphans.iter().map(|o| &o.snapshot_id))
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .map(str::to_string)
            .collect()
    }

    pub fn is_empty(&self) -> bool { self.candidates().next().is_none() && self.orphans.is_empty() }
}

/// Run the engine over a frozen inventory. `now` anchors age checks.
pub fn plan(inventory: &Inventory, cfg: &CleanupConfig, now: DateTime<Utc>) -> Result<CleanupPlan, Error> {
    cfg.validate()?;
    let started = std::time::Instant::now();
    let protected = protected_images(&inventory.instances, &inventory.launch_configs);

    let (groups, unmatched, forced) = if cfg.from_ids.is_empty() {
        let (groups, unmatched) = plan_groups(inventory, cfg, &protected, now);
        (groups, unmatched, Vec::new())
    } else {
        (Vec::new(), GroupReport::empty_unmatched(), plan_forced(&inventory.images, &cfg.from_ids, &protected))
    };

    let orphans = if cfg.check_orphans {
        find_orphans(&inventory.snapshots, &inventory.images, cfg.owner_id.as_deref())
    } else {
        Vec::new()
    };

    let out = CleanupPlan { generated_at: now, keep_previous: cfg.keep_previous, groups, unmatched, forced, orphans };
    let candidates = out.candidates().count();
    histogram!("engine_plan_ms", started.elapsed().as_secs_f64() * 1000.0);
    counter!("engine_candidates_total", candidates as u64);
    counter!("engine_orphans_total", out.orphans.len() as u64);
    info!(
        images = inventory.images.len(),
        protected = protected.len(),
        groups = out.groups.len(),
        unmatched = out.unmatched.total,
        candidates,
        orphans = out.orphans.len(),
        "cleanup plan ready"
    );
    Ok(out)
}

fn plan_groups(
    inventory: &Inventory,
    cfg: &CleanupConfig,
    protected: &ImageIdSet,
    now: DateTime<Utc>,
) -> (Vec<GroupReport>, GroupReport) {
    let grouping = group_images(&inventory.images, &cfg.mapping);
    debug_assert_eq!(grouping.total_images(), inventory.images.len());
    let policy = RetentionPolicy { keep_previous: cfg.keep_previous, min_age_days: cfg.min_age_days, now };
    let mut groups: Vec<GroupReport> = grouping
        .groups
        .iter()
        .map(|g| GroupReport::new(g, &policy.apply(g, protected)))
        .collect();
    groups.sort_by(|a, b| a.key.cmp(&b.key));
    let unmatched = GroupReport::new(&grouping.unmatched, &policy.apply(&grouping.unmatched, protected));
    (groups, unmatched)
}

fn plan_forced(images: &[Image], ids: &[ImageId], protected: &ImageIdSet) -> Vec<CandidateImage> {
    let by_id: FxHashMap<&str, &Image> = images.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut out: Vec<CandidateImage> = Vec::new();
    for id in ids {
        if !seen.insert(id.as_str()) { continue; }
        let Some(image) = by_id.get(id.as_str()) else {
            warn!(image = %id, "requested image not in inventory; skipping");
            continue;
        };
        if protected.contains(id) {
            warn!(image = %id, "requested image is in use; refusing to select it");
            continue;
        }
        out.push(CandidateImage::from_image(image));
    }
    out
}
