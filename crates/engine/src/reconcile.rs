//! Snapshot reconciliation: snapshots attached to candidates, and orphans.

use amiclean_core::{Error, Image, ImageId, Snapshot, SnapshotId};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const CREATE_IMAGE_PREFIX: &str = "Created by CreateImage";

static CREATE_IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Created by CreateImage\([^)]*\) for (ami-[0-9A-Za-z]+)\b").expect("static regex")
});

/// Snapshot ids mapped by an image, in mapping order, without duplicates.
pub fn attached_snapshots(image: &Image) -> Vec<SnapshotId> {
    let mut out: Vec<SnapshotId> = Vec::with_capacity(image.block_devices.len());
    for id in image.block_devices.iter().filter_map(|bd| bd.snapshot_id.as_ref()) {
        if !out.contains(id) { out.push(id.clone()); }
    }
    out
}

/// Originating image recorded in a `CreateImage` snapshot description.
///
/// `Ok(None)` for descriptions that make no provenance claim; an error when the
/// prefix is present but the image id cannot be read.
pub fn originating_image(snapshot: &Snapshot) -> Result<Option<ImageId>, Error> {
    let desc = snapshot.description.trim();
    if !desc.starts_with(CREATE_IMAGE_PREFIX) { return Ok(None); }
    match CREATE_IMAGE_RE.captures(desc).and_then(|c| c.get(1)) {
        Some(m) => Ok(Some(m.as_str().to_string())),
        None => Err(Error::MalformedSnapshotDescription {
            snapshot_id: snapshot.id.clone(),
            description: snapshot.description.clone(),
        }),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanSnapshot {
    pub snapshot_id: SnapshotId,
    /// The deregistered image named in the description.
    pub image_id: ImageId,
    pub volume_size: u64,
}

/// Completed snapshots whose originating image is gone from `images`.
///
/// Snapshots still mapped by a current image are never orphans, and snapshots
/// owned by another account are skipped when `owner_id` is set.
pub fn find_orphans(snapshots: &[Snapshot], images: &[Image], owner_id: Option<&str>) -> Vec<OrphanSnapshot> {
    let live_images: FxHashSet<&str> = images.iter().map(|i| i.id.as_str()).collect();
    let live_snapshots: FxHashSet<&str> = images
        .iter()
        .flat_map(|i| i.block_devices.iter())
        .filter_map(|bd| bd.snapshot_id.as_deref())
        .collect();

    let mut out = Vec::new();
    for snap in snapshots {
        if !snap.is_completed() { continue; }
        if let (Some(want), Some(have)) = (owner_id, snap.owner_id.as_deref()) {
            if want != have { continue; }
        }
        let origin = match originating_image(snap) {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "skipping snapshot with unparseable provenance");
                continue;
            }
        };
        if live_images.contains(origin.as_str()) { continue; }
        if live_snapshots.contains(snap.id.as_str()) {
            debug!(snapshot = %snap.id, image = %origin, "origin image gone but snapshot still mapped; keeping");
            continue;
        }
        out.push(OrphanSnapshot { snapshot_id: snap.id.clone(), image_id: origin, volume_size: snap.volume_size });
    }
    out
}
