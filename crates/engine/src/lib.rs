//! amiclean engine: decides which owned images and snapshots are safe to delete.
//!
//! Inventory flows through the mapper and grouper, protected images are set
//! aside, each group is reduced by the retention policy, and snapshots are
//! reconciled against the surviving inventory. Nothing here talks to a cloud
//! API; callers execute the returned [`CleanupPlan`].

#![forbid(unsafe_code)]

pub mod group;
pub mod mapper;
pub mod plan;
pub mod protect;
pub mod reconcile;
pub mod retention;

pub use group::{group_images, Group, Grouping};
pub use mapper::map_image;
pub use plan::{plan, CandidateImage, CleanupPlan, GroupReport};
pub use protect::{instance_images, launch_config_images, protected_images, ImageIdSet};
pub use reconcile::{attached_snapshots, find_orphans, originating_image, OrphanSnapshot};
pub use retention::{reduce, Reduced, RetentionPolicy};
