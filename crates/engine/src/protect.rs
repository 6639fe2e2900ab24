//! Usage protection: images that must never be deleted.

use amiclean_core::{ImageId, Instance, LaunchConfiguration};
use rustc_hash::FxHashSet;

pub type ImageIdSet = FxHashSet<ImageId>;

/// Images referenced by any instance that has not terminated.
pub fn instance_images(instances: &[Instance]) -> ImageIdSet {
    instances.iter().filter(|i| i.is_live()).map(|i| i.image_id.clone()).collect()
}

/// Images referenced by launch configurations whose autoscaling group wants capacity.
/// Detached configs and zero-capacity groups do not protect anything.
pub fn launch_config_images(configs: &[LaunchConfiguration]) -> ImageIdSet {
    configs.iter().filter(|lc| lc.is_live()).map(|lc| lc.image_id.clone()).collect()
}

pub fn protected_images(instances: &[Instance], configs: &[LaunchConfiguration]) -> ImageIdSet {
    let by_instance = instance_images(instances);
    let by_config = launch_config_images(configs);
    tracing::debug!(instances = by_instance.len(), launch_configs = by_config.len(), "computed protected images");
    by_instance.union(&by_config).cloned().collect()
}
