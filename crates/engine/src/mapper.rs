//! Tag/name mapping: image -> group key.

use amiclean_core::{GroupKey, Image, MappingConfig, MappingMode};

/// Derive the group key for one image. Pure; absence of tags or name yields `Unmatched`.
pub fn map_image(image: &Image, cfg: &MappingConfig) -> GroupKey {
    let key = match cfg.mode {
        MappingMode::Name => map_by_name(image, &cfg.values),
        MappingMode::Tags => map_by_tags(image, &cfg.values, cfg.require_all_keys),
    };
    match key {
        GroupKey::Matched(k) if is_excluded(image, &k, cfg) => GroupKey::Unmatched,
        other => other,
    }
}

fn map_by_name(image: &Image, needles: &[String]) -> GroupKey {
    needles
        .iter()
        .find(|n| !n.is_empty() && image.name.contains(n.as_str()))
        .map(|n| GroupKey::Matched(n.clone()))
        .unwrap_or(GroupKey::Unmatched)
}

fn map_by_tags(image: &Image, keys: &[String], require_all: bool) -> GroupKey {
    let mut values: Vec<&str> = image
        .tags
        .iter()
        .filter(|t| keys.iter().any(|k| *k == t.key))
        .map(|t| t.value.as_str())
        .collect();
    if values.is_empty() { return GroupKey::Unmatched; }
    if require_all && !keys.iter().all(|k| image.tag(k).is_some()) { return GroupKey::Unmatched; }
    values.sort_unstable();
    GroupKey::Matched(values.join("."))
}

/// Name mode compares the matched substring; tags mode compares raw tag values,
/// since a value may itself contain the `.` separator.
fn is_excluded(image: &Image, key: &str, cfg: &MappingConfig) -> bool {
    if cfg.excluded_values.is_empty() { return false; }
    match cfg.mode {
        MappingMode::Name => cfg.excluded_values.iter().any(|v| v == key),
        MappingMode::Tags => image
            .tags
            .iter()
            .filter(|t| cfg.values.iter().any(|k| *k == t.key))
            .any(|t| cfg.excluded_values.iter().any(|v| *v == t.value)),
    }
}
