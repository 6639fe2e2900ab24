//! Partition the image inventory into groups.

use amiclean_core::{GroupKey, Image, MappingConfig};
use rustc_hash::FxHashMap;

use crate::mapper::map_image;

/// Images sharing one key, in inventory order.
#[derive(Debug, Clone)]
pub struct Group<'a> {
    pub key: GroupKey,
    pub members: Vec<&'a Image>,
}

impl<'a> Group<'a> {
    fn new(key: GroupKey) -> Self { Self { key, members: Vec::new() } }
    pub fn len(&self) -> usize { self.members.len() }
    pub fn is_empty(&self) -> bool { self.members.is_empty() }
}

#[derive(Debug, Clone)]
pub struct Grouping<'a> {
    /// Matched groups in first-seen order.
    pub groups: Vec<Group<'a>>,
    /// Always present, possibly empty.
    pub unmatched: Group<'a>,
}

impl<'a> Grouping<'a> {
    pub fn total_images(&self) -> usize {
        self.unmatched.len() + self.groups.iter().map(Group::len).sum::<usize>()
    }
}

pub fn group_images<'a>(images: &'a [Image], cfg: &MappingConfig) -> Grouping<'a> {
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    let mut groups: Vec<Group<'a>> = Vec::new();
    let mut unmatched = Group::new(GroupKey::Unmatched);
    for image in images {
        match map_image(image, cfg) {
            GroupKey::Unmatched => unmatched.members.push(image),
            GroupKey::Matched(k) => {
                let slot = match index.get(&k) {
                    Some(&i) => i,
                    None => {
                        groups.push(Group::new(GroupKey::Matched(k.clone())));
                        index.insert(k, groups.len() - 1);
                        groups.len() - 1
                    }
                };
                groups[slot].members.push(image);
            }
        }
    }
    tracing::debug!(groups = groups.len(), unmatched = unmatched.len(), "grouped images");
    Grouping { groups, unmatched }
}
