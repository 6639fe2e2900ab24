//! Per-group retention: keep the most recent images, the rest become candidates.

use std::cmp::Ordering;

use amiclean_core::{GroupKey, Image};
use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashSet;

use crate::group::Group;
use crate::protect::ImageIdSet;

/// Most recent first. Undated images count as newest so they are retained first.
/// Ties keep the original member order.
fn by_recency(a: &(usize, &Image), b: &(usize, &Image)) -> Ordering {
    let dates = match (a.1.creation_date, b.1.creation_date) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(&x),
    };
    dates.then(a.0.cmp(&b.0))
}

/// Sort unprotected members by recency and drop the first `keep_previous`.
/// Candidates are returned most recent first.
pub fn reduce<'a>(members: &[&'a Image], protected: &ImageIdSet, keep_previous: usize) -> Vec<&'a Image> {
    let mut ranked: Vec<(usize, &'a Image)> =
        members.iter().copied().enumerate().filter(|(_, img)| !protected.contains(&img.id)).collect();
    ranked.sort_by(by_recency);
    ranked.into_iter().skip(keep_previous).map(|(_, img)| img).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub keep_previous: usize,
    pub min_age_days: u32,
    /// Reference time for age checks; fixed per plan so reruns agree.
    pub now: DateTime<Utc>,
}

/// Classification of one group's members.
#[derive(Debug, Clone, Default)]
pub struct Reduced<'a> {
    pub candidates: Vec<&'a Image>,
    pub retained: Vec<&'a Image>,
    pub protected: Vec<&'a Image>,
}

impl RetentionPolicy {
    fn old_enough(&self, image: &Image) -> bool {
        if self.min_age_days == 0 { return true; }
        match image.creation_date {
            Some(created) => self.now - created >= Duration::days(i64::from(self.min_age_days)),
            None => false,
        }
    }

    pub fn apply<'a>(&self, group: &Group<'a>, protected: &ImageIdSet) -> Reduced<'a> {
        if group.is_empty() { return Reduced::default(); }
        let (prot, free): (Vec<&'a Image>, Vec<&'a Image>) =
            group.members.iter().copied().partition(|img| protected.contains(&img.id));
        if group.key == GroupKey::Unmatched {
            return Reduced { candidates: Vec::new(), retained: free, protected: prot };
        }
        let reduced = reduce(&group.members, protected, self.keep_previous);
        let (candidates, too_young): (Vec<&'a Image>, Vec<&'a Image>) =
            reduced.into_iter().partition(|img| self.old_enough(img));
        let selected: FxHashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let retained: Vec<&'a Image> = free.into_iter().filter(|img| !selected.contains(img.id.as_str())).collect();
        if !too_young.is_empty() {
            tracing::debug!(group = %group.key, count = too_young.len(), min_age_days = self.min_age_days, "retaining images below minimum age");
        }
        Reduced { candidates, retained, protected: prot }
    }
}
