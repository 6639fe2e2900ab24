#![forbid(unsafe_code)]

use amiclean_core::{
    AutoScalingAttachment, BlockDevice, CleanupConfig, GroupKey, Image, Instance, InstanceState, Inventory,
    LaunchConfiguration, Snapshot, Tag,
};
use amiclean_engine::{plan, reduce, CleanupPlan, ImageIdSet};
use chrono::{DateTime, TimeZone, Utc};

fn day(d: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2023, 3, d, 12, 0, 0).unwrap() }

fn img(id: &str, d: u32, tags: &[(&str, &str)], snaps: &[&str]) -> Image {
    Image {
        id: id.into(),
        name: format!("{}-build", id),
        creation_date: Some(day(d)),
        tags: tags.iter().map(|(k, v)| Tag::new(*k, *v)).collect(),
        block_devices: snaps
            .iter()
            .map(|s| BlockDevice { device_name: Some("/dev/xvda".into()), snapshot_id: Some(s.to_string()) })
            .collect(),
    }
}

fn running(image: &str) -> Instance {
    Instance { id: format!("i-{}", image), image_id: image.into(), state: Some(InstanceState::Running) }
}

fn launch_config(image: &str, desired: u32) -> LaunchConfiguration {
    LaunchConfiguration {
        name: format!("lc-{}", image),
        image_id: image.into(),
        autoscaling: Some(AutoScalingAttachment { group_name: "web".into(), desired_capacity: desired }),
    }
}

const FRONT: &[(&str, &str)] = &[("environment", "dev"), ("role", "front")];

fn cfg(keep: usize) -> CleanupConfig { CleanupConfig { keep_previous: keep, ..Default::default() } }

fn run(inv: &Inventory, keep: usize) -> CleanupPlan { plan(inv, &cfg(keep), day(28)).unwrap() }

fn candidate_ids(p: &CleanupPlan) -> Vec<String> { p.image_ids() }

#[test]
fn keep_two_of_four_selects_the_two_oldest() {
    let inv = Inventory {
        images: vec![img("ami-1", 1, FRONT, &[]), img("ami-3", 3, FRONT, &[]), img("ami-4", 4, FRONT, &[]), img("ami-2", 2, FRONT, &[])],
        ..Default::default()
    };
    let p = run(&inv, 2);
    assert_eq!(p.groups.len(), 1);
    assert_eq!(p.groups[0].key, GroupKey::Matched("dev.front".into()));
    assert_eq!(p.groups[0].total, 4);
    assert_eq!(p.groups[0].candidate_count, 2);
    let mut ids = candidate_ids(&p);
    ids.sort();
    assert_eq!(ids, vec!["ami-1", "ami-2"]);
}

#[test]
fn candidate_count_matches_unprotected_minus_keep() {
    let images: Vec<Image> = (1..=6).map(|d| img(&format!("ami-{}", d), d, FRONT, &[])).collect();
    let inv = Inventory { images, instances: vec![running("ami-2"), running("ami-5")], ..Default::default() };
    let all = run(&inv, 0);
    let all_ids = candidate_ids(&all);
    assert_eq!(all_ids.len(), 4);
    for k in 0..8usize {
        let p = run(&inv, k);
        let ids = candidate_ids(&p);
        assert_eq!(ids.len(), 4usize.saturating_sub(k), "keep_previous={}", k);
        assert!(ids.iter().all(|id| all_ids.contains(id)));
        assert_eq!(p.groups[0].protected, 2);
    }
}

#[test]
fn running_instance_protects_even_with_zero_retention() {
    let inv = Inventory {
        images: vec![img("ami-1", 1, FRONT, &[]), img("ami-2", 2, FRONT, &[])],
        instances: vec![running("ami-1")],
        ..Default::default()
    };
    assert_eq!(candidate_ids(&run(&inv, 0)), vec!["ami-2"]);
}

#[test]
fn zero_capacity_autoscaling_group_does_not_protect() {
    let inv = Inventory {
        images: vec![img("ami-1", 1, FRONT, &[]), img("ami-2", 2, FRONT, &[])],
        launch_configs: vec![launch_config("ami-1", 0), launch_config("ami-2", 3)],
        ..Default::default()
    };
    assert_eq!(candidate_ids(&run(&inv, 0)), vec!["ami-1"]);
}

#[test]
fn unmatched_group_never_contributes_candidates() {
    let inv = Inventory {
        images: vec![img("ami-1", 1, &[], &[]), img("ami-2", 2, &[("Name", "x")], &[]), img("ami-3", 3, FRONT, &[])],
        ..Default::default()
    };
    for k in [0usize, 1, 4] {
        let p = run(&inv, k);
        assert_eq!(p.unmatched.total, 2);
        assert_eq!(p.unmatched.candidate_count, 0);
        assert_eq!(p.unmatched.retained.len(), 2);
    }
}

#[test]
fn candidate_carries_all_mapped_snapshots() {
    let inv = Inventory {
        images: vec![img("ami-1", 1, FRONT, &["snap-a", "snap-b"]), img("ami-2", 2, FRONT, &["snap-c"])],
        ..Default::default()
    };
    let p = run(&inv, 1);
    assert_eq!(p.groups[0].candidates.len(), 1);
    assert_eq!(p.groups[0].candidates[0].snapshot_ids, vec!["snap-a".to_string(), "snap-b".to_string()]);
    assert_eq!(p.snapshot_ids(), vec!["snap-a".to_string(), "snap-b".to_string()]);
}

#[test]
fn orphan_snapshot_depends_on_origin_presence() {
    let orphan = Snapshot {
        id: "snap-o".into(),
        state: "completed".into(),
        description: "Created by CreateImage(i-x) for ami-999 from vol-y".into(),
        volume_size: 30,
        owner_id: None,
    };
    let mut inv = Inventory { images: vec![img("ami-1", 1, FRONT, &[])], snapshots: vec![orphan], ..Default::default() };
    let p = run(&inv, 4);
    assert_eq!(p.orphans.len(), 1);
    assert_eq!(p.orphans[0].snapshot_id, "snap-o");
    assert_eq!(p.snapshot_ids(), vec!["snap-o".to_string()]);

    inv.images.push(img("ami-999", 2, &[], &[]));
    assert!(run(&inv, 4).orphans.is_empty());
}

#[test]
fn forced_ids_bypass_grouping_but_not_protection() {
    let inv = Inventory {
        images: vec![img("ami-1", 1, &[], &["snap-1"]), img("ami-2", 2, FRONT, &[]), img("ami-3", 3, FRONT, &[])],
        instances: vec![running("ami-3")],
        ..Default::default()
    };
    let c = CleanupConfig {
        from_ids: vec!["ami-1".into(), "ami-3".into(), "ami-404".into(), "ami-1".into()],
        ..Default::default()
    };
    let p = plan(&inv, &c, day(28)).unwrap();
    assert!(p.groups.is_empty());
    assert_eq!(p.image_ids(), vec!["ami-1"]);
    assert_eq!(p.forced[0].snapshot_ids, vec!["snap-1".to_string()]);
}

#[test]
fn groups_are_reduced_independently() {
    let back: &[(&str, &str)] = &[("environment", "prod"), ("role", "back")];
    let inv = Inventory {
        images: vec![
            img("ami-f1", 1, FRONT, &[]),
            img("ami-b1", 2, back, &[]),
            img("ami-f2", 3, FRONT, &[]),
            img("ami-b2", 4, back, &[]),
        ],
        ..Default::default()
    };
    let p = run(&inv, 1);
    let keys: Vec<_> = p.groups.iter().map(|g| g.key.to_string()).collect();
    assert_eq!(keys, vec!["back.prod", "dev.front"]);
    assert_eq!(p.groups[0].candidates[0].id, "ami-b1");
    assert_eq!(p.groups[1].candidates[0].id, "ami-f1");
}

#[test]
fn rerun_on_frozen_inventory_is_identical() {
    let inv = Inventory {
        images: (1..=5).map(|d| img(&format!("ami-{}", d), d, FRONT, &[])).collect(),
        instances: vec![running("ami-3")],
        ..Default::default()
    };
    assert_eq!(run(&inv, 2), run(&inv, 2));
}

#[test]
fn invalid_configuration_fails_before_grouping() {
    let c = CleanupConfig { mapping: amiclean_core::MappingConfig { values: vec![], ..Default::default() }, ..Default::default() };
    assert!(plan(&Inventory::default(), &c, day(1)).is_err());
}

#[test]
fn reduce_candidates_are_subset_of_zero_retention() {
    let images: Vec<Image> = [5, 1, 3, 2, 4].iter().map(|d| img(&format!("ami-{}", d), *d, FRONT, &[])).collect();
    let members: Vec<&Image> = images.iter().collect();
    let none = ImageIdSet::default();
    let all: Vec<String> = reduce(&members, &none, 0).iter().map(|i| i.id.clone()).collect();
    assert_eq!(all, vec!["ami-5", "ami-4", "ami-3", "ami-2", "ami-1"]);
    let kept: Vec<String> = reduce(&members, &none, 3).iter().map(|i| i.id.clone()).collect();
    assert_eq!(kept, vec!["ami-2", "ami-1"]);
}

#[test]
fn shared_snapshots_are_listed_once_in_first_seen_order() {
    let orphan = Snapshot {
        id: "snap-shared".into(),
        state: "completed".into(),
        description: "Created by CreateImage(i-x) for ami-gone from vol-y".into(),
        volume_size: 8,
        owner_id: None,
    };
    let inv = Inventory {
        images: vec![
            img("ami-1", 1, FRONT, &["snap-b", "snap-shared"]),
            img("ami-2", 2, FRONT, &["snap-shared", "snap-a"]),
            img("ami-3", 3, FRONT, &[]),
        ],
        snapshots: vec![orphan],
        ..Default::default()
    };
    let p = run(&inv, 1);
    assert_eq!(p.image_ids(), vec!["ami-2", "ami-1"]);
    // still mapped by a candidate, so not reported as an orphan
    assert!(p.orphans.is_empty());
    assert_eq!(p.snapshot_ids(), vec!["snap-shared".to_string(), "snap-a".to_string(), "snap-b".to_string()]);
    assert_eq!(p.groups[0].retained.len(), 1);
    assert_eq!(p.groups[0].retained[0].id, "ami-3");
}
