//! Counting and per-gid aggregation over synapse trees.

mod support;

use neurospace::{Box3D, GeometryMode, IndexTree, Point3D, SpatialQueries, Synapse};
use support::centers;

fn synapse_tree() -> IndexTree<Synapse> {
    // (syn_id, post_gid, pre_gid) at the three scenario centres.
    let ids = [(0u64, 1u64, 0u64), (1, 2, 1), (2, 2, 1)];
    let entries: Vec<Synapse> = ids
        .iter()
        .zip(centers())
        .map(|(&(id, post, pre), c)| Synapse::new(id, post, pre, c))
        .collect();
    IndexTree::from_entries(entries)
}

#[test]
fn count_within_box() {
    let tree = synapse_tree();
    let query = Box3D::new(Point3D::new(-1.0, -1.0, -1.0), Point3D::new(11.0, 1.0, 1.0));
    assert_eq!(tree.count_intersecting(&query, GeometryMode::default()), 2);
}

#[test]
fn aggregate_by_post_gid() {
    let tree = synapse_tree();

    let query = Box3D::new(Point3D::new(-1.0, -1.0, -1.0), Point3D::new(11.0, 1.0, 1.0));
    let counts = tree.count_intersecting_agg_gid(&query, GeometryMode::default());
    assert_eq!(counts.get(&1), Some(&1));
    assert_eq!(counts.get(&2), Some(&1));
    assert_eq!(counts.len(), 2);

    let wider = Box3D::new(Point3D::new(-1.0, -1.0, -1.0), Point3D::new(21.0, 1.0, 1.0));
    let counts = tree.count_intersecting_agg_gid(&wider, GeometryMode::default());
    assert_eq!(counts.get(&1), Some(&1));
    assert_eq!(counts.get(&2), Some(&2));

    let total = tree.count_intersecting(&wider, GeometryMode::default());
    assert_eq!(counts.values().sum::<usize>(), total);
}

#[test]
fn synapse_ids_and_records() {
    let tree = synapse_tree();
    let query = Box3D::new(Point3D::new(-1.0, -1.0, -1.0), Point3D::new(21.0, 1.0, 1.0));

    let mut ids = tree.find_intersecting_ids(&query, GeometryMode::default());
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2]);

    let records = tree.find_intersecting_records(&query, GeometryMode::default());
    assert_eq!(records.len(), 3);
    for record in records {
        assert_eq!(record.radius, 0.0);
        assert!(record.gid == 1 || record.gid == 2);
    }
}
