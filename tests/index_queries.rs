//! Query behaviour over sphere, cylinder and morphology trees.

mod support;

use neurospace::{
    Cylinder, GeometryMode, IndexTree, IndexedSphere, MorphIds, MorphoEntry, Point3D, Segment,
    Soma, SpatialQueries, Sphere,
};
use support::{centers, centers2, probes, PROBE_RADIUS, RADII};

fn probe_answers<T, N>(tree: &N) -> [bool; 4]
where
    T: neurospace::TreeEntry,
    N: SpatialQueries<T>,
{
    let probes = probes();
    [
        tree.is_intersecting(&probes[0], GeometryMode::BestEffort),
        tree.is_intersecting(&probes[1], GeometryMode::BestEffort),
        tree.is_intersecting(&probes[2], GeometryMode::BestEffort),
        tree.is_intersecting(&probes[3], GeometryMode::BestEffort),
    ]
}

fn probe_gids(tree: &IndexTree<MorphoEntry>) -> [Vec<u64>; 4] {
    probes().map(|probe| {
        let mut gids: Vec<u64> = tree
            .find_intersecting_gid_segm(&probe, GeometryMode::BestEffort)
            .into_iter()
            .map(|g| g.gid)
            .collect();
        gids.sort_unstable();
        gids.dedup();
        gids
    })
}

#[test]
fn basic_sphere_tree() {
    let spheres: Vec<Sphere> = centers()
        .iter()
        .zip(RADII)
        .map(|(&c, r)| Sphere::new(c, r))
        .collect();
    let tree = IndexTree::from_entries(spheres);

    assert_eq!(probe_answers(&tree), [true, false, true, false]);
}

#[test]
fn basic_cylinder_tree() {
    let cylinders: Vec<Cylinder> = centers()
        .iter()
        .zip(centers2())
        .zip(RADII)
        .map(|((&c, c2), r)| Cylinder::new(c, c2, r))
        .collect();
    let tree = IndexTree::from_entries(cylinders);

    assert_eq!(probe_answers(&tree), [true, false, false, true]);
}

#[test]
fn indexed_sphere_tree_ids() {
    let spheres: Vec<IndexedSphere> = centers()
        .iter()
        .zip(RADII)
        .enumerate()
        .map(|(i, (&c, r))| IndexedSphere::new(i as u64, c, r).unwrap())
        .collect();
    let tree = IndexTree::from_entries(spheres);

    let expected: [&[u64]; 4] = [&[2], &[], &[0], &[]];
    for (probe, want) in probes().iter().zip(expected) {
        let mut ids = tree.find_intersecting_ids(probe, GeometryMode::BestEffort);
        ids.sort_unstable();
        assert_eq!(ids, want);
    }
}

#[test]
fn mixed_morpho_tree() {
    let somas: Vec<MorphoEntry> = centers()
        .iter()
        .zip(RADII)
        .enumerate()
        .map(|(i, (&c, r))| MorphoEntry::Soma(Soma::new(i as u64, c, r).unwrap()))
        .collect();
    let mut tree = IndexTree::from_entries(somas);

    tree.insert(MorphoEntry::Segment(
        Segment::new(10, 0, 0, centers()[0], centers2()[0], RADII[0]).unwrap(),
    ));

    assert_eq!(probe_answers(&tree), [true, false, true, true]);
    let expected: [&[u64]; 4] = [&[2], &[], &[0], &[10]];
    for (got, want) in probe_gids(&tree).iter().zip(expected) {
        assert_eq!(got, want);
    }

    // A long, fat segment across all probe geometries changes every answer.
    tree.insert(MorphoEntry::Segment(
        Segment::new(20, 0, 0, centers()[0], centers()[2], 10.0).unwrap(),
    ));

    assert_eq!(probe_answers(&tree), [true, true, true, true]);
    let expected: [&[u64]; 4] = [&[2, 20], &[20], &[0, 20], &[10, 20]];
    for (got, want) in probe_gids(&tree).iter().zip(expected) {
        assert_eq!(got, want);
    }
}

#[test]
fn count_equals_find_everywhere() {
    let somas: Vec<MorphoEntry> = support::random_somas(500, 42);
    let tree = IndexTree::from_entries(somas);

    for probe_r in [1.0, 10.0, 50.0] {
        for x in [-50.0, 0.0, 50.0] {
            let probe = Sphere::new(Point3D::new(x, 0.0, 0.0), probe_r);
            for mode in [GeometryMode::BoundingBox, GeometryMode::BestEffort] {
                assert_eq!(
                    tree.count_intersecting(&probe, mode),
                    tree.find_intersecting(&probe, mode).len()
                );
            }
        }
    }
}

#[test]
fn agg_gid_values_sum_to_total() {
    let somas = support::random_somas(300, 7);
    let tree = IndexTree::from_entries(somas);

    let probe = Sphere::new(Point3D::new(0.0, 0.0, 0.0), 60.0);
    let per_gid = tree.count_intersecting_agg_gid(&probe, GeometryMode::BestEffort);
    let total = tree.count_intersecting(&probe, GeometryMode::BestEffort);
    assert_eq!(per_gid.values().sum::<usize>(), total);
}

#[test]
fn nearest_neighbours_ascend() {
    let somas: Vec<MorphoEntry> = (0..10)
        .map(|i| {
            MorphoEntry::Soma(
                Soma::new(5 + i, Point3D::new(i as neurospace::CoordType, 0.0, 0.0), 1.0).unwrap(),
            )
        })
        .collect();
    let tree = IndexTree::from_entries(somas);

    let hits = tree.find_nearest(&Point3D::new(5.0, 0.0, 0.0), 3);
    let mut gids: Vec<u64> = hits.iter().map(|h| h.gid_segm().gid).collect();
    gids.sort_unstable();
    assert_eq!(gids, vec![9, 10, 11]);
}

#[test]
fn non_overlap_placement_advances() {
    let spheres: Vec<Sphere> = centers()
        .iter()
        .zip(RADII)
        .map(|(&c, r)| Sphere::new(c, r))
        .collect();
    let mut tree = IndexTree::from_entries(spheres);

    let region = neurospace::Box3D::new(
        Point3D::new(0.0, 0.0, -2.0),
        Point3D::new(20.0, 5.0, 2.0),
    );

    let mut first = Sphere::new(Point3D::new(0.0, 0.0, 0.0), PROBE_RADIUS);
    assert!(tree.place(&region, &mut first));
    assert!(first.centroid.x > 1.0);

    // The placed sphere is part of the index now: the next call must land
    // strictly further along the scan axis.
    let mut second = Sphere::new(Point3D::new(0.0, 0.0, 0.0), PROBE_RADIUS);
    assert!(tree.place(&region, &mut second));
    assert!(second.centroid.x > first.centroid.x);
}

#[test]
fn bounding_box_mode_admits_cylinder_false_positives() {
    let cylinders = vec![Cylinder::new(
        Point3D::new(0.0, 0.0, 0.0),
        Point3D::new(0.0, 5.0, 0.0),
        2.0,
    )];
    let tree = IndexTree::from_entries(cylinders);

    // Probe near the capsule's bounding box corner: inside the box, outside
    // the capsule.
    let probe = Sphere::new(Point3D::new(0.0, -3.0, 0.0), 2.0);
    assert!(tree.is_intersecting(&probe, GeometryMode::BoundingBox));
    assert!(!tree.is_intersecting(&probe, GeometryMode::BestEffort));
}

#[test]
fn geometry_entry_tree_mixes_shapes() {
    let mut tree: IndexTree<neurospace::GeometryEntry> = IndexTree::from_entries(
        centers()
            .iter()
            .zip(RADII)
            .map(|(&c, r)| neurospace::GeometryEntry::Sphere(Sphere::new(c, r)))
            .collect(),
    );
    tree.insert(neurospace::GeometryEntry::Cylinder(Cylinder::new(
        centers()[0],
        centers2()[0],
        RADII[0],
    )));

    assert_eq!(probe_answers(&tree), [true, false, true, true]);
}
