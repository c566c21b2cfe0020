//! On-disk round-trips of whole trees.

mod support;

use neurospace::{
    GeometryMode, IndexTree, IndexedSphere, MorphoEntry, Point3D, SpatialQueries, Sphere,
    STRUCT_VERSION,
};
use support::{centers, probes, RADII};

#[test]
fn indexed_sphere_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spheres.idx");

    let spheres: Vec<IndexedSphere> = centers()
        .iter()
        .zip(RADII)
        .enumerate()
        .map(|(i, (&c, r))| IndexedSphere::new(i as u64, c, r).unwrap())
        .collect();
    let tree = IndexTree::from_entries(spheres);
    tree.dump(&path).unwrap();

    let loaded = IndexTree::<IndexedSphere>::load(&path).unwrap();

    let mut before = tree.all_ids();
    let mut after = loaded.all_ids();
    before.sort_unstable();
    after.sort_unstable();
    assert_eq!(before, after);

    // Identical query answers on the fixed probe set, in both modes.
    for probe in probes() {
        for mode in [GeometryMode::BoundingBox, GeometryMode::BestEffort] {
            let mut a = tree.find_intersecting_ids(&probe, mode);
            let mut b = loaded.find_intersecting_ids(&probe, mode);
            a.sort_unstable();
            b.sort_unstable();
            assert_eq!(a, b);
        }
    }
}

#[test]
fn large_morpho_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("morpho.idx");

    let tree = IndexTree::from_entries(support::random_somas(2000, 99));
    tree.dump(&path).unwrap();
    let loaded = IndexTree::<MorphoEntry>::load(&path).unwrap();

    assert_eq!(tree.len(), loaded.len());
    let probe = Sphere::new(Point3D::new(10.0, -20.0, 30.0), 40.0);
    assert_eq!(
        tree.count_intersecting(&probe, GeometryMode::BestEffort),
        loaded.count_intersecting(&probe, GeometryMode::BestEffort)
    );
}

#[test]
fn future_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.idx");

    // Hand-craft a header one version ahead of this build.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"NEUROSPC");
    bytes.extend_from_slice(&(STRUCT_VERSION + 1).to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();

    let err = IndexTree::<IndexedSphere>::load(&path).unwrap_err();
    assert!(err.to_string().contains("future format"));
}
