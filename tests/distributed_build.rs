//! Two-level STR builds over the in-process communicator.

use neurospace::cancel;
use neurospace::distributed::{
    distributed_partition, two_level_str_heuristic, Communicator, DirStorage, ThreadComm,
};
use neurospace::{
    Box3D, GeometryMode, IndexError, MorphoEntry, Point3D, Soma, SpatialQueries, TreeEntry,
};

fn rank_somas(rank: usize, per_rank: usize) -> Vec<MorphoEntry> {
    // Deterministic, scattered over a cube, distinct gids across ranks.
    (0..per_rank)
        .map(|i| {
            let gid = (rank * per_rank + i) as u64;
            let h = gid.wrapping_mul(0x9e3779b97f4a7c15);
            let coord = |shift: u32| ((h >> shift) % 200) as neurospace::CoordType - 100.0;
            MorphoEntry::Soma(
                Soma::new(gid, Point3D::new(coord(0), coord(20), coord(40)), 1.0).unwrap(),
            )
        })
        .collect()
}

fn center_coord(entry: &MorphoEntry, axis: usize) -> neurospace::CoordType {
    entry.center().coord(axis)
}

#[test]
fn four_rank_build_produces_complete_directory() {
    let dir = tempfile::tempdir().unwrap();
    let storage_dir = dir.path().join("circuit_index");
    let storage = DirStorage::new(&storage_dir).unwrap();

    let n_ranks = 4usize;
    let per_rank = 400usize;
    let params = two_level_str_heuristic(n_ranks * per_rank, 100, n_ranks);

    cancel::clear_cancel();
    let results = ThreadComm::run(n_ranks, |comm| {
        let values = rank_somas(comm.rank(), per_rank);
        distributed_partition(&storage, values, &params, &comm, &center_coord)
    });
    for result in results {
        result.unwrap();
    }

    assert!(storage.is_complete());
    let top = storage.load_top_tree().unwrap();

    let n_local_parts = params.local.n_parts_per_dim.iter().product::<usize>();
    assert_eq!(top.len(), n_ranks * n_local_parts);

    // Element counts across subtrees cover the whole data set exactly.
    let mut total = 0usize;
    let mut seen_gids = Vec::new();
    for k in 0..top.len() {
        let subtree = storage.load_subtree::<MorphoEntry>(k).unwrap();
        total += subtree.len();
        for entry in subtree.iter() {
            if let MorphoEntry::Soma(s) = entry {
                seen_gids.push(s.id.gid());
            }
        }

        // The top-level tree knows this subtree's bounds.
        if let Some(bounds) = subtree.bounds() {
            let hits = top.find_intersecting(&bounds, GeometryMode::BoundingBox);
            assert!(hits.iter().any(|b| b.id.id == k as u64));
        }
    }
    assert_eq!(total, n_ranks * per_rank);
    seen_gids.sort_unstable();
    seen_gids.dedup();
    assert_eq!(seen_gids.len(), n_ranks * per_rank);

    // Any subtree can be queried standalone.
    let standalone = storage.load_subtree::<MorphoEntry>(0).unwrap();
    let bounds = standalone.bounds().unwrap();
    assert!(standalone.is_intersecting(&bounds, GeometryMode::BoundingBox));
}

#[test]
fn too_few_elements_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let storage = DirStorage::new(dir.path().join("sparse")).unwrap();

    let n_ranks = 2usize;
    let params = two_level_str_heuristic(10, 5, n_ranks);

    cancel::clear_cancel();
    let results = ThreadComm::run(n_ranks, |comm| {
        // Fewer than 10 elements per rank for a 2-rank communicator.
        let values = rank_somas(comm.rank(), 5);
        distributed_partition(&storage, values, &params, &comm, &center_coord)
    });
    for result in results {
        assert!(matches!(result, Err(IndexError::TooFewElements { .. })));
    }
    assert!(!storage.is_complete());
}

#[test]
fn single_rank_build_works() {
    let dir = tempfile::tempdir().unwrap();
    let storage = DirStorage::new(dir.path().join("single")).unwrap();

    let params = two_level_str_heuristic(500, 64, 1);

    cancel::clear_cancel();
    let results = ThreadComm::run(1, |comm| {
        distributed_partition(&storage, rank_somas(0, 500), &params, &comm, &center_coord)
    });
    results.into_iter().for_each(|r| r.unwrap());

    assert!(storage.is_complete());
    let top = storage.load_top_tree().unwrap();
    let region = Box3D::new(Point3D::new(-100.0, -100.0, -100.0), Point3D::new(100.0, 100.0, 100.0));
    let covered: u64 = top.iter().map(|b| b.id.n_elements).sum();
    assert_eq!(covered, 500);
    assert!(top.is_intersecting(&region, GeometryMode::BoundingBox));
}
