#![allow(dead_code)]

use neurospace::{CoordType, MorphoEntry, Point3D, Soma, Sphere};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Centres shared by the scenario tests.
pub fn centers() -> [Point3D; 3] {
    [
        Point3D::new(0.0, 0.0, 0.0),
        Point3D::new(10.0, 0.0, 0.0),
        Point3D::new(20.0, 0.0, 0.0),
    ]
}

/// Second capsule endpoints, matching `centers` element-wise.
pub fn centers2() -> [Point3D; 3] {
    [
        Point3D::new(0.0, 5.0, 0.0),
        Point3D::new(10.0, 5.0, 0.0),
        Point3D::new(20.0, 5.0, 0.0),
    ]
}

pub const RADII: [CoordType; 3] = [2.0, 2.5, 4.0];

pub const PROBE_RADIUS: CoordType = 2.0;

/// The four probe spheres: intersecting, non-intersecting, sphere-only,
/// cylinder-only.
pub fn probes() -> [Sphere; 4] {
    [
        Sphere::new(Point3D::new(15.0, 0.0, 0.0), PROBE_RADIUS),
        Sphere::new(Point3D::new(5.0, 0.0, 0.0), PROBE_RADIUS),
        Sphere::new(Point3D::new(0.0, -3.0, 0.0), PROBE_RADIUS),
        Sphere::new(Point3D::new(0.0, 6.0, 0.0), PROBE_RADIUS),
    ]
}

/// Seeded random somas spread over a cube.
pub fn random_somas(n: usize, seed: u64) -> Vec<MorphoEntry> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let p = Point3D::new(
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
            );
            let r = rng.gen_range(0.1..2.0);
            MorphoEntry::Soma(Soma::new(i as u64, p, r).expect("valid soma"))
        })
        .collect()
}
