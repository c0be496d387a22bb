use criterion::{criterion_group, criterion_main, Criterion};

use llol_odom::lidar_model::LidarModel;
use llol_odom::pano::{DepthPano, PanoConfig};
use llol_odom::sweep::{LidarScan, LidarSweep};
use llol_odom::transform::Pose3F32;
use nalgebra::UnitQuaternion;
use ndarray::Array3;

fn flat_scan(width: usize, height: usize, range: f32) -> LidarScan {
    let mut pixels = Array3::zeros((height, width, 4));
    for r in 0..height {
        for c in 0..width {
            pixels[(r, c, 0)] = range;
            pixels[(r, c, 3)] = range;
        }
    }
    LidarScan { pixels, col_range: 0..width, t0: 0.0, dt: 1e-4 }
}

fn full_sweep(width: usize, height: usize, range: f32) -> LidarSweep {
    let mut sweep = LidarSweep::new(width, height);
    sweep.add(&flat_scan(width, height, range)).expect("flat scan fits the sweep");
    sweep
}

fn pano_add_benchmark(c: &mut Criterion) {
    let width = 1024;
    let height = 64;
    let model = LidarModel::with_vfov(width, height, 45f32.to_radians());
    let sweep = full_sweep(width, height, 5.0);

    c.bench_function("pano add full 1024x64 sweep", |b| {
        b.iter(|| {
            let mut pano = DepthPano::new(model.clone(), PanoConfig::default());
            pano.add(&sweep, 0..width, 0);
        });
    });
}

fn pano_render_benchmark(c: &mut Criterion) {
    let width = 1024;
    let height = 64;
    let model = LidarModel::with_vfov(width, height, 45f32.to_radians());
    let sweep = full_sweep(width, height, 5.0);

    let mut pano = DepthPano::new(model, PanoConfig::default());
    pano.add(&sweep, 0..width, 0);

    let shift = Pose3F32::new(&nalgebra::Vector3::new(0.2, 0.0, 0.0), UnitQuaternion::identity());

    c.bench_function("pano render 1024x64 after translation", |b| {
        b.iter(|| {
            pano.render(&shift, 0);
        });
    });
}

criterion_group!(benches, pano_add_benchmark, pano_render_benchmark);
criterion_main!(benches);
