//! # Trajectory Planner Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use gnc_lib::traj_plan::{Obstacle, Params, TrajPlanner};
use nalgebra::Vector3;

fn traj_plan_benchmark(c: &mut Criterion) {
    // ---- Build the planner and scenes ----

    let planner = TrajPlanner::new(Params {
        save_reports: false,
        ..Params::default()
    });

    let start = Vector3::new(0.0, 0.0, 0.0);
    let goal = Vector3::new(40.0, 0.0, 0.0);

    // One obstacle sat on the straight line
    let single = vec![Obstacle::from_sphere(Vector3::new(20.0, 0.0, 0.0), 3.0, false)];

    // A wall of boxes across the line with a gap at one end, forcing the expensive fallbacks
    let wall: Vec<Obstacle> = (-4..4)
        .map(|i| Obstacle {
            position_m: Vector3::new(20.0, 3.0 * i as f64, 0.0),
            half_extents_m: Vector3::new(1.0, 1.5, 8.0),
            is_target: false,
        })
        .collect();

    // A loose field of debris
    let field: Vec<Obstacle> = (0..30)
        .map(|i| {
            let f = i as f64;
            Obstacle::from_sphere(
                Vector3::new(
                    5.0 + 1.1 * f,
                    6.0 * (0.7 * f).sin(),
                    4.0 * (1.3 * f).cos(),
                ),
                1.0,
                false,
            )
        })
        .collect();

    // ---- Benchmarks ----

    c.bench_function("traj_plan direct", |b| {
        b.iter(|| planner.calculate_avoidance_waypoints(black_box(&start), &goal, &[], 1.5))
    });

    c.bench_function("traj_plan single obstacle", |b| {
        b.iter(|| planner.calculate_avoidance_waypoints(black_box(&start), &goal, &single, 1.5))
    });

    c.bench_function("traj_plan wall", |b| {
        b.iter(|| planner.calculate_avoidance_waypoints(black_box(&start), &goal, &wall, 1.5))
    });

    c.bench_function("traj_plan debris field", |b| {
        b.iter(|| planner.calculate_avoidance_waypoints(black_box(&start), &goal, &field, 1.0))
    });
}

criterion_group!(benches, traj_plan_benchmark);
criterion_main!(benches);
