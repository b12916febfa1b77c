//! Linear search scan and index build throughput.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use vizij_pose_search_core::{
    search, Database, DatabaseSequence, IndexingConfig, KeyframedClip, SchemaConfig, Skeleton,
    SkeletonDef, TransformKey,
};

fn schema() -> Arc<vizij_pose_search_core::Schema> {
    let skeleton: Arc<dyn Skeleton> = Arc::new(SkeletonDef::chain(&["root", "spine", "hand"]));
    let cfg = SchemaConfig {
        bones: vec!["spine".into(), "hand".into()],
        trajectory_sample_times: vec![-0.3, 0.0, 0.3, 0.6, 1.0],
        ..SchemaConfig::default()
    };
    Arc::new(cfg.finalize(Some(skeleton)).expect("bench schema"))
}

fn database(num_clips: usize) -> Database {
    let mut db = Database::new(schema());
    for i in 0..num_clips {
        let speed = 50.0 + 10.0 * i as f32;
        let clip = KeyframedClip::linear_root_motion(format!("walk_{i}"), 4.0, 3, [speed, 0.0, 0.0])
            .with_bone_key(2, TransformKey::at(0.0, [0.0, 20.0, 0.0]))
            .with_bone_key(2, TransformKey::at(2.0, [0.0, 20.0, 15.0 + i as f32]))
            .with_bone_key(2, TransformKey::at(4.0, [0.0, 20.0, 0.0]));
        db.add_sequence(DatabaseSequence::new(Arc::new(clip)));
    }
    db
}

fn bench_search_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_scan");
    let config = IndexingConfig::default();

    for &num_clips in &[4usize, 16, 64] {
        let index = database(num_clips)
            .build_index(&config)
            .expect("bench index");
        let query = index
            .get_pose_values(index.num_poses() / 2)
            .expect("bench query")
            .to_vec();

        group.throughput(Throughput::Elements(index.num_poses() as u64));
        group.bench_with_input(
            BenchmarkId::new("poses", index.num_poses()),
            &(&index, &query),
            |b, (index, query)| b.iter(|| black_box(search(index, query, None, None))),
        );
    }
    group.finish();
}

fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");
    group.sample_size(10);

    for parallel in [false, true] {
        let db = database(16);
        let config = IndexingConfig {
            parallel,
            ..IndexingConfig::default()
        };
        group.bench_function(if parallel { "parallel" } else { "sequential" }, |b| {
            b.iter(|| black_box(db.build_index(&config)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_search_scan, bench_index_build);
criterion_main!(benches);
