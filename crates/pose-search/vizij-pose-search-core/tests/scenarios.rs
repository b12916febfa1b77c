use std::sync::Arc;

use approx::assert_relative_eq;
use vizij_pose_search_core::{
    build_sequence_index, search, ClipChain, FeatureDesc, FeatureDomain, FeatureType,
    FeatureVectorReader, HistoryConfig, IndexingConfig, KeyframedClip, PoseHistory,
    PreprocessPolicy, SamplingRange, SchemaConfig, SequenceSampler, Skeleton, SkeletonDef,
    Transform, TransformKey,
};

fn sampler(clip: KeyframedClip) -> SequenceSampler {
    let mut sampler = SequenceSampler::new(Arc::new(clip), 60);
    sampler.process();
    sampler
}

fn skeleton() -> Arc<dyn Skeleton> {
    Arc::new(SkeletonDef::chain(&["root"]))
}

#[test]
fn constant_root_motion_indexes_linear_trajectory() {
    // 2 s at 100 units/s; the offset-0 sample sits at the origin of every row,
    // so the absolute motion is read back through the resolver and the
    // future-offset feature carries the 100 * t slope.
    let clip = KeyframedClip::linear_root_motion("forward", 2.0, 1, [100.0, 0.0, 0.0]);
    let main = sampler(clip.clone());
    let chain = ClipChain::new(&main);
    for &t in &[0.0f32, 0.5, 1.0, 1.5, 2.0] {
        let info = chain.get_sample_info(t);
        assert!(!info.clamped);
        assert_relative_eq!(info.root_transform.translation.x, 100.0 * t, epsilon = 1e-2);
        assert_relative_eq!(info.root_distance, 100.0 * t, epsilon = 1e-2);
    }

    let schema = Arc::new(
        SchemaConfig {
            trajectory_sample_times: vec![0.0, 0.5],
            preprocessor: PreprocessPolicy::None,
            ..SchemaConfig::default()
        }
        .finalize(Some(skeleton()))
        .expect("schema"),
    );
    let index = build_sequence_index(
        Arc::new(clip),
        Arc::clone(&schema),
        SamplingRange::WHOLE_CLIP,
        &IndexingConfig::default(),
    )
    .expect("index");
    assert_eq!(index.num_poses(), 61);

    let now = FeatureDesc::trajectory(0, FeatureType::Position, FeatureDomain::Time);
    let ahead = FeatureDesc::trajectory(1, FeatureType::Position, FeatureDomain::Time);
    for pose_idx in [0usize, 15, 30, 45, 60] {
        let values = index.get_pose_values(pose_idx).expect("pose");
        let reader = FeatureVectorReader::new(schema.layout(), values).expect("reader");
        assert_relative_eq!(reader.get_position(&now).expect("now").x, 0.0, epsilon = 1e-3);
        assert_relative_eq!(reader.get_position(&ahead).expect("ahead").x, 50.0, epsilon = 1e-2);
        assert_relative_eq!(
            reader.get_linear_velocity(&now).expect("velocity").x,
            100.0,
            epsilon = 0.5
        );
    }
}

#[test]
fn history_interpolates_between_bracketing_knots() {
    let mut history = PoseHistory::new(HistoryConfig {
        capacity: 64,
        time_horizon: 1.0,
    })
    .expect("history");
    let dt = 1.0 / 30.0;
    let speed = 60.0;
    let local = [Transform::identity()];
    for tick in 0..=90 {
        let root = Transform::translation(speed * dt * tick as f32, 0.0, 0.0);
        history.update(dt, &local, &root);
    }

    let knots: Vec<f32> = history.knots().collect();
    assert!(knots.windows(2).all(|w| w[0] > w[1]));
    assert!(knots[0] >= 1.0);
    let next = knots.partition_point(|&k| k > 0.5);
    assert!(next > 0 && next < knots.len());
    assert!(knots[next - 1] > 0.5 && knots[next] <= 0.5);

    let sampled = history.try_sample_root_time_based(0.5).expect("covered");
    assert_relative_eq!(sampled.translation.x, -speed * 0.5, epsilon = 1e-2);
}

#[test]
fn follow_up_absorbs_time_past_main_end() {
    let a = sampler(KeyframedClip::linear_root_motion("a", 2.0, 1, [250.0, 0.0, 0.0]));
    let b = sampler(KeyframedClip::linear_root_motion("b", 1.0, 1, [0.0, 100.0, 0.0]));
    assert_relative_eq!(a.total_root_distance(), 500.0, epsilon = 1e-2);

    let chain = ClipChain::new(&a).with_follow_up(Some(&b));
    let info = chain.get_sample_info(a.play_length() + 0.1);
    assert!(std::ptr::eq(info.clip, &b));
    assert!(!info.clamped);
    assert_relative_eq!(info.clip_time, 0.1, epsilon = 1e-5);
    assert_relative_eq!(info.root_transform.translation.x, 500.0, epsilon = 1e-2);
    assert_relative_eq!(info.root_transform.translation.y, 10.0, epsilon = 1e-2);
    assert_relative_eq!(info.root_distance, 510.0, epsilon = 1e-1);
}

#[test]
fn search_finds_stored_pose() {
    let schema = Arc::new(
        SchemaConfig {
            sample_rate: 1,
            trajectory_sample_times: vec![0.0, 1.0],
            ..SchemaConfig::default()
        }
        .finalize(Some(skeleton()))
        .expect("schema"),
    );
    // accelerating root so each of the three poses is distinct
    let clip = KeyframedClip::new("accelerate", 2.0, 1)
        .with_root_key(TransformKey::at(0.0, [0.0; 3]))
        .with_root_key(TransformKey::at(1.0, [10.0, 0.0, 0.0]))
        .with_root_key(TransformKey::at(2.0, [60.0, 0.0, 0.0]));
    let index = build_sequence_index(
        Arc::new(clip),
        schema,
        SamplingRange::WHOLE_CLIP,
        &IndexingConfig::default(),
    )
    .expect("index");
    assert_eq!(index.num_poses(), 3);

    let query = index.get_pose_values(1).expect("pose 1").to_vec();
    for _ in 0..3 {
        let result = search(&index, &query, None, None)
            .expect("search")
            .expect("non-empty index");
        assert_eq!(result.pose_idx, 1);
        assert!(result.dissimilarity.abs() < 1e-6);
        assert_relative_eq!(result.time_offset_seconds, 1.0);
    }
}
