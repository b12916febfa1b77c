use std::sync::Arc;

use nalgebra::Vector3;
use vizij_pose_search_core::{
    build_query, compare_poses, search, AnimationClip, Database, DatabaseSequence, HistoryConfig,
    IndexingConfig, KeyframedClip, MirrorOption, PoseHistory, PreprocessPolicy, Schema,
    SchemaConfig, Skeleton, SkeletonDef, Trajectory, Transform,
};

fn load_schema(name: &str) -> Arc<Schema> {
    let (config, skeleton): (SchemaConfig, Option<SkeletonDef>) =
        vizij_test_fixtures::schemas::load_with_skeleton(name).expect("load schema fixture");
    let skeleton = skeleton.map(|s| Arc::new(s) as Arc<dyn Skeleton>);
    Arc::new(config.finalize(skeleton).expect("finalize schema fixture"))
}

fn load_clip(name: &str) -> Arc<KeyframedClip> {
    Arc::new(vizij_test_fixtures::clips::load(name).expect("load clip fixture"))
}

fn locomotion_database(schema: Arc<Schema>) -> Database {
    Database::new(schema)
        .with_sequence(
            DatabaseSequence::new(load_clip("walk-forward")).with_mirror(MirrorOption::Both),
        )
        .with_sequence(DatabaseSequence::new(load_clip("idle")))
        .with_sequence(DatabaseSequence::new(load_clip("turn-left")))
}

#[test]
fn fixtures_parse() {
    for name in vizij_test_fixtures::clips::keys() {
        let json = vizij_test_fixtures::clips::json(&name).expect("clip json");
        let clip = KeyframedClip::from_json_str(&json).expect("parse clip");
        assert!(clip.play_length() > 0.0, "{name}");
    }
    for name in vizij_test_fixtures::schemas::keys() {
        let json = vizij_test_fixtures::schemas::json(&name).expect("schema json");
        let config = SchemaConfig::from_json_str(&json).expect("parse schema");
        assert!(!config.bones.is_empty(), "{name}");
    }
    let skeleton: SkeletonDef = vizij_test_fixtures::skeletons::load("biped").expect("skeleton");
    assert_eq!(skeleton.num_bones(), 4);
    assert_eq!(skeleton.find_bone("foot_r"), Some(3));
    assert_eq!(skeleton.mirror_bone(2), 3);
}

#[test]
fn locomotion_index_layout() {
    let schema = load_schema("locomotion");
    // 4 trajectory samples + 2 bones, each with position and velocity
    assert_eq!(schema.num_floats(), (4 + 2) * 6);

    let db = locomotion_database(Arc::clone(&schema));
    assert!(db.is_valid_for_indexing());
    let index = db.build_index(&IndexingConfig::default()).expect("build");
    assert!(db.is_valid_for_search(&index));

    let sequences = index.sequences();
    assert_eq!(sequences.len(), 4);
    assert_eq!(
        sequences.iter().map(|s| (s.sequence_idx, s.mirrored)).collect::<Vec<_>>(),
        vec![(0, false), (0, true), (1, false), (2, false)]
    );
    assert_eq!(sequences[0].num_poses, 31);
    assert_eq!(sequences[2].num_poses, 61);
    assert_eq!(index.num_poses(), 31 + 31 + 61 + 31);
}

#[test]
fn stored_turn_pose_matches_itself() {
    let schema = load_schema("locomotion");
    let db = locomotion_database(schema);
    let index = db.build_index(&IndexingConfig::default()).expect("build");

    let turn = &index.sequences()[3];
    let pose_idx = turn.first_pose_idx + 10;
    let query = index.get_pose_values(pose_idx).expect("pose").to_vec();
    let weights = index.schema().feature_weights();

    let result = search(&index, &query, Some(&weights), None)
        .expect("search")
        .expect("match");
    assert_eq!(result.pose_idx, pose_idx);
    assert!(result.dissimilarity < 1e-6);
    assert_eq!(
        compare_poses(&index, pose_idx, &query, Some(&weights)).expect("compare"),
        result.dissimilarity
    );

    let playable = db.find_sequence_for_pose(&index, pose_idx).expect("playable");
    assert_eq!(playable.sequence.main.name(), "turn_left");
    assert!((playable.time - 10.0 / 30.0).abs() < 1e-5);
    assert_eq!(
        db.get_pose_index_from_asset_time(&index, 3, playable.time),
        Some(pose_idx)
    );
}

#[test]
fn stationary_history_matches_idle() {
    let schema = load_schema("locomotion");
    let db = locomotion_database(Arc::clone(&schema));
    let index = db.build_index(&IndexingConfig::default()).expect("build");

    let idle = load_clip("idle");
    let mut history = PoseHistory::new(HistoryConfig::default()).expect("history");
    let mut local = Vec::new();
    let dt = 1.0 / 30.0;
    for tick in 0..60 {
        idle.extract_pose(tick as f32 * dt, &mut local);
        history.update(dt, &local, &Transform::identity());
    }
    let trajectory = Trajectory::constant_velocity(Vector3::zeros(), 0.0, 1.0, 0.1);

    let query = build_query(&index, &history, Some(&trajectory)).expect("query");
    let result = search(&index, &query, None, None)
        .expect("search")
        .expect("match");
    let playable = db.find_sequence_for_pose(&index, result.pose_idx).expect("playable");
    assert_eq!(playable.sequence.main.name(), "idle");
}

#[test]
fn normalize_round_trips_through_index() {
    let schema = load_schema("locomotion");
    let index = locomotion_database(Arc::clone(&schema))
        .build_index(&IndexingConfig::default())
        .expect("build");

    let raw_schema = {
        let (mut config, skeleton): (SchemaConfig, Option<SkeletonDef>) =
            vizij_test_fixtures::schemas::load_with_skeleton("locomotion").expect("fixture");
        config.preprocessor = PreprocessPolicy::None;
        let skeleton = skeleton.map(|s| Arc::new(s) as Arc<dyn Skeleton>);
        Arc::new(config.finalize(skeleton).expect("finalize"))
    };
    let raw_index = locomotion_database(raw_schema)
        .build_index(&IndexingConfig::default())
        .expect("build raw");

    for pose_idx in (0..index.num_poses()).step_by(17) {
        let restored = index.get_pose_values_raw(pose_idx).expect("raw");
        let original = raw_index.get_pose_values(pose_idx).expect("original");
        for (a, b) in restored.iter().zip(original) {
            assert!((a - b).abs() <= 1e-3 * b.abs().max(1.0), "{a} vs {b}");
        }
    }
}

#[test]
fn sphered_index_is_searchable() {
    let schema = load_schema("locomotion-sphere");
    assert_eq!(schema.preprocessor(), PreprocessPolicy::Sphere);
    let index = Database::new(schema)
        .with_sequence(DatabaseSequence::new(load_clip("walk-forward")))
        .with_sequence(DatabaseSequence::new(load_clip("turn-left")))
        .build_index(&IndexingConfig::default())
        .expect("build");
    assert!(index.values().iter().all(|v| v.is_finite()));

    let pose_idx = index.sequences()[1].first_pose_idx + 5;
    let query = index.get_pose_values(pose_idx).expect("pose").to_vec();
    let result = search(&index, &query, None, None)
        .expect("search")
        .expect("match");
    assert!(result.dissimilarity < 1e-6);
}
