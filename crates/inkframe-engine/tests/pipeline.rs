mod common;

use std::fs::{self, File};
use std::io::Read;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{
    archive_entries, document_stats, numbered_prompts, read_events, robot_prompts,
    ScriptedProvider, TestEnv, PROVIDER_COLOR,
};
use inkframe_contracts::{ComicError, PanelMode};
use inkframe_engine::canvas::{placeholder_png, PLACEHOLDER_BACKGROUND};
use inkframe_engine::{ComicPipeline, EngineKind};
use zip::ZipArchive;

#[test]
fn unconfigured_provider_yields_placeholder_bundle() {
    let env = TestEnv::new();
    let pipeline = ComicPipeline::new(env.config(EngineKind::Placeholder, PanelMode::Preview))
        .expect("pipeline");

    let run = pipeline.generate(robot_prompts()).expect("generate");

    assert_eq!(run.results.len(), 2);
    assert_eq!(
        run.results.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert!(run.results.iter().all(|r| r.used_fallback));
    assert_eq!(run.fallback_count(), 2);
    assert_eq!(
        fs::read(&run.results[0].image_path).expect("panel 1"),
        placeholder_png(1, "A robot explores a ruin").expect("placeholder")
    );

    let document_name = run
        .bundle
        .document_path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("document name")
        .to_string();
    assert_eq!(
        archive_entries(&run.bundle.archive_path),
        vec![
            "panel_01.png".to_string(),
            "panel_02.png".to_string(),
            document_name,
        ]
    );

    let (pages, images, text) = document_stats(&run.bundle.document_path);
    assert_eq!(pages, 1);
    assert_eq!(images, 2);
    assert!(text.contains("(Panel 1)"));
    assert!(text.contains("(Panel 2)"));
    assert!(text.contains("(A robot explores a ruin)"));
    assert!(!run.bundle.document_degraded);

    assert_eq!(
        env.event_types(),
        vec![
            "comic_started",
            "panel_rendered",
            "panel_rendered",
            "bundle_assembled",
            "cleanup_scheduled"
        ]
    );
    let events = read_events(pipeline.events_path());
    assert!(events
        .iter()
        .all(|event| event["request_id"] == serde_json::Value::from(run.request_id.clone())));
}

#[test]
fn wrong_panel_count_is_rejected_before_any_work() {
    let env = TestEnv::new();
    let (provider, calls) = ScriptedProvider::new(&[]);
    let pipeline = ComicPipeline::with_provider(
        env.config(EngineKind::Replicate, PanelMode::Full),
        Box::new(provider),
    );

    let err = pipeline
        .generate(numbered_prompts(3))
        .expect_err("three panels must be rejected in full mode");

    assert!(matches!(err, ComicError::Validation(_)));
    assert!(err.to_string().contains("exactly 10 panels"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(env.scope_dirs().is_empty());
    assert!(env.event_types().is_empty());
}

#[test]
fn one_failing_panel_does_not_affect_the_other() {
    let env = TestEnv::new();
    let (provider, calls) = ScriptedProvider::new(&["finds a door"]);
    let pipeline = ComicPipeline::with_provider(
        env.config(EngineKind::Replicate, PanelMode::Preview),
        Box::new(provider),
    );

    let run = pipeline.generate(robot_prompts()).expect("generate");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let summary: Vec<(u32, bool)> = run
        .results
        .iter()
        .map(|r| (r.index, r.used_fallback))
        .collect();
    assert_eq!(summary, vec![(1, false), (2, true)]);
    assert!(run.results[1]
        .fallback_reason
        .as_deref()
        .unwrap_or_default()
        .contains("refused prompt"));

    let first = image::open(&run.results[0].image_path)
        .expect("panel 1")
        .to_rgb8();
    assert_eq!(first.dimensions(), (1024, 1024));
    assert_eq!(*first.get_pixel(512, 900), PROVIDER_COLOR);
    // Dialogue bubble composited over the provider image.
    assert_ne!(*first.get_pixel(712, 112), PROVIDER_COLOR);

    let second = image::open(&run.results[1].image_path)
        .expect("panel 2")
        .to_rgb8();
    assert_eq!(*second.get_pixel(0, 0), PLACEHOLDER_BACKGROUND);

    assert_eq!(archive_entries(&run.bundle.archive_path).len(), 3);
}

#[test]
fn ten_panels_come_back_ordered_with_independent_fallbacks() {
    let env = TestEnv::new();
    let (provider, calls) = ScriptedProvider::new(&["scene 04", "scene 07"]);
    let pipeline = ComicPipeline::with_provider(
        env.config(EngineKind::HuggingFace, PanelMode::Full),
        Box::new(provider),
    );

    let run = pipeline.generate(numbered_prompts(10)).expect("generate");

    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert_eq!(
        run.results.iter().map(|r| r.index).collect::<Vec<_>>(),
        (1..=10).collect::<Vec<u32>>()
    );
    let fallbacks: Vec<u32> = run
        .results
        .iter()
        .filter(|r| r.used_fallback)
        .map(|r| r.index)
        .collect();
    assert_eq!(fallbacks, vec![4, 7]);

    let entries = archive_entries(&run.bundle.archive_path);
    assert_eq!(entries.len(), 11);
    for (offset, entry) in entries.iter().take(10).enumerate() {
        assert_eq!(entry, &format!("panel_{:02}.png", offset + 1));
    }
    assert!(entries[10].starts_with("comic_") && entries[10].ends_with(".pdf"));

    let (pages, images, text) = document_stats(&run.bundle.document_path);
    assert_eq!(pages, 3);
    assert_eq!(images, 10);
    for index in 1..=10 {
        assert!(text.contains(&format!("(Panel {index})")));
    }
}

#[test]
fn archive_round_trips_to_canonical_files() {
    let env = TestEnv::new();
    let pipeline = ComicPipeline::new(env.config(EngineKind::Placeholder, PanelMode::Preview))
        .expect("pipeline");
    let run = pipeline.generate(robot_prompts()).expect("generate");

    let file = File::open(&run.bundle.archive_path).expect("archive");
    let mut archive = ZipArchive::new(file).expect("zip");
    for result in &run.results {
        let name = format!("panel_{:02}.png", result.index);
        let mut unpacked = Vec::new();
        archive
            .by_name(&name)
            .expect("panel entry")
            .read_to_end(&mut unpacked)
            .expect("read entry");
        assert_eq!(unpacked, fs::read(&result.image_path).expect("panel file"));
    }
    let mut document = Vec::new();
    let document_name = run
        .bundle
        .document_path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("document name")
        .to_string();
    archive
        .by_name(&document_name)
        .expect("document entry")
        .read_to_end(&mut document)
        .expect("read document");
    assert_eq!(
        document,
        fs::read(&run.bundle.document_path).expect("document")
    );
}

#[test]
fn missing_credentials_degrade_every_panel() {
    let env = TestEnv::new();
    let pipeline = ComicPipeline::new(env.config(EngineKind::OpenAi, PanelMode::Preview))
        .expect("construction succeeds without credentials");

    let run = pipeline.generate(robot_prompts()).expect("generate");

    assert!(run.results.iter().all(|r| r.used_fallback));
    assert!(run.results[0]
        .fallback_reason
        .as_deref()
        .unwrap_or_default()
        .contains("credentials for 'openai' are not configured"));
}

#[test]
fn deliverables_are_found_until_cleanup_fires() {
    let env = TestEnv::new();
    let mut config = env.config(EngineKind::Placeholder, PanelMode::Preview);
    config.cleanup_delay = Duration::from_millis(200);
    let pipeline = ComicPipeline::new(config).expect("pipeline");

    let run = pipeline.generate(robot_prompts()).expect("generate");
    let archive_name = run
        .bundle
        .archive_path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("archive name")
        .to_string();

    assert_eq!(
        pipeline.find(&archive_name).expect("archive is served"),
        run.bundle.archive_path
    );

    run.cleanup
        .expect("cleanup scheduled")
        .join()
        .expect("cleanup thread");
    assert!(!run.working_dir.exists());
    assert!(matches!(
        pipeline.find(&archive_name),
        Err(ComicError::NotFound(_))
    ));
}

#[test]
fn concurrent_requests_get_separate_scopes() {
    let env = TestEnv::new();
    let pipeline = ComicPipeline::new(env.config(EngineKind::Placeholder, PanelMode::Preview))
        .expect("pipeline");

    let (first, second) = std::thread::scope(|scope| {
        let a = scope.spawn(|| pipeline.generate(robot_prompts()));
        let b = scope.spawn(|| pipeline.generate(robot_prompts()));
        (
            a.join().expect("first request thread"),
            b.join().expect("second request thread"),
        )
    });
    let first = first.expect("first request");
    let second = second.expect("second request");

    assert_ne!(first.working_dir, second.working_dir);
    assert_eq!(env.scope_dirs().len(), 2);
    assert!(first.bundle.archive_path.starts_with(&first.working_dir));
    assert!(second.bundle.archive_path.starts_with(&second.working_dir));
}

#[test]
fn generate_all_renders_into_caller_directory() {
    let env = TestEnv::new();
    let (provider, _calls) = ScriptedProvider::new(&["scene 01"]);
    let pipeline = ComicPipeline::with_provider(
        env.config(EngineKind::Replicate, PanelMode::Preview),
        Box::new(provider),
    );
    let dir = env.root.join("manual");
    fs::create_dir_all(&dir).expect("working dir");
    let panels = inkframe_contracts::PanelSet::from_prompts(numbered_prompts(2), PanelMode::Preview)
        .expect("panel set");

    let results = pipeline.generate_all(&panels, &dir);

    assert_eq!(
        results
            .iter()
            .map(|r| (r.index, r.used_fallback))
            .collect::<Vec<_>>(),
        vec![(1, true), (2, false)]
    );
    assert!(dir.join("panel_01.png").is_file());
    assert!(dir.join("panel_02.png").is_file());
    assert!(env.event_types().is_empty());
}
