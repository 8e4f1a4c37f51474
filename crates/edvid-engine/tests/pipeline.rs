//! End-to-end pipeline tests against mocked external services.
//!
//! The LLM, TTS and visual providers are wiremock servers; ffmpeg is a
//! stub script that writes a non-empty output file, so jobs can reach real
//! terminal states without media tooling installed.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use edvid_cache::{CacheConfig, CacheLayer};
use edvid_compose::Composer;
use edvid_engine::{EngineConfig, Orchestrator, Services};
use edvid_models::{JobStatus, Priority};
use edvid_queue::JobQueue;
use edvid_resilience::{CircuitBreakerConfig, CircuitState, RetryPolicy};
use edvid_resources::{ResourceGovernor, ResourceLimits};
use edvid_script::{LlmClient, LlmConfig};
use edvid_store::{JobStore, StoreConfig};
use edvid_tts::{TtsClient, TtsConfig};
use edvid_visuals::{AssetRouter, ProviderClient, VisualConfig};

use edvid_engine::Breakers;

/// Shell stub standing in for ffmpeg: writes a non-empty file at the last
/// argument (the output path for both segment and concat invocations).
fn write_ffmpeg_stub(dir: &Path) -> PathBuf {
    let path = dir.join("ffmpeg-stub");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "for last; do :; done").unwrap();
    writeln!(file, "printf fakevideo > \"$last\"").unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn write_source_doc(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("lesson.txt");
    std::fs::write(&path, body).unwrap();
    path
}

fn scene_json(n: usize) -> String {
    let scenes: Vec<String> = (1..=n)
        .map(|i| {
            format!(
                r#"{{"id":{i},"narration_text":"Narration for scene number {i} of the lesson.","visual_type":"slide","visual_prompt":"slide {i}"}}"#
            )
        })
        .collect();
    format!(r#"{{"language":"en","scenes":[{}]}}"#, scenes.join(","))
}

fn chat_envelope(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
}

fn test_wav(seconds: f64) -> Vec<u8> {
    let sample_rate = 8000u32;
    let byte_rate = sample_rate * 2;
    let data_len = (byte_rate as f64 * seconds) as u32;

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend(std::iter::repeat(0u8).take(data_len as usize));
    out
}

/// Build a full services context wired to one mock server for every
/// external dependency, with fast retries and relaxed resource ceilings.
async fn build_services(server: &MockServer, work_dir: &Path) -> Arc<Services> {
    let uri = server.uri();

    let resources = ResourceLimits {
        cpu_soft_ceiling: 100.0,
        memory_soft_ceiling: 100.0,
        memory_cleanup_ceiling: 100.0,
        ..ResourceLimits::default()
    };
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        multiplier: 2.0,
        jitter: 0.1,
        max_delay: Duration::from_millis(20),
    };
    let circuit = CircuitBreakerConfig {
        failure_threshold: 3,
        cooldown: Duration::from_secs(60),
    };

    let llm_config = LlmConfig {
        base_url: uri.clone(),
        ..LlmConfig::default()
    };
    let tts_config = TtsConfig {
        base_url: uri.clone(),
        ..TtsConfig::default()
    };
    let visual_config = VisualConfig {
        slide_url: uri.clone(),
        diagram_url: uri.clone(),
        chart_url: uri.clone(),
        formula_url: uri.clone(),
        code_url: uri,
        ..VisualConfig::default()
    };

    let config = EngineConfig {
        resources: resources.clone(),
        circuit: circuit.clone(),
        retry,
        cache: CacheConfig::default(),
        store: StoreConfig {
            snapshot_path: work_dir.join("job_store.json"),
            ..StoreConfig::default()
        },
        llm: llm_config.clone(),
        tts: tts_config.clone(),
        visual: visual_config.clone(),
        assets_dir: work_dir.join("assets"),
        videos_dir: work_dir.join("videos"),
        shutdown_grace: Duration::from_secs(10),
        ..EngineConfig::default()
    };

    let governor = Arc::new(ResourceGovernor::new(resources));
    let cache = Arc::new(CacheLayer::new(config.cache.clone()));
    let breakers = Breakers::new(&circuit);
    let llm = LlmClient::new(llm_config).unwrap();
    let tts = TtsClient::new(tts_config, config.audio_dir()).unwrap();
    let visuals = AssetRouter::new(
        ProviderClient::new(visual_config).unwrap(),
        config.visuals_dir(),
    );
    let composer = Composer::with_ffmpeg_path(write_ffmpeg_stub(work_dir), &config.videos_dir);
    let store = Arc::new(JobStore::new(config.store.clone()));
    let queue = Arc::new(JobQueue::new());

    Arc::new(Services {
        config,
        governor,
        cache,
        breakers,
        llm,
        tts,
        visuals,
        composer,
        store,
        queue,
        cancellations: tokio::sync::Mutex::new(Default::default()),
    })
}

async fn start_engine(services: &Arc<Services>) -> (Arc<Orchestrator>, watch::Sender<bool>) {
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(services)));
    let (tx, rx) = watch::channel(false);
    let runner = Arc::clone(&orchestrator);
    tokio::spawn(async move { runner.run(rx).await });
    (orchestrator, tx)
}

async fn wait_terminal(
    orchestrator: &Orchestrator,
    job_id: &edvid_models::JobId,
) -> edvid_models::JobView {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let view = orchestrator.status(job_id).await.unwrap();
        if view.status.is_terminal() {
            return view;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job did not terminate, last status {:?}",
            view.status
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn mount_happy_llm(scenes: usize) -> Mock {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_envelope(&scene_json(scenes))))
}

fn mount_happy_tts() -> Mock {
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(test_wav(0.25)))
}

fn mount_happy_visual() -> Mock {
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a]),
        )
}

#[tokio::test]
async fn test_happy_path_completes_with_video() {
    let server = MockServer::start().await;
    mount_happy_llm(5).mount(&server).await;
    mount_happy_tts().mount(&server).await;
    mount_happy_visual().mount(&server).await;

    let work_dir = tempfile::tempdir().unwrap();
    let services = build_services(&server, work_dir.path()).await;
    let (orchestrator, shutdown) = start_engine(&services).await;

    let doc = write_source_doc(work_dir.path(), &"A lesson about things. ".repeat(40));
    let job_id = orchestrator.submit(&doc, Priority::Normal).await.unwrap();

    let view = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress, 100);
    assert!(view.errors.is_empty());

    let video_path = orchestrator.video_path(&job_id).await.unwrap();
    assert!(video_path.exists());
    assert!(std::fs::metadata(&video_path).unwrap().len() > 0);

    let job = services.store.get(&job_id).await.unwrap();
    let script = job.script.unwrap();
    assert_eq!(script.scenes.len(), 5);
    assert!(script.scenes.iter().all(|s| s.has_complete_assets()));

    // Healthy run leaves every breaker closed.
    let health = orchestrator.health().await;
    assert!(health.llm && health.tts);
    assert!(health.breakers.values().all(|s| s == "closed"));

    shutdown.send(true).ok();
}

#[tokio::test]
async fn test_cancel_before_admission_makes_no_external_calls() {
    let server = MockServer::start().await;
    // No mocks mounted: any request would 404 and fail scene production,
    // but more importantly the received-request log must stay empty.

    let work_dir = tempfile::tempdir().unwrap();
    let services = build_services(&server, work_dir.path()).await;
    let orchestrator = Orchestrator::new(Arc::clone(&services));
    // Note: no run loop; the job stays queued.

    let doc = write_source_doc(work_dir.path(), "A lesson.");
    let job_id = orchestrator.submit(&doc, Priority::High).await.unwrap();

    let cancelled = orchestrator
        .cancel(&job_id, Some("changed my mind".into()))
        .await
        .unwrap();
    assert!(cancelled);

    let view = orchestrator.status(&job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Cancelled);
    assert!(services.queue.is_empty().await);

    let requests = server.received_requests().await.unwrap();
    assert!(requests.is_empty(), "no external call may be issued");
}

#[tokio::test]
async fn test_tts_outage_fails_job_and_opens_breaker() {
    let server = MockServer::start().await;
    mount_happy_llm(3).mount(&server).await;
    mount_happy_visual().mount(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;

    let work_dir = tempfile::tempdir().unwrap();
    let services = build_services(&server, work_dir.path()).await;
    let (orchestrator, shutdown) = start_engine(&services).await;

    let doc = write_source_doc(work_dir.path(), &"Some lesson text here. ".repeat(30));
    let job_id = orchestrator.submit(&doc, Priority::Normal).await.unwrap();

    let view = wait_terminal(&orchestrator, &job_id).await;
    // No scene can assemble both assets, so the job fails outright.
    assert_eq!(view.status, JobStatus::Failed);
    assert!(!view.errors.is_empty());

    // Three consecutive scene failures trip the TTS breaker.
    assert_eq!(services.breakers.tts.state(), CircuitState::Open);
    let health = orchestrator.health().await;
    assert!(!health.tts);

    assert!(orchestrator.video_path(&job_id).await.is_err());
    shutdown.send(true).ok();
}

#[tokio::test]
async fn test_malformed_llm_falls_back_and_completes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_envelope("I'm sorry, I can only chat about cats.")),
        )
        .mount(&server)
        .await;
    mount_happy_tts().mount(&server).await;
    mount_happy_visual().mount(&server).await;

    let work_dir = tempfile::tempdir().unwrap();
    let services = build_services(&server, work_dir.path()).await;
    let (orchestrator, shutdown) = start_engine(&services).await;

    let doc = write_source_doc(
        work_dir.path(),
        &"Ownership rules keep memory safe. Borrowing has rules too. ".repeat(20),
    );
    let job_id = orchestrator.submit(&doc, Priority::Normal).await.unwrap();

    let view = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(view.status, JobStatus::Completed);

    let job = services.store.get(&job_id).await.unwrap();
    let script = job.script.unwrap();
    assert!((3..=7).contains(&script.scenes.len()));

    shutdown.send(true).ok();
}

#[tokio::test]
async fn test_second_submission_hits_script_cache() {
    let server = MockServer::start().await;
    // The script producer may run exactly once across both jobs.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_envelope(&scene_json(3))))
        .expect(1)
        .mount(&server)
        .await;
    mount_happy_tts().mount(&server).await;
    mount_happy_visual().mount(&server).await;

    let work_dir = tempfile::tempdir().unwrap();
    let services = build_services(&server, work_dir.path()).await;
    let (orchestrator, shutdown) = start_engine(&services).await;

    let doc = write_source_doc(work_dir.path(), &"The same source text. ".repeat(30));

    let first = orchestrator.submit(&doc, Priority::Normal).await.unwrap();
    let first_view = wait_terminal(&orchestrator, &first).await;
    assert_eq!(first_view.status, JobStatus::Completed);

    let second = orchestrator.submit(&doc, Priority::Normal).await.unwrap();
    let second_view = wait_terminal(&orchestrator, &second).await;
    assert_eq!(second_view.status, JobStatus::Completed);

    shutdown.send(true).ok();
    // MockServer verifies expect(1) on drop.
}

#[tokio::test]
async fn test_flaky_tts_recovers_and_breaker_stays_closed() {
    let server = MockServer::start().await;
    mount_happy_llm(3).mount(&server).await;
    mount_happy_visual().mount(&server).await;
    // First speech request fails, the retry inside the breaker call
    // succeeds, so the breaker never records a failure.
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(500).set_body_string("hiccup"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_happy_tts().mount(&server).await;

    let work_dir = tempfile::tempdir().unwrap();
    let services = build_services(&server, work_dir.path()).await;
    let (orchestrator, shutdown) = start_engine(&services).await;

    let doc = write_source_doc(work_dir.path(), &"A flaky afternoon of lessons. ".repeat(25));
    let job_id = orchestrator.submit(&doc, Priority::Normal).await.unwrap();

    let view = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(services.breakers.tts.state(), CircuitState::Closed);

    shutdown.send(true).ok();
}

#[tokio::test]
async fn test_out_of_bounds_scene_fails_alone() {
    let server = MockServer::start().await;
    // Scene 2's narration is below the 10-character floor; the script
    // shape is still valid, so only that scene may fail.
    let script = r#"{"scenes":[
        {"id":1,"narration_text":"A perfectly fine narration for scene one.","visual_type":"slide","visual_prompt":"slide one"},
        {"id":2,"narration_text":"too short","visual_type":"slide","visual_prompt":"slide two"},
        {"id":3,"narration_text":"Another perfectly fine narration, scene three.","visual_type":"slide","visual_prompt":"slide three"}
    ]}"#;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_envelope(script)))
        .mount(&server)
        .await;
    mount_happy_tts().mount(&server).await;
    mount_happy_visual().mount(&server).await;

    let work_dir = tempfile::tempdir().unwrap();
    let services = build_services(&server, work_dir.path()).await;
    let (orchestrator, shutdown) = start_engine(&services).await;

    let doc = write_source_doc(work_dir.path(), "A document with a thin middle section.");
    let job_id = orchestrator.submit(&doc, Priority::Normal).await.unwrap();

    let view = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(view.status, JobStatus::CompletedWithErrors);
    assert_eq!(view.errors.len(), 1);

    let job = services.store.get(&job_id).await.unwrap();
    let script = job.script.unwrap();
    assert_eq!(script.completed_scenes().count(), 2);
    assert_eq!(script.failed_scenes().count(), 1);
    assert_eq!(script.failed_scenes().next().unwrap().id, 2);

    // The rejected scene consumed no speech synthesis call.
    let speech_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/v1/audio/speech")
        .count();
    assert_eq!(speech_calls, 2);

    shutdown.send(true).ok();
}

#[tokio::test]
async fn test_oversized_upload_rejected_at_submit() {
    let server = MockServer::start().await;
    let work_dir = tempfile::tempdir().unwrap();
    let mut services = build_services(&server, work_dir.path()).await;
    // Shrink the limit so the test file can trip it.
    Arc::get_mut(&mut services).unwrap().config.upload = edvid_models::UploadLimits {
        max_upload_size_mb: 0,
    };
    let orchestrator = Orchestrator::new(Arc::clone(&services));

    let doc = write_source_doc(work_dir.path(), "tiny but still over a 0 MB limit");
    let err = orchestrator.submit(&doc, Priority::Normal).await.unwrap_err();
    assert!(matches!(err, edvid_engine::EngineError::Upload(_)));
    assert!(services.store.list(10).await.is_empty());
}
