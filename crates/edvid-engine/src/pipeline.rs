//! Per-job state machine.
//!
//! Drives one admitted job through script → assets → compose. External
//! calls are layered cache → breaker → retry → governor → raw client, per
//! scene for audio and visuals. Scene failures are recorded on the scene
//! and never fail the job; the job fails only when no script can be made,
//! no scene produces complete assets, compose fails, or it is cancelled.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use edvid_cache::keys;
use edvid_cache::Namespace;
use edvid_compose::SceneMedia;
use edvid_models::{
    AudioAsset, Job, JobError, JobId, JobPhase, JobStatus, Scene, SceneStatus, Script, VisualAsset,
    VisualKind,
};
use edvid_resilience::retry;
use edvid_resources::SlotKind;

use crate::error::{EngineError, EngineResult};
use crate::services::Services;

/// Progress once the script phase is done; the assets phase then climbs to
/// 90 and compose owns the final 10.
const SCRIPT_PROGRESS: u8 = 10;
const ASSETS_PROGRESS_SPAN: usize = 90;

/// Run one job to a terminal state. Terminal bookkeeping (status, errors,
/// cancellation channel) always happens, whatever the outcome.
pub async fn process_job(services: Arc<Services>, job_id: JobId) {
    let Some(mut cancel_rx) = services.cancel_receiver(&job_id).await else {
        // Cancelled and cleaned up before admission.
        return;
    };

    let outcome = run_pipeline(&services, &job_id, &mut cancel_rx).await;

    match outcome {
        Ok(status) => {
            counter!("edvid_jobs_completed_total").increment(1);
            info!(job_id = %job_id, status = %status, "job finished");
        }
        Err(e) if e.is_cancelled() => {
            counter!("edvid_jobs_cancelled_total").increment(1);
            info!(job_id = %job_id, "job cancelled");
            let _ = services
                .store
                .update(&job_id, |job| {
                    job.cancel(None);
                })
                .await;
        }
        Err(e) => {
            counter!("edvid_jobs_failed_total").increment(1);
            error!(job_id = %job_id, "job failed: {e}");
            let _ = services
                .store
                .update(&job_id, |job| {
                    job.push_error(JobError::job_level(e.to_string()));
                    job.message = format!("Failed: {e}");
                    job.transition(JobStatus::Failed);
                })
                .await;
        }
    }

    services.clear_cancel(&job_id).await;
}

async fn run_pipeline(
    services: &Arc<Services>,
    job_id: &JobId,
    cancel: &mut watch::Receiver<bool>,
) -> EngineResult<JobStatus> {
    ensure_active(cancel)?;

    let job = services
        .store
        .update(job_id, |job| {
            job.transition(JobStatus::Processing);
            job.enter_phase(JobPhase::Script, "Extracting source text");
        })
        .await?;
    counter!("edvid_jobs_started_total").increment(1);

    // A job whose source cannot be read has no path forward.
    let text = edvid_script::extract_text(&job.source)
        .await
        .map_err(|e| EngineError::job_failed(format!("could not read source document: {e}")))?;
    ensure_active(cancel)?;

    services
        .store
        .update(job_id, |job| {
            job.enter_phase(JobPhase::Script, "Generating script");
        })
        .await?;
    let script = generate_script(services, &text, cancel).await?;

    services
        .store
        .update(job_id, |job| {
            job.script = Some(script.clone());
            job.enter_phase(JobPhase::Audio, "Synthesising narration and rendering visuals");
            job.set_progress(SCRIPT_PROGRESS);
        })
        .await?;

    run_scene_fanout(services, job_id, &script, cancel).await?;
    ensure_active(cancel)?;

    compose_job(services, job_id, cancel).await
}

/// Script phase: cache → breaker → retry → LLM, with the deterministic
/// generator as the fallback for anything but cancellation.
async fn generate_script(
    services: &Arc<Services>,
    text: &str,
    cancel: &mut watch::Receiver<bool>,
) -> EngineResult<Script> {
    let llm_config = services.llm.config();
    let key = keys::script_key(text, &llm_config.model, &llm_config.template_version);

    let produced = with_cancel(cancel, async {
        services
            .cache
            .get_or_compute(Namespace::Script, &key, || async {
                services
                    .breakers
                    .llm
                    .call(|| async {
                        retry(
                            &services.config.retry,
                            "llm_generate_script",
                            EngineError::is_retryable,
                            || async {
                                services
                                    .llm
                                    .generate_script(text)
                                    .await
                                    .map_err(EngineError::from)
                            },
                        )
                        .await
                    })
                    .await
                    .map_err(EngineError::from)
            })
            .await
    })
    .await;

    match produced {
        Ok(Ok(script)) => Ok(script),
        Err(cancelled) => Err(cancelled),
        Ok(Err(e)) if e.is_cancelled() => Err(e),
        Ok(Err(e)) => {
            warn!("LLM script unavailable ({e}), using deterministic fallback");
            counter!("edvid_script_fallbacks_total").increment(1);
            Ok(edvid_script::fallback_script(text))
        }
    }
}

/// Assets phase: two concurrent tasks per scene, all awaited with
/// per-scene failure tolerance. Progress climbs with every settled asset.
async fn run_scene_fanout(
    services: &Arc<Services>,
    job_id: &JobId,
    script: &Script,
    cancel: &mut watch::Receiver<bool>,
) -> EngineResult<()> {
    let total_assets = script.scenes.len() * 2;
    let settled = Arc::new(AtomicUsize::new(0));
    let mut tasks: JoinSet<()> = JoinSet::new();

    for scene in &script.scenes {
        ensure_active(cancel)?;

        // Scenes violating the narration/prompt bounds fail without a
        // single external call.
        if let Err(e) = scene.validate_bounds() {
            let reason = format!("scene rejected: {e}");
            mark_scene_failed(services, job_id, scene.id, &reason).await;
            settle(services, job_id, &settled, 2, total_assets).await;
            continue;
        }

        services
            .store
            .update(job_id, |job| {
                if let Some(s) = find_scene(job, scene.id) {
                    s.status = SceneStatus::Processing;
                }
            })
            .await?;

        tasks.spawn(scene_audio_task(
            Arc::clone(services),
            job_id.clone(),
            scene.clone(),
            cancel.clone(),
            Arc::clone(&settled),
            total_assets,
        ));
        tasks.spawn(scene_visual_task(
            Arc::clone(services),
            job_id.clone(),
            scene.clone(),
            cancel.clone(),
            Arc::clone(&settled),
            total_assets,
        ));
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(job_id = %job_id, "scene task panicked: {e}");
        }
    }

    Ok(())
}

/// Audio leg of one scene: cache → breaker → retry → tts slot → HTTP.
async fn scene_audio_task(
    services: Arc<Services>,
    job_id: JobId,
    scene: Scene,
    mut cancel: watch::Receiver<bool>,
    settled: Arc<AtomicUsize>,
    total_assets: usize,
) {
    let tts_config = services.tts.config();
    let key = keys::audio_key(
        &scene.narration_text,
        &tts_config.voice,
        &tts_config.format,
        tts_config.speed,
        tts_config.exaggeration,
        tts_config.cfg_weight,
        tts_config.temperature,
    );

    let produced = with_cancel(&mut cancel, async {
        services
            .cache
            .get_or_compute(Namespace::Audio, &key, || async {
                services
                    .breakers
                    .tts
                    .call(|| async {
                        retry(
                            &services.config.retry,
                            "tts_synthesize",
                            EngineError::is_retryable,
                            || async {
                                let _permit = services.governor.acquire(SlotKind::Tts).await?;
                                services
                                    .tts
                                    .synthesize(scene.id, &scene.narration_text, &key)
                                    .await
                                    .map_err(EngineError::from)
                            },
                        )
                        .await
                    })
                    .await
                    .map_err(EngineError::from)
            })
            .await
    })
    .await;

    let result: EngineResult<AudioAsset> = match produced {
        Ok(inner) => inner,
        Err(cancelled) => Err(cancelled),
    };

    match result {
        Ok(mut asset) => {
            // A cache hit may carry the scene id of the original producer.
            asset.scene_id = scene.id;
            let _ = services
                .store
                .update(&job_id, |job| {
                    if let Some(s) = find_scene(job, scene.id) {
                        s.audio = Some(asset.clone());
                        promote_if_complete(s);
                    }
                })
                .await;
        }
        Err(e) if e.is_cancelled() => return,
        Err(e) => {
            counter!("edvid_scene_audio_failures_total").increment(1);
            mark_scene_failed(&services, &job_id, scene.id, &format!("narration failed: {e}"))
                .await;
        }
    }

    settle(&services, &job_id, &settled, 1, total_assets).await;
}

/// Visual leg of one scene: cache → breaker → retry → visual slot → router.
/// Exhausted retries produce a local error placeholder and a failed scene,
/// never a failed job.
async fn scene_visual_task(
    services: Arc<Services>,
    job_id: JobId,
    scene: Scene,
    mut cancel: watch::Receiver<bool>,
    settled: Arc<AtomicUsize>,
    total_assets: usize,
) {
    let render_params = services.visuals.provider().config().render_params();
    let key = keys::visual_key(
        scene.visual_type.as_str(),
        &scene.visual_prompt,
        &render_params,
    );

    // Unknown visual types never touch a provider.
    if scene.visual_type == VisualKind::Unknown {
        let placeholder = services
            .visuals
            .placeholder(&scene, "unrecognised visual type", &key)
            .await;
        apply_visual_failure(
            &services,
            &job_id,
            scene.id,
            "unrecognised visual type",
            placeholder.ok(),
        )
        .await;
        settle(&services, &job_id, &settled, 1, total_assets).await;
        return;
    }

    let breaker = services.breakers.for_visual(scene.visual_type);
    let produced = with_cancel(&mut cancel, async {
        services
            .cache
            .get_or_compute(Namespace::Visual, &key, || async {
                breaker
                    .call(|| async {
                        retry(
                            &services.config.retry,
                            "render_visual",
                            EngineError::is_retryable,
                            || async {
                                let _permit =
                                    services.governor.acquire(SlotKind::Visual).await?;
                                services
                                    .visuals
                                    .render(&scene, &key)
                                    .await
                                    .map_err(EngineError::from)
                            },
                        )
                        .await
                    })
                    .await
                    .map_err(EngineError::from)
            })
            .await
    })
    .await;

    let result: EngineResult<VisualAsset> = match produced {
        Ok(inner) => inner,
        Err(cancelled) => Err(cancelled),
    };

    match result {
        Ok(mut asset) => {
            asset.scene_id = scene.id;
            let _ = services
                .store
                .update(&job_id, |job| {
                    if let Some(s) = find_scene(job, scene.id) {
                        s.visual = Some(asset.clone());
                        promote_if_complete(s);
                    }
                })
                .await;
        }
        Err(e) if e.is_cancelled() => return,
        Err(e) => {
            counter!("edvid_scene_visual_failures_total").increment(1);
            let reason = format!("visual failed: {e}");
            let placeholder = services.visuals.placeholder(&scene, &e.to_string(), &key).await;
            apply_visual_failure(&services, &job_id, scene.id, &reason, placeholder.ok()).await;
        }
    }

    settle(&services, &job_id, &settled, 1, total_assets).await;
}

/// Compose phase: mux the completed scenes in script order.
async fn compose_job(
    services: &Arc<Services>,
    job_id: &JobId,
    cancel: &mut watch::Receiver<bool>,
) -> EngineResult<JobStatus> {
    let job = services
        .store
        .get(job_id)
        .await
        .ok_or(EngineError::JobNotFound)?;
    let script = job
        .script
        .as_ref()
        .ok_or_else(|| EngineError::job_failed("job lost its script before compose"))?;

    let ready = compose_inputs(script);
    if ready.is_empty() {
        return Err(EngineError::job_failed(
            "no scene produced complete assets",
        ));
    }

    services
        .store
        .update(job_id, |job| {
            job.enter_phase(JobPhase::Compose, "Composing video");
            job.set_progress(90);
        })
        .await?;
    ensure_active(cancel)?;

    // Compose itself is unbounded (local files, bounded real time); only a
    // cancellation observed before it starts aborts it.
    let video = services.composer.compose(job_id, &ready).await?;

    let completed = script.completed_scenes().count();
    let failed = script.failed_scenes().count();
    let final_status = if failed > 0 {
        JobStatus::CompletedWithErrors
    } else {
        JobStatus::Completed
    };

    services
        .store
        .update(job_id, |job| {
            job.video = Some(video.clone());
            job.set_progress(100);
            job.message = if failed > 0 {
                format!("Video ready ({completed} of {} scenes)", script.scenes.len())
            } else {
                "Video ready".to_string()
            };
            job.transition(final_status);
        })
        .await?;

    Ok(final_status)
}

/// Scenes eligible for composition, in script order.
fn compose_inputs(script: &Script) -> Vec<SceneMedia> {
    script
        .scenes
        .iter()
        .filter(|s| s.status == SceneStatus::Completed && s.has_complete_assets())
        .filter_map(|s| {
            let audio = s.audio.as_ref()?;
            let visual = s.visual.as_ref()?;
            Some(SceneMedia {
                scene_id: s.id,
                visual_path: visual.path.clone(),
                audio_path: audio.path.clone(),
                audio_duration_secs: audio.duration_secs,
            })
        })
        .collect()
}

/// Progress fraction for the assets phase: settled assets over total,
/// scaled into the 90% span (compose owns the rest).
fn assets_progress(settled: usize, total: usize) -> u8 {
    if total == 0 {
        return SCRIPT_PROGRESS;
    }
    let scaled = settled.min(total) * ASSETS_PROGRESS_SPAN / total;
    (scaled as u8).max(SCRIPT_PROGRESS)
}

async fn settle(
    services: &Arc<Services>,
    job_id: &JobId,
    settled: &Arc<AtomicUsize>,
    count: usize,
    total: usize,
) {
    let now = settled.fetch_add(count, Ordering::SeqCst) + count;
    let progress = assets_progress(now, total);
    let _ = services
        .store
        .update(job_id, |job| {
            job.set_progress(progress);
        })
        .await;
}

async fn mark_scene_failed(services: &Arc<Services>, job_id: &JobId, scene_id: u32, reason: &str) {
    warn!(job_id = %job_id, scene_id, "{reason}");
    let _ = services
        .store
        .update(job_id, |job| {
            if let Some(s) = find_scene(job, scene_id) {
                s.fail(reason);
            }
            job.push_error(JobError::scene_level(scene_id, reason));
        })
        .await;
}

async fn apply_visual_failure(
    services: &Arc<Services>,
    job_id: &JobId,
    scene_id: u32,
    reason: &str,
    placeholder: Option<VisualAsset>,
) {
    warn!(job_id = %job_id, scene_id, "{reason}");
    let _ = services
        .store
        .update(job_id, |job| {
            if let Some(s) = find_scene(job, scene_id) {
                if let Some(mut asset) = placeholder {
                    asset.scene_id = scene_id;
                    s.visual = Some(asset);
                }
                s.fail(reason);
            }
            job.push_error(JobError::scene_level(scene_id, reason));
        })
        .await;
}

fn find_scene(job: &mut Job, scene_id: u32) -> Option<&mut Scene> {
    job.script
        .as_mut()
        .and_then(|script| script.scenes.iter_mut().find(|s| s.id == scene_id))
}

/// Completed means both assets exist and nothing has failed the scene.
fn promote_if_complete(scene: &mut Scene) {
    if scene.status != SceneStatus::Failed && scene.has_complete_assets() {
        scene.status = SceneStatus::Completed;
    }
}

/// Fast cancellation check at phase boundaries and between task launches.
fn ensure_active(cancel: &watch::Receiver<bool>) -> EngineResult<()> {
    if *cancel.borrow() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Race a future against the job's cancellation flag. Dropping the losing
/// future aborts in-flight HTTP calls and releases any held permits.
async fn with_cancel<T>(
    cancel: &mut watch::Receiver<bool>,
    fut: impl Future<Output = T>,
) -> EngineResult<T> {
    if *cancel.borrow() {
        return Err(EngineError::Cancelled);
    }

    let cancelled = async {
        // A dropped sender means the job already reached a terminal state;
        // never report that as a cancellation.
        if cancel.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => Err(EngineError::Cancelled),
        value = fut => Ok(value),
    }
}
