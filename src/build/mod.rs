//! Three-stage model-build pipeline.
//!
//! ```text
//!         points              imaging requests       solve requests
//! points ──────► Slewpoint ──────► Image ──────► Platesolve ──► results
//!                 ↑ next-slew permit     │
//!                 └──────────────────────┘ (released once the exposure
//!                                           integrated, so the download
//!                                           overlaps the next slew)
//! ```
//!
//! Each stage is a tokio task; bounded channels carry the per-point record
//! between them, and the record is moved — one owner at a time. A single
//! cancel token drains all three stages; the runner then collects the
//! result sink in solve-completion order.

use crate::config::defaults::{MAX_MODEL_POINTS, STAGE_QUEUE_DEPTH};
use crate::data::SharedMountData;
use crate::devices::{Astrometry, Imager};
use crate::events::{EventBus, MessageSeverity, MountEvent};
use crate::types::{BuildBatch, ModelingPoint};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The slice of mount control the pipeline needs: a combined mount+dome
/// slew that resolves when both report stopped. Implemented by the
/// dispatcher; tests plug in a stub.
#[async_trait]
pub trait SlewController: Send + Sync + 'static {
    async fn slew_to(
        &self,
        az_deg: f64,
        alt_deg: f64,
        with_dome: bool,
        cancel: &CancellationToken,
    ) -> Result<(), String>;
}

/// Settings for one build run.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub settling_time_s: f64,
    pub keep_images: bool,
    pub directory: std::path::PathBuf,
    pub dome_is_connected: bool,
}

impl BuildSettings {
    /// Build settings from the global config.
    pub fn from_config(dome_is_connected: bool) -> Self {
        let config = crate::config::get();
        Self {
            settling_time_s: config.build.settling_time_s,
            keep_images: config.build.keep_images,
            directory: config.build.work_directory.clone(),
            dome_is_connected,
        }
    }
}

/// The build pipeline runner.
pub struct BuildPipeline {
    data: SharedMountData,
    events: EventBus,
    slewer: Arc<dyn SlewController>,
    imager: Arc<dyn Imager>,
    astrometry: Arc<dyn Astrometry>,
}

impl BuildPipeline {
    pub fn new(
        data: SharedMountData,
        events: EventBus,
        slewer: Arc<dyn SlewController>,
        imager: Arc<dyn Imager>,
        astrometry: Arc<dyn Astrometry>,
    ) -> Self {
        Self {
            data,
            events,
            slewer,
            imager,
            astrometry,
        }
    }

    /// Run a build over the given targets and return the result batch in
    /// solve-completion order.
    ///
    /// At most 100 points enter the pipeline (mount-firmware limit on the
    /// model upload); extras are discarded with a warning. Cancellation is
    /// cooperative through `cancel` and also notifies the imaging and
    /// astrometry collaborators.
    pub async fn run(
        &self,
        targets: &[(f64, f64)],
        settings: BuildSettings,
        cancel: CancellationToken,
    ) -> BuildBatch {
        let mut targets = targets.to_vec();
        if targets.len() > MAX_MODEL_POINTS {
            warn!(
                supplied = targets.len(),
                cap = MAX_MODEL_POINTS,
                "Point list exceeds the model upload limit — extra points discarded"
            );
            self.events.message(
                MessageSeverity::Warning,
                format!(
                    "Only the first {} of {} points will be built",
                    MAX_MODEL_POINTS,
                    targets.len()
                ),
            );
            targets.truncate(MAX_MODEL_POINTS);
        }

        let total = targets.len();
        if total == 0 {
            return BuildBatch::default();
        }

        info!(points = total, "Model build started");
        let started = Instant::now();

        // Records are created up front from the target list; the stages
        // enrich and move them.
        let records: Vec<ModelingPoint> = targets
            .iter()
            .enumerate()
            .map(|(index, (az, alt))| ModelingPoint {
                index,
                azimuth: *az,
                altitude: *alt,
                settling_time_s: settings.settling_time_s,
                number_points: total,
                dome_is_connected: settings.dome_is_connected,
                keep_images: settings.keep_images,
                directory: settings.directory.clone(),
                file: format!("point-{:03}.fits", index + 1),
                ..ModelingPoint::default()
            })
            .collect();

        let (to_image_tx, to_image_rx) = mpsc::channel::<ModelingPoint>(STAGE_QUEUE_DEPTH);
        let (to_solve_tx, to_solve_rx) = mpsc::channel::<ModelingPoint>(STAGE_QUEUE_DEPTH);
        let (result_tx, mut result_rx) = mpsc::channel::<ModelingPoint>(STAGE_QUEUE_DEPTH);

        // The slew stage takes one permit per point; the image stage
        // returns it once the exposure integrated.
        let next_slew = Arc::new(Semaphore::new(1));

        let slew_task = tokio::spawn(slew_stage(
            records,
            self.data.clone(),
            self.slewer.clone(),
            self.events.clone(),
            next_slew.clone(),
            to_image_tx,
            cancel.clone(),
        ));
        let image_task = tokio::spawn(image_stage(
            to_image_rx,
            self.imager.clone(),
            next_slew,
            to_solve_tx,
            cancel.clone(),
        ));
        let solve_task = tokio::spawn(solve_stage(
            to_solve_rx,
            self.astrometry.clone(),
            self.events.clone(),
            result_tx,
            total,
            started,
            cancel.clone(),
        ));

        // Stages stop in order: the slew stage ends (or drains on cancel),
        // closing the image stage's input, which closes the solve stage's.
        let _ = slew_task.await;
        let _ = image_task.await;
        let _ = solve_task.await;

        if cancel.is_cancelled() {
            // Mirror the cancel to the collaborators so hardware stops
            self.imager.cancel().await;
            self.astrometry.cancel().await;
            self.events
                .message(MessageSeverity::Warning, "Model build cancelled");
        }

        let mut batch = BuildBatch::default();
        while let Some(point) = result_rx.recv().await {
            batch.points.push(point);
        }

        info!(
            solved = batch.solved().count(),
            collected = batch.len(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "Model build finished"
        );
        batch
    }
}

// ============================================================================
// Stage 1: Slewpoint
// ============================================================================

async fn slew_stage(
    records: Vec<ModelingPoint>,
    data: SharedMountData,
    slewer: Arc<dyn SlewController>,
    events: EventBus,
    next_slew: Arc<Semaphore>,
    to_image: mpsc::Sender<ModelingPoint>,
    cancel: CancellationToken,
) {
    for mut point in records {
        // Wait for the previous exposure to integrate before moving
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = next_slew.acquire() => permit,
        };
        match permit {
            Ok(permit) => permit.forget(),
            Err(_) => break,
        }

        debug!(index = point.index, az = point.azimuth, alt = point.altitude, "Slewing to point");
        if let Err(e) = slewer
            .slew_to(point.azimuth, point.altitude, point.dome_is_connected, &cancel)
            .await
        {
            warn!(index = point.index, error = %e, "Slew failed — aborting build");
            events.message(MessageSeverity::Error, format!("Slew failed: {}", e));
            break;
        }

        events.message(
            MessageSeverity::Info,
            format!("Wait mount settling time {} s", point.settling_time_s),
        );
        let settle = Duration::from_secs_f64(point.settling_time_s.max(0.0));
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settle) => {}
        }

        // Stamp the record with the pointing state at exposure time
        {
            let snapshot = data.read().await;
            point.local_sidereal_time = snapshot.local_sidereal_time.clone();
            point.local_sidereal_time_float =
                crate::transform::deg_string_to_decimal(&snapshot.local_sidereal_time, ':');
            point.ra_j_now = snapshot.ra_j_now;
            point.dec_j_now = snapshot.dec_j_now;
            point.ra_j2000 = snapshot.ra_j2000;
            point.dec_j2000 = snapshot.dec_j2000;
            point.pierside = snapshot.pierside;
            point.refraction_temperature = snapshot.refraction_temperature.clone();
            point.refraction_pressure = snapshot.refraction_pressure.clone();
        }

        if to_image.send(point).await.is_err() {
            break;
        }
    }
}

// ============================================================================
// Stage 2: Image
// ============================================================================

async fn image_stage(
    mut from_slew: mpsc::Receiver<ModelingPoint>,
    imager: Arc<dyn Imager>,
    next_slew: Arc<Semaphore>,
    to_solve: mpsc::Sender<ModelingPoint>,
    cancel: CancellationToken,
) {
    loop {
        let mut point = tokio::select! {
            _ = cancel.cancelled() => break,
            point = from_slew.recv() => match point {
                Some(p) => p,
                None => break,
            },
        };

        let exposure = match imager.expose(&point).await {
            Ok(exposure) => exposure,
            Err(e) => {
                warn!(index = point.index, error = %e, "Exposure failed — point dropped");
                continue;
            }
        };

        // Once the sensor integrated, the mount is free to move again
        let integrated = tokio::select! {
            _ = cancel.cancelled() => break,
            result = exposure.integrated => result,
        };
        if integrated.is_err() {
            // Sender dropped: the imager aborted this exposure
            continue;
        }
        next_slew.add_permits(1);

        let saved = tokio::select! {
            _ = cancel.cancelled() => break,
            result = exposure.saved => result,
        };
        match saved {
            Ok(path) => point.image_path = Some(path),
            Err(_) => continue,
        }

        if to_solve.send(point).await.is_err() {
            break;
        }
    }
}

// ============================================================================
// Stage 3: Platesolve
// ============================================================================

async fn solve_stage(
    mut from_image: mpsc::Receiver<ModelingPoint>,
    astrometry: Arc<dyn Astrometry>,
    events: EventBus,
    results: mpsc::Sender<ModelingPoint>,
    total: usize,
    started: Instant,
    cancel: CancellationToken,
) {
    let mut solved = 0usize;

    loop {
        let mut point = tokio::select! {
            _ = cancel.cancelled() => break,
            point = from_image.recv() => match point {
                Some(p) => p,
                None => break,
            },
        };

        let is_last = point.index + 1 == total;

        match astrometry.solve(&point).await {
            Ok(result) => {
                let now = chrono::Utc::now();
                let (ra_now, dec_now) =
                    crate::transform::j2000_to_jnow(result.ra_j2000, result.dec_j2000, &now);
                point.ra_j2000_solved = Some(result.ra_j2000);
                point.dec_j2000_solved = Some(result.dec_j2000);
                point.ra_j_now_solved = Some(ra_now);
                point.dec_j_now_solved = Some(dec_now);

                let ra_error = (result.ra_j2000 - point.ra_j2000) * 3600.0;
                let dec_error = (result.dec_j2000 - point.dec_j2000) * 3600.0;
                point.ra_error = Some(ra_error);
                point.dec_error = Some(dec_error);
                point.model_error = Some((ra_error * ra_error + dec_error * dec_error).sqrt());

                solved += 1;
                let elapsed = started.elapsed().as_secs_f64();
                let done = solved as f64 / total as f64;
                let eta = elapsed * (1.0 - done) / done;
                let finish_at = chrono::Utc::now()
                    + chrono::Duration::milliseconds((eta * 1000.0) as i64);
                events.publish(MountEvent::BuildProgress {
                    solved,
                    total,
                    elapsed_s: elapsed,
                    eta_s: eta,
                    finish_at,
                });
            }
            Err(e) => {
                point.message = Some(e.to_string());
                warn!(index = point.index, error = %e, "Plate solve failed");
            }
        }

        if results.send(point).await.is_err() {
            break;
        }

        if is_last {
            events.publish(MountEvent::BuildFinished);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MountData;
    use crate::devices::stubs::{FailingAstrometry, StubAstrometry, StubImager};

    struct InstantSlewer;

    #[async_trait]
    impl SlewController for InstantSlewer {
        async fn slew_to(
            &self,
            _az: f64,
            _alt: f64,
            _dome: bool,
            _cancel: &CancellationToken,
        ) -> Result<(), String> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(())
        }
    }

    fn settings() -> BuildSettings {
        BuildSettings {
            settling_time_s: 0.0,
            keep_images: false,
            directory: std::path::PathBuf::from("/tmp/build"),
            dome_is_connected: false,
        }
    }

    fn pipeline(astrometry: Arc<dyn Astrometry>) -> (BuildPipeline, EventBus) {
        let data = MountData::default().into_shared();
        let events = EventBus::new();
        let pipeline = BuildPipeline::new(
            data,
            events.clone(),
            Arc::new(InstantSlewer),
            Arc::new(StubImager::instant()),
            astrometry,
        );
        (pipeline, events)
    }

    #[tokio::test]
    async fn test_all_points_land_in_result_sink() {
        let (pipeline, _events) = pipeline(Arc::new(StubAstrometry::new(3.0, 4.0)));
        let targets: Vec<(f64, f64)> = (0..5).map(|i| (40.0 * i as f64, 45.0)).collect();

        let batch = pipeline
            .run(&targets, settings(), CancellationToken::new())
            .await;

        assert_eq!(batch.len(), 5);
        assert_eq!(batch.solved().count(), 5);
        for point in &batch.points {
            // 3-4-5 error triangle from the stub offsets
            assert!((point.model_error.unwrap() - 5.0).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_point_cap_at_limit() {
        let (pipeline, _events) = pipeline(Arc::new(StubAstrometry::new(0.0, 0.0)));
        let targets: Vec<(f64, f64)> = (0..130).map(|i| (i as f64, 45.0)).collect();

        let batch = pipeline
            .run(&targets, settings(), CancellationToken::new())
            .await;
        assert_eq!(batch.len(), MAX_MODEL_POINTS);
    }

    #[tokio::test]
    async fn test_failed_solves_carry_message() {
        let (pipeline, _events) = pipeline(Arc::new(FailingAstrometry));
        let targets = vec![(120.0, 45.0), (240.0, 50.0)];

        let batch = pipeline
            .run(&targets, settings(), CancellationToken::new())
            .await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.solved().count(), 0);
        assert!(batch.points.iter().all(|p| p.message.is_some()));
    }

    #[tokio::test]
    async fn test_progress_and_finished_events() {
        let (pipeline, events) = pipeline(Arc::new(StubAstrometry::new(1.0, 1.0)));
        let mut rx = events.subscribe();
        let targets = vec![(120.0, 45.0), (240.0, 50.0), (300.0, 55.0)];

        let batch = pipeline
            .run(&targets, settings(), CancellationToken::new())
            .await;
        assert_eq!(batch.len(), 3);

        let mut progress = Vec::new();
        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                MountEvent::BuildProgress { solved, total, .. } => progress.push((solved, total)),
                MountEvent::BuildFinished => finished += 1,
                _ => {}
            }
        }
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(finished, 1);
    }

    #[tokio::test]
    async fn test_cancel_drains_pipeline() {
        let data = MountData::default().into_shared();
        let events = EventBus::new();
        let pipeline = BuildPipeline::new(
            data,
            events,
            Arc::new(InstantSlewer),
            Arc::new(StubImager::new(
                Duration::from_millis(50),
                Duration::from_millis(50),
            )),
            Arc::new(StubAstrometry::new(0.0, 0.0)),
        );
        let targets: Vec<(f64, f64)> = (0..20).map(|i| (i as f64 * 10.0, 45.0)).collect();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            canceller.cancel();
        });

        let batch = pipeline.run(&targets, settings(), cancel).await;
        // The run stopped early: nowhere near all 20 points completed
        assert!(batch.len() < 20);
    }
}
