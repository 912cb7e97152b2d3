//! Mount dispatcher.
//!
//! Owns every protocol link, runs the command dispatch loop, and
//! implements the high-level operations: shutdown, flip, sync, model
//! upload with reload, target-RMS optimization, worst-point deletion,
//! retrofit, and the combined mount+dome slew the build pipeline drives.
//!
//! Commands are a typed enum on an mpsc queue, dequeued at a 200 ms
//! cadence. Long-running operations poll a shared cancel flag at the same
//! cadence. Errors never escape the loop; failures surface as message
//! events and the operation aborts with MountData left intact.

use crate::build::SlewController;
use crate::config::defaults::{
    CANCEL_CHECK_MS, DISPATCH_CADENCE_MS, MIN_ALIGNMENT_STARS,
};
use crate::data::SharedMountData;
use crate::devices::{Dome, Environment};
use crate::events::{EventBus, MessageSeverity, MountEvent};
use crate::protocol::command::{CommandLink, CommandSender};
use crate::protocol::link::MountLink;
use crate::protocol::model_names::{self, ModelNameLink};
use crate::protocol::model_read::ModelReadLink;
use crate::protocol::model_write::{ModelWriteLink, ProgramPoint};
use crate::protocol::{
    fast::FastPoller, medium::MediumPoller, once::OncePoller, slow::SlowPoller, CommandTemplate,
    PollWorker,
};
use crate::types::BuildBatch;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Queue depth for dispatcher commands.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Safety ceiling for the slew wait (a worst-case meridian flip plus
/// settling takes well under this).
const SLEW_WAIT_CEILING_S: u64 = 240;

/// Typed dispatcher operations. The original tool dispatched stringly
/// worker records; here every operation and its parameters are a variant.
#[derive(Debug, Clone)]
pub enum MountCommand {
    /// Orderly mount power-down.
    Shutdown,
    /// Trigger a meridian flip now.
    FlipMount,
    /// Sync the model on coordinates (RA hours / Dec degrees, JNow).
    SyncModel { ra_hours: f64, dec_deg: f64 },
    /// Upload a solved build batch, then reload the model.
    ProgramBatch(BuildBatch),
    /// Delete worst points until the RMS drops under the target (arcsec).
    RunTargetRms { target_arcsec: f64 },
    /// Delete the single worst model point and reload.
    DeleteWorstPoint,
    /// Re-download the alignment model.
    ReloadModel,
    /// Re-enumerate the named-model catalog.
    ReloadModelNames,
    /// Clear the active alignment.
    ClearAlignment,
    /// Load / save / delete a named model.
    LoadModelName(String),
    SaveModelName(String),
    DeleteModelName(String),
    /// Park / unpark.
    Park,
    Unpark,
    /// Slew to horizontal coordinates, optionally fanning out to the dome.
    SlewAzAlt { az: f64, alt: f64, with_dome: bool },
    /// Stop all workers, move to a new endpoint, restart.
    ChangeEndpoint { host: String, port: u16 },
}

/// Cloneable handle for submitting commands and driving slews.
#[derive(Clone)]
pub struct DispatcherHandle {
    queue: mpsc::Sender<MountCommand>,
    cancel_flag: Arc<AtomicBool>,
    data: SharedMountData,
    events: EventBus,
    command: CommandSender,
    dome: Option<Arc<dyn Dome>>,
}

impl DispatcherHandle {
    /// Enqueue a command for the dispatch loop.
    pub async fn submit(&self, command: MountCommand) -> bool {
        self.queue.send(command).await.is_ok()
    }

    /// Request cancellation of the operation in flight. The flag is
    /// polled at ≤ 200 ms intervals and cleared when the next operation
    /// starts.
    pub fn request_cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn data(&self) -> &SharedMountData {
        &self.data
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn command(&self) -> &CommandSender {
        &self.command
    }
}

#[async_trait]
impl SlewController for DispatcherHandle {
    async fn slew_to(
        &self,
        az_deg: f64,
        alt_deg: f64,
        with_dome: bool,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        slew_mount_dome(
            &self.command,
            &self.data,
            &self.events,
            self.dome.as_ref(),
            az_deg,
            alt_deg,
            with_dome,
            || cancel.is_cancelled(),
        )
        .await
    }
}

/// The dispatcher: owns all links and the worker tasks behind them.
pub struct MountDispatcher {
    data: SharedMountData,
    events: EventBus,
    command: CommandSender,
    model_read: ModelReadLink,
    model_write: ModelWriteLink,
    model_names: ModelNameLink,
    dome: Option<Arc<dyn Dome>>,
    environment: Option<Arc<dyn Environment>>,
    queue: mpsc::Receiver<MountCommand>,
    cancel_flag: Arc<AtomicBool>,
    workers: JoinSet<()>,
    worker_cancel: CancellationToken,
}

impl MountDispatcher {
    /// Build the dispatcher and its handle. Workers are not running yet;
    /// [`run`](Self::run) starts them.
    pub fn new(
        data: SharedMountData,
        events: EventBus,
        dome: Option<Arc<dyn Dome>>,
        environment: Option<Arc<dyn Environment>>,
        host: &str,
        port: u16,
    ) -> (Self, DispatcherHandle) {
        let (queue_tx, queue_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let cancel_flag = Arc::new(AtomicBool::new(false));

        let (command_link, command) = CommandLink::new(
            MountLink::new("command", host, port, events.clone()),
            COMMAND_QUEUE_DEPTH,
        );

        let model_read = ModelReadLink::new(
            MountLink::new("model-read", host, port, events.clone()),
            data.clone(),
            events.clone(),
        );
        let model_write = ModelWriteLink::new(
            MountLink::new("model-write", host, port, events.clone()),
            data.clone(),
        );
        let model_names = ModelNameLink::new(
            MountLink::new("model-names", host, port, events.clone()),
            data.clone(),
        );

        let mut dispatcher = Self {
            data: data.clone(),
            events: events.clone(),
            command: command.clone(),
            model_read,
            model_write,
            model_names,
            dome: dome.clone(),
            environment,
            queue: queue_rx,
            cancel_flag: cancel_flag.clone(),
            workers: JoinSet::new(),
            worker_cancel: CancellationToken::new(),
        };
        dispatcher.spawn_command_link(command_link);

        let handle = DispatcherHandle {
            queue: queue_tx,
            cancel_flag,
            data,
            events,
            command,
            dome,
        };
        (dispatcher, handle)
    }

    fn spawn_command_link(&mut self, link: CommandLink) {
        let cancel = self.worker_cancel.clone();
        self.workers.spawn(async move { link.run(cancel).await });
    }

    /// Dispatch loop: starts the polling workers, dequeues commands at
    /// 200 ms cadence, reacts to model-refresh triggers from the medium
    /// poll, and tears everything down on cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        // Subscribe before the pollers start so no refresh trigger is lost
        let mut bus = self.events.subscribe();
        self.spawn_pollers_now().await;
        let mut interval = tokio::time::interval(Duration::from_millis(DISPATCH_CADENCE_MS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            // Model refresh triggers published by the medium poll
            while let Ok(event) = bus.try_recv() {
                match event {
                    MountEvent::AlignmentStarsChanged(_) => {
                        if let Err(e) = self.model_read.read_model().await {
                            warn!(error = %e, "Model reload after star-count change failed");
                        }
                    }
                    MountEvent::ModelNamesChanged => {
                        if let Err(e) = self.model_names.read_names().await {
                            warn!(error = %e, "Model name refresh failed");
                        }
                    }
                    _ => {}
                }
            }

            match self.queue.try_recv() {
                Ok(command) => {
                    self.cancel_flag.store(false, Ordering::Relaxed);
                    self.execute(command).await;
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }

        self.worker_cancel.cancel();
        while self.workers.join_next().await.is_some() {}
        info!("Mount dispatcher stopped");
    }

    async fn spawn_pollers_now(&mut self) {
        let (host, port) = {
            let data = self.data.read().await;
            (data.mount_ip.clone(), data.mount_port)
        };
        self.spawn_pollers_for(&host, port);
    }

    fn spawn_pollers_for(&mut self, host: &str, port: u16) {
        let cancel = self.worker_cancel.clone();

        let once = PollWorker::new(
            MountLink::new("once", host, port, self.events.clone()),
            OncePoller::new(self.data.clone()),
        );
        self.workers.spawn({
            let cancel = cancel.clone();
            async move { once.run(cancel).await }
        });

        let fast = PollWorker::new(
            MountLink::new("fast", host, port, self.events.clone()),
            FastPoller::new(self.data.clone(), self.events.clone()),
        );
        self.workers.spawn({
            let cancel = cancel.clone();
            async move { fast.run(cancel).await }
        });

        let medium = PollWorker::new(
            MountLink::new("medium", host, port, self.events.clone()),
            MediumPoller::new(
                self.data.clone(),
                self.events.clone(),
                self.environment.clone(),
            ),
        );
        self.workers.spawn({
            let cancel = cancel.clone();
            async move { medium.run(cancel).await }
        });

        let slow = PollWorker::new(
            MountLink::new("slow", host, port, self.events.clone()),
            SlowPoller::new(self.data.clone()),
        );
        self.workers.spawn(async move { slow.run(cancel).await });
    }

    async fn execute(&mut self, command: MountCommand) {
        let outcome = match command {
            MountCommand::Shutdown => self.mount_shutdown().await,
            MountCommand::FlipMount => self.flip_mount().await,
            MountCommand::SyncModel { ra_hours, dec_deg } => {
                self.sync_mount_model(ra_hours, dec_deg).await
            }
            MountCommand::ProgramBatch(batch) => self.program_batch_data(&batch).await,
            MountCommand::RunTargetRms { target_arcsec } => {
                self.run_target_rms_alignment(target_arcsec).await
            }
            MountCommand::DeleteWorstPoint => self.delete_worst_point().await,
            MountCommand::ReloadModel => self.reload_alignment_model().await,
            MountCommand::ReloadModelNames => self
                .model_names
                .read_names()
                .await
                .map_err(|e| e.to_string()),
            MountCommand::ClearAlignment => self.clear_alignment().await,
            MountCommand::LoadModelName(name) => {
                self.confirmed_command(&model_names::load_command(&name), "load model")
                    .await
            }
            MountCommand::SaveModelName(name) => {
                self.confirmed_command(&model_names::save_command(&name), "save model")
                    .await
            }
            MountCommand::DeleteModelName(name) => {
                self.confirmed_command(&model_names::delete_command(&name), "delete model")
                    .await
            }
            MountCommand::Park => self.confirmed_blind(":hP#", "park").await,
            MountCommand::Unpark => self.confirmed_blind(":PO#", "unpark").await,
            MountCommand::SlewAzAlt { az, alt, with_dome } => {
                let flag = self.cancel_flag.clone();
                slew_mount_dome(
                    &self.command,
                    &self.data,
                    &self.events,
                    self.dome.as_ref(),
                    az,
                    alt,
                    with_dome,
                    move || flag.load(Ordering::Relaxed),
                )
                .await
            }
            MountCommand::ChangeEndpoint { host, port } => {
                self.reconfigure(&host, port).await;
                Ok(())
            }
        };

        if let Err(message) = outcome {
            warn!(error = %message, "Mount operation failed");
            self.events.message(MessageSeverity::Error, message);
        }
    }

    // ========================================================================
    // High-level operations
    // ========================================================================

    async fn mount_shutdown(&mut self) -> Result<(), String> {
        let reply = self.command.one(":shutdown#").await?;
        if reply.trim() != "1" {
            return Err("Mount refused shutdown".to_string());
        }
        self.events
            .message(MessageSeverity::Info, "Mount is shutting down");
        Ok(())
    }

    async fn flip_mount(&mut self) -> Result<(), String> {
        let reply = self.command.one(":FLIP#").await?;
        if reply.trim() == "0" {
            return Err("Mount refused the meridian flip".to_string());
        }
        self.events
            .message(MessageSeverity::Info, "Meridian flip started");
        Ok(())
    }

    async fn sync_mount_model(&mut self, ra_hours: f64, dec_deg: f64) -> Result<(), String> {
        let mut template = CommandTemplate::new();
        template
            .push(&format!(
                ":Sr{}#",
                crate::transform::decimal_to_degree(ra_hours, false, true, ':')
            ))
            .push(&format!(
                ":Sd{}#",
                crate::transform::decimal_to_degree(dec_deg, true, false, ':')
            ))
            .push(":CMCFG0#")
            .push(":CM#");

        let fields = self.command.exchange(template).await?;
        let confirmation = fields.last().map(String::as_str).unwrap_or("");
        if !confirmation.starts_with("Coord") {
            return Err(format!("Model sync rejected: {:?}", confirmation));
        }
        self.events
            .message(MessageSeverity::Info, "Mount model synced on coordinates");
        Ok(())
    }

    /// Upload a solved batch and queue a model reload.
    async fn program_batch_data(&mut self, batch: &BuildBatch) -> Result<(), String> {
        let mut points = Vec::new();
        for point in batch.solved() {
            let (Some(ra_solved), Some(dec_solved)) =
                (point.ra_j_now_solved, point.dec_j_now_solved)
            else {
                return Err("Batch point missing solved JNow coordinates".to_string());
            };
            if point.local_sidereal_time_float == 0.0 && point.local_sidereal_time.is_empty() {
                return Err("Batch point missing LocalSiderealTime".to_string());
            }
            points.push(ProgramPoint {
                ra_j_now: point.ra_j_now,
                dec_j_now: point.dec_j_now,
                pierside: point.pierside,
                ra_j_now_solved: ra_solved,
                dec_j_now_solved: dec_solved,
                lst_hours: point.local_sidereal_time_float,
            });
        }
        if points.is_empty() {
            return Err("Batch contains no solved points".to_string());
        }

        let outcome = self
            .model_write
            .program_model(&points)
            .await
            .map_err(|e| e.to_string())?;
        if !outcome.success {
            return Err("Mount rejected the programmed model".to_string());
        }
        self.events.message(
            MessageSeverity::Info,
            format!("Model programmed: {} stars", outcome.star_count),
        );

        self.reload_alignment_model().await
    }

    /// Delete worst points until the RMS drops under the target.
    async fn run_target_rms_alignment(&mut self, target_arcsec: f64) -> Result<(), String> {
        loop {
            let (rms, number) = {
                let data = self.data.read().await;
                (data.model.rms, data.model.number)
            };
            if self.cancel_flag.load(Ordering::Relaxed) {
                self.events
                    .message(MessageSeverity::Warning, "Target-RMS optimization cancelled");
                return Ok(());
            }
            if rms > 0.0 && rms < target_arcsec {
                self.events.message(
                    MessageSeverity::Info,
                    format!("Target RMS reached: {:.2} arcsec", rms),
                );
                return Ok(());
            }
            if number < MIN_ALIGNMENT_STARS {
                return Err(format!(
                    "Optimization stopped: only {} stars left (minimum {})",
                    number, MIN_ALIGNMENT_STARS
                ));
            }
            self.delete_worst_point().await?;
        }
    }

    /// Delete the single worst point, verify, and reload.
    async fn delete_worst_point(&mut self) -> Result<(), String> {
        let (worst, number) = {
            let data = self.data.read().await;
            (data.model.worst_point(), data.model.number)
        };
        if number < MIN_ALIGNMENT_STARS {
            return Err(format!(
                "Refusing to delete: only {} stars in the model (minimum {})",
                number, MIN_ALIGNMENT_STARS
            ));
        }
        let worst = worst.ok_or_else(|| "Model is empty".to_string())?;

        // The wire index is 1-based
        let reply = self.command.one(&format!(":delalst{}#", worst + 1)).await?;
        if reply.trim() != "1" {
            return Err(format!("Mount refused deleting point {}", worst + 1));
        }
        info!(point = worst + 1, "Deleted worst alignment point");
        self.reload_alignment_model().await
    }

    /// Download the model; returns once `model_loading` is false again.
    async fn reload_alignment_model(&mut self) -> Result<(), String> {
        self.model_read.read_model().await.map_err(|e| e.to_string())
    }

    async fn clear_alignment(&mut self) -> Result<(), String> {
        self.command.blind(":delalig#").await?;
        self.events
            .message(MessageSeverity::Info, "Alignment model cleared");
        Ok(())
    }

    async fn confirmed_command(&mut self, cmd: &str, label: &str) -> Result<(), String> {
        let reply = self.command.one(cmd).await?;
        if reply.trim() != "1" {
            return Err(format!("Mount refused {}", label));
        }
        Ok(())
    }

    async fn confirmed_blind(&mut self, cmd: &str, label: &str) -> Result<(), String> {
        self.command.blind(cmd).await?;
        self.events
            .message(MessageSeverity::Info, format!("Mount {} requested", label));
        Ok(())
    }

    /// Annotate a build batch with the mount-computed optimized errors.
    ///
    /// Sizes must match exactly; on mismatch the batch is returned
    /// unchanged and the operation fails.
    pub async fn retrofit_mount_data(&self, batch: &mut BuildBatch) -> Result<(), String> {
        let data = self.data.read().await;
        let model = &data.model;
        if batch.len() != model.error.len() {
            return Err(format!(
                "Retrofit size mismatch: batch {} vs model {}",
                batch.len(),
                model.error.len()
            ));
        }
        for (point, (error, angle)) in batch
            .points
            .iter_mut()
            .zip(model.error.iter().zip(&model.error_angle))
        {
            let angle_rad = angle.to_radians();
            point.model_error_optimized = Some(*error);
            point.ra_error_optimized = Some(error * angle_rad.sin());
            point.dec_error_optimized = Some(error * angle_rad.cos());
        }
        Ok(())
    }

    /// Stop every worker, rewrite the endpoint, restart. The one
    /// operation that touches identity fields outside their owning links.
    async fn reconfigure(&mut self, host: &str, port: u16) {
        info!(host, port, "Reconfiguring mount endpoint");
        self.worker_cancel.cancel();
        while self.workers.join_next().await.is_some() {}
        self.worker_cancel = CancellationToken::new();

        {
            let mut data = self.data.write().await;
            data.mount_ip = host.to_string();
            data.mount_port = port;
            data.fw = 0; // unknown until the once-poll reruns
        }

        let (command_link, command) = CommandLink::new(
            MountLink::new("command", host, port, self.events.clone()),
            COMMAND_QUEUE_DEPTH,
        );
        self.command = command;
        self.spawn_command_link(command_link);

        self.model_read = ModelReadLink::new(
            MountLink::new("model-read", host, port, self.events.clone()),
            self.data.clone(),
            self.events.clone(),
        );
        self.model_write = ModelWriteLink::new(
            MountLink::new("model-write", host, port, self.events.clone()),
            self.data.clone(),
        );
        self.model_names = ModelNameLink::new(
            MountLink::new("model-names", host, port, self.events.clone()),
            self.data.clone(),
        );

        self.spawn_pollers_for(host, port);
        self.events
            .message(MessageSeverity::Info, format!("Mount moved to {}:{}", host, port));
    }
}

// ============================================================================
// Combined mount + dome slew
// ============================================================================

/// Format the `:Sz…#:Sa…#:MS#` template for a horizontal slew target.
pub fn slew_template(az_deg: f64, alt_deg: f64) -> CommandTemplate {
    // Azimuth clamps to the mount's accepted range
    let az = az_deg.clamp(0.0, 359.9);
    let az_minutes = (az * 60.0).round() as i64;
    let (az_d, az_m) = (az_minutes / 60, az_minutes % 60);

    let alt_sign = if alt_deg < 0.0 { '-' } else { '+' };
    let alt_minutes = (alt_deg.abs() * 60.0).round() as i64;
    let (alt_d, alt_m) = (alt_minutes / 60, alt_minutes % 60);

    let mut template = CommandTemplate::new();
    template
        .push(&format!(":Sz{:03}*{:02}#", az_d, az_m))
        .push(&format!(":Sa{}{:02}*{:02}#", alt_sign, alt_d, alt_m))
        .push(":MS#");
    template
}

/// Slew the mount (and optionally the dome) and wait for both to stop.
/// The cancel predicate is polled at 200 ms.
#[allow(clippy::too_many_arguments)]
async fn slew_mount_dome(
    command: &CommandSender,
    data: &SharedMountData,
    events: &EventBus,
    dome: Option<&Arc<dyn Dome>>,
    az_deg: f64,
    alt_deg: f64,
    with_dome: bool,
    cancelled: impl Fn() -> bool,
) -> Result<(), String> {
    let fields = command.exchange(slew_template(az_deg, alt_deg)).await?;
    if fields.iter().take(2).any(|f| f.trim() == "0") {
        return Err("Mount rejected the slew target".to_string());
    }

    let dome_active = if with_dome {
        match dome {
            Some(dome) if dome.is_connected().await => {
                dome.slew_azimuth(az_deg.clamp(0.0, 359.9))
                    .await
                    .map_err(|e| e.to_string())?;
                true
            }
            _ => false,
        }
    } else {
        false
    };

    // Wait for the falling edge of the mount's slewing flag, then for the
    // dome to stop. The flag may take a poll cycle to rise, hence the
    // grace handling below.
    let started = std::time::Instant::now();
    let mut seen_slewing = false;
    loop {
        if cancelled() {
            events.message(MessageSeverity::Warning, "Slew cancelled");
            return Err("Slew cancelled".to_string());
        }
        if started.elapsed() > Duration::from_secs(SLEW_WAIT_CEILING_S) {
            return Err("Slew wait exceeded ceiling".to_string());
        }

        let slewing = data.read().await.slewing;
        if slewing {
            seen_slewing = true;
        } else if seen_slewing || started.elapsed() > Duration::from_secs(3) {
            // Mount reports stopped (or it never started within the grace
            // window, e.g. a zero-length slew)
            let dome_busy = if dome_active {
                match dome {
                    Some(dome) => dome.is_slewing().await,
                    None => false,
                }
            } else {
                false
            };
            if !dome_busy {
                return Ok(());
            }
        }

        tokio::time::sleep(Duration::from_millis(CANCEL_CHECK_MS)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slew_template_format() {
        let template = slew_template(123.45, 56.7);
        assert_eq!(template.text(), ":Sz123*27#:Sa+56*42#:MS#");
        assert_eq!(template.expected(), 3);
    }

    #[test]
    fn test_slew_template_clamps_azimuth() {
        let template = slew_template(420.0, 10.0);
        assert!(template.text().starts_with(":Sz359*54#"));
        let template = slew_template(-5.0, 10.0);
        assert!(template.text().starts_with(":Sz000*00#"));
    }

    #[test]
    fn test_slew_template_negative_altitude() {
        let template = slew_template(180.0, -2.5);
        assert!(template.text().contains(":Sa-02*30#"));
    }
}
