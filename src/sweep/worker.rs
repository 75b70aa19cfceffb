use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::controller::{SweepController, SweepOutcome};
use super::plan::{SweepPlan, SweepRequest};
use super::{CancelPolicy, CancelToken};
use crate::calibration::{CalibrationModel, InterpolationPolicy};
use crate::config::SweepSettings;
use crate::device::{Connection, DeviceInfo, Transport};
use crate::network::SParameterSet;
use crate::result::{Error, Result};

/// What happened to the attached calibration when a snapshot was published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CalibrationStatus {
    /// No model was attached; the data is raw.
    Uncalibrated,
    /// The data was corrected by the attached model.
    Applied,
    /// The model did not cover the sweep and was detached. Holds the reason.
    Dropped(String),
    /// Correction failed; the raw data was published. Holds the error message.
    Failed(String),
}

/// A completed sweep as published to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub data: Arc<SParameterSet>,
    pub calibration: CalibrationStatus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WorkerSettings {
    pub max_retries: u32,
    pub queue_depth: usize,
    pub cancel_policy: CancelPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings::from(&SweepSettings::default())
    }
}

impl From<&SweepSettings> for WorkerSettings {
    fn from(settings: &SweepSettings) -> Self {
        WorkerSettings {
            max_retries: settings.max_retries,
            queue_depth: settings.queue_depth.max(1),
            cancel_policy: CancelPolicy::Discard,
        }
    }
}

struct Job {
    request: SweepRequest,
    cancel: CancelToken,
    reply: oneshot::Sender<Result<SweepOutcome>>,
}

#[derive(Clone)]
struct ActiveCalibration {
    model: Arc<CalibrationModel>,
    policy: InterpolationPolicy,
}

type SharedCalibration = Arc<RwLock<Option<ActiveCalibration>>>;

/// Owns a connection and runs sweeps on it in the background.
///
/// Requests are queued and executed one at a time. Each completed sweep is
/// published as an immutable snapshot; when a calibration model is attached
/// the snapshot holds corrected data while [`SweepWorker::sweep`] still
/// returns the raw measurement (which is what calibration standards need).
pub struct SweepWorker<T: Transport + 'static> {
    connection: Arc<Mutex<Connection<T>>>,
    jobs: mpsc::Sender<Job>,
    snapshots: watch::Receiver<Option<Snapshot>>,
    cancel: std::sync::Mutex<CancelToken>,
    calibration: SharedCalibration,
    task: JoinHandle<()>,
}

impl<T: Transport + 'static> SweepWorker<T> {
    /// Starts the worker task. Must be called from within a tokio runtime.
    pub fn spawn(connection: Connection<T>, settings: WorkerSettings) -> Self {
        let connection = Arc::new(Mutex::new(connection));
        let (jobs, queue) = mpsc::channel(settings.queue_depth.max(1));
        let (publisher, snapshots) = watch::channel(None);
        let calibration: SharedCalibration = Arc::new(RwLock::new(None));

        let task = tokio::spawn(run(
            Arc::clone(&connection),
            queue,
            publisher,
            Arc::clone(&calibration),
            settings,
        ));

        SweepWorker {
            connection,
            jobs,
            snapshots,
            cancel: std::sync::Mutex::new(CancelToken::new()),
            calibration,
            task,
        }
    }

    /// Queues a sweep and waits for its outcome.
    pub async fn sweep(&self, request: SweepRequest) -> Result<SweepOutcome> {
        let (reply, outcome) = oneshot::channel();
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.jobs
            .send(Job {
                request,
                cancel,
                reply,
            })
            .await
            .map_err(|_| Error::WorkerStopped)?;
        outcome.await.map_err(|_| Error::WorkerStopped)?
    }

    /// Receiver that sees every snapshot published from now on.
    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<Snapshot> {
        self.snapshots.borrow().clone()
    }

    /// Cancels every sweep requested so far: the one in flight stops at the
    /// next segment boundary and queued ones end before their first scan.
    /// Sweeps requested afterwards are unaffected.
    pub fn cancel(&self) {
        let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        *current = CancelToken::new();
    }

    /// Attaches (or with `None`, detaches) the model used to correct snapshots.
    pub fn set_calibration(&self, model: Option<Arc<CalibrationModel>>, policy: InterpolationPolicy) {
        let mut active = self
            .calibration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *active = model.map(|model| ActiveCalibration { model, policy });
    }

    pub fn calibration(&self) -> Option<Arc<CalibrationModel>> {
        self.calibration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| Arc::clone(&active.model))
    }

    /// Capabilities of the connected device. Waits while a sweep is running.
    pub async fn device_info(&self) -> DeviceInfo {
        self.connection.lock().await.info().clone()
    }

    /// Finishes queued sweeps, then stops the worker and returns the connection.
    pub async fn shutdown(self) -> Result<Connection<T>> {
        let SweepWorker {
            connection,
            jobs,
            task,
            ..
        } = self;
        drop(jobs);
        task.await.map_err(|_| Error::WorkerStopped)?;
        Arc::try_unwrap(connection)
            .map(Mutex::into_inner)
            .map_err(|_| Error::WorkerStopped)
    }
}

async fn run<T: Transport + 'static>(
    connection: Arc<Mutex<Connection<T>>>,
    mut queue: mpsc::Receiver<Job>,
    publisher: watch::Sender<Option<Snapshot>>,
    calibration: SharedCalibration,
    settings: WorkerSettings,
) {
    debug!(queue_depth = settings.queue_depth, "Sweep worker started");
    while let Some(Job {
        request,
        cancel,
        reply,
    }) = queue.recv().await
    {
        let result = execute(&connection, request, &cancel, settings).await;
        if let Ok(SweepOutcome::Complete(raw)) = &result {
            publish(&publisher, &calibration, raw);
        }
        if reply.send(result).is_err() {
            debug!("Sweep requester went away before the result arrived");
        }
    }
    debug!("Sweep worker stopped");
}

async fn execute<T: Transport + 'static>(
    connection: &Arc<Mutex<Connection<T>>>,
    request: SweepRequest,
    cancel: &CancelToken,
    settings: WorkerSettings,
) -> Result<SweepOutcome> {
    let connection = Arc::clone(connection);
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = connection.blocking_lock();
        let plan = SweepPlan::new(request, conn.info().max_points)?;
        info!(
            start = request.range.start,
            stop = request.range.stop,
            points = request.range.npoints,
            segments = plan.segments().len(),
            averages = request.averages,
            "Sweep started"
        );
        SweepController::new(settings.max_retries).run(
            &mut *conn,
            &plan,
            &cancel,
            settings.cancel_policy,
        )
    })
    .await
    .map_err(|_| Error::WorkerStopped)?
}

fn publish(
    publisher: &watch::Sender<Option<Snapshot>>,
    calibration: &SharedCalibration,
    raw: &SParameterSet,
) {
    let active = calibration
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let (data, status) = match active {
        None => (raw.clone(), CalibrationStatus::Uncalibrated),
        Some(active) if !active.model.is_compatible_with(raw.sweep(), active.policy) => {
            let reason = format!(
                "calibrated for {} points from {} Hz to {} Hz, sweep has {} points from {} Hz to {} Hz",
                active.model.sweep().len(),
                active.model.sweep().start(),
                active.model.sweep().stop(),
                raw.len(),
                raw.sweep().start(),
                raw.sweep().stop(),
            );
            warn!(%reason, "Calibration does not cover this sweep, discarding it");
            *calibration.write().unwrap_or_else(PoisonError::into_inner) = None;
            (raw.clone(), CalibrationStatus::Dropped(reason))
        }
        Some(active) => match active.model.apply(raw, active.policy) {
            Ok(corrected) => (corrected, CalibrationStatus::Applied),
            Err(e) => {
                warn!(error = %e, "Correction failed, publishing raw data");
                (raw.clone(), CalibrationStatus::Failed(e.to_string()))
            }
        },
    };
    publisher.send_replace(Some(Snapshot {
        data: Arc::new(data),
        calibration: status,
    }));
}
