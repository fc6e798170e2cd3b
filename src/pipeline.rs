//! Capture pipeline: weigh, photograph, identify, log
//!
//! One capture runs at a time. Presses that pile up while a capture is in
//! progress are thrown away rather than replayed afterwards.

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use crate::actuators::camera::Camera;
use crate::ai::vision::FoodIdentifier;
use crate::error::{Error, Result};
use crate::sensors::button::Press;
use crate::sensors::scale::WeightSensor;
use crate::storage::{FoodLog, LogEntry, NewEntry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Weighing,
    Photographing,
    Identifying,
    Logging,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureStatus {
    pub stage: Stage,
    /// Whether the pipeline loop is accepting presses
    pub running: bool,
    pub captures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_entry: Option<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct CapturePipeline<S, C, I> {
    scale: Arc<Mutex<S>>,
    camera: C,
    identifier: I,
    log: Arc<FoodLog>,
    status: watch::Sender<CaptureStatus>,
}

impl<S, C, I> CapturePipeline<S, C, I>
where
    S: WeightSensor,
    C: Camera,
    I: FoodIdentifier,
{
    pub fn new(scale: S, camera: C, identifier: I, log: Arc<FoodLog>) -> Self {
        let (status, _) = watch::channel(CaptureStatus::default());
        Self {
            scale: Arc::new(Mutex::new(scale)),
            camera,
            identifier,
            log,
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.subscribe()
    }

    fn set_stage(&self, stage: Stage) {
        tracing::debug!("Capture stage: {:?}", stage);
        self.status.send_modify(|s| s.stage = stage);
    }

    /// Run a single capture and record the outcome in the status
    pub async fn run_once(&mut self) -> Result<LogEntry> {
        let result = self.capture().await;
        self.finish(&result);
        result
    }

    /// Back to idle, with the outcome of the capture that just ended
    fn finish(&self, result: &Result<LogEntry>) {
        self.status.send_modify(|s| {
            s.stage = Stage::Idle;
            match result {
                Ok(entry) => {
                    s.captures += 1;
                    s.last_entry = Some(entry.clone());
                    s.last_error = None;
                }
                Err(e) => s.last_error = Some(e.to_string()),
            }
        });
    }

    async fn capture(&mut self) -> Result<LogEntry> {
        self.set_stage(Stage::Weighing);
        let scale = Arc::clone(&self.scale);
        let weight = tokio::task::spawn_blocking(move || {
            scale
                .lock()
                .map_err(|_| Error::Scale("scale lock poisoned".to_string()))?
                .weight_grams()
        })
        .await
        .map_err(|e| Error::Scale(format!("weighing task failed: {}", e)))??;
        tracing::info!("Weight: {:.1}g", weight);

        self.set_stage(Stage::Photographing);
        let image = self.camera.capture().await?;

        self.set_stage(Stage::Identifying);
        let identification = self.identifier.identify(&image).await;

        self.set_stage(Stage::Logging);
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Camera(format!("bad image path {}", image.display())))?;

        let entry = self
            .log
            .add_entry(NewEntry {
                food_type: identification.food_type,
                weight_grams: weight,
                image_path: format!("images/{}", file_name),
                confidence: Some(identification.confidence),
                metadata: identification
                    .error
                    .map(|e| serde_json::json!({ "identify_error": e })),
            })
            .await?;

        tracing::info!(
            "Logged {} ({:.1}g) as {}",
            entry.food_type,
            entry.weight_grams,
            entry.id
        );
        Ok(entry)
    }

    /// Serve presses until `shutdown` resolves or every sender is gone
    pub async fn run(mut self, mut presses: mpsc::Receiver<Press>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        self.status.send_modify(|s| s.running = true);
        tracing::info!("Capture pipeline ready");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                press = presses.recv() => {
                    let Some(press) = press else { break };
                    tracing::info!("Capture triggered by {:?}", press);

                    let result = self.capture().await;
                    if let Err(e) = &result {
                        tracing::error!("Capture failed: {}", e);
                    }

                    // Drain while still busy, so a trigger accepted after
                    // going idle is never thrown away with these
                    let mut dropped = 0;
                    while presses.try_recv().is_ok() {
                        dropped += 1;
                    }
                    if dropped > 0 {
                        tracing::debug!("Discarded {} presses received during capture", dropped);
                    }
                    self.finish(&result);
                }
            }
        }

        self.status.send_modify(|s| s.running = false);
        match self.scale.lock() {
            Ok(mut scale) => scale.power_down(),
            Err(_) => tracing::warn!("Scale lock poisoned, skipping power down"),
        }
        tracing::info!("Capture pipeline stopped");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("A capture is already in progress")]
    Busy,
    #[error("Capture pipeline is not running")]
    Unavailable,
}

/// What the API holds to start captures and watch their progress
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    presses: mpsc::Sender<Press>,
    status: watch::Receiver<CaptureStatus>,
}

impl CaptureHandle {
    pub fn new(presses: mpsc::Sender<Press>, status: watch::Receiver<CaptureStatus>) -> Self {
        Self { presses, status }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status.borrow().clone()
    }

    pub fn trigger(&self) -> std::result::Result<(), TriggerError> {
        {
            let status = self.status.borrow();
            if !status.running {
                return Err(TriggerError::Unavailable);
            }
            if status.stage != Stage::Idle {
                return Err(TriggerError::Busy);
            }
        }

        self.presses.try_send(Press::Api).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TriggerError::Busy,
            mpsc::error::TrySendError::Closed(_) => TriggerError::Unavailable,
        })
    }
}
