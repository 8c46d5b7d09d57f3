//! Device worker lifecycle.
//!
//! The [`Orchestrator`] owns the device-keyed worker registry and the root
//! cancellation token. Each worker gets a child token, so cancelling the root
//! stops every pipeline while a single device can still be stopped alone.

pub mod worker;


pub use worker::{DeviceWorker, PipelineContext, WorkerExit, WorkerReport};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::capture::{ContentClassifier, SegmenterSettings};
use crate::config::Config;
use crate::delivery::PageSink;
use crate::device::{Adb, DeviceRegistry};
use crate::error::{Error, Result};
use crate::hub::BroadcastHub;
use crate::stream::{LineParser, StreamReader};
use crate::subprocess::ProcessRunner;

struct WorkerHandle {
    cancel: CancellationToken,
    task: JoinHandle<WorkerReport>,
}

pub struct Orchestrator {
    registry: DeviceRegistry,
    context: Arc<PipelineContext>,
    discovery_interval: Duration,
    workers: HashMap<String, WorkerHandle>,
    /// Reports of reaped workers, one per device
    finished: HashMap<String, WorkerReport>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        runner: Arc<dyn ProcessRunner>,
        sink: Option<Arc<dyn PageSink>>,
        hub: Option<Arc<BroadcastHub>>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = DeviceRegistry::new(Arc::clone(&runner), &config.device);
        let context = PipelineContext {
            registry: registry.clone(),
            reader: StreamReader::new(runner, Adb::from_config(&config.device)),
            parser: LineParser::new(config.device.tags.iter().cloned()),
            segmenter: SegmenterSettings::from(&config.capture),
            classifier: ContentClassifier::new(config.capture.unmarked_as_document),
            min_content_chars: config.capture.min_content_chars,
            sink,
            hub,
            queue_capacity: config.delivery.queue_capacity,
            close_grace: config.device.close_grace,
        };

        Self {
            registry,
            context: Arc::new(context),
            discovery_interval: config.device.discovery_interval,
            workers: HashMap::new(),
            finished: HashMap::new(),
            shutdown,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ids of devices with a running worker
    pub fn active_devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Start one worker per ready device. No device at all is fatal.
    pub async fn start(&mut self) -> Result<usize> {
        let started = self.reconcile().await;
        if self.workers.is_empty() {
            return Err(Error::NoDevices);
        }
        tracing::info!("Started {} device worker(s)", started);
        Ok(started)
    }

    /// Reap finished workers and start workers for newly ready devices.
    ///
    /// Returns the number of workers started.
    pub async fn reconcile(&mut self) -> usize {
        self.reap().await;

        let mut started = 0;
        for device_id in self.registry.list_devices().await {
            if self.workers.contains_key(&device_id) {
                continue;
            }
            self.spawn_worker(device_id);
            started += 1;
        }
        started
    }

    /// Stop a single device's worker
    pub async fn stop_device(&mut self, device_id: &str) -> Option<WorkerReport> {
        let handle = self.workers.remove(device_id)?;
        handle.cancel.cancel();
        Self::join(device_id, handle).await
    }

    /// Run until the shutdown token fires, re-discovering devices periodically
    pub async fn run(mut self) -> Result<Vec<WorkerReport>> {
        self.start().await?;

        if self.discovery_interval.is_zero() {
            self.shutdown.cancelled().await;
        } else {
            let mut ticker = tokio::time::interval(self.discovery_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let started = self.reconcile().await;
                        if started > 0 {
                            tracing::info!("Discovered {} new device(s)", started);
                        }
                    }
                }
            }
        }

        Ok(self.shutdown().await)
    }

    /// Cancel every worker and wait for all of them; one report per device
    pub async fn shutdown(&mut self) -> Vec<WorkerReport> {
        tracing::info!("Stopping {} device worker(s)", self.workers.len());
        self.shutdown.cancel();

        for (device_id, handle) in std::mem::take(&mut self.workers) {
            if let Some(report) = Self::join(&device_id, handle).await {
                self.record(report);
            }
        }

        let mut reports: Vec<WorkerReport> = std::mem::take(&mut self.finished).into_values().collect();
        reports.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        reports
    }

    fn spawn_worker(&mut self, device_id: String) {
        let cancel = self.shutdown.child_token();
        let worker = DeviceWorker::new(device_id.clone(), Arc::clone(&self.context));
        let task = tokio::spawn(worker.run(cancel.clone()));

        tracing::debug!("Spawned worker for {}", device_id);
        self.workers.insert(device_id, WorkerHandle { cancel, task });
    }

    async fn reap(&mut self) {
        let done: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for device_id in done {
            if let Some(handle) = self.workers.remove(&device_id) {
                if let Some(report) = Self::join(&device_id, handle).await {
                    tracing::debug!("Reaped worker for {}: {:?}", device_id, report.exit);
                    self.record(report);
                }
            }
        }
    }

    fn record(&mut self, report: WorkerReport) {
        match self.finished.get_mut(&report.device_id) {
            Some(summary) => summary.absorb(report),
            None => {
                self.finished.insert(report.device_id.clone(), report);
            }
        }
    }

    async fn join(device_id: &str, handle: WorkerHandle) -> Option<WorkerReport> {
        match handle.task.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("Worker for {} panicked: {}", device_id, e);
                None
            }
        }
    }
}
