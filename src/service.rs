//! Startup and teardown of a full capture session.
//!
//! [`Service::prepare`] performs every check that may fail fatally (device
//! tool present, hub address bindable) before any worker is started;
//! [`Service::run`] then drives the orchestrator until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::delivery::{Forwarder, PageSink};
use crate::device::DeviceRegistry;
use crate::error::Result;
use crate::hub::{BroadcastHub, HubServer};
use crate::orchestrator::{Orchestrator, WorkerReport};
use crate::subprocess::ProcessRunner;

pub struct Service {
    orchestrator: Orchestrator,
    hub: Option<Arc<BroadcastHub>>,
    hub_addr: Option<SocketAddr>,
    hub_task: Option<JoinHandle<Result<()>>>,
    shutdown: CancellationToken,
}

impl Service {
    pub async fn prepare(
        config: &Config,
        runner: Arc<dyn ProcessRunner>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let registry = DeviceRegistry::new(Arc::clone(&runner), &config.device);
        let version = registry.check_available().await?;
        tracing::info!("Using {}", version);

        let sink: Option<Arc<dyn PageSink>> = if config.collector.enabled {
            let forwarder = Forwarder::new(&config.collector)?;
            forwarder.probe().await;
            Some(Arc::new(forwarder))
        } else {
            tracing::info!("Collector forwarding disabled");
            None
        };

        let (hub, hub_addr, hub_task) = if config.hub.enabled {
            let hub = Arc::new(BroadcastHub::new(config.hub.subscriber_queue));
            let server = HubServer::bind(Arc::clone(&hub), &config.hub.host, config.hub.port).await?;
            let addr = server.local_addr()?;
            let task = tokio::spawn(server.serve(shutdown.clone()));
            (Some(hub), Some(addr), Some(task))
        } else {
            tracing::info!("Realtime hub disabled");
            (None, None, None)
        };

        let orchestrator = Orchestrator::new(
            config,
            runner,
            sink,
            hub.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            orchestrator,
            hub,
            hub_addr,
            hub_task,
            shutdown,
        })
    }

    /// Address the realtime hub is listening on
    pub fn hub_addr(&self) -> Option<SocketAddr> {
        self.hub_addr
    }

    pub fn hub(&self) -> Option<Arc<BroadcastHub>> {
        self.hub.clone()
    }

    /// Run until `shutdown` fires. A startup failure also stops the hub server.
    pub async fn run(self) -> Result<Vec<WorkerReport>> {
        let result = self.orchestrator.run().await;

        self.shutdown.cancel();
        if let Some(task) = self.hub_task {
            match task.await {
                Ok(Err(e)) => tracing::error!("Realtime hub failed: {}", e),
                Err(e) => tracing::error!("Realtime hub task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }

        let reports = result?;
        let pages: usize = reports.iter().map(|r| r.pages).sum();
        tracing::info!(
            "Capture session finished: {} page(s) from {} device(s)",
            pages,
            reports.len()
        );
        Ok(reports)
    }
}
