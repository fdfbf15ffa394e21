//! The gRPC surface: translating requests into registry lookups, cache
//! reads, and write-queue enqueues.
//!
//! The server never blocks on the scheduler. Writes are try-sent onto the
//! bounded queue and a full queue surfaces to the caller as
//! `ResourceExhausted`.

use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{ReceiverStream, UnixListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use meridian_proto::v1 as proto;
use meridian_proto::{PluginV1, PluginV1Server};

use crate::cache::ReadingCache;
use crate::config::NetworkConfig;
use crate::device::WriteData;
use crate::errors::{Result, SdkError};
use crate::reading::rfc3339_now;
use crate::registry::DeviceRegistry;
use crate::scheduler::QueuedWrite;
use crate::transaction::{TransactionTracker, WriteTransaction};

/// The plugin's RPC server state.
pub struct PluginServer {
    registry: Arc<DeviceRegistry>,
    cache: ReadingCache,
    tracker: TransactionTracker,
    write_tx: mpsc::Sender<QueuedWrite>,
    meta: proto::PluginMeta,
}

impl PluginServer {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        cache: ReadingCache,
        tracker: TransactionTracker,
        write_tx: mpsc::Sender<QueuedWrite>,
        meta: proto::PluginMeta,
    ) -> Self {
        Self {
            registry,
            cache,
            tracker,
            write_tx,
            meta,
        }
    }

    /// Per-kind capability projection of the registry.
    fn kind_capabilities(&self) -> Vec<proto::DeviceCapability> {
        let mut capabilities: Vec<proto::DeviceCapability> = Vec::new();
        for device in self.registry.devices() {
            if capabilities.iter().any(|c| c.kind == device.kind) {
                continue;
            }
            capabilities.push(proto::DeviceCapability {
                kind: device.kind.clone(),
                device_type: device.device_type.clone(),
                model: device.model.clone(),
                readable: device.is_readable(),
                writable: device.is_writable(),
            });
        }
        capabilities
    }
}

#[tonic::async_trait]
impl PluginV1 for PluginServer {
    type DevicesStream = ReceiverStream<std::result::Result<proto::DeviceSummary, Status>>;

    async fn devices(
        &self,
        request: Request<proto::DeviceFilter>,
    ) -> std::result::Result<Response<Self::DevicesStream>, Status> {
        let filter = request.into_inner();
        let summaries: Vec<proto::DeviceSummary> = self
            .registry
            .devices()
            .iter()
            .filter(|d| filter.kind.is_empty() || d.kind == filter.kind)
            .map(|d| d.encode())
            .collect();

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for summary in summaries {
                if tx.send(Ok(summary)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn read(
        &self,
        request: Request<proto::ReadRequest>,
    ) -> std::result::Result<Response<proto::ReadResponse>, Status> {
        let req = request.into_inner();
        if !self.registry.contains(&req.device_id) {
            return Err(SdkError::UnknownDevice(req.device_id).into());
        }

        let readings = self.cache.get(&req.device_id).await.unwrap_or_default();
        Ok(Response::new(proto::ReadResponse {
            readings: readings.iter().map(|r| r.encode()).collect(),
        }))
    }

    async fn write(
        &self,
        request: Request<proto::WriteRequest>,
    ) -> std::result::Result<Response<proto::WriteResponse>, Status> {
        let req = request.into_inner();
        if !self.registry.contains(&req.device_id) {
            return Err(SdkError::UnknownDevice(req.device_id).into());
        }
        if req.writes.is_empty() {
            return Err(Status::invalid_argument("no writes provided"));
        }

        let mut transactions = Vec::with_capacity(req.writes.len());
        for write in req.writes {
            let data = WriteData::new(write.action, write.data);
            let transaction = WriteTransaction::new(req.device_id.clone(), data.clone());
            let queued = QueuedWrite {
                transaction_id: transaction.id.clone(),
                device_id: req.device_id.clone(),
                data,
            };

            self.tracker.add(transaction.clone()).await;
            match self.write_tx.try_send(queued) {
                Ok(()) => transactions.push(transaction.encode()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.tracker.remove(&transaction.id).await;
                    return Err(SdkError::QueueFull.into());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.tracker.remove(&transaction.id).await;
                    return Err(Status::unavailable("write queue is closed"));
                }
            }
        }

        Ok(Response::new(proto::WriteResponse { transactions }))
    }

    async fn transaction(
        &self,
        request: Request<proto::TransactionRequest>,
    ) -> std::result::Result<Response<proto::TransactionStatus>, Status> {
        let req = request.into_inner();
        match self.tracker.get(&req.id).await {
            Some(transaction) => Ok(Response::new(transaction.encode())),
            None => Err(Status::not_found(format!("unknown transaction: {}", req.id))),
        }
    }

    async fn metainfo(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::PluginMeta>, Status> {
        Ok(Response::new(self.meta.clone()))
    }

    async fn health(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::HealthStatus>, Status> {
        Ok(Response::new(proto::HealthStatus {
            status: "ok".to_string(),
            timestamp: rfc3339_now(),
        }))
    }

    async fn capabilities(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::CapabilitiesResponse>, Status> {
        Ok(Response::new(proto::CapabilitiesResponse {
            capabilities: self.kind_capabilities(),
        }))
    }
}

/// Serve the plugin RPC service until the shutdown signal fires.
///
/// Listens on a Unix-domain socket by default; TCP when configured.
pub async fn serve(
    server: PluginServer,
    network: &NetworkConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let service = PluginV1Server::new(server);
    let mut shutdown = shutdown;
    let signal = async move {
        if !*shutdown.borrow() {
            let _ = shutdown.changed().await;
        }
    };

    match network.network_type.as_str() {
        "tcp" => {
            let addr: std::net::SocketAddr = network
                .address
                .parse()
                .map_err(|err| SdkError::Server(format!("invalid tcp address: {}", err)))?;
            tracing::info!(%addr, "serving plugin over tcp");
            Server::builder()
                .add_service(service)
                .serve_with_shutdown(addr, signal)
                .await
                .map_err(|err| SdkError::Server(err.to_string()))?;
        }
        _ => {
            let path = Path::new(&network.address);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // A stale socket from a previous run would fail the bind.
            let _ = std::fs::remove_file(path);

            let listener = UnixListener::bind(path)?;
            tracing::info!(path = %path.display(), "serving plugin over unix socket");
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), signal)
                .await
                .map_err(|err| SdkError::Server(err.to_string()))?;

            let _ = std::fs::remove_file(path);
        }
    }

    tracing::info!("plugin server stopped");
    Ok(())
}
