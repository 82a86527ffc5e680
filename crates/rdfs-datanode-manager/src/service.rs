//! RPC-facing facade over the [`DatanodeManager`].
//!
//! Encodes manager outcomes into the wire shapes: a heartbeat answer is
//! always an ordered command array, with "please re-register" expressed as
//! the single `Register` command and a disallowed node as an error status.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::DatanodeManagerConfig;
use crate::manager::{DatanodeManager, HeartbeatOutcome, RemoteEndpoint};
use rdfs_config::ConfigManager;
use rdfs_proto::{
    DatanodeCommand, GetDatanodeReportReq, GetDatanodeReportRsp, HeartbeatReq, HeartbeatRsp,
    RefreshNodesReq, RefreshNodesRsp, RegisterDatanodeReq, RegisterDatanodeRsp,
    SetBalancerBandwidthReq, SetBalancerBandwidthRsp,
};
use rdfs_types::Result;

/// The datanode management service surface.
#[async_trait]
pub trait IDatanodeService: Send + Sync {
    /// Admit or replace a storage node. The returned registration carries
    /// any assigned storage id and the exported block keys.
    async fn register_datanode(&self, req: RegisterDatanodeReq) -> Result<RegisterDatanodeRsp>;

    /// Process a periodic heartbeat and hand back pending commands.
    async fn heartbeat(&self, req: HeartbeatReq) -> Result<HeartbeatRsp>;

    /// Produce a membership report.
    async fn get_datanode_report(&self, req: GetDatanodeReportReq) -> Result<GetDatanodeReportRsp>;

    /// Reload host files and reclassify every node.
    async fn refresh_nodes(&self, req: RefreshNodesReq) -> Result<RefreshNodesRsp>;

    /// Broadcast a balancer bandwidth to be delivered on next heartbeats.
    async fn set_balancer_bandwidth(
        &self,
        req: SetBalancerBandwidthReq,
    ) -> Result<SetBalancerBandwidthRsp>;
}

/// Concrete implementation of [`IDatanodeService`].
pub struct DatanodeServiceImpl {
    manager: Arc<DatanodeManager>,
    config: Arc<ConfigManager<DatanodeManagerConfig>>,
}

impl DatanodeServiceImpl {
    pub fn new(
        manager: Arc<DatanodeManager>,
        config: Arc<ConfigManager<DatanodeManagerConfig>>,
    ) -> Self {
        Self { manager, config }
    }

    pub fn manager(&self) -> &Arc<DatanodeManager> {
        &self.manager
    }

    /// The transport layer passes the observed peer address here; without
    /// a transport there is nothing to override.
    fn remote_endpoint(&self) -> Option<RemoteEndpoint> {
        None
    }
}

#[async_trait]
impl IDatanodeService for DatanodeServiceImpl {
    async fn register_datanode(&self, req: RegisterDatanodeReq) -> Result<RegisterDatanodeRsp> {
        let mut registration = req.registration;
        self.manager
            .register_datanode(&mut registration, self.remote_endpoint())?;
        Ok(RegisterDatanodeRsp { registration })
    }

    async fn heartbeat(&self, req: HeartbeatReq) -> Result<HeartbeatRsp> {
        let outcome = self.manager.handle_heartbeat(
            &req.registration,
            &req.report,
            &req.pool_id,
            req.max_transfers,
        );
        match outcome {
            HeartbeatOutcome::Commands(commands) => Ok(HeartbeatRsp { commands }),
            HeartbeatOutcome::AskReregister => Ok(HeartbeatRsp {
                commands: vec![DatanodeCommand::Register],
            }),
            HeartbeatOutcome::Disallowed(status) => Err(status),
        }
    }

    async fn get_datanode_report(&self, req: GetDatanodeReportReq) -> Result<GetDatanodeReportRsp> {
        let nodes = self
            .manager
            .datanode_list_for_report(req.kind)
            .iter()
            .map(|d| d.to_info())
            .collect();
        Ok(GetDatanodeReportRsp { nodes })
    }

    async fn refresh_nodes(&self, _req: RefreshNodesReq) -> Result<RefreshNodesRsp> {
        if let Err(e) = self.config.reload() {
            warn!(error = %e, "config reload failed; refreshing with the running config");
        }
        self.manager.refresh_nodes(&self.config.snapshot());
        Ok(RefreshNodesRsp {})
    }

    async fn set_balancer_bandwidth(
        &self,
        req: SetBalancerBandwidthReq,
    ) -> Result<SetBalancerBandwidthRsp> {
        self.manager.set_balancer_bandwidth(req.bandwidth);
        Ok(SetBalancerBandwidthRsp {})
    }
}
