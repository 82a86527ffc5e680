use std::sync::Arc;

use clap::Parser;

use rdfs_config::ConfigManager;
use rdfs_datanode_manager::{
    DatanodeManager, DatanodeManagerConfig, DatanodeServiceImpl, IDatanodeService,
    MockBlockManager, MockNamesystem,
};
use rdfs_logging::LogConfig;
use rdfs_net::StaticMapping;
use rdfs_proto::{
    DatanodeId, DatanodeRegistration, DatanodeReportKind, GetDatanodeReportReq, HeartbeatReq,
    RegisterDatanodeReq, StorageReport,
};

/// Single-process walkthrough of the datanode manager:
///   1. Load config and start the manager with mock collaborators
///   2. Register a handful of simulated storage nodes
///   3. Heartbeat them and print the resulting membership report
///   4. Clean shutdown
#[derive(Parser, Debug)]
#[command(name = "rdfs-simple-example", version, about)]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when absent.
    #[arg(short, long)]
    config: Option<String>,
}

fn simulated_registration(n: u8, rack: &str, dns: &StaticMapping) -> DatanodeRegistration {
    let ip = format!("10.0.0.{}", n);
    dns.assign(ip.clone(), rack.to_string());
    DatanodeRegistration {
        id: DatanodeId {
            storage_id: Default::default(),
            ip_addr: ip.clone(),
            host_name: format!("dn{}.example.com", n),
            peer_host_name: String::new(),
            xfer_port: 50010,
            info_port: 50075,
            info_secure_port: 50475,
            ipc_port: 50020,
        },
        software_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        keys: Default::default(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = rdfs_logging::init_logging(&LogConfig::default());

    let config = match args.config.as_deref() {
        Some(path) => Arc::new(ConfigManager::<DatanodeManagerConfig>::load(path)?),
        None => Arc::new(ConfigManager::new(DatanodeManagerConfig::default())),
    };

    let dns = Arc::new(StaticMapping::new());
    let manager = Arc::new(DatanodeManager::new(
        config.snapshot(),
        MockNamesystem::new().into_arc(),
        MockBlockManager::new().into_arc(),
        Arc::clone(&dns) as Arc<dyn rdfs_net::DnsToSwitchMapping>,
    )?);
    manager.activate();

    let service = DatanodeServiceImpl::new(Arc::clone(&manager), config);

    for (n, rack) in [(1, "/dc1/rack1"), (2, "/dc1/rack1"), (3, "/dc1/rack2")] {
        let rsp = service
            .register_datanode(RegisterDatanodeReq {
                registration: simulated_registration(n, rack, &dns),
            })
            .await?;
        let reg = rsp.registration;
        tracing::info!(node = %reg.id, storage = %reg.id.storage_id, "registered");

        let hb = service
            .heartbeat(HeartbeatReq {
                registration: reg.id,
                pool_id: "BP-demo".to_string(),
                report: StorageReport {
                    capacity: 1 << 40,
                    remaining: 1 << 40,
                    ..Default::default()
                },
                max_transfers: 16,
            })
            .await?;
        tracing::info!(commands = hb.commands.len(), "heartbeat answered");
    }

    let report = service
        .get_datanode_report(GetDatanodeReportReq {
            kind: DatanodeReportKind::All,
        })
        .await?;
    for node in &report.nodes {
        tracing::info!(
            node = %node.id,
            rack = %node.network_location,
            state = ?node.admin_state,
            "member"
        );
    }
    tracing::info!(
        racks = manager.network_topology().num_racks(),
        nodes = report.nodes.len(),
        "cluster view complete"
    );

    manager.close().await;
    Ok(())
}
