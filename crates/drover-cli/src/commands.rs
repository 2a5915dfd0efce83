use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use drover_controllers::machine_config::JOIN_CONFIG_ID;
use drover_controllers::{
    ClusterMachineStatusController, ClusterSecretsController, ConfigStatusController,
    ConfigVersionController, InboundSnapshot, MachineConfigController, MachineConfigOptions,
    MachineRequestSetController, MachineStatusSnapshotController,
};
use drover_domain::{JoinConfig, Resource};
use drover_machine::{GrpcProvider, Timeouts};
use drover_runtime::{QController, Runtime};
use drover_store::{InMemoryStore, ResourceStoreExt};
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::CoreArgs;

struct Core {
    runtime: Runtime,
    /// Handed to the siderolink and infra front-ends; held here so the push
    /// channels stay open for the lifetime of the process.
    _link_events: mpsc::Sender<InboundSnapshot>,
    _power_events: mpsc::Sender<InboundSnapshot>,
}

async fn build(args: &CoreArgs) -> Result<Core> {
    let store = Arc::new(InMemoryStore::new());

    let join_config = Resource::new(JOIN_CONFIG_ID, JoinConfig {
        siderolink_api_url: args.siderolink_api_url.clone(),
        event_sink_port: args.event_sink_port,
        kmsg_log_url: args.kmsg_log_url.clone(),
        use_grpc_tunnel: args.grpc_tunnel,
    });
    store.create(join_config).await?;

    let provider =
        Arc::new(GrpcProvider::new(Timeouts::default(), args.local_socket.clone()));

    let mut runtime = Runtime::new(store);
    runtime.register(QController::new(ClusterSecretsController));
    runtime.register(QController::new(ConfigVersionController));
    runtime.register(QController::new(MachineConfigController::new(MachineConfigOptions {
        image_factory_host: args.image_factory_host.clone(),
        default_installer: args.default_installer.clone(),
        registry_mirrors: args.registry_mirrors.clone(),
    })));
    runtime.register(QController::new(ConfigStatusController::new(
        provider.clone(),
        args.image_factory_host.clone(),
        args.default_installer.clone(),
    )));
    runtime.register(ClusterMachineStatusController);
    runtime.register(MachineRequestSetController);

    let (snapshots, link_events, power_events) = MachineStatusSnapshotController::new(
        provider,
        Duration::from_secs(args.pull_interval_secs),
    );
    runtime.register(snapshots);

    Ok(Core { runtime, _link_events: link_events, _power_events: power_events })
}

pub async fn run(args: CoreArgs) -> Result<()> {
    let core = build(&args).await?;

    let cancel = core.runtime.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            cancel.cancel();
        }
    });

    info!("starting reconciliation core");
    core.runtime.run().await?;
    info!("runtime stopped");
    Ok(())
}

pub async fn graph(args: CoreArgs) -> Result<()> {
    let core = build(&args).await?;
    let resolved = core.runtime.validate()?;

    println!("controllers in dependency order:");
    for (position, name) in resolved.topo_order.iter().enumerate() {
        println!("  {}. {}", position + 1, name);
    }
    println!();
    for meta in core.runtime.metas() {
        println!("{} (concurrency {})", meta.name, meta.concurrency);
        for input in &meta.inputs {
            println!("  in:  {}/{} {:?} via {:?}", input.namespace, input.kind, input.input_kind, input.mapper);
        }
        for output in &meta.outputs {
            println!("  out: {}/{} {:?}", output.namespace, output.kind, output.output_kind);
        }
    }
    Ok(())
}
