use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "drover",
    about = "Fleet reconciliation core: drives allocated machines through config apply, upgrade and reset",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the reconciliation core until interrupted.
    Run(CoreArgs),

    /// Validate the controller graph and print it in dependency order.
    Graph(CoreArgs),
}

#[derive(Debug, Args)]
pub struct CoreArgs {
    /// Image factory host used to compose installer references.
    #[arg(long, env = "DROVER_IMAGE_FACTORY_HOST", default_value = "factory.drover.dev")]
    pub image_factory_host: String,

    /// Installer image for nodes without a schematic.
    #[arg(
        long,
        env = "DROVER_DEFAULT_INSTALLER",
        default_value = "registry.drover.dev/node-os/installer"
    )]
    pub default_installer: String,

    /// Siderolink API URL nodes join through.
    #[arg(long, env = "DROVER_SIDEROLINK_API_URL", default_value = "https://drover.local:8090")]
    pub siderolink_api_url: String,

    /// Event sink port inside the node tunnel.
    #[arg(long, env = "DROVER_EVENT_SINK_PORT", default_value_t = 8091)]
    pub event_sink_port: u16,

    /// Kmsg log sink URL; empty disables the kmsg document.
    #[arg(long, env = "DROVER_KMSG_LOG_URL", default_value = "")]
    pub kmsg_log_url: String,

    /// Route node traffic through the gRPC tunnel.
    #[arg(long, env = "DROVER_GRPC_TUNNEL")]
    pub grpc_tunnel: bool,

    /// Registry mirror in `registry=endpoint` form; repeatable.
    #[arg(long = "registry-mirror")]
    pub registry_mirrors: Vec<String>,

    /// Local node-API socket for machines without a management address.
    #[arg(long, env = "DROVER_LOCAL_SOCKET")]
    pub local_socket: Option<String>,

    /// Seconds between stage pulls for connected machines.
    #[arg(long, env = "DROVER_PULL_INTERVAL", default_value_t = 30)]
    pub pull_interval_secs: u64,
}
