use controller::{config::ControllerConfig, DrainController};
use models::{
    compute::{project_id_from_key_file, AccessTokenSource, ClusterRef, GceComputeClient},
    node::K8SNodeClient,
    telemetry,
};

use argh::FromArgs;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use snafu::{OptionExt, ResultExt};
use std::convert::TryFrom;
use std::path::{Path, PathBuf};
use std::process;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

/// The module-wide result type.
type Result<T> = std::result::Result<T, controller_error::Error>;

const DEFAULT_INTERVAL_MINUTES: u64 = 10;

#[derive(FromArgs, Debug)]
/// Drains and recycles the preemptible nodes of a GKE cluster before the platform reclaims them.
struct Arguments {
    /// name of the GKE cluster
    #[argh(option)]
    name: String,

    /// path to the service account key file
    #[argh(option)]
    key: PathBuf,

    /// zone of the GKE cluster
    #[argh(option)]
    zone: String,

    /// path to the kubeconfig file of the cluster
    #[argh(option)]
    kubeconfig: PathBuf,

    /// minutes between two monitoring cycles
    #[argh(option, default = "DEFAULT_INTERVAL_MINUTES")]
    interval: u64,

    /// run a single monitoring cycle and exit
    #[argh(switch)]
    once: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Arguments = argh::from_env();

    telemetry::init_telemetry_from_env().context(controller_error::TelemetryInitSnafu)?;

    let config = ControllerConfig::from_environment()
        .context(controller_error::ConfigSnafu)?
        .with_poll_interval(poll_interval(args.interval)?);

    let project_id =
        project_id_from_key_file(&args.key).context(controller_error::ReadProjectIdSnafu)?;
    let cluster = ClusterRef::new(project_id, args.zone, args.name);

    let compute_client = GceComputeClient::new(AccessTokenSource::from_key_file(&args.key))
        .context(controller_error::ComputeClientCreateSnafu)?;

    let node_client = match node_client_from_kubeconfig(&args.kubeconfig).await {
        Ok(node_client) => Some(node_client),
        Err(err) if config.debug_mode() => {
            event!(
                Level::WARN,
                error = %err,
                "Unable to build Kubernetes client, nodes will be deleted without draining."
            );
            None
        }
        Err(err) => return Err(err),
    };

    event!(Level::INFO, %cluster, ?config, "Starting drain controller.");
    let controller = DrainController::new(cluster, compute_client, node_client, config);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    if args.once {
        let summary = controller
            .monitor(&shutdown)
            .await
            .context(controller_error::ControllerSnafu)?;
        event!(Level::INFO, ?summary, "Monitoring cycle finished.");
        return Ok(());
    }

    controller
        .run(shutdown)
        .await
        .context(controller_error::ControllerSnafu)
}

/// Converts the `--interval` flag into the time between two monitoring cycles.
fn poll_interval(minutes: u64) -> Result<Duration> {
    let seconds = minutes
        .checked_mul(60)
        .filter(|seconds| *seconds > 0)
        .context(controller_error::InvalidIntervalSnafu { interval: minutes })?;
    Ok(Duration::from_secs(seconds))
}

async fn node_client_from_kubeconfig(path: &Path) -> Result<K8SNodeClient> {
    let kubeconfig = Kubeconfig::read_from(path).context(controller_error::ReadKubeConfigSnafu)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context(controller_error::LoadKubeConfigSnafu)?;
    let k8s_client =
        kube::client::Client::try_from(config).context(controller_error::ClientCreateSnafu)?;
    Ok(K8SNodeClient::new(k8s_client))
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                event!(Level::WARN, error = %err, "Unable to listen for SIGTERM.");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate => {},
    }
    event!(Level::INFO, "Received shutdown signal.");
    shutdown.cancel();
}

pub mod controller_error {
    use controller::{config::config_error, error as drain_error};
    use models::{compute::ComputeError, telemetry};
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Error configuring telemetry: '{}'", source))]
        TelemetryInit {
            source: telemetry::TelemetryConfigError,
        },

        #[snafu(display(
            "Polling interval must be between 1 and {} minutes, got '{}'",
            u64::MAX / 60,
            interval
        ))]
        InvalidInterval { interval: u64 },

        #[snafu(display("Invalid controller configuration: '{}'", source))]
        Config { source: config_error::Error },

        #[snafu(display("Unable to determine project from key file: '{}'", source))]
        ReadProjectId { source: ComputeError },

        #[snafu(display("Unable to create compute client: '{}'", source))]
        ComputeClientCreate { source: ComputeError },

        #[snafu(display("Unable to read kubeconfig: '{}'", source))]
        ReadKubeConfig {
            source: kube::config::KubeconfigError,
        },

        #[snafu(display("Unable to load kubeconfig: '{}'", source))]
        LoadKubeConfig {
            source: kube::config::KubeconfigError,
        },

        #[snafu(display("Unable to create Kubernetes client: '{}'", source))]
        ClientCreate { source: kube::Error },

        #[snafu(display("Error running drain controller: '{}'", source))]
        Controller { source: drain_error::Error },
    }
}
