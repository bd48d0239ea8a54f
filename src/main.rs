use std::path::PathBuf;
use std::sync::Arc;

use federation::config::{Config, Opts};
use federation::event::KubeEventRecorder;
use federation::federated::cluster::launch_watcher;
use federation::federated::{ClusterRegistry, KubeClusterOperations, KubeFederatedInformer};
use federation::store::MemoryStore;
use federation::updater::ConcurrentUpdater;
use federation::SecretController;
use flowcontrol::bootstrap;
use flowcontrol::concurrency::assured_concurrency_limits;
use flowcontrol::matching::flow_hash;
use flowcontrol::shufflesharding::Dealer;
use flowcontrol::types::decode_manifests;
use flowcontrol::validation::{
    into_result, validate_flow_schema, validate_priority_level_configuration,
};
use flowcontrol::FlowControlObject;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use structopt::StructOpt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const NOTIFICATION_BUFFER: usize = 1024;
const COMPONENT: &str = "federated-secret-controller";

#[derive(StructOpt, Debug)]
#[structopt(
    name = "fedflow",
    about = "Federated Secret reconciliation and API priority and fairness tooling"
)]
enum Command {
    /// Runs the federated Secret controller
    Run(Opts),
    /// Validates flow-control manifests and prints assured concurrency.
    /// Validates the bootstrap configuration when no file is given.
    Validate {
        #[structopt(parse(from_os_str), help = "YAML manifests to validate")]
        files: Vec<PathBuf>,

        #[structopt(
            long = "server-concurrency-limit",
            default_value = "600",
            env = "FEDFLOW_SERVER_CONCURRENCY_LIMIT",
            help = "Total concurrency limit of the API server"
        )]
        server_concurrency_limit: u32,
    },
    /// Prints the hand of queues dealt to a flow and the queue it lands in
    Deal {
        #[structopt(long = "queues", default_value = "128", help = "Number of queues")]
        queues: usize,

        #[structopt(long = "hand-size", default_value = "6", help = "Queues dealt per flow")]
        hand_size: usize,

        #[structopt(long = "flow-schema", help = "Name of the matching flow schema")]
        flow_schema: String,

        #[structopt(
            long = "distinguisher",
            default_value = "",
            help = "User name or namespace distinguishing the flow"
        )]
        distinguisher: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let app = Command::clap().version(env!("CARGO_PKG_VERSION"));
    match Command::from_clap(&app.get_matches()) {
        Command::Run(opts) => run(Config::try_from(opts)?).await,
        Command::Validate {
            files,
            server_concurrency_limit,
        } => validate(&files, server_concurrency_limit),
        Command::Deal {
            queues,
            hand_size,
            flow_schema,
            distinguisher,
        } => deal(queues, hand_size, &flow_schema, &distinguisher),
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let host = host_client(&config).await?;
    let members =
        ClusterRegistry::from_kubeconfig(config.kubeconfig.as_deref(), &config.member_contexts)
            .await?;
    if members.is_empty() {
        anyhow::bail!("No member clusters configured. Pass --member-contexts.");
    }
    info!(members = ?members.names(), "Starting federation.");

    let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
    let stop = CancellationToken::new();

    let local = Arc::new(MemoryStore::<Secret>::new());
    let local_watcher = tokio::spawn(launch_watcher(
        Api::<Secret>::all(host.clone()),
        Arc::clone(&local),
        None,
        tx.clone(),
    ));

    let informer = Arc::new(KubeFederatedInformer::<Secret>::new(
        members.clone(),
        config.cluster_probe_period,
        tx,
    )?);
    let probes = informer.start(stop.clone());

    let controller = Arc::new(SecretController::new(
        config,
        local,
        informer,
        Arc::new(ConcurrentUpdater::new(Arc::new(KubeClusterOperations::new(
            members,
        )))),
        Arc::new(KubeEventRecorder::new(host, COMPONENT)),
    ));

    let signal = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Got interrupt. Shutting down."),
            Err(error) => warn!(?error, "Unable to listen for interrupts. Shutting down."),
        }
        signal.cancel();
    });

    controller.run(rx, stop).await?;
    local_watcher.abort();
    for probe in probes {
        probe.await?;
    }
    Ok(())
}

async fn host_client(config: &Config) -> anyhow::Result<kube::Client> {
    match &config.host_context {
        Some(context) => {
            let registry = ClusterRegistry::from_kubeconfig(
                config.kubeconfig.as_deref(),
                std::slice::from_ref(context),
            )
            .await?;
            registry
                .client(context)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Unable to load host context {}", context))
        }
        None => Ok(kube::Client::try_default().await?),
    }
}

fn validate(files: &[PathBuf], server_concurrency_limit: u32) -> anyhow::Result<()> {
    let objects = if files.is_empty() {
        bootstrap_objects()
    } else {
        let mut objects = Vec::new();
        for file in files {
            let manifest = std::fs::read_to_string(file)
                .map_err(|e| anyhow::anyhow!("Unable to read {}: {}", file.display(), e))?;
            objects.extend(decode_manifests(&manifest)?);
        }
        objects
    };

    let report = check(objects, server_concurrency_limit);
    for line in &report.lines {
        println!("{}", line);
    }
    if report.invalid > 0 {
        anyhow::bail!("{} invalid object(s)", report.invalid);
    }
    Ok(())
}

fn bootstrap_objects() -> Vec<FlowControlObject> {
    bootstrap::mandatory_priority_levels()
        .into_iter()
        .chain(bootstrap::suggested_priority_levels())
        .map(FlowControlObject::PriorityLevelConfiguration)
        .chain(
            bootstrap::mandatory_flow_schemas()
                .into_iter()
                .chain(bootstrap::suggested_flow_schemas())
                .map(FlowControlObject::FlowSchema),
        )
        .collect()
}

struct Report {
    lines: Vec<String>,
    invalid: usize,
}

fn check(objects: Vec<FlowControlObject>, server_concurrency_limit: u32) -> Report {
    let mut report = Report {
        lines: Vec::new(),
        invalid: 0,
    };
    let mut levels = Vec::new();
    for object in objects {
        let errors = match &object {
            FlowControlObject::FlowSchema(fs) => validate_flow_schema(fs),
            FlowControlObject::PriorityLevelConfiguration(pl) => {
                validate_priority_level_configuration(pl)
            }
        };
        match into_result(object.kind(), object.name(), errors) {
            Ok(()) => report
                .lines
                .push(format!("{} {:?} is valid", object.kind(), object.name())),
            Err(error) => {
                report.invalid += 1;
                report.lines.push(error.to_string());
            }
        }
        if let FlowControlObject::PriorityLevelConfiguration(pl) = object {
            levels.push(pl);
        }
    }

    if !levels.is_empty() {
        report.lines.push(format!(
            "Assured concurrency for a server limit of {}:",
            server_concurrency_limit
        ));
        for (name, limit) in assured_concurrency_limits(server_concurrency_limit, &levels) {
            report.lines.push(format!("  {}: {}", name, limit));
        }
    }
    report
}

fn deal(
    queues: usize,
    hand_size: usize,
    flow_schema: &str,
    distinguisher: &str,
) -> anyhow::Result<()> {
    let dealer = Dealer::new(queues, hand_size)?;
    let hash = flow_hash(flow_schema, distinguisher);
    let mut hand = Vec::new();
    dealer.deal_into_hand(hash, &mut hand);
    println!("flow hash: {:#018x}", hash);
    println!("hand: {:?}", hand);
    println!("queue (all empty): {}", dealer.pick_shortest(hash, |_| 0));
    Ok(())
}
