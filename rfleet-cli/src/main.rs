use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rfleet_core::attrs::parse_pair;
use rfleet_core::{
    AttributeSet, DeviceTarget, FanoutExecutor, FleetConfig, IdentitySpec, Lookup, Reconciler,
    ResourceDescriptor, RestTransport, SecretPropagation, SecretSpec, create_audit_logger,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod output;

use output::{TargetRow, cluster_rows, print_resource, print_rows};

#[derive(Parser)]
#[command(name = "rfleet")]
#[command(about = "Reconcile router configuration across a fleet", long_about = None)]
struct Cli {
    /// Inventory file (JSON)
    #[arg(short, long, default_value = "fleet.json")]
    inventory: PathBuf,

    /// Override the inventory's maximum parallel operations
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Override the inventory's per-device timeout, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

/// Which collection to operate on.
#[derive(Args)]
struct ResourceArgs {
    /// Collection path, e.g. interface/wireguard
    #[arg(short, long)]
    path: String,

    /// Identity field (repeat for composite identities)
    #[arg(long = "identity", default_value = "name")]
    identity: Vec<String>,

    /// Field holding the device-assigned identifier
    #[arg(long, default_value = rfleet_core::resource::DEFAULT_ID_FIELD)]
    id_field: String,
}

impl ResourceArgs {
    fn descriptor(&self) -> Result<ResourceDescriptor> {
        let identity = IdentitySpec::new(self.identity.iter().cloned())?;
        Ok(ResourceDescriptor::new(&self.path, identity)?.with_id_field(&self.id_field))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Make a resource match the given attributes on one or more devices
    Ensure {
        #[command(flatten)]
        resource: ResourceArgs,

        /// Desired attribute as key=value (repeatable)
        #[arg(short, long = "set", value_parser = parse_pair, required = true)]
        set: Vec<(String, String)>,

        /// Target device (repeatable, default: every device)
        #[arg(short, long = "device")]
        devices: Vec<String>,
    },

    /// Create a secret-bearing resource on one device and copy the secret to others
    Propagate {
        #[command(flatten)]
        resource: ResourceArgs,

        /// Desired attribute as key=value (repeatable)
        #[arg(short, long = "set", value_parser = parse_pair, required = true)]
        set: Vec<(String, String)>,

        /// Device that generates the secret
        #[arg(long)]
        primary: String,

        /// Peer device (repeatable, default: every other device)
        #[arg(long = "peer")]
        peers: Vec<String>,

        /// Field holding the secret
        #[arg(long, default_value = "private-key")]
        secret_field: String,

        /// Field holding the public counterpart (empty for none)
        #[arg(long, default_value = "public-key")]
        public_field: String,
    },

    /// Show a resource without changing anything
    Lookup {
        #[command(flatten)]
        resource: ResourceArgs,

        /// Device to query
        #[arg(short, long)]
        device: String,

        /// Identity value as key=value (repeatable)
        #[arg(short, long = "key", value_parser = parse_pair, required_unless_present = "id")]
        key: Vec<(String, String)>,

        /// Device-assigned identifier
        #[arg(long, conflicts_with = "key")]
        id: Option<String>,

        /// Field whose value is masked in output (repeatable)
        #[arg(long = "hide", default_value = "private-key")]
        hide: Vec<String>,
    },
}

struct Fleet {
    config: FleetConfig,
    reconciler: Reconciler,
    fanout: FanoutExecutor,
}

impl Fleet {
    fn open(cli: &Cli) -> Result<Self> {
        let mut config = FleetConfig::load(&cli.inventory)
            .with_context(|| format!("failed to load inventory {}", cli.inventory.display()))?;
        if let Some(max_parallel) = cli.max_parallel {
            config.fanout = config.fanout.with_max_parallel(max_parallel);
        }
        if let Some(timeout) = cli.timeout {
            config.fanout = config.fanout.with_task_timeout(Duration::from_secs(timeout));
        }

        let audit = create_audit_logger("cli");
        let transport = Arc::new(
            RestTransport::new(&config.rest).context("failed to create HTTP client")?,
        );
        let reconciler = Reconciler::new(transport, Arc::clone(&audit));
        let fanout = FanoutExecutor::new(config.fanout.clone(), audit);

        Ok(Self {
            config,
            reconciler,
            fanout,
        })
    }

    fn targets(&self, names: &[String]) -> Result<Vec<DeviceTarget>> {
        let targets = if names.is_empty() {
            self.config.targets()?
        } else {
            self.config.select(names)?
        };
        if targets.is_empty() {
            bail!("inventory has no devices");
        }
        Ok(targets)
    }
}

async fn ensure(
    fleet: &Fleet,
    resource: &ResourceArgs,
    set: Vec<(String, String)>,
    devices: &[String],
) -> Result<()> {
    let descriptor = resource.descriptor()?;
    let desired: AttributeSet = set.into_iter().collect();
    let targets = fleet.targets(devices)?;

    let outcome = fleet
        .fanout
        .ensure(&fleet.reconciler, &targets, &descriptor, &desired)
        .await?;
    print_rows(cluster_rows(&outcome));

    let failed = outcome.failed().count();
    if failed > 0 {
        bail!("{failed} of {} devices failed", outcome.len());
    }
    Ok(())
}

async fn propagate(
    fleet: &Fleet,
    resource: &ResourceArgs,
    set: Vec<(String, String)>,
    primary: &str,
    peers: &[String],
    secret_field: String,
    public_field: String,
) -> Result<()> {
    let descriptor = resource.descriptor()?;
    let desired: AttributeSet = set.into_iter().collect();

    let primary = fleet
        .config
        .select(&[primary.to_string()])?
        .remove(0);
    let peers = if peers.is_empty() {
        fleet
            .config
            .targets()?
            .into_iter()
            .filter(|t| t.name() != primary.name())
            .collect()
    } else {
        fleet.config.select(peers)?
    };

    let mut spec = SecretSpec::new(secret_field);
    if !public_field.is_empty() {
        spec = spec.with_public_field(public_field);
    }
    let workflow = SecretPropagation::new(fleet.reconciler.clone(), fleet.fanout.clone(), spec);

    let outcome = workflow
        .run(&primary, &peers, &descriptor, &desired)
        .await
        .with_context(|| format!("propagation from {} failed", primary.name()))?;

    let mut rows = vec![TargetRow::new(primary.name(), &Ok(outcome.primary.clone()))];
    rows.extend(cluster_rows(&outcome.peers));
    print_rows(rows);
    if let Some(public) = &outcome.public_identifier {
        println!("public: {public}");
    }

    let failed = outcome.peers.failed().count();
    if failed > 0 {
        bail!("{failed} of {} peers failed", outcome.peers.len());
    }
    Ok(())
}

async fn lookup(
    fleet: &Fleet,
    resource: &ResourceArgs,
    device: &str,
    key: Vec<(String, String)>,
    id: Option<String>,
    hide: &[String],
) -> Result<()> {
    let descriptor = resource.descriptor()?;
    let target = fleet.config.select(&[device.to_string()])?.remove(0);

    let lookup = match id {
        Some(id) => Lookup::Id(id),
        None => {
            let values: AttributeSet = key.into_iter().collect();
            Lookup::Key(descriptor.identity().key_from(&values)?)
        }
    };

    let found = fleet.reconciler.lookup(&target, &descriptor, &lookup).await?;
    print_resource(&found, hide);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rfleet=info,rfleet_core=info,reqwest=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let fleet = Fleet::open(&cli)?;
    info!(
        devices = fleet.config.devices.len(),
        max_parallel = fleet.config.fanout.max_parallel,
        "Loaded inventory"
    );

    match cli.command {
        Commands::Ensure {
            resource,
            set,
            devices,
        } => ensure(&fleet, &resource, set, &devices).await,
        Commands::Propagate {
            resource,
            set,
            primary,
            peers,
            secret_field,
            public_field,
        } => {
            propagate(
                &fleet,
                &resource,
                set,
                &primary,
                &peers,
                secret_field,
                public_field,
            )
            .await
        }
        Commands::Lookup {
            resource,
            device,
            key,
            id,
            hide,
        } => lookup(&fleet, &resource, &device, key, id, &hide).await,
    }
}
