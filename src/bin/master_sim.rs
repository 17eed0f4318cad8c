use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::future::try_join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use zookeeper_master::{
    ContainerIdFactory, Consumer, CoordinationConfig, EndpointRegistry, InMemoryEnsemble,
    MasterComponent, MasterConfig, MasterConsumer, processor_fn,
};

#[derive(Parser)]
#[command(name = "master-sim")]
#[command(about = "Runs an in-process cluster of master consumers and kills the master periodically")]
struct Cli {
    /// Number of cluster members
    #[arg(long, default_value_t = 3)]
    members: usize,

    /// Group every member joins
    #[arg(long, default_value = "orders")]
    group: String,

    #[arg(long, default_value = "/camel/zookeepermaster/clusters/master")]
    zk_root: String,

    /// Period of the wrapped timer consumer
    #[arg(long, default_value_t = 200)]
    period_ms: u64,

    /// Pause between master kills
    #[arg(long, default_value_t = 2000)]
    kill_every_ms: u64,

    #[arg(long, default_value_t = 3)]
    rounds: usize,
}

/// Fixed container name per simulated process.
#[derive(Debug)]
struct NamedContainer(String);

impl ContainerIdFactory for NamedContainer {
    fn new_container_id(&self) -> String {
        self.0.clone()
    }
}

struct Member {
    name: String,
    component: MasterComponent,
    consumer: MasterConsumer,
    processed: Arc<AtomicU64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    if cli.members == 0 {
        bail!("--members must be at least 1");
    }

    let ensemble = Arc::new(InMemoryEnsemble::new());
    let uri = format!(
        "zookeeper-master:{}:timer:{}?period={}",
        cli.group, cli.group, cli.period_ms
    );

    let mut members = Vec::with_capacity(cli.members);
    for index in 1..=cli.members {
        let name = format!("m{}", index);
        let config = MasterConfig::new(
            CoordinationConfig::default().connection_timeout(Duration::from_secs(2)),
        )
        .zk_root(&cli.zk_root)
        .container_id_factory(Arc::new(NamedContainer(name.clone())));

        let component = MasterComponent::new(
            ensemble.clone(),
            config,
            Arc::new(EndpointRegistry::with_defaults()),
        )
        .with_context(|| format!("creating component for {}", name))?;
        let endpoint = component.create_endpoint(&uri)?;

        let processed = Arc::new(AtomicU64::new(0));
        let counter = processed.clone();
        let consumer = endpoint.master_consumer(processor_fn(move |_exchange| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }))?;
        consumer
            .start()
            .await
            .with_context(|| format!("starting {}", name))?;

        members.push(Member {
            name,
            component,
            consumer,
            processed,
        });
    }

    let pause = Duration::from_millis(cli.kill_every_ms);
    for round in 1..=cli.rounds {
        tokio::time::sleep(pause).await;
        print_status(round, &members);

        let Some(master) = members.iter().find(|m| m.consumer.status().delegate_running) else {
            println!("no master this round");
            continue;
        };
        match master.component.groups().connection().session_id() {
            Some(session) => {
                println!("expiring session {} of {}", session, master.name);
                ensemble.expire_session(session);
            }
            None => println!("{} has no session to expire", master.name),
        }
    }

    tokio::time::sleep(pause).await;
    print_status(cli.rounds + 1, &members);

    try_join_all(members.iter().map(|member| member.consumer.stop())).await?;
    try_join_all(members.iter().map(|member| member.component.stop())).await?;
    Ok(())
}

fn print_status(round: usize, members: &[Member]) {
    println!("\n== round {} ==", round);
    println!(
        "{:<6} {:<10} {:<7} {:<8} {:<10}",
        "member", "connected", "master", "running", "processed"
    );
    for member in members {
        let status = member.consumer.status();
        println!(
            "{:<6} {:<10} {:<7} {:<8} {:<10}",
            member.name,
            status.connected,
            status.master,
            status.delegate_running,
            member.processed.load(Ordering::Relaxed)
        );
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
