use anyhow::Result;
use clap::Parser;
use discovery_rs::utils::logger;
use discovery_rs::{Config, EtcdRegistry, Registrar, Registry};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service name to register under
    #[arg(short, long, default_value = "demo")]
    name: String,

    /// Bind address; a wildcard host is resolved to a routable one
    #[arg(short, long, default_value = ":8080")]
    address: String,

    /// Public address to advertise instead of the bind address
    #[arg(long)]
    advertise: Option<String>,

    /// etcd endpoint
    #[arg(short, long, default_value = "http://localhost:2379")]
    etcd: String,

    /// Registration TTL in seconds
    #[arg(long, default_value_t = 15)]
    ttl: u64,

    /// Renewal interval in seconds, 0 disables renewal
    #[arg(long, default_value_t = 5)]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = logger::init("./logs".to_string())?;

    let registry = Arc::new(EtcdRegistry::connect(vec![args.etcd.clone()], None).await?);

    let mut builder = Config::builder()
        .name(args.name)
        .address(args.address)
        .register_ttl(Duration::from_secs(args.ttl))
        .register_interval(Duration::from_secs(args.interval));
    if let Some(advertise) = args.advertise {
        builder = builder.advertise(advertise);
    }

    let registrar = Registrar::new(registry.clone(), builder.build());
    registrar.register().await?;
    registrar.start().await;

    // tail every change under the registry prefix, this instance included
    let (watch_handle, mut watcher) = registry.watch().await?;
    let watch_task = tokio::spawn(async move {
        loop {
            match watcher.next().await {
                Ok(event) => {
                    info!(
                        "Observed {} for {} ({} nodes)",
                        event.action,
                        event.service.name,
                        event.service.nodes.len()
                    );
                }
                Err(e) => {
                    info!("Watch ended: {}", e);
                    break;
                }
            }
        }
    });

    info!("Registered, press ctrl-c to deregister and exit");
    tokio::signal::ctrl_c().await?;

    registrar.stop().await?;
    // closing the stream lets the consumer loop see StreamClosed and finish
    watch_handle.stop().await;
    let _ = watch_task.await;
    Ok(())
}
