use std::{future::Future, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    config::parse_server_url, load_settings, ClientEvent, ClientSettings, DashboardClient,
};
use shared::domain::{EmergencyVehicleDraft, IntersectionId, VehicleId, VehicleKind};
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Parser, Debug)]
#[command(name = "dashboard", about = "Emergency vehicle priority dashboard")]
struct Cli {
    /// TOML settings file; defaults to ./dashboard.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured backend URL.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load one snapshot and print the view as JSON.
    Snapshot,
    /// Follow the live stream until Ctrl-C.
    Watch,
    /// Print one intersection as the backend currently reports it.
    Intersection { id: String },
    Override {
        #[arg(long)]
        intersection: String,
        #[arg(long)]
        vehicle: String,
        #[arg(long)]
        priority: i32,
        #[arg(long, default_value_t = 300)]
        duration: i64,
    },
    Dispatch {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        dest_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        dest_lon: f64,
        #[arg(long, default_value_t = 0.0)]
        speed: f64,
        #[arg(long, default_value_t = 5)]
        priority: i32,
        /// Comma separated intersection ids.
        #[arg(long, value_delimiter = ',')]
        route: Vec<String>,
    },
    /// Check that the backend answers.
    Probe,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Ambulance,
    FireTruck,
    Police,
}

impl From<KindArg> for VehicleKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Ambulance => VehicleKind::Ambulance,
            KindArg::FireTruck => VehicleKind::FireTruck,
            KindArg::Police => VehicleKind::Police,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    let client = DashboardClient::new(settings).context("building backend client")?;

    match cli.command {
        Command::Snapshot => {
            let view = client.load_snapshot().await.context("loading snapshot")?;
            println!("{}", serde_json::to_string_pretty(&*view)?);
        }
        Command::Watch => watch(&client).await?,
        Command::Intersection { id } => {
            let intersection = client
                .fetch_intersection(&IntersectionId::new(id))
                .await
                .context("fetching intersection")?;
            println!("{}", render::intersection_line(&intersection));
        }
        Command::Override {
            intersection,
            vehicle,
            priority,
            duration,
        } => {
            client
                .load_snapshot()
                .await
                .context("loading snapshot to target the override")?;
            let ack = client
                .request_priority_override(
                    IntersectionId::new(intersection),
                    VehicleId::new(vehicle),
                    priority,
                    duration,
                )
                .await
                .context("requesting priority override")?;
            println!("{}: {}", ack.intersection_id, ack.status);
        }
        Command::Dispatch {
            kind,
            lat,
            lon,
            dest_lat,
            dest_lon,
            speed,
            priority,
            route,
        } => {
            let draft = EmergencyVehicleDraft {
                kind: kind.into(),
                latitude: lat,
                longitude: lon,
                destination_lat: dest_lat,
                destination_lon: dest_lon,
                speed,
                route: route.into_iter().map(IntersectionId::new).collect(),
                priority_level: priority,
            };
            let ack = client
                .dispatch_emergency_vehicle(draft)
                .await
                .context("dispatching emergency vehicle")?;
            println!("dispatched vehicle_id={}", ack.vehicle_id);
        }
        Command::Probe => {
            let info = client.service_info().await.context("probing backend")?;
            println!("{} (version {})", info.message, info.version);
        }
    }

    Ok(())
}

fn resolve_settings(cli: &Cli) -> Result<ClientSettings> {
    let mut settings = load_settings(cli.config.as_deref()).context("loading settings")?;
    if let Some(raw) = cli.server_url.as_deref() {
        settings.server_url = parse_server_url(raw).context("parsing --server-url")?;
    }
    Ok(settings)
}

async fn watch(client: &DashboardClient) -> Result<()> {
    follow(client, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "dashboard: cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("dashboard: interrupt received");
    })
    .await
}

/// Prints view revisions until `shutdown` resolves, then stops the client.
async fn follow(client: &DashboardClient, shutdown: impl Future<Output = ()>) -> Result<()> {
    let mut views = client.view_handle().into_stream();
    let mut events = client.subscribe_events();
    tokio::pin!(shutdown);
    client.start().await.context("starting live channel")?;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            view = views.next() => {
                let Some(view) = view else { break };
                println!("{}", render::summary_line(&view));
                for intersection in view.priority_intersections() {
                    println!("{}", render::intersection_line(intersection));
                }
            }
            event = events.recv() => match event {
                Ok(ClientEvent::LoadFailed(failure)) => warn!(error = %failure, "dashboard: snapshot failed"),
                Ok(ClientEvent::ChannelError(err)) => warn!(error = %err, "dashboard: live channel error"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "dashboard: event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.stop().await;
    Ok(())
}
