use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use djanalytics::config::Config;
use djanalytics::models::{EventQuery, Tenant};
use djanalytics::storage::{self, Storage, StorageError};

#[derive(Parser)]
#[command(name = "dja-admin")]
#[command(about = "djanalytics tenant and filter management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a tenant and print its public id
    CreateTenant {
        /// Display name
        name: String,
    },
    /// List all tenants
    ListTenants,
    /// Allow capture traffic referred from a hostname
    AddDomain {
        /// Tenant public id (UUID)
        tenant: String,
        /// Bare hostname, e.g. www.example.com
        hostname: String,
    },
    /// Drop capture traffic from a CIDR block
    AddIpFilter {
        /// Tenant public id (UUID)
        tenant: String,
        /// CIDR netmask, e.g. 10.0.0.0/8
        netmask: String,
    },
    /// Drop capture traffic whose path matches a regular expression
    AddPathFilter {
        /// Tenant public id (UUID)
        tenant: String,
        /// Regular expression searched in the page path
        pattern: String,
    },
    /// Show recent capture events for a tenant
    Events {
        /// Tenant public id (UUID)
        tenant: String,
        #[arg(long)]
        tracking_key: Option<String>,
        #[arg(long)]
        visitor_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

async fn find_tenant(storage: &dyn Storage, tenant: &str) -> Result<Tenant> {
    let uuid = uuid::Uuid::parse_str(tenant.trim())
        .with_context(|| format!("'{tenant}' is not a valid tenant id"))?;
    storage
        .find_tenant_by_uuid(&uuid.hyphenated().to_string())
        .await?
        .ok_or_else(|| anyhow!("Tenant '{tenant}' not found"))
}

fn describe(err: StorageError, what: &str) -> anyhow::Error {
    match err {
        StorageError::Conflict => anyhow!("{what} already exists"),
        StorageError::Invalid(reason) => anyhow!(reason),
        StorageError::Other(e) => e.context(format!("failed to create {what}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = storage::connect(&config.database).await?;

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::CreateTenant { name } => {
            let tenant = storage
                .create_tenant(&name)
                .await
                .map_err(|e| describe(e, "tenant"))?;
            println!("✓ Created tenant '{}' with id {}", tenant.name, tenant.uuid);
        }
        Commands::ListTenants => {
            let tenants = storage.list_tenants().await?;
            if tenants.is_empty() {
                println!("No tenants found.");
            } else {
                println!("{:<38} {}", "Tenant ID", "Name");
                println!("{}", "-".repeat(80));
                for tenant in tenants {
                    println!("{:<38} {}", tenant.uuid, tenant.name);
                }
            }
        }
        Commands::AddDomain { tenant, hostname } => {
            let tenant = find_tenant(storage.as_ref(), &tenant).await?;
            let domain = storage
                .create_domain(tenant.id, &hostname)
                .await
                .map_err(|e| describe(e, "domain"))?;
            println!("✓ Tenant '{}' now accepts traffic from {}", tenant.name, domain.pattern);
        }
        Commands::AddIpFilter { tenant, netmask } => {
            let tenant = find_tenant(storage.as_ref(), &tenant).await?;
            let filter = storage
                .create_ip_filter(tenant.id, &netmask)
                .await
                .map_err(|e| describe(e, "IP filter"))?;
            println!("✓ Tenant '{}' now ignores {}", tenant.name, filter.netmask);
        }
        Commands::AddPathFilter { tenant, pattern } => {
            let tenant = find_tenant(storage.as_ref(), &tenant).await?;
            let filter = storage
                .create_path_filter(tenant.id, &pattern)
                .await
                .map_err(|e| describe(e, "path filter"))?;
            println!(
                "✓ Tenant '{}' now ignores paths matching {}",
                tenant.name, filter.path_pattern
            );
        }
        Commands::Events {
            tenant,
            tracking_key,
            visitor_id,
            limit,
        } => {
            let tenant = find_tenant(storage.as_ref(), &tenant).await?;
            let events = storage
                .list_events(&EventQuery {
                    tenant_id: Some(tenant.id),
                    tracking_key,
                    visitor_id,
                    limit,
                })
                .await?;
            if events.is_empty() {
                println!("No events found.");
            } else {
                println!(
                    "{:<20} {:<33} {:<33} {}",
                    "Recorded", "Tracking key", "Visitor id", "Path"
                );
                println!("{}", "-".repeat(110));
                for event in events {
                    let recorded = chrono::DateTime::from_timestamp(event.created_at, 0)
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| event.created_at.to_string());
                    println!(
                        "{:<20} {:<33} {:<33} {}",
                        recorded, event.tracking_key, event.visitor_id, event.path
                    );
                }
            }
        }
    }

    Ok(())
}
