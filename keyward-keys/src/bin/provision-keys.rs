//! Provision version-1 field encryption keys for organizations
//!
//! Usage:
//!   cargo run --bin provision-keys -- org-1 org-2
//!
//! Organizations that already have a key are skipped.

use keyward_keys::{init_key_manager, KeyError, KeyType};
use keyward_logging::init_console_logging;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_console_logging("provision-keys", "info");

    let organizations: Vec<String> = std::env::args().skip(1).collect();
    if organizations.is_empty() {
        anyhow::bail!("usage: provision-keys <organization-id>...");
    }

    let services = init_key_manager(None, None).await?;

    let mut provisioned = 0;
    let mut skipped = 0;
    let mut errors = 0;

    for organization_id in &organizations {
        for key_type in [KeyType::FieldEncryption, KeyType::SearchIndex] {
            match services
                .key_manager
                .provision_organization(organization_id, key_type)
                .await
            {
                Ok(handle) => {
                    info!(key_id = %handle.id, version = handle.version, "Key provisioned");
                    provisioned += 1;
                }
                Err(KeyError::AlreadyExists(key_id)) => {
                    warn!(key_id = %key_id, "Key already exists, skipping");
                    skipped += 1;
                }
                Err(e) => {
                    error!(organization_id = %organization_id, error = %e, "Failed to provision key");
                    errors += 1;
                }
            }
        }
    }

    println!("Provisioned: {}", provisioned);
    println!("Skipped:     {}", skipped);
    println!("Errors:      {}", errors);

    if errors > 0 {
        anyhow::bail!("{} keys failed to provision", errors);
    }
    Ok(())
}
