//! Container stores and the URL catalog that opens them.
//!
//! A store is opened once per run from a connection URL:
//!
//! | Scheme | Store |
//! |---|---|
//! | `memory://` | [`MemoryStore`], in-process and empty |
//! | `sqlite://path` | [`SqliteStore`] (feature `sqlite`) |
//! | `griddb`, `oracle`, `postgres`, `mysql` | recognised, client not bundled |

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;

use tracing::info;

use crate::config::redact_url;
use crate::core::ContainerStore;
use crate::error::{MigrateError, Result};

/// Schemes with a known vendor client that this build does not carry.
const VENDOR_SCHEMES: &[&str] = &["griddb", "oracle", "postgres", "postgresql", "mysql"];

/// Split `scheme://rest` into its lower-cased scheme and the remainder.
pub fn parse_scheme(url: &str) -> Result<(String, &str)> {
    match url.find("://") {
        Some(idx) if idx > 0 => Ok((url[..idx].to_ascii_lowercase(), &url[idx + 3..])),
        _ => Err(MigrateError::Config(format!(
            "connection URL must look like scheme://location, got '{}'",
            redact_url(url)
        ))),
    }
}

/// Open the store named by `url`.
///
/// A recognised scheme whose client is missing yields
/// [`MigrateError::CapabilityMissing`]; an unknown scheme is a configuration
/// error.
pub async fn open_store(url: &str, max_connections: u32) -> Result<Arc<dyn ContainerStore>> {
    let (scheme, location) = parse_scheme(url)?;
    info!("Opening {} store at {}", scheme, redact_url(url));

    match scheme.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sqlite" => open_sqlite(location, max_connections).await,
        s if VENDOR_SCHEMES.contains(&s) => Err(MigrateError::CapabilityMissing(format!(
            "{} client (not bundled with this build)",
            s
        ))),
        other => Err(MigrateError::Config(format!(
            "unknown store scheme '{}'",
            other
        ))),
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(location: &str, max_connections: u32) -> Result<Arc<dyn ContainerStore>> {
    let store = SqliteStore::open(location, max_connections).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_location: &str, _max_connections: u32) -> Result<Arc<dyn ContainerStore>> {
    Err(MigrateError::CapabilityMissing(
        "sqlite client (build with the `sqlite` feature)".into(),
    ))
}
