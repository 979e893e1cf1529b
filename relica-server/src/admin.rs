//! Administrative operations.

use crate::vault::BlobVault;
use relica_types::{PurgeReport, ResponseStatus};
use std::sync::Arc;
use tracing::{info, warn};

/// Guarded administrative access to the blob vault.
///
/// The shared secret is configuration handed in at construction; request
/// authentication proper happens upstream.
pub struct BlobAdmin {
    vault: Arc<BlobVault>,
    shared_secret: String,
}

impl BlobAdmin {
    /// Creates an admin handle with the configured shared secret.
    pub fn new(vault: Arc<BlobVault>, shared_secret: impl Into<String>) -> Self {
        Self {
            vault,
            shared_secret: shared_secret.into(),
        }
    }

    /// Deletes every blob in the vault. Requires the shared secret; a wrong
    /// value deletes nothing.
    pub fn purge_all(&self, secret: &str) -> PurgeReport {
        if secret != self.shared_secret {
            warn!("blob purge rejected: wrong shared secret");
            return PurgeReport {
                deleted: 0,
                status: ResponseStatus::FailedServerError,
            };
        }

        match self.vault.purge_all() {
            Ok(deleted) => {
                info!("blob purge deleted {deleted} blobs");
                PurgeReport {
                    deleted,
                    status: ResponseStatus::Success,
                }
            }
            Err(e) => {
                warn!("blob purge failed: {e}");
                PurgeReport {
                    deleted: 0,
                    status: ResponseStatus::FailedServerError,
                }
            }
        }
    }
}
