//! Upload token wire format.
//!
//! Uploaded blobs arrive tagged with an opaque field name encoding which
//! structured record they belong to. The wire contract is bit-exact:
//!
//! - `"<canonical-uuid>"` — a published resource's singleton blob
//! - `"<canonical-uuid>_<decimal>"` — one revision of a user resource
//!
//! Parsing splits on the first underscore and immediately lifts the string
//! into this typed form; nothing downstream touches the raw string again.

use crate::ResourceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error produced when an upload field name doesn't match the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenParseError {
    /// The resource id part is not a valid UUID.
    #[error("invalid resource id in upload token: {0:?}")]
    BadResourceId(String),

    /// The revision part is not a non-negative decimal integer.
    #[error("invalid revision number in upload token: {0:?}")]
    BadRevision(String),
}

/// Typed form of an upload field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadToken {
    /// Singleton blob of a published resource.
    Published(ResourceId),
    /// Blob of one specific user-resource revision.
    Revision(ResourceId, u32),
}

impl UploadToken {
    /// Parses a wire field name.
    ///
    /// No underscore means the published-resource form; otherwise the part
    /// before the first underscore is the resource id and everything after
    /// it must parse as a revision number.
    pub fn parse(s: &str) -> Result<Self, TokenParseError> {
        match s.split_once('_') {
            None => {
                let id = ResourceId::parse(s)
                    .map_err(|_| TokenParseError::BadResourceId(s.to_string()))?;
                Ok(Self::Published(id))
            }
            Some((id_part, rev_part)) => {
                let id = ResourceId::parse(id_part)
                    .map_err(|_| TokenParseError::BadResourceId(id_part.to_string()))?;
                let revision = rev_part
                    .parse::<u32>()
                    .map_err(|_| TokenParseError::BadRevision(rev_part.to_string()))?;
                Ok(Self::Revision(id, revision))
            }
        }
    }

    /// The resource this token addresses.
    #[must_use]
    pub const fn resource_id(&self) -> ResourceId {
        match self {
            Self::Published(id) | Self::Revision(id, _) => *id,
        }
    }

    /// The revision number, if this is a user-resource token.
    #[must_use]
    pub const fn revision(&self) -> Option<u32> {
        match self {
            Self::Published(_) => None,
            Self::Revision(_, rev) => Some(*rev),
        }
    }
}

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Published(id) => write!(f, "{id}"),
            Self::Revision(id, rev) => write!(f, "{id}_{rev}"),
        }
    }
}

impl FromStr for UploadToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
