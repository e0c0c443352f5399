//! Out-of-band transfer for oversized call values.
//!
//! Values at or below the configured inline threshold travel inside the
//! message itself. Larger values are written to a temp file and only a
//! `{tempPath, size, encoding}` descriptor crosses the socket. The receiver
//! claims the file exactly once; the claim deletes it. A missing or corrupt
//! temp file surfaces as a [`BulkTransferError`], never a silent fallback.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use gantry_config::BulkTransferSettings;

const BULK_TARGET: &str = "gantry_ipc::bulk";

/// Encoding tag recorded on spilled descriptors.
const JSON_ENCODING: &str = "json";

/// Descriptor for a value parked in a temp file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SpillDescriptor {
    /// Absolute path of the temp file holding the encoded value.
    pub temp_path: String,
    /// Encoded size in bytes.
    pub size: u64,
    /// Encoding of the file contents.
    pub encoding: String,
}

/// A call argument or result: either carried inline or spilled to disk.
///
/// The wire form is untagged: an inline value serialises as the raw JSON
/// value, a spilled one as its descriptor object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BulkValue {
    /// A file-backed value; only the descriptor crosses the socket.
    Spilled(SpillDescriptor),
    /// A value small enough to travel in the message.
    Inline(serde_json::Value),
}

/// Errors raised while spilling or claiming bulk values.
#[derive(Debug, thiserror::Error)]
pub enum BulkTransferError {
    /// The value could not be encoded to JSON.
    #[error("failed to encode bulk value: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
    /// Writing the temp file failed.
    #[error("failed to spill bulk value to {path}: {source}")]
    Spill {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The temp file named by a descriptor no longer exists.
    #[error("bulk transfer file {path} is missing; it may already have been claimed")]
    Missing { path: String },
    /// Reading the temp file failed.
    #[error("failed to read bulk transfer file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The temp file did not contain valid JSON.
    #[error("bulk transfer file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// The descriptor carried an encoding this build does not understand.
    #[error("bulk transfer file {path} uses unsupported encoding {encoding}")]
    UnsupportedEncoding { path: String, encoding: String },
}

/// Wraps a value for transport, spilling it to disk when its JSON encoding
/// exceeds the configured inline threshold.
pub fn spill(
    value: serde_json::Value,
    settings: &BulkTransferSettings,
) -> Result<BulkValue, BulkTransferError> {
    let encoded =
        serde_json::to_vec(&value).map_err(|source| BulkTransferError::Encode { source })?;
    if encoded.len() <= settings.max_inline_bytes {
        return Ok(BulkValue::Inline(value));
    }

    let mut file = tempfile::Builder::new()
        .prefix("gantry-bulk-")
        .suffix(".json")
        .tempfile_in(&settings.temp_dir)
        .map_err(|source| BulkTransferError::Spill {
            path: settings.temp_dir.clone(),
            source,
        })?;
    file.write_all(&encoded)
        .map_err(|source| BulkTransferError::Spill {
            path: file.path().to_path_buf(),
            source,
        })?;
    let (_, path) = file
        .keep()
        .map_err(|error| BulkTransferError::Spill {
            path: error.file.path().to_path_buf(),
            source: error.error,
        })?;

    Ok(BulkValue::Spilled(SpillDescriptor {
        temp_path: path.to_string_lossy().into_owned(),
        size: u64::try_from(encoded.len()).unwrap_or(u64::MAX),
        encoding: JSON_ENCODING.to_owned(),
    }))
}

/// Unwraps a transported value, reading and deleting the temp file when the
/// value was spilled.
///
/// The file is removed even when its contents turn out to be corrupt, so a
/// descriptor is consumable exactly once either way.
pub fn claim(value: BulkValue) -> Result<serde_json::Value, BulkTransferError> {
    let descriptor = match value {
        BulkValue::Inline(inner) => return Ok(inner),
        BulkValue::Spilled(descriptor) => descriptor,
    };

    if descriptor.encoding != JSON_ENCODING {
        return Err(BulkTransferError::UnsupportedEncoding {
            path: descriptor.temp_path,
            encoding: descriptor.encoding,
        });
    }

    let contents = match fs::read(&descriptor.temp_path) {
        Ok(contents) => contents,
        Err(source) if source.kind() == io::ErrorKind::NotFound => {
            return Err(BulkTransferError::Missing {
                path: descriptor.temp_path,
            });
        }
        Err(source) => {
            return Err(BulkTransferError::Read {
                path: descriptor.temp_path,
                source,
            });
        }
    };

    if let Err(error) = fs::remove_file(&descriptor.temp_path) {
        warn!(
            target: BULK_TARGET,
            path = %descriptor.temp_path,
            error = %error,
            "failed to delete claimed bulk transfer file"
        );
    }

    serde_json::from_slice(&contents).map_err(|source| BulkTransferError::Corrupt {
        path: descriptor.temp_path,
        source,
    })
}
