//! Asset documents: Resource and Datum.
//!
//! The detector writes frames into HDF5 sub-files on its own. What the
//! acquisition side records is where those files are and how to find a given
//! frame inside them:
//!
//! - **Resource**: one per staged acquisition. Names the write directory,
//!   the file prefix and how many images go into each sub-file.
//! - **Datum**: one per trigger. Points into the open Resource and carries
//!   the `seq_id` of the sub-file the frame landed in.
//!
//! # Document Flow
//!
//! ```text
//! stage()    ── Resource (1)
//!               │
//! trigger()  ── ├── Datum (N, one per frame or frame range)
//!               │
//! unstage()  ── (resource closed)
//! ```
//!
//! Both are buffered by the file plugin as [`AssetDocument`]s and handed to
//! whatever persists them via `collect_asset_docs()`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new unique document ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a short unique ID (first three groups of a v4 UUID).
///
/// Used as the file prefix on the detector; short enough for its file-name
/// registers, unique enough for one beamline.
pub fn new_short_uid() -> String {
    let uid = new_uid();
    uid.splitn(4, '-').take(3).collect::<Vec<_>>().join("-")
}

/// Current timestamp in nanoseconds since Unix epoch
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Asset documents emitted by file-writing devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssetDocument {
    /// A newly opened file set
    Resource(Resource),
    /// One frame inside the open resource
    Datum(Datum),
}

impl AssetDocument {
    /// UID of the resource this document belongs to
    pub fn resource_uid(&self) -> &str {
        match self {
            AssetDocument::Resource(r) => &r.uid,
            AssetDocument::Datum(d) => &d.resource,
        }
    }
}

/// Resource document - the set of sub-files written during one staged acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique resource identifier
    pub uid: String,
    /// Handler spec used to read the files back (`AD_EIGER2`)
    pub spec: String,
    /// Root the resource path is relative to
    pub root: String,
    /// Resolved write directory, always ending in `/`
    pub resource_path: String,
    /// Short uid the detector uses as file prefix
    pub prefix: String,
    /// Name pattern written to the detector (`<prefix>_$id`)
    pub name_pattern: String,
    /// Handler arguments (`images_per_file`)
    pub resource_kwargs: Map<String, Value>,
    /// Path semantics of `resource_path`
    pub path_semantics: String,
    /// Run the resource was opened in, if known
    pub run_start: Option<String>,
    /// Creation time
    pub time_ns: u64,
}

impl Resource {
    /// Images per sub-file recorded at stage time
    pub fn images_per_file(&self) -> Option<i64> {
        self.resource_kwargs
            .get("images_per_file")
            .and_then(Value::as_i64)
    }

    /// Directory plus file prefix, e.g. `/data/2024-01-01/3f2a9c1e-1d2b-4c3d`
    pub fn file_prefix(&self) -> String {
        format!("{}{}", self.resource_path, self.prefix)
    }
}

/// Datum document - one data element inside a Resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    /// `<resource uid>/<counter>`
    pub datum_id: String,
    /// Owning resource uid
    pub resource: String,
    /// Handler arguments (`seq_id`, optional `frame_num`, caller extras)
    pub datum_kwargs: Map<String, Value>,
}

impl Datum {
    /// Corrected sub-file sequence number
    pub fn seq_id(&self) -> Option<i64> {
        self.datum_kwargs.get("seq_id").and_then(Value::as_i64)
    }

    /// Frame number within the sub-file, when the datum is a slice
    pub fn frame_num(&self) -> Option<i64> {
        self.datum_kwargs.get("frame_num").and_then(Value::as_i64)
    }
}
