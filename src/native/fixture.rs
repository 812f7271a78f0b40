//! Seed data for the simulated cluster
//!
//! ```json
//! {
//!   "documents": {
//!     "foo": { "value": "bar" },
//!     "locked": { "value": {"n": 1}, "locked": true, "cas": 42 }
//!   },
//!   "routes": [
//!     { "type": "view", "method": "GET", "path": "/_design/a/_view/b",
//!       "status": 200, "headers": {"Content-Type": "application/json"},
//!       "chunks": ["{\"rows\":[", "]}"] }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use bytes::Bytes;
use serde::Deserialize;

use super::mock::{MockCluster, MockRoute};
use crate::error::{CouchError, Result};
use crate::protocol::{HttpMethod, HttpType};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub documents: BTreeMap<String, FixtureDocument>,

    #[serde(default)]
    pub routes: Vec<FixtureRoute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureDocument {
    /// Strings are stored verbatim, anything else as its JSON text
    pub value: serde_json::Value,

    #[serde(default)]
    pub locked: bool,

    #[serde(default)]
    pub cas: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureRoute {
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,

    #[serde(default = "default_method")]
    pub method: String,

    pub path: String,

    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub chunks: Vec<String>,
}

fn default_type() -> String {
    "view".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

impl Fixture {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CouchError::Fixture(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| CouchError::Fixture(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Populate `cluster` with every document and route
    pub fn apply(&self, cluster: &MockCluster) -> Result<()> {
        for (key, doc) in &self.documents {
            let value = match &doc.value {
                serde_json::Value::String(s) => Bytes::from(s.clone()),
                other => Bytes::from(other.to_string()),
            };
            match doc.cas {
                Some(cas) => {
                    cluster.insert_with_cas(key.clone(), value, cas, doc.locked);
                }
                None => {
                    cluster.insert(key.clone(), value);
                    if doc.locked {
                        cluster.lock(key.as_bytes());
                    }
                }
            }
        }

        for route in &self.routes {
            let kind: HttpType = route.kind.parse()?;
            let method: HttpMethod = route.method.parse()?;
            let mut mock = MockRoute::chunked(route.chunks.iter().cloned()).with_status(route.status);
            for (name, value) in &route.headers {
                mock = mock.with_header(name.clone(), value.clone());
            }
            cluster.add_route(kind, method, route.path.clone(), mock);
        }

        tracing::debug!(
            "Fixture applied: {} documents, {} routes",
            self.documents.len(),
            self.routes.len()
        );
        Ok(())
    }
}
