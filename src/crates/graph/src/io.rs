//! Master-graph persistence.
//!
//! Loading degrades: a missing or corrupt file yields an empty graph with a
//! warning, so a fresh checkout starts from nothing. Saving is the opposite:
//! a failed write is fatal to the pipeline, because continuing would let
//! downstream consumers observe partial state.

use crate::model::Graph;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Errors from graph persistence.
#[derive(Debug, Error)]
pub enum GraphIoError {
    #[error("failed to write master graph: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize master graph: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Load the master graph, falling back to an empty graph when the file is
/// missing or unreadable.
pub fn load_master_graph(path: &Path) -> Graph {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Graph>(&raw) {
            Ok(graph) => {
                info!(
                    path = %path.display(),
                    nodes = graph.nodes.len(),
                    relationships = graph.relationships.len(),
                    "loaded master graph"
                );
                graph
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "master graph unreadable, starting empty");
                Graph::default()
            }
        },
        Err(_) => {
            warn!(path = %path.display(), "master graph missing, starting empty");
            Graph::default()
        }
    }
}

/// Persist the master graph as pretty-printed JSON.
pub fn save_master_graph(path: &Path, graph: &Graph) -> Result<(), GraphIoError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(graph)?;
    std::fs::write(path, raw)?;
    info!(
        path = %path.display(),
        nodes = graph.nodes.len(),
        relationships = graph.relationships.len(),
        "saved master graph"
    );
    Ok(())
}
