// ─────────────────────────────────────────────────────────────────────────────
// persistence.rs — grid snapshot I/O
//
// Same shape as the old `load_state`/`save_state` pair: read-if-present,
// log and fall back on any parse/read error, `serde_json` on the wire. The
// snapshot itself only carries what is load-bearing for restart — the slot
// table, the boundary index, and the target spread count; funds bookkeeping
// is process-owned and is never part of this file.
// ─────────────────────────────────────────────────────────────────────────────
use std::fs;
use std::path::Path;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::order::Slot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub slots: Vec<Slot>,
    pub boundary_idx: usize,
    pub target_spread_count: usize,
}

/// Reads a persisted snapshot, returning `None` if the file is absent. A
/// present-but-corrupt file logs the error and is treated the same as
/// absent — the caller's startup decision then falls back to regenerate.
pub fn load_persisted_grid<P: AsRef<Path>>(path: P) -> Option<GridSnapshot> {
    if !path.as_ref().exists() {
        info!("No persisted grid at {:?}; starting fresh.", path.as_ref());
        return None;
    }
    match fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str::<GridSnapshot>(&content) {
            Ok(snapshot) => {
                info!(
                    "Loaded persisted grid from {:?}: {} slot(s), boundary_idx={}",
                    path.as_ref(),
                    snapshot.slots.len(),
                    snapshot.boundary_idx
                );
                Some(snapshot)
            }
            Err(e) => {
                error!("Failed to parse persisted grid: {e}");
                None
            }
        },
        Err(e) => {
            error!("Failed to read persisted grid file: {e}");
            None
        }
    }
}

pub fn persist_grid<P: AsRef<Path>>(path: P, snapshot: &GridSnapshot) {
    match serde_json::to_string_pretty(snapshot) {
        Ok(content) => {
            if let Err(e) = fs::write(path, content) {
                error!("Failed to write persisted grid: {e}");
            }
        }
        Err(e) => error!("Failed to serialize grid snapshot: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::SlotType;

    #[test]
    fn roundtrips_through_a_temp_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("gridbot-test-{}.json", std::process::id()));

        let snapshot = GridSnapshot {
            slots: vec![Slot::new_virtual("slot-0", 1.0, SlotType::Buy)],
            boundary_idx: 0,
            target_spread_count: 4,
        };
        persist_grid(&path, &snapshot);
        let loaded = load_persisted_grid(&path).expect("snapshot should load");
        assert_eq!(loaded.slots.len(), 1);
        assert_eq!(loaded.boundary_idx, 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_returns_none() {
        assert!(load_persisted_grid("/nonexistent/path/grid.json").is_none());
    }
}
