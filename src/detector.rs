//! Sudden-drop detection
//!
//! Flags loads whose consumption fell sharply between the two most recent
//! months. A flagged load is considered unstable and is deprioritised by the
//! candidate ranking: a meter that just lost half its usage is a poor basis
//! for a phase move that should still make sense next month.

use crate::types::LoadDataset;
use tracing::debug;

/// Flag every load with `sudden_drop = (prior - latest) > threshold_kwh`.
///
/// Missing samples count as 0, so a load with no history compares 0 - 0 and
/// is never flagged, while a load whose latest sample failed to parse keeps
/// its full prior month as the drop. Deterministic, never an error.
pub fn flag_sudden_drops(dataset: &mut LoadDataset, threshold_kwh: f64) {
    let mut flagged = 0usize;
    for load in dataset.iter_mut() {
        load.sudden_drop = (load.prior_kwh() - load.latest_kwh()) > threshold_kwh;
        if load.sudden_drop {
            flagged += 1;
            debug!(
                load = %load.name,
                prior_kwh = load.prior_kwh(),
                latest_kwh = load.latest_kwh(),
                "Sudden consumption drop flagged"
            );
        }
    }
    debug!(flagged, total = dataset.len(), "Sudden-drop scan complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LoadRecord, Phase};

    fn load(name: &str, prior: Option<f64>, latest: Option<f64>) -> LoadRecord {
        LoadRecord::new(name, "", "", "", "", [None, None, prior, latest], Phase::A)
    }

    #[test]
    fn drop_above_threshold_is_flagged() {
        let mut ds = LoadDataset::new();
        ds.insert(load("Load_1", Some(1200.0), Some(600.0)));
        ds.insert(load("Load_2", Some(1200.0), Some(800.0)));

        flag_sudden_drops(&mut ds, 500.0);
        assert!(ds.get("Load_1").unwrap().sudden_drop);
        assert!(!ds.get("Load_2").unwrap().sudden_drop);
    }

    #[test]
    fn exact_threshold_is_not_a_drop() {
        let mut ds = LoadDataset::new();
        ds.insert(load("Load_1", Some(1000.0), Some(500.0)));

        flag_sudden_drops(&mut ds, 500.0);
        assert!(!ds.get("Load_1").unwrap().sudden_drop);
    }

    #[test]
    fn missing_samples_default_to_zero() {
        let mut ds = LoadDataset::new();
        // Latest missing: full prior month counts as the drop.
        ds.insert(load("Load_1", Some(900.0), None));
        // Prior missing: 0 - latest is never a drop.
        ds.insert(load("Load_2", None, Some(900.0)));
        // No history at all.
        ds.insert(load("Load_3", None, None));

        flag_sudden_drops(&mut ds, 500.0);
        assert!(ds.get("Load_1").unwrap().sudden_drop);
        assert!(!ds.get("Load_2").unwrap().sudden_drop);
        assert!(!ds.get("Load_3").unwrap().sudden_drop);
    }

    #[test]
    fn rescan_clears_stale_flags() {
        let mut ds = LoadDataset::new();
        ds.insert(load("Load_1", Some(1200.0), Some(600.0)));

        flag_sudden_drops(&mut ds, 500.0);
        assert!(ds.get("Load_1").unwrap().sudden_drop);

        // Higher threshold on a second pass un-flags the load.
        flag_sudden_drops(&mut ds, 700.0);
        assert!(!ds.get("Load_1").unwrap().sudden_drop);
    }
}
