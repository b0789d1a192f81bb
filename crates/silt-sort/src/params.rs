//! Sort parameter derivation.
//!
//! Merge sorting runs in four phases: parameter calculation, run formation,
//! run merging, and the final merge. Each later phase has its own memory
//! budget; this module turns the budgets into concrete parameters. When a
//! budget is too small to make progress it is widened to the minimum with a
//! warning rather than aborting.

use silt_common::stream::stream_memory_usage;

use crate::merger::merge_memory_usage;

/// Bookkeeping cost of one scratch run file, in bytes.
pub(crate) const TEMP_FILE_MEMORY: usize = 128;

/// Smallest merge fanout considered.
const FANOUT_LO: usize = 2;

/// Largest merge fanout considered.
const FANOUT_HI: usize = 251;

/// Memory budgets for the sorting phases, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortBudget {
    /// Memory available during run formation.
    pub phase2: usize,
    /// Memory available during run merging.
    pub phase3: usize,
    /// Memory available during the final merge.
    pub phase4: usize,
}

impl SortBudget {
    /// Gives every phase the same budget.
    pub fn uniform(bytes: usize) -> Self {
        Self {
            phase2: bytes,
            phase3: bytes,
            phase4: bytes,
        }
    }

    /// Sizes the budget to a quarter of currently available system memory.
    pub fn auto() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let available = sys.available_memory() as usize;
        Self::uniform((available / 4).max(1 << 20))
    }
}

impl Default for SortBudget {
    fn default() -> Self {
        Self::uniform(64 * 1024 * 1024)
    }
}

/// Concrete parameters of one merge sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortParameters {
    /// Items per level-0 run.
    pub run_length: usize,
    /// Runs merged at once during phase 3.
    pub fanout: usize,
    /// Runs merged at once during the final merge. At most `fanout`.
    pub final_fanout: usize,
    /// Largest item count that is reported straight from memory without
    /// touching disk. At most `run_length`.
    pub internal_report_threshold: usize,
    /// Memory actually accounted to phase 2, after widening.
    pub memory_phase2: usize,
    /// Memory actually accounted to phase 3, after widening.
    pub memory_phase3: usize,
    /// Memory actually accounted to phase 4, after widening.
    pub memory_phase4: usize,
}

impl SortParameters {
    /// Derives parameters from the phase budgets for items of
    /// `item_size` encoded bytes.
    pub fn calculate(budget: &SortBudget, item_size: usize) -> Self {
        assert!(item_size > 0, "item size must be positive");

        let mut m2 = budget.phase2;
        let mut m3 = budget.phase3;
        let mut m4 = budget.phase4;

        // Phase 3: fanout bounded by the merge heap plus one open stream per
        // input run.
        let fanout = calculate_fanout(m3, item_size);
        let fanout_usage = fanout_memory_usage(fanout, item_size);
        if fanout_usage > m3 {
            tracing::warn!(
                budget = m3,
                required = fanout_usage,
                "phase 3 memory too small for the minimum fanout; widening"
            );
            m3 = fanout_usage;
        }

        // Phase 4: same bound against the final-merge budget.
        let mut final_fanout = calculate_fanout(m4, item_size);
        if final_fanout > fanout {
            final_fanout = fanout;
        }
        let final_usage = fanout_memory_usage(final_fanout, item_size);
        if final_usage > m4 {
            tracing::warn!(
                budget = m4,
                required = final_usage,
                "phase 4 memory too small for the minimum fanout; widening"
            );
            m4 = final_usage;
        }

        // Phase 2: run length bounded by the items held in memory next to
        // one open stream and the scratch-file bookkeeping.
        let stream_memory = stream_memory_usage();
        let temp_file_memory = 2 * fanout * TEMP_FILE_MEMORY;
        let min_m2 = item_size + stream_memory + temp_file_memory;
        if m2 < min_m2 {
            tracing::warn!(
                budget = m2,
                required = min_m2,
                "phase 2 memory too small for one item and an open stream; widening"
            );
            m2 = min_m2;
        }
        let run_length = (m2 - stream_memory - temp_file_memory) / item_size;

        let mut internal_report_threshold =
            m2.min(m3).min(m4).saturating_sub(temp_file_memory) / item_size;
        if internal_report_threshold > run_length {
            internal_report_threshold = run_length;
        }

        let params = Self {
            run_length,
            fanout,
            final_fanout,
            internal_report_threshold,
            memory_phase2: m2,
            memory_phase3: m3,
            memory_phase4: m4,
        };
        tracing::debug!(?params, "calculated merge sort parameters");
        params
    }

    /// Sets run length and fanout directly, bypassing the memory model.
    /// Intended for tests and for callers that know their layout.
    pub fn manual(run_length: usize, fanout: usize) -> Self {
        assert!(run_length > 0, "run length must be positive");
        assert!(fanout >= 2, "fanout must be at least 2");

        Self {
            run_length,
            fanout,
            final_fanout: fanout,
            internal_report_threshold: run_length,
            memory_phase2: 0,
            memory_phase3: 0,
            memory_phase4: 0,
        }
    }
}

/// Memory used when merging with the given fanout: the merge heap and input
/// streams, the output stream, and the sorter's scratch-file table.
pub(crate) fn fanout_memory_usage(fanout: usize, item_size: usize) -> usize {
    merge_memory_usage(fanout, item_size) + stream_memory_usage() + 2 * TEMP_FILE_MEMORY
}

/// Binary search for the largest fanout whose merge memory fits in
/// `available`. The result may still exceed the budget when even the
/// smallest fanout does not fit; the caller widens in that case.
fn calculate_fanout(available: usize, item_size: usize) -> usize {
    let mut lo = FANOUT_LO;
    let mut hi = FANOUT_HI;
    while lo < hi - 1 {
        let mid = lo + (hi - lo) / 2;
        if fanout_memory_usage(mid, item_size) < available {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}
