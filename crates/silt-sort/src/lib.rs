//! External merge sort.
//!
//! A four-phase merge sorter for datasets larger than main memory: derive
//! parameters from per-phase memory budgets, form sorted runs, merge runs
//! level by level, and pull from the final merge. Inputs small enough to fit
//! the final-phase budget are reported straight from memory without touching
//! disk.

pub mod merger;
pub mod params;
pub mod run_file;
pub mod sorter;

pub use merger::{merge_memory_usage, RunMerger};
pub use params::{SortBudget, SortParameters};
pub use run_file::RunFileSet;
pub use sorter::MergeSorter;
