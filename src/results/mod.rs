//! Results module
//!
//! Aggregates per-run histories into a single table and renders the
//! hyperparameter ablation plots from it.

pub mod charts;
pub mod summary;
pub mod visualize;

pub use summary::{collect_rows, summarize, write_summary, SummaryRow, SummaryTable};
pub use visualize::{plan_charts, render_chart, visualize, ChartJob};
