mod stats_reporter;

pub use stats_reporter::{summary_line, StatsReporter};
