mod metrics;
mod tracing_init;

pub use metrics::{COST_PER_REQUEST, Stats, StatsSnapshot};
pub use tracing_init::init_tracing;
