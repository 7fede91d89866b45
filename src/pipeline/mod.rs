mod output;
mod session;
mod stats;
mod stop;

pub use output::OutputBuffer;
pub use session::{
    Session, SessionBuilder, SessionState, TickOutcome, DEFAULT_REFRESH_RATE,
};
pub use stats::PipelineStats;
pub use stop::StopHandle;
