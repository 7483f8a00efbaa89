pub mod loop_;
pub mod safety;
pub mod state;

pub use loop_::{apply_tick, should_save, TickOutcome};
pub use state::{EngineState, EngineStats, ExitStreaks, OpenPosition, Safety, TradeRecord};
