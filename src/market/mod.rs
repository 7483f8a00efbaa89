pub mod backfill;
pub mod bar;
pub mod depth_sr;
pub mod io_aggregator;
pub mod lrc;
pub mod snapshot;
pub mod trade_flow;

pub use io_aggregator::{IoAggregator, IoPacket};
pub use snapshot::{MarketSnapshot, MarketStateStore, MarketUpdate};
