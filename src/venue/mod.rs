pub mod backfill_client;
pub mod ws_client;

pub use backfill_client::{fetch_candle_snapshot, RawCandle};
pub use ws_client::{run_venue_stream, VenueEvent};
