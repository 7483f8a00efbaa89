pub mod a;
pub mod b2;
pub mod meta_gate;
pub mod reason;
pub mod structure;

pub use a::{decide_a, AResult, DiagnosticRateLimiter};
pub use b2::{decide_b2, B2Result};
pub use meta_gate::{MetaGate, MetaResult};
pub use reason::{Diagnostic, ReasonCode};
pub use structure::{SrClusterCache, SrClusterView, StructureBuilder, StructureSnapshot};
