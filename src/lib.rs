mod bucket;
mod config;
mod context;
mod eval;
mod flag;
mod rule;
mod store;
mod test_common;
mod trace;

pub use bucket::*;
pub use config::*;
pub use context::*;
pub use eval::*;
pub use flag::*;
pub use rule::*;
pub use store::*;
pub use trace::*;
