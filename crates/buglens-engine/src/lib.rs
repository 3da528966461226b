pub mod backend;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod prebuffer;
pub mod router;
pub mod session;
pub mod sink;
pub mod store;
pub mod triage;

pub use buglens_common::error;
pub use buglens_common::formatter;
pub use buglens_common::log;
pub use buglens_common::protocol;
pub use buglens_common::report;
