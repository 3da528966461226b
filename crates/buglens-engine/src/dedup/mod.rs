//! Two independent dedup tiers: a per-session sliding window over raw HTTP
//! failures, and a global TTL map of fingerprints that already went through
//! triage.

pub mod processed;
pub mod recent;

pub use processed::{ProcessedErrorCache, fingerprint, fingerprint_error};
pub use recent::RecentSignalCache;
