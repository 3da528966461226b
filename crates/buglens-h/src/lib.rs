//! Chromium host for the capture engine: launches a browser, forwards
//! page-level protocol events and installs the pre-attach console buffer.

pub mod backend;
pub mod cdp;
pub mod inject;

pub use backend::ChromeBackend;
pub use cdp::{BrowserHost, HostError};
pub use inject::install_prebuffer;
