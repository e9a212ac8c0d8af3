//! Live browser backends for the page capability.

pub mod cdp;

pub use cdp::CdpPage;
