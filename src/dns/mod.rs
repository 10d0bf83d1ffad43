//! DNS-related modules.

pub mod engine;
pub mod filter;
pub mod upstream;
pub mod wire;

pub use engine::{Decision, decide};
pub use filter::{Action, FilterRule, FilterType, MatchType};
pub use upstream::{UdpUpstream, Upstream};
pub use wire::Message;
