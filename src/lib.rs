//! dnsgate - A filtering DNS proxy.
//!
//! dnsgate listens for DNS queries over UDP, checks each question against an
//! ordered list of filter rules and either answers locally (NXDOMAIN, REFUSED
//! or a redirect to a fixed address) or relays the query unmodified to an
//! upstream resolver.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Configuration loading and validation
//! - [`dns`]: Wire codec, filter rules, decision engine and upstream exchange
//! - [`server`]: The proxy loop
//! - [`metrics`]: Prometheus exporter and counters
//! - [`error`]: Error types
//!
//! # Testing
//!
//! The decision engine works on decoded messages only, so rules can be
//! checked without any network access:
//!
//! ```rust
//! use dnsgate::dns::wire::{Header, Message, Name, Question, TYPE_A};
//! use dnsgate::dns::{Action, Decision, FilterRule, FilterType, MatchType, decide};
//!
//! let rules = [FilterRule::new("ads", FilterType::Any, MatchType::Contains, Action::NotFound)];
//! let mut header = Header::new(7);
//! header.qdcount = 1;
//! let query = Message {
//!     header,
//!     questions: vec![Question::new(Name::parse("ads.example.com").unwrap(), TYPE_A)],
//!     answers: Vec::new(),
//! };
//!
//! let Decision::Respond(response) = decide(&query, &rules).unwrap() else {
//!     panic!("expected a local answer");
//! };
//! assert_eq!(response.header.rcode(), 3);
//! ```

pub mod config;
pub mod dns;
pub mod error;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
