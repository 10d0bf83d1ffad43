//! Filter rules and per-question matching.
//!
//! A rule pairs a host pattern with a query type gate, a match mode and the
//! action to take. Host patterns are normalized once at construction
//! (lowercase, no trailing dot) so matching does not allocate.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use super::wire::{Question, TYPE_A, TYPE_AAAA};

/// Which query types a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Only `A` queries.
    Ipv4,
    /// Only `AAAA` queries.
    Ipv6,
    /// Every query type.
    Any,
}

impl FilterType {
    #[inline]
    pub const fn applies_to(self, qtype: u16) -> bool {
        match self {
            Self::Any => true,
            Self::Ipv4 => qtype == TYPE_A,
            Self::Ipv6 => qtype == TYPE_AAAA,
        }
    }
}

impl FromStr for FilterType {
    type Err = UnknownKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("A") {
            Ok(Self::Ipv4)
        } else if s.eq_ignore_ascii_case("AAAA") {
            Ok(Self::Ipv6)
        } else if s.eq_ignore_ascii_case("ALL") {
            Ok(Self::Any)
        } else {
            Err(UnknownKeyword(s.to_string()))
        }
    }
}

/// How a rule's host pattern is compared with a question name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// The pattern occurs anywhere in the name.
    Contains,
    /// The pattern equals the name.
    Exact,
}

impl FromStr for MatchType {
    type Err = UnknownKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("contains") {
            Ok(Self::Contains)
        } else if s.eq_ignore_ascii_case("exact") {
            Ok(Self::Exact)
        } else {
            Err(UnknownKeyword(s.to_string()))
        }
    }
}

/// What to do with a query matched by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Answer NXDOMAIN.
    NotFound,
    /// Answer REFUSED.
    Refuse,
    /// Answer with a single A or AAAA record pointing at the address.
    Redirect(IpAddr),
}

impl Action {
    /// Short label used in logs and metrics.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NotFound => "discard",
            Self::Refuse => "refuse",
            Self::Redirect(_) => "redirect",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redirect(addr) => write!(f, "redirect to {addr}"),
            other => f.write_str(other.label()),
        }
    }
}

/// A keyword that is not one of the accepted values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown keyword {0:?}")]
pub struct UnknownKeyword(pub String);

/// A single filtering rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    /// Host pattern (stored lowercase, without trailing dot).
    host: String,
    filter_type: FilterType,
    match_type: MatchType,
    action: Action,
}

impl FilterRule {
    pub fn new(
        host: impl AsRef<str>,
        filter_type: FilterType,
        match_type: MatchType,
        action: Action,
    ) -> Self {
        let host = host.as_ref().to_ascii_lowercase();
        let host = host.trim_end_matches('.').to_string();
        Self {
            host,
            filter_type,
            match_type,
            action,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub const fn match_type(&self) -> MatchType {
        self.match_type
    }

    pub const fn action(&self) -> Action {
        self.action
    }

    /// Check the host pattern against a name, ignoring ASCII case.
    pub fn matches_name(&self, name: &str) -> bool {
        let name = name.strip_suffix('.').unwrap_or(name);
        match self.match_type {
            MatchType::Exact => name.eq_ignore_ascii_case(&self.host),
            MatchType::Contains => contains_ignore_case(name, &self.host),
        }
    }

    /// Check both the type gate and the host pattern against a question.
    ///
    /// Questions whose name is a compression pointer never match.
    #[inline]
    pub fn matches(&self, question: &Question) -> bool {
        if !self.filter_type.applies_to(question.qtype) {
            return false;
        }
        question
            .name
            .as_text()
            .is_some_and(|name| self.matches_name(name))
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}
