//! Filtering decisions.
//!
//! Given a decoded query and the ordered rule list, decide whether the query
//! is forwarded untouched or answered locally. The scan is question-major:
//! every rule is tried against the first question before the second question
//! is looked at, and the first matching pair wins.

use std::net::IpAddr;

use super::filter::{Action, FilterRule};
use super::wire::{CLASS_IN, Message, Name, ResourceRecord, TYPE_A, TYPE_AAAA, rcode};
use crate::error::DecisionError;

/// TTL of synthesized redirect answers, in seconds.
pub const REDIRECT_TTL: u32 = 300;

/// Outcome of running the rules against a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No rule matched: relay the original bytes to the upstream resolver.
    PassThrough,
    /// A rule matched: send this message back to the client.
    Respond(Message),
}

/// A matched question together with the rule that matched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch<'r> {
    pub question: usize,
    pub rule: &'r FilterRule,
}

/// Find the first (question, rule) pair that matches.
pub fn find_match<'r>(request: &Message, rules: &'r [FilterRule]) -> Option<RuleMatch<'r>> {
    request
        .questions
        .iter()
        .enumerate()
        .find_map(|(question, q)| {
            rules
                .iter()
                .find(|rule| rule.matches(q))
                .map(|rule| RuleMatch { question, rule })
        })
}

/// Decide how to handle `request`.
///
/// # Errors
///
/// Returns [`DecisionError::AddressFamilyMismatch`] when the matching rule
/// redirects to an address that cannot answer the matched question's type.
pub fn decide(request: &Message, rules: &[FilterRule]) -> Result<Decision, DecisionError> {
    match find_match(request, rules) {
        None => Ok(Decision::PassThrough),
        Some(found) => respond(request, found).map(Decision::Respond),
    }
}

/// Build the response dictated by a match found in `request`.
pub fn respond(request: &Message, found: RuleMatch<'_>) -> Result<Message, DecisionError> {
    match found.rule.action() {
        Action::NotFound => Ok(error_response(request, rcode::NXDOMAIN)),
        Action::Refuse => Ok(error_response(request, rcode::REFUSED)),
        Action::Redirect(address) => redirect_response(request, found.question, address),
    }
}

/// Copy the request's header and questions into an answerless response
/// carrying `rcode`. No other header bit is changed.
pub fn error_response(request: &Message, rcode: u8) -> Message {
    let mut response = Message {
        header: request.header,
        questions: request.questions.clone(),
        answers: Vec::new(),
    };
    response.header.set_rcode(rcode);
    sync_counts(&mut response);
    response
}

/// Build a response answering question `index` with `address`.
///
/// The answer name is a compression pointer to the question's name inside
/// the request's wire encoding.
///
/// # Panics
///
/// Panics if `index` is not a valid question index of `request`.
pub fn redirect_response(
    request: &Message,
    index: usize,
    address: IpAddr,
) -> Result<Message, DecisionError> {
    let question = &request.questions[index];
    let rdata = match (question.qtype, address) {
        (TYPE_A, IpAddr::V4(v4)) => v4.octets().to_vec(),
        (TYPE_AAAA, IpAddr::V6(v6)) => v6.octets().to_vec(),
        (qtype, address) => {
            return Err(DecisionError::AddressFamilyMismatch { qtype, address });
        }
    };

    let answer = ResourceRecord {
        name: Name::pointer(request.question_name_offset(index))?,
        rtype: question.qtype,
        class: CLASS_IN,
        ttl: REDIRECT_TTL,
        rdata,
    };
    let mut response = Message {
        header: request.header,
        questions: request.questions.clone(),
        answers: vec![answer],
    };
    sync_counts(&mut response);
    Ok(response)
}

// Sections other than questions and answers are never carried.
fn sync_counts(message: &mut Message) {
    let header = &mut message.header;
    header.qdcount = u16::try_from(message.questions.len()).unwrap_or(u16::MAX);
    header.ancount = u16::try_from(message.answers.len()).unwrap_or(u16::MAX);
    header.nscount = 0;
    header.arcount = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::filter::{FilterType, MatchType};
    use crate::dns::wire::{Header, Question};
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn query(id: u16, questions: &[(&str, u16)]) -> Message {
        let mut header = Header::new(id);
        header.set_recursion_desired(true);
        let questions: Vec<_> = questions
            .iter()
            .map(|(name, qtype)| Question::new(Name::parse(name).unwrap(), *qtype))
            .collect();
        header.qdcount = questions.len() as u16;
        Message {
            header,
            questions,
            answers: Vec::new(),
        }
    }

    fn rule(host: &str, match_type: MatchType, action: Action) -> FilterRule {
        FilterRule::new(host, FilterType::Any, match_type, action)
    }

    fn redirect_v4() -> Action {
        Action::Redirect(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
    }

    fn redirect_v6() -> Action {
        Action::Redirect(IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)))
    }

    fn expect_response(decision: Decision) -> Message {
        match decision {
            Decision::Respond(message) => message,
            Decision::PassThrough => panic!("expected a synthesized response"),
        }
    }

    #[test]
    fn should_pass_through_without_rules() {
        let request = query(1, &[("example.com", TYPE_A)]);

        assert_eq!(decide(&request, &[]).unwrap(), Decision::PassThrough);
    }

    #[test]
    fn should_pass_through_when_nothing_matches() {
        let request = query(1, &[("example.com", TYPE_A)]);
        let rules = [
            rule("ads", MatchType::Contains, Action::Refuse),
            rule("www.example.com", MatchType::Exact, Action::NotFound),
        ];

        assert_eq!(decide(&request, &rules).unwrap(), Decision::PassThrough);
    }

    #[test]
    fn should_apply_first_matching_rule_in_list_order() {
        let request = query(1, &[("www.example.com", TYPE_A)]);
        let rules = [
            rule("example.com", MatchType::Contains, Action::Refuse),
            rule("www.example.com", MatchType::Exact, redirect_v4()),
        ];

        let response = expect_response(decide(&request, &rules).unwrap());

        assert_eq!(response.header.rcode(), rcode::REFUSED);
        assert!(response.answers.is_empty());
    }

    #[test]
    fn should_scan_questions_before_rules() {
        let request = query(1, &[("first.test", TYPE_A), ("ads.test", TYPE_A)]);
        let rules = [
            rule("ads", MatchType::Contains, Action::Refuse),
            rule("first.test", MatchType::Exact, Action::NotFound),
        ];

        let found = find_match(&request, &rules).unwrap();
        assert_eq!(found.question, 0);
        assert_eq!(found.rule, &rules[1]);

        let response = expect_response(decide(&request, &rules).unwrap());
        assert_eq!(response.header.rcode(), rcode::NXDOMAIN);
    }

    #[test]
    fn should_skip_rules_whose_type_gate_fails() {
        let request = query(1, &[("example.com", TYPE_AAAA)]);
        let rules = [
            FilterRule::new(
                "example.com",
                FilterType::Ipv4,
                MatchType::Exact,
                Action::NotFound,
            ),
            FilterRule::new(
                "example.com",
                FilterType::Ipv6,
                MatchType::Exact,
                Action::Refuse,
            ),
        ];

        let response = expect_response(decide(&request, &rules).unwrap());

        assert_eq!(response.header.rcode(), rcode::REFUSED);
    }

    #[test]
    fn should_synthesize_nxdomain() {
        let request = query(0x1234, &[("blocked.test", TYPE_A)]);
        let rules = [rule("blocked.test", MatchType::Exact, Action::NotFound)];

        let response = expect_response(decide(&request, &rules).unwrap());

        assert_eq!(response.id(), 0x1234);
        assert_eq!(response.questions, request.questions);
        assert!(response.answers.is_empty());
        assert_eq!(response.header.rcode(), rcode::NXDOMAIN);

        let decoded = Message::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.id(), 0x1234);
        assert_eq!(decoded.header.rcode(), 3);
        assert_eq!(decoded.header.ancount, 0);
        assert_eq!(decoded.questions, request.questions);
    }

    #[test]
    fn should_preserve_every_other_header_bit() {
        let mut request = query(7, &[("blocked.test", TYPE_A)]);
        request.header.set_flag_bytes([0x01, 0x30]);
        let rules = [rule("blocked", MatchType::Contains, Action::Refuse)];

        let response = expect_response(decide(&request, &rules).unwrap());

        assert_eq!(response.header.flag_bytes(), [0x01, 0x35]);
    }

    #[test]
    fn should_redirect_a_query_to_ipv4() {
        let request = query(42, &[("ads.example.com", TYPE_A)]);
        let rules = [rule("ads", MatchType::Contains, redirect_v4())];

        let response = expect_response(decide(&request, &rules).unwrap());

        assert_eq!(response.header.rcode(), rcode::NO_ERROR);
        assert_eq!(response.header.ancount, 1);
        assert_eq!(response.answers.len(), 1);
        let answer = &response.answers[0];
        assert_eq!(answer.name, Name::Pointer(12));
        assert_eq!(answer.rtype, TYPE_A);
        assert_eq!(answer.class, CLASS_IN);
        assert_eq!(answer.ttl, REDIRECT_TTL);
        assert_eq!(answer.rdata, vec![10, 0, 0, 1]);
    }

    #[test]
    fn should_point_redirect_answer_at_the_matched_question() {
        let request = query(42, &[("safe.test", TYPE_A), ("v6.ads.test", TYPE_AAAA)]);
        let rules = [rule("ads", MatchType::Contains, redirect_v6())];

        let response = expect_response(decide(&request, &rules).unwrap());
        let bytes = response.encode().unwrap();

        let offset = usize::from(response.answers[0].name.as_pointer().unwrap());
        // 12 + "safe.test" (11) + type/class (4)
        assert_eq!(offset, 27);
        let request_bytes = request.encode().unwrap();
        assert_eq!(&bytes[offset..offset + 13], &request_bytes[offset..offset + 13]);
        assert_eq!(bytes[offset], 2);
        assert_eq!(&bytes[offset + 1..offset + 3], b"v6");

        let answer = &response.answers[0];
        assert_eq!(answer.rtype, TYPE_AAAA);
        assert_eq!(answer.rdlength(), 16);
        assert_eq!(answer.rdata[..2], [0xfd, 0x00]);
    }

    #[test]
    fn should_reject_ipv4_redirect_for_aaaa_query() {
        let request = query(1, &[("ads.test", TYPE_AAAA)]);
        let rules = [rule("ads.test", MatchType::Exact, redirect_v4())];

        let err = decide(&request, &rules).unwrap_err();

        assert_eq!(
            err,
            DecisionError::AddressFamilyMismatch {
                qtype: TYPE_AAAA,
                address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            }
        );
    }

    #[test]
    fn should_reject_redirect_for_non_address_query() {
        let request = query(1, &[("ads.test", 15)]);
        let rules = [rule("ads.test", MatchType::Exact, redirect_v6())];

        assert!(matches!(
            decide(&request, &rules),
            Err(DecisionError::AddressFamilyMismatch { qtype: 15, .. })
        ));
    }

    #[test]
    fn should_not_carry_additional_counts_into_responses() {
        let mut request = query(1, &[("blocked.test", TYPE_A)]);
        request.header.arcount = 1;

        let response = error_response(&request, rcode::REFUSED);

        assert_eq!(response.header.arcount, 0);
        assert_eq!(response.header.qdcount, 1);
    }
}
