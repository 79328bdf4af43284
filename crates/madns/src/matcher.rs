//! Resolves a query name to the policy that handles it.
//!
//! A pattern matches the name itself and every name below it on a label
//! boundary: `example.com` handles `example.com` and `a.example.com`, but not
//! `evilexample.com`. When several patterns match, the longest one wins. The
//! default pattern `.` is only consulted if nothing else matches.

use madns_common::{parent_domains, to_fqdn, Policy, PolicyModel, DEFAULT_PATTERN};

/// A policy together with the pattern it was found under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedPolicy<'a> {
    pub key: &'a str,
    pub policy: &'a Policy,
}

pub fn find_policy<'a>(model: &'a PolicyModel, qname: &str) -> Option<MatchedPolicy<'a>> {
    let qname = to_fqdn(qname);

    // Candidates are probed from the full name down to the TLD
    let matched = std::iter::once(qname.as_str())
        .chain(parent_domains(&qname))
        .filter(|candidate| *candidate != DEFAULT_PATTERN)
        .find_map(|candidate| model.get_key_value(candidate))
        .or_else(|| model.get_key_value(DEFAULT_PATTERN))
        .map(|(key, policy)| MatchedPolicy { key, policy });

    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(respond: &str) -> Policy {
        Policy {
            respond: Some(respond.to_string()),
            ..Default::default()
        }
    }

    fn model(patterns: &[&str]) -> PolicyModel {
        PolicyModel::new(
            patterns
                .iter()
                .map(|pattern| (pattern.to_string(), policy(pattern))),
        )
        .expect("unique patterns")
    }

    fn matched_key(model: &PolicyModel, qname: &str) -> Option<String> {
        find_policy(model, qname).map(|matched| matched.key.to_string())
    }

    #[test]
    fn exact_and_subdomain_match() {
        let model = model(&["example.com"]);

        assert_eq!(matched_key(&model, "example.com."), Some("example.com.".into()));
        assert_eq!(matched_key(&model, "www.example.com."), Some("example.com.".into()));
        assert_eq!(matched_key(&model, "a.b.example.com"), Some("example.com.".into()));
    }

    #[test]
    fn match_is_case_insensitive() {
        let model = model(&["Example.Com"]);

        assert_eq!(matched_key(&model, "WWW.EXAMPLE.com."), Some("example.com.".into()));
    }

    #[test]
    fn suffix_requires_label_boundary() {
        let model = model(&["example.com"]);

        assert_eq!(matched_key(&model, "evilexample.com."), None);
        assert_eq!(matched_key(&model, "com."), None);
    }

    #[test]
    fn longest_suffix_wins() {
        let model = model(&["example.com", "sub.example.com"]);

        assert_eq!(
            matched_key(&model, "a.sub.example.com."),
            Some("sub.example.com.".into())
        );
        assert_eq!(matched_key(&model, "sub.example.com."), Some("sub.example.com.".into()));
        assert_eq!(matched_key(&model, "other.example.com."), Some("example.com.".into()));
    }

    #[test]
    fn default_policy_is_the_fallback() {
        let model = model(&["example.com", "."]);

        assert_eq!(matched_key(&model, "example.org."), Some(".".into()));
        assert_eq!(matched_key(&model, "."), Some(".".into()));
        assert_eq!(matched_key(&model, "x.example.com."), Some("example.com.".into()));
    }

    #[test]
    fn no_handler_without_default() {
        let model = model(&["example.com"]);

        assert!(find_policy(&model, "example.org.").is_none());
        assert!(find_policy(&PolicyModel::default(), "example.com.").is_none());
    }

    #[test]
    fn matched_policy_is_the_configured_one() {
        let model = model(&["example.com", "example.org"]);

        let matched = find_policy(&model, "mail.example.org.").expect("should match");
        assert_eq!(matched.policy.respond(), Some("example.org"));
    }

    fn arb_label() -> impl Strategy<Value = String> {
        "[a-z0-9]([a-z0-9-]{0,14}[a-z0-9])?"
    }

    fn arb_domain() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_label(), 1..4).prop_map(|labels| labels.join("."))
    }

    proptest! {
        #[test]
        fn subdomains_match_their_pattern(pattern in arb_domain(), prefix in prop::collection::vec(arb_label(), 0..4)) {
            let model = model(&[pattern.as_str()]);
            let mut qname = prefix.join(".");
            if !qname.is_empty() {
                qname.push('.');
            }
            qname.push_str(&pattern);

            prop_assert_eq!(matched_key(&model, &qname), Some(to_fqdn(&pattern)));
        }

        #[test]
        fn glued_prefixes_fall_back_to_default(pattern in arb_domain(), prefix in arb_label()) {
            let model = model(&[pattern.as_str(), "."]);
            let qname = format!("{}{}", prefix, pattern);

            prop_assert_eq!(matched_key(&model, &qname), Some(".".to_string()));
        }
    }
}
