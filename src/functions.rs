//! Built-in matcher predicates.
//!
//! These are registered under the names model files use (`keyMatch`,
//! `regexMatch`, ...) and are plain functions over strings, so they are
//! also usable directly.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{PortcullisError, Result};
use crate::expr::{EvalValue, MatcherFn};
use crate::rbac::SharedRoleManager;

/// `/foo/bar` against `/foo/*`: a trailing `*` matches any suffix.
pub fn key_match(key1: &str, key2: &str) -> bool {
    match key2.find('*') {
        None => key1 == key2,
        Some(i) => {
            if key1.len() > i {
                key1[..i] == key2[..i]
            } else {
                key1 == &key2[..i]
            }
        }
    }
}

static PLACEHOLDER2: Lazy<Regex> = Lazy::new(|| Regex::new(r":[^/]+").unwrap());
static PLACEHOLDER3: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^/]+\}").unwrap());
static PLACEHOLDER4: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^/]+)\}").unwrap());

/// `keyMatch` plus `:name` placeholders matching a single non-slash segment.
pub fn key_match2(key1: &str, key2: &str) -> bool {
    let pattern = key2.replace("/*", "/.*");
    let pattern = PLACEHOLDER2.replace_all(&pattern, "[^/]+");
    full_match(&pattern, key1)
}

/// Like `key_match2` but with `{name}` placeholder syntax.
pub fn key_match3(key1: &str, key2: &str) -> bool {
    let pattern = key2.replace("/*", "/.*");
    let pattern = PLACEHOLDER3.replace_all(&pattern, "[^/]+");
    full_match(&pattern, key1)
}

/// `key_match3` plus cross-placeholder equality: the same `{name}` used
/// twice in one pattern must match the same literal.
pub fn key_match4(key1: &str, key2: &str) -> bool {
    let pattern = key2.replace("/*", "/.*");

    let mut names = Vec::new();
    for cap in PLACEHOLDER4.captures_iter(&pattern) {
        names.push(cap[1].to_string());
    }
    let pattern = PLACEHOLDER4.replace_all(&pattern, "([^/]+)");

    let Ok(re) = Regex::new(&format!("^{pattern}$")) else {
        return false;
    };
    let Some(caps) = re.captures(key1) else {
        return false;
    };

    let mut bound: HashMap<&str, &str> = HashMap::new();
    for (name, cap) in names.iter().zip(caps.iter().skip(1)) {
        let Some(cap) = cap else { return false };
        match bound.get(name.as_str()) {
            Some(&prev) if prev != cap.as_str() => return false,
            _ => {
                bound.insert(name, cap.as_str());
            }
        }
    }
    true
}

fn full_match(pattern: &str, key: &str) -> bool {
    Regex::new(&format!("^{pattern}$"))
        .map(|re| re.is_match(key))
        .unwrap_or(false)
}

/// Full-regex match of `key1` against the pattern `key2`.
pub fn regex_match(key1: &str, key2: &str) -> bool {
    Regex::new(key2).map(|re| re.is_match(key1)).unwrap_or(false)
}

/// Shell-glob match of `key1` against the pattern `key2`. `*` does not
/// cross a `/` separator.
pub fn glob_match(key1: &str, key2: &str) -> bool {
    let options = glob::MatchOptions {
        require_literal_separator: true,
        ..Default::default()
    };
    glob::Pattern::new(key2)
        .map(|p| p.matches_with(key1, options))
        .unwrap_or(false)
}

/// `ip1` against `ip2`, where `ip2` is an address or a CIDR block.
pub fn ip_match(ip1: &str, ip2: &str) -> bool {
    let Ok(addr) = ip1.parse::<IpAddr>() else {
        return false;
    };
    if let Ok(net) = ip2.parse::<IpNet>() {
        return net.contains(&addr);
    }
    ip2.parse::<IpAddr>().map(|a| a == addr).unwrap_or(false)
}

fn two_strings(name: &'static str, f: fn(&str, &str) -> bool) -> MatcherFn {
    Arc::new(move |args: &[EvalValue]| {
        let (Some(a), Some(b)) = (
            args.first().and_then(EvalValue::as_str),
            args.get(1).and_then(EvalValue::as_str),
        ) else {
            return Err(PortcullisError::Expression(format!(
                "{name} expects two string arguments"
            )));
        };
        if args.len() != 2 {
            return Err(PortcullisError::Expression(format!(
                "{name} expects two string arguments"
            )));
        }
        Ok(EvalValue::Bool(f(a, b)))
    })
}

/// The built-in function table injected into every matcher evaluation.
pub fn builtin_functions() -> HashMap<String, MatcherFn> {
    let mut fns: HashMap<String, MatcherFn> = HashMap::new();
    fns.insert("keyMatch".into(), two_strings("keyMatch", key_match));
    fns.insert("keyMatch2".into(), two_strings("keyMatch2", key_match2));
    fns.insert("keyMatch3".into(), two_strings("keyMatch3", key_match3));
    fns.insert("keyMatch4".into(), two_strings("keyMatch4", key_match4));
    fns.insert("regexMatch".into(), two_strings("regexMatch", regex_match));
    fns.insert("globMatch".into(), two_strings("globMatch", glob_match));
    fns.insert("ipMatch".into(), two_strings("ipMatch", ip_match));
    fns
}

/// Build the `g(name1, name2, [domain])` predicate over a role graph.
pub fn role_predicate(rm: SharedRoleManager) -> MatcherFn {
    Arc::new(move |args: &[EvalValue]| {
        let strings: Option<Vec<&str>> = args.iter().map(EvalValue::as_str).collect();
        let strings = strings.filter(|s| s.len() == 2 || s.len() == 3);
        let Some(strings) = strings else {
            return Err(PortcullisError::Expression(
                "g expects two or three string arguments".into(),
            ));
        };
        let domain = strings.get(2).copied();
        Ok(EvalValue::Bool(rm.read().has_link(
            strings[0],
            strings[1],
            domain,
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::{DefaultRoleManager, RoleManager, DEFAULT_MAX_HIERARCHY_LEVEL};

    #[test]
    fn test_key_match() {
        assert!(key_match("/foo/bar", "/foo/*"));
        assert!(key_match("/foo", "/foo"));
        assert!(key_match("/foo", "/foo/*"));
        assert!(!key_match("/bar/foo", "/foo/*"));
    }

    #[test]
    fn test_key_match2() {
        assert!(key_match2("/alice_data/123", "/alice_data/:id"));
        assert!(key_match2("/alice_data/resource1", "/alice_data/*"));
        assert!(!key_match2("/alice_data/123/456", "/alice_data/:id"));
        assert!(!key_match2("/bob_data/123", "/alice_data/:id"));
    }

    #[test]
    fn test_key_match3() {
        assert!(key_match3("/alice_data/123", "/alice_data/{id}"));
        assert!(!key_match3("/alice_data/123/456", "/alice_data/{id}"));
    }

    #[test]
    fn test_key_match4_cross_placeholder_equality() {
        assert!(key_match4(
            "/parent/1/child/1",
            "/parent/{id}/child/{id}"
        ));
        assert!(!key_match4(
            "/parent/1/child/2",
            "/parent/{id}/child/{id}"
        ));
        // distinct names stay independent
        assert!(key_match4(
            "/parent/1/child/2",
            "/parent/{pid}/child/{cid}"
        ));
    }

    #[test]
    fn test_regex_match() {
        assert!(regex_match("/topic/create/123", r"/topic/create/\d+"));
        assert!(!regex_match("/topic/delete", r"/topic/create/\d+"));
        assert!(!regex_match("anything", "("));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("/foo/bar", "/foo/*"));
        assert!(!glob_match("/foo/bar/baz", "/foo/*"));
    }

    #[test]
    fn test_ip_match() {
        assert!(ip_match("192.168.2.123", "192.168.2.0/24"));
        assert!(!ip_match("192.168.3.123", "192.168.2.0/24"));
        assert!(ip_match("10.0.0.1", "10.0.0.1"));
        assert!(!ip_match("not-an-ip", "10.0.0.0/8"));
        assert!(ip_match("::1", "::1/128"));
    }

    #[test]
    fn test_builtin_wrapper_rejects_non_strings() {
        let fns = builtin_functions();
        let f = fns.get("keyMatch").unwrap();
        let err = f(&[EvalValue::Num(1.0), EvalValue::Str("/x".into())]).unwrap_err();
        assert!(matches!(err, PortcullisError::Expression(_)));
    }

    #[test]
    fn test_role_predicate() {
        let rm = DefaultRoleManager::shared(DEFAULT_MAX_HIERARCHY_LEVEL);
        rm.write().add_link("alice", "admin", None);
        rm.write().add_link("bob", "admin", Some("domain1"));

        let g = role_predicate(rm);
        let yes = g(&[
            EvalValue::Str("alice".into()),
            EvalValue::Str("admin".into()),
        ])
        .unwrap();
        assert_eq!(yes, EvalValue::Bool(true));

        let with_domain = g(&[
            EvalValue::Str("bob".into()),
            EvalValue::Str("admin".into()),
            EvalValue::Str("domain1".into()),
        ])
        .unwrap();
        assert_eq!(with_domain, EvalValue::Bool(true));

        let wrong_domain = g(&[
            EvalValue::Str("bob".into()),
            EvalValue::Str("admin".into()),
            EvalValue::Str("domain2".into()),
        ])
        .unwrap();
        assert_eq!(wrong_domain, EvalValue::Bool(false));

        assert!(g(&[EvalValue::Str("alice".into())]).is_err());
    }
}
