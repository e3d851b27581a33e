//! Role-inheritance graphs and reachability queries.
//!
//! A role manager holds one directed graph of role-inheritance relations.
//! Nodes are keyed by `(domain, name)`; the domain defaults to the empty
//! string. An edge child -> parent means "child inherits from parent".
//! Reachability is a breadth-first search bounded by a maximum hierarchy
//! level, so a pathological graph can never send a query into an unbounded
//! walk.
//!
//! Pattern mode: a matching function widens traversal so that a stored role
//! name (or domain) can act as a pattern, e.g. `/book/:id` covering
//! `/book/1`. The search keeps a visited set; insert order of links cannot
//! cause a reachability miss because matching is applied at every hop.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{PortcullisError, Result};

/// Decides whether a query key should be treated as equal to a stored key.
pub type MatchingFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// A role manager shared between the enforcer and the `g` matcher predicate.
pub type SharedRoleManager = Arc<RwLock<dyn RoleManager>>;

pub const DEFAULT_MAX_HIERARCHY_LEVEL: usize = 10;

pub trait RoleManager: Send + Sync {
    /// Drop all roles and links.
    fn clear(&mut self);

    /// Add the inheritance link `name1` -> `name2`, creating nodes as needed.
    fn add_link(&mut self, name1: &str, name2: &str, domain: Option<&str>);

    /// Remove the link `name1` -> `name2`. Fails if either role or the link
    /// itself is absent.
    fn delete_link(&mut self, name1: &str, name2: &str, domain: Option<&str>) -> Result<()>;

    /// True iff `name1` equals `name2` or can reach it within the hierarchy
    /// level bound.
    fn has_link(&self, name1: &str, name2: &str, domain: Option<&str>) -> bool;

    /// Roles reachable in exactly one hop (direct parents).
    fn get_roles(&self, name: &str, domain: Option<&str>) -> Vec<String>;

    /// Names with a direct edge to `name` (direct children).
    fn get_users(&self, name: &str, domain: Option<&str>) -> Vec<String>;

    /// Enable pattern mode for role names.
    fn add_matching_fn(&mut self, f: MatchingFn);

    /// Enable pattern mode for domain names.
    fn add_domain_matching_fn(&mut self, f: MatchingFn);
}

struct Node {
    domain: String,
    name: String,
    parents: BTreeSet<usize>,
    children: BTreeSet<usize>,
}

/// The default graph-backed role manager. All nodes are owned by the
/// manager's arena; edges are integer indices into it.
pub struct DefaultRoleManager {
    nodes: Vec<Node>,
    index: HashMap<(String, String), usize>,
    max_hierarchy_level: usize,
    role_matching: Option<MatchingFn>,
    domain_matching: Option<MatchingFn>,
}

impl DefaultRoleManager {
    pub fn new(max_hierarchy_level: usize) -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            max_hierarchy_level,
            role_matching: None,
            domain_matching: None,
        }
    }

    /// Wrap a new manager for shared use.
    pub fn shared(max_hierarchy_level: usize) -> SharedRoleManager {
        Arc::new(RwLock::new(Self::new(max_hierarchy_level)))
    }

    fn node_of(&mut self, domain: &str, name: &str) -> usize {
        let key = (domain.to_string(), name.to_string());
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            domain: domain.to_string(),
            name: name.to_string(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        });
        self.index.insert(key, idx);
        idx
    }

    fn match_role(&self, query: &str, stored: &str) -> bool {
        query == stored
            || self
                .role_matching
                .as_ref()
                .map(|f| f(query, stored))
                .unwrap_or(false)
    }

    fn match_domain(&self, query: &str, stored: &str) -> bool {
        query == stored
            || self
                .domain_matching
                .as_ref()
                .map(|f| f(query, stored))
                .unwrap_or(false)
    }

    /// All node indices whose stored (domain, name) match the query pair.
    fn matching_nodes(&self, domain: &str, name: &str) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| self.match_domain(domain, &n.domain) && self.match_role(name, &n.name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Fan-out for one hop from `idx`: its own parents, plus (in pattern
    /// mode) the parents of every stored node the current name matches.
    fn hop_targets(&self, idx: usize, domain: &str) -> BTreeSet<usize> {
        let mut out = self.nodes[idx].parents.clone();
        if self.role_matching.is_some() || self.domain_matching.is_some() {
            let name = &self.nodes[idx].name;
            for (i, n) in self.nodes.iter().enumerate() {
                if i != idx
                    && self.match_domain(domain, &n.domain)
                    && self.match_role(name, &n.name)
                {
                    out.extend(n.parents.iter().copied());
                }
            }
        }
        out
    }
}

impl RoleManager for DefaultRoleManager {
    fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
    }

    fn add_link(&mut self, name1: &str, name2: &str, domain: Option<&str>) {
        let domain = domain.unwrap_or("");
        let child = self.node_of(domain, name1);
        let parent = self.node_of(domain, name2);
        self.nodes[child].parents.insert(parent);
        self.nodes[parent].children.insert(child);
    }

    fn delete_link(&mut self, name1: &str, name2: &str, domain: Option<&str>) -> Result<()> {
        let domain = domain.unwrap_or("");
        let child = self
            .index
            .get(&(domain.to_string(), name1.to_string()))
            .copied()
            .ok_or_else(|| PortcullisError::Rbac(format!("role `{name1}` does not exist")))?;
        let parent = self
            .index
            .get(&(domain.to_string(), name2.to_string()))
            .copied()
            .ok_or_else(|| PortcullisError::Rbac(format!("role `{name2}` does not exist")))?;
        if !self.nodes[child].parents.remove(&parent) {
            return Err(PortcullisError::Rbac(format!(
                "link `{name1}` -> `{name2}` does not exist"
            )));
        }
        self.nodes[parent].children.remove(&child);
        Ok(())
    }

    fn has_link(&self, name1: &str, name2: &str, domain: Option<&str>) -> bool {
        let domain = domain.unwrap_or("");
        if name1 == name2 || self.match_role(name1, name2) {
            return true;
        }

        let mut visited: HashSet<usize> = HashSet::new();
        let mut frontier: BTreeSet<usize> = BTreeSet::new();
        for idx in self.matching_nodes(domain, name1) {
            visited.insert(idx);
            frontier.insert(idx);
        }

        for _ in 0..self.max_hierarchy_level {
            if frontier.is_empty() {
                return false;
            }
            let mut next = BTreeSet::new();
            for idx in frontier {
                for target in self.hop_targets(idx, domain) {
                    if !visited.insert(target) {
                        continue;
                    }
                    let n = &self.nodes[target];
                    if n.name == name2 || self.match_role(n.name.as_str(), name2) {
                        return true;
                    }
                    next.insert(target);
                }
            }
            frontier = next;
        }
        false
    }

    fn get_roles(&self, name: &str, domain: Option<&str>) -> Vec<String> {
        let domain = domain.unwrap_or("");
        let mut seen = BTreeSet::new();
        for idx in self.matching_nodes(domain, name) {
            for target in self.hop_targets(idx, domain) {
                seen.insert(self.nodes[target].name.clone());
            }
        }
        seen.into_iter().collect()
    }

    fn get_users(&self, name: &str, domain: Option<&str>) -> Vec<String> {
        let domain = domain.unwrap_or("");
        let mut seen = BTreeSet::new();
        for idx in self.matching_nodes(domain, name) {
            for &child in &self.nodes[idx].children {
                seen.insert(self.nodes[child].name.clone());
            }
        }
        seen.into_iter().collect()
    }

    fn add_matching_fn(&mut self, f: MatchingFn) {
        self.role_matching = Some(f);
    }

    fn add_domain_matching_fn(&mut self, f: MatchingFn) {
        self.domain_matching = Some(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{key_match, key_match2};

    fn manager() -> DefaultRoleManager {
        DefaultRoleManager::new(DEFAULT_MAX_HIERARCHY_LEVEL)
    }

    #[test]
    fn test_add_link_then_has_link() {
        let mut rm = manager();
        rm.add_link("alice", "admin", None);
        assert!(rm.has_link("alice", "admin", None));
        assert_eq!(rm.get_roles("alice", None), vec!["admin"]);
    }

    #[test]
    fn test_reflexive() {
        let rm = manager();
        assert!(rm.has_link("anyone", "anyone", None));
    }

    #[test]
    fn test_transitive_reachability() {
        let mut rm = manager();
        rm.add_link("alice", "editor", None);
        rm.add_link("editor", "admin", None);
        assert!(rm.has_link("alice", "admin", None));
        assert!(!rm.has_link("admin", "alice", None));
        // one-hop listing stays one hop
        assert_eq!(rm.get_roles("alice", None), vec!["editor"]);
    }

    #[test]
    fn test_get_users() {
        let mut rm = manager();
        rm.add_link("alice", "admin", None);
        rm.add_link("bob", "admin", None);
        assert_eq!(rm.get_users("admin", None), vec!["alice", "bob"]);
    }

    #[test]
    fn test_delete_link() {
        let mut rm = manager();
        rm.add_link("alice", "admin", None);
        rm.delete_link("alice", "admin", None).unwrap();
        assert!(!rm.has_link("alice", "admin", None));
        // deleting again fails
        assert!(rm.delete_link("alice", "admin", None).is_err());
        // unknown role fails
        assert!(rm.delete_link("carol", "admin", None).is_err());
    }

    #[test]
    fn test_domains_are_isolated() {
        let mut rm = manager();
        rm.add_link("alice", "admin", Some("domain1"));
        assert!(rm.has_link("alice", "admin", Some("domain1")));
        assert!(!rm.has_link("alice", "admin", Some("domain2")));
        assert!(rm.get_roles("alice", Some("domain2")).is_empty());
    }

    #[test]
    fn test_depth_bound() {
        let mut rm = DefaultRoleManager::new(3);
        rm.add_link("n0", "n1", None);
        rm.add_link("n1", "n2", None);
        rm.add_link("n2", "n3", None);
        rm.add_link("n3", "n4", None);
        assert!(rm.has_link("n0", "n3", None)); // 3 hops, at the bound
        assert!(!rm.has_link("n0", "n4", None)); // 4 hops, over it
    }

    #[test]
    fn test_cycle_terminates() {
        let mut rm = manager();
        rm.add_link("a", "b", None);
        rm.add_link("b", "a", None);
        assert!(rm.has_link("a", "b", None));
        assert!(!rm.has_link("a", "c", None));
    }

    #[test]
    fn test_clear() {
        let mut rm = manager();
        rm.add_link("alice", "admin", None);
        rm.clear();
        assert!(!rm.has_link("alice", "admin", None));
        assert!(rm.get_roles("alice", None).is_empty());
    }

    #[test]
    fn test_pattern_matching_roles() {
        let mut rm = manager();
        rm.add_matching_fn(Arc::new(|q, s| key_match2(q, s)));
        rm.add_link("/book/:id", "book_group", None);
        assert!(rm.has_link("/book/1", "book_group", None));
        assert!(rm.has_link("/book/2", "book_group", None));
        assert!(!rm.has_link("/magazine/1", "book_group", None));
    }

    #[test]
    fn test_pattern_matching_insert_order_does_not_matter() {
        // The concrete role is linked before the pattern that covers it.
        let mut rm = manager();
        rm.add_matching_fn(Arc::new(|q, s| key_match2(q, s)));
        rm.add_link("/book/1", "book_admin", None);
        rm.add_link("/book/:id", "book_group", None);
        assert!(rm.has_link("/book/1", "book_group", None));
        assert!(rm.has_link("/book/1", "book_admin", None));
    }

    #[test]
    fn test_pattern_matching_domains() {
        let mut rm = manager();
        rm.add_domain_matching_fn(Arc::new(|q, s| key_match(q, s)));
        rm.add_link("alice", "admin", Some("*"));
        assert!(rm.has_link("alice", "admin", Some("domain1")));
        assert!(rm.has_link("alice", "admin", Some("domain2")));
    }

    #[test]
    fn test_pattern_delete_is_exact() {
        let mut rm = manager();
        rm.add_matching_fn(Arc::new(|q, s| key_match2(q, s)));
        rm.add_link("/book/:id", "book_group", None);
        // the concrete name never had a stored link, so deleting it fails
        assert!(rm.delete_link("/book/1", "book_group", None).is_err());
        rm.delete_link("/book/:id", "book_group", None).unwrap();
        assert!(!rm.has_link("/book/1", "book_group", None));
    }
}
