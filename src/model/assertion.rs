//! A single named entry in a model section, together with its policy rules.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::errors::{PortcullisError, Result};
use crate::expr::Expr;
use crate::rbac::SharedRoleManager;

/// Separator used to fingerprint a rule for duplicate detection.
const FINGERPRINT_SEP: char = ',';

/// Optional multi-level index over a fixed subset of rule columns, for
/// large policies whose matcher is keyed on known fields. `apply_filter`
/// scopes iteration to rules whose key-tuple equals the argument.
#[derive(Debug, Clone, Default)]
struct PolicyIndex {
    columns: Vec<usize>,
    map: HashMap<Vec<String>, BTreeSet<usize>>,
}

impl PolicyIndex {
    fn key_of(&self, rule: &[String]) -> Vec<String> {
        self.columns
            .iter()
            .map(|&c| rule.get(c).cloned().unwrap_or_default())
            .collect()
    }

    fn rebuild(&mut self, policy: &[Vec<String>]) {
        self.map.clear();
        for (i, rule) in policy.iter().enumerate() {
            let key = self.key_of(rule);
            self.map.entry(key).or_default().insert(i);
        }
    }
}

/// One assertion: identified by (section, key), carrying its tokens, raw
/// value, bound role manager and the ordered policy rules.
#[derive(Clone, Default)]
pub struct Assertion {
    pub key: String,
    pub value: String,
    pub tokens: Vec<String>,
    pub policy: Vec<Vec<String>>,
    policy_map: HashMap<String, usize>,
    pub priority_index: Option<usize>,
    field_index_map: HashMap<String, usize>,
    pub rm: Option<SharedRoleManager>,
    /// Compiled matcher expression, present on `m` assertions only.
    pub matcher: Option<Expr>,
    index: Option<PolicyIndex>,
    scope: Option<BTreeSet<usize>>,
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assertion")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("tokens", &self.tokens)
            .field("rules", &self.policy.len())
            .finish()
    }
}

impl Assertion {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }

    /// Split the value on commas and qualify each token with the assertion
    /// key (`sub` under key `p` becomes `p_sub`). Also records the named
    /// field positions used for filtered lookups and priority sorting.
    pub fn build_tokens(&mut self) {
        self.tokens = self
            .value
            .split(',')
            .map(|t| format!("{}_{}", self.key, t.trim()))
            .collect();
        self.field_index_map = self
            .value
            .split(',')
            .enumerate()
            .map(|(i, t)| (t.trim().to_string(), i))
            .collect();
        self.priority_index = self.field_index_map.get("priority").copied();
    }

    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.field_index_map.get(field).copied()
    }

    fn fingerprint(rule: &[String]) -> String {
        let mut out = String::new();
        for (i, field) in rule.iter().enumerate() {
            if i > 0 {
                out.push(FINGERPRINT_SEP);
            }
            out.push_str(field);
        }
        out
    }

    fn rebuild_maps(&mut self) {
        self.policy_map = self
            .policy
            .iter()
            .enumerate()
            .map(|(i, r)| (Self::fingerprint(r), i))
            .collect();
        if let Some(index) = &mut self.index {
            index.rebuild(&self.policy);
        }
    }

    // ---------- rule storage ----------

    pub fn has_rule(&self, rule: &[String]) -> bool {
        self.policy_map.contains_key(&Self::fingerprint(rule))
    }

    /// Insert one rule. Duplicates are rejected: the return value is false
    /// and the rule list is untouched.
    pub fn add_rule(&mut self, rule: Vec<String>) -> bool {
        let fp = Self::fingerprint(&rule);
        if self.policy_map.contains_key(&fp) {
            return false;
        }
        let i = self.policy.len();
        if let Some(index) = &mut self.index {
            let key = index.key_of(&rule);
            index.map.entry(key).or_default().insert(i);
        }
        self.policy_map.insert(fp, i);
        self.policy.push(rule);
        true
    }

    /// Insert a batch, all-or-nothing: if any rule already exists (or the
    /// batch itself contains a duplicate) nothing is inserted.
    pub fn add_rules(&mut self, rules: &[Vec<String>]) -> bool {
        let mut fresh = HashSet::new();
        for rule in rules {
            let fp = Self::fingerprint(rule);
            if self.policy_map.contains_key(&fp) || !fresh.insert(fp) {
                return false;
            }
        }
        for rule in rules {
            self.add_rule(rule.clone());
        }
        true
    }

    pub fn remove_rule(&mut self, rule: &[String]) -> bool {
        let Some(i) = self.policy_map.remove(&Self::fingerprint(rule)) else {
            return false;
        };
        self.policy.remove(i);
        self.rebuild_maps();
        true
    }

    /// Remove a batch; true only if every rule was present.
    pub fn remove_rules(&mut self, rules: &[Vec<String>]) -> bool {
        if !rules.iter().all(|r| self.has_rule(r)) {
            return false;
        }
        for rule in rules {
            self.remove_rule(rule);
        }
        true
    }

    /// Remove every rule whose fields starting at `field_index` equal the
    /// given values (empty strings are wildcards). Returns the removed rules.
    pub fn remove_filtered(
        &mut self,
        field_index: usize,
        field_values: &[String],
    ) -> (bool, Vec<Vec<String>>) {
        let mut kept = Vec::with_capacity(self.policy.len());
        let mut removed = Vec::new();
        for rule in std::mem::take(&mut self.policy) {
            if rule_matches(&rule, field_index, field_values) {
                removed.push(rule);
            } else {
                kept.push(rule);
            }
        }
        self.policy = kept;
        self.rebuild_maps();
        (!removed.is_empty(), removed)
    }

    /// Replace `old` with `new` in place, keeping rule order.
    pub fn update_rule(&mut self, old: &[String], new: Vec<String>) -> bool {
        let Some(&i) = self.policy_map.get(&Self::fingerprint(old)) else {
            return false;
        };
        if self.has_rule(&new) {
            return false;
        }
        self.policy[i] = new;
        self.rebuild_maps();
        true
    }

    pub fn get_filtered(&self, field_index: usize, field_values: &[String]) -> Vec<Vec<String>> {
        self.policy
            .iter()
            .filter(|r| rule_matches(r, field_index, field_values))
            .cloned()
            .collect()
    }

    // ---------- fast-backend surface ----------

    /// Index the policy on a fixed column subset. Existing rules are
    /// indexed immediately.
    pub fn enable_index(&mut self, columns: Vec<usize>) {
        let mut index = PolicyIndex {
            columns,
            map: HashMap::new(),
        };
        index.rebuild(&self.policy);
        self.index = Some(index);
    }

    /// Scope subsequent iteration to rules whose key-tuple equals `keys`.
    pub fn apply_filter(&mut self, keys: &[String]) -> Result<()> {
        let Some(index) = &self.index else {
            return Err(PortcullisError::Policy(
                "policy index is not enabled for this assertion".into(),
            ));
        };
        if keys.len() != index.columns.len() {
            return Err(PortcullisError::Policy(format!(
                "filter key has {} fields but the index covers {} columns",
                keys.len(),
                index.columns.len()
            )));
        }
        self.scope = Some(index.map.get(keys).cloned().unwrap_or_default());
        Ok(())
    }

    /// Restore full iteration.
    pub fn clear_filter(&mut self) {
        self.scope = None;
    }

    /// Rule indices visible under the active filter, in rule order.
    pub fn scoped_indices(&self) -> Vec<usize> {
        match &self.scope {
            Some(scope) => scope.iter().copied().collect(),
            None => (0..self.policy.len()).collect(),
        }
    }

    // ---------- ordering ----------

    /// Stable ascending sort on the declared priority column. Rules whose
    /// priority field is not an integer sort last.
    pub fn sort_by_priority(&mut self) {
        let Some(pi) = self.priority_index else {
            return;
        };
        self.policy.sort_by_key(|rule| {
            rule.get(pi)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(i64::MAX)
        });
        self.rebuild_maps();
    }

    /// Stable sort placing more-specific subjects first, by descending rank.
    pub fn sort_by_rank(&mut self, sub_index: usize, rank: &HashMap<String, usize>) {
        self.policy.sort_by_key(|rule| {
            std::cmp::Reverse(
                rule.get(sub_index)
                    .and_then(|s| rank.get(s))
                    .copied()
                    .unwrap_or(0),
            )
        });
        self.rebuild_maps();
    }

    pub fn clear_rules(&mut self) {
        self.policy.clear();
        self.policy_map.clear();
        if let Some(index) = &mut self.index {
            index.map.clear();
        }
        self.scope = None;
    }
}

/// Field-window match: values align with columns starting at `field_index`;
/// an empty string matches anything.
pub fn rule_matches(rule: &[String], field_index: usize, field_values: &[String]) -> bool {
    field_values.iter().enumerate().all(|(i, v)| {
        v.is_empty() || rule.get(field_index + i).map(|f| f == v).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> Assertion {
        let mut a = Assertion::new("p", "sub, obj, act");
        a.build_tokens();
        a.add_rule(rule(&["alice", "data1", "read"]));
        a.add_rule(rule(&["bob", "data2", "write"]));
        a
    }

    #[test]
    fn test_build_tokens_qualifies_names() {
        let a = sample();
        assert_eq!(a.tokens, vec!["p_sub", "p_obj", "p_act"]);
        assert_eq!(a.field_index("obj"), Some(1));
        assert_eq!(a.priority_index, None);
    }

    #[test]
    fn test_priority_index() {
        let mut a = Assertion::new("p", "sub, obj, act, eft, priority");
        a.build_tokens();
        assert_eq!(a.priority_index, Some(4));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let mut a = sample();
        assert!(!a.add_rule(rule(&["alice", "data1", "read"])));
        assert_eq!(a.policy.len(), 2);
    }

    #[test]
    fn test_add_rules_all_or_nothing() {
        let mut a = sample();
        let batch = vec![
            rule(&["carol", "data3", "read"]),
            rule(&["alice", "data1", "read"]), // duplicate of an existing rule
        ];
        assert!(!a.add_rules(&batch));
        assert_eq!(a.policy.len(), 2);

        let batch = vec![
            rule(&["carol", "data3", "read"]),
            rule(&["dave", "data4", "read"]),
        ];
        assert!(a.add_rules(&batch));
        assert_eq!(a.policy.len(), 4);
    }

    #[test]
    fn test_remove_restores_prior_state() {
        let mut a = sample();
        let before = a.policy.clone();
        a.add_rule(rule(&["carol", "data3", "read"]));
        assert!(a.remove_rule(&rule(&["carol", "data3", "read"])));
        assert_eq!(a.policy, before);
        assert!(!a.remove_rule(&rule(&["carol", "data3", "read"])));
    }

    #[test]
    fn test_remove_keeps_membership_consistent() {
        let mut a = sample();
        a.remove_rule(&rule(&["alice", "data1", "read"]));
        assert!(a.has_rule(&rule(&["bob", "data2", "write"])));
        assert!(!a.has_rule(&rule(&["alice", "data1", "read"])));
    }

    #[test]
    fn test_remove_filtered_with_wildcard() {
        let mut a = sample();
        let (changed, removed) = a.remove_filtered(0, &[String::new(), "data2".into()]);
        assert!(changed);
        assert_eq!(removed, vec![rule(&["bob", "data2", "write"])]);
        assert_eq!(a.policy.len(), 1);
    }

    #[test]
    fn test_update_rule() {
        let mut a = sample();
        assert!(a.update_rule(
            &rule(&["alice", "data1", "read"]),
            rule(&["alice", "data1", "write"])
        ));
        assert!(a.has_rule(&rule(&["alice", "data1", "write"])));
        assert!(!a.has_rule(&rule(&["alice", "data1", "read"])));
        // updating a missing rule changes nothing
        assert!(!a.update_rule(&rule(&["zed", "x", "y"]), rule(&["z", "x", "y"])));
    }

    #[test]
    fn test_get_filtered_empty_values_return_all() {
        let a = sample();
        assert_eq!(a.get_filtered(0, &[String::new()]), a.policy);
    }

    #[test]
    fn test_sort_by_priority() {
        let mut a = Assertion::new("p", "sub, obj, act, eft, priority");
        a.build_tokens();
        a.add_rule(rule(&["bob", "data2", "write", "allow", "2"]));
        a.add_rule(rule(&["bob", "data2", "write", "deny", "1"]));
        a.sort_by_priority();
        assert_eq!(a.policy[0][4], "1");
        assert_eq!(a.policy[1][4], "2");
        // membership survives the re-sort
        assert!(a.has_rule(&rule(&["bob", "data2", "write", "deny", "1"])));
    }

    #[test]
    fn test_index_scoping() {
        let mut a = sample();
        a.enable_index(vec![1]); // key on the obj column
        a.apply_filter(&["data2".to_string()]).unwrap();
        assert_eq!(a.scoped_indices(), vec![1]);
        a.clear_filter();
        assert_eq!(a.scoped_indices(), vec![0, 1]);

        // unknown key scopes to nothing
        a.apply_filter(&["data9".to_string()]).unwrap();
        assert!(a.scoped_indices().is_empty());
        a.clear_filter();
    }

    #[test]
    fn test_index_tracks_mutations() {
        let mut a = sample();
        a.enable_index(vec![1]);
        a.add_rule(rule(&["carol", "data2", "read"]));
        a.apply_filter(&["data2".to_string()]).unwrap();
        assert_eq!(a.scoped_indices(), vec![1, 2]);
        a.clear_filter();

        a.remove_rule(&rule(&["bob", "data2", "write"]));
        a.apply_filter(&["data2".to_string()]).unwrap();
        assert_eq!(a.scoped_indices(), vec![1]);
    }

    #[test]
    fn test_apply_filter_arity_checked() {
        let mut a = sample();
        a.enable_index(vec![1]);
        assert!(a
            .apply_filter(&["data2".to_string(), "read".to_string()])
            .is_err());
        let mut b = sample();
        assert!(b.apply_filter(&["data2".to_string()]).is_err());
    }
}
