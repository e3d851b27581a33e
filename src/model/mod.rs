//! The compiled policy model: assertion tables per section, policy storage
//! and the role-graph wiring derived from grouping rules.

mod assertion;

pub use assertion::{rule_matches, Assertion};

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;
use crate::errors::{PortcullisError, Result};
use crate::expr;
use crate::rbac::SharedRoleManager;

/// Sections of a model file, keyed by the short section tag.
const SECTION_NAMES: &[(&str, &str)] = &[
    ("r", "request_definition"),
    ("p", "policy_definition"),
    ("g", "role_definition"),
    ("e", "policy_effect"),
    ("m", "matchers"),
];

/// Direction of an incremental role-link update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOp {
    Add,
    Remove,
}

static DOTTED_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([rp][0-9]*)\.").unwrap());

/// Rewrite dotted request/policy references to evaluator variable names:
/// `r.sub` becomes `r_sub`, `p2.obj` becomes `p2_obj`. Deeper attribute
/// access (`r.obj.Owner` -> `r_obj.Owner`) is left for the evaluator.
pub fn escape_assertion(value: &str) -> String {
    DOTTED_REF.replace_all(value, "${1}_").into_owned()
}

fn strip_inline_comment(value: &str) -> &str {
    match value.find('#') {
        Some(pos) => value[..pos].trim_end(),
        None => value,
    }
}

/// Section tag for a policy type: `p2` lives in section `p`, `g3` in `g`.
pub fn section_of(ptype: &str) -> &str {
    if ptype.starts_with('g') {
        "g"
    } else {
        "p"
    }
}

#[derive(Debug, Clone, Default)]
pub struct Model {
    data: HashMap<String, HashMap<String, Assertion>>,
}

impl Model {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::from_config(&Config::from_file(path)?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        Self::from_config(&Config::from_text(text)?)
    }

    fn from_config(cfg: &Config) -> Result<Self> {
        let mut model = Model::default();
        for &(sec, section_name) in SECTION_NAMES {
            model.load_section(cfg, sec, section_name)?;
        }
        Ok(model)
    }

    /// Read `sec`, `sec2`, `sec3`, ... from the named section until the next
    /// index is absent.
    fn load_section(&mut self, cfg: &Config, sec: &str, section_name: &str) -> Result<()> {
        let mut i = 1;
        loop {
            let key = if i == 1 {
                sec.to_string()
            } else {
                format!("{sec}{i}")
            };
            match cfg.get(&format!("{section_name}::{key}")) {
                Some(value) if !value.is_empty() => {
                    self.add_def(sec, &key, value)?;
                }
                _ => return Ok(()),
            }
            i += 1;
        }
    }

    /// Register one assertion. The value is normalized per section: matcher
    /// and effect expressions get identifier escaping, request/policy
    /// definitions get token qualification, grouping definitions get their
    /// relation arity validated.
    pub fn add_def(&mut self, sec: &str, key: &str, value: &str) -> Result<bool> {
        if value.is_empty() {
            return Ok(false);
        }
        let mut assertion = match sec {
            "m" => {
                let escaped = escape_assertion(strip_inline_comment(value));
                let mut a = Assertion::new(key, &escaped);
                a.matcher = Some(expr::parse(&escaped)?);
                a
            }
            "e" => Assertion::new(key, &escape_assertion(strip_inline_comment(value))),
            "g" => {
                if value.matches('_').count() < 2 {
                    return Err(PortcullisError::ConfigParse(format!(
                        "role definition `{key} = {value}` must have at least two `_` fields"
                    )));
                }
                let mut a = Assertion::new(key, value);
                a.build_tokens();
                a
            }
            _ => {
                let mut a = Assertion::new(key, value);
                a.build_tokens();
                a
            }
        };
        assertion.key = key.to_string();
        self.data
            .entry(sec.to_string())
            .or_default()
            .insert(key.to_string(), assertion);
        Ok(true)
    }

    pub fn get(&self, sec: &str, key: &str) -> Option<&Assertion> {
        self.data.get(sec).and_then(|m| m.get(key))
    }

    pub fn get_mut(&mut self, sec: &str, key: &str) -> Option<&mut Assertion> {
        self.data.get_mut(sec).and_then(|m| m.get_mut(key))
    }

    /// Fetch a required assertion, naming the missing section on failure.
    pub fn require(&self, sec: &str, key: &str) -> Result<&Assertion> {
        self.get(sec, key).ok_or_else(|| {
            let name = SECTION_NAMES
                .iter()
                .find(|(s, _)| *s == sec)
                .map(|(_, n)| *n)
                .unwrap_or(sec);
            PortcullisError::ModelIncomplete(name.to_string())
        })
    }

    /// All assertions of one section, in key order.
    pub fn assertions(&self, sec: &str) -> Vec<(&String, &Assertion)> {
        let mut out: Vec<_> = self
            .data
            .get(sec)
            .map(|m| m.iter().collect())
            .unwrap_or_default();
        out.sort_by_key(|(k, _)| k.clone());
        out
    }

    pub fn has_section(&self, sec: &str) -> bool {
        self.data.get(sec).map(|m| !m.is_empty()).unwrap_or(false)
    }

    // ---------- policy storage ----------

    pub fn get_policy(&self, sec: &str, ptype: &str) -> Vec<Vec<String>> {
        self.get(sec, ptype)
            .map(|a| a.policy.clone())
            .unwrap_or_default()
    }

    pub fn get_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Vec<Vec<String>> {
        self.get(sec, ptype)
            .map(|a| a.get_filtered(field_index, field_values))
            .unwrap_or_default()
    }

    pub fn has_policy(&self, sec: &str, ptype: &str, rule: &[String]) -> bool {
        self.get(sec, ptype)
            .map(|a| a.has_rule(rule))
            .unwrap_or(false)
    }

    pub fn add_policy(&mut self, sec: &str, ptype: &str, rule: Vec<String>) -> bool {
        let Some(a) = self.get_mut(sec, ptype) else {
            return false;
        };
        let added = a.add_rule(rule);
        if added && a.priority_index.is_some() {
            a.sort_by_priority();
        }
        added
    }

    pub fn add_policies(&mut self, sec: &str, ptype: &str, rules: &[Vec<String>]) -> bool {
        let Some(a) = self.get_mut(sec, ptype) else {
            return false;
        };
        let added = a.add_rules(rules);
        if added && a.priority_index.is_some() {
            a.sort_by_priority();
        }
        added
    }

    pub fn remove_policy(&mut self, sec: &str, ptype: &str, rule: &[String]) -> bool {
        self.get_mut(sec, ptype)
            .map(|a| a.remove_rule(rule))
            .unwrap_or(false)
    }

    pub fn remove_policies(&mut self, sec: &str, ptype: &str, rules: &[Vec<String>]) -> bool {
        self.get_mut(sec, ptype)
            .map(|a| a.remove_rules(rules))
            .unwrap_or(false)
    }

    pub fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> (bool, Vec<Vec<String>>) {
        self.get_mut(sec, ptype)
            .map(|a| a.remove_filtered(field_index, field_values))
            .unwrap_or((false, Vec::new()))
    }

    pub fn update_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        old: &[String],
        new: Vec<String>,
    ) -> bool {
        let Some(a) = self.get_mut(sec, ptype) else {
            return false;
        };
        let updated = a.update_rule(old, new);
        if updated && a.priority_index.is_some() {
            a.sort_by_priority();
        }
        updated
    }

    /// Distinct values of one column across a policy, sorted.
    pub fn get_values_for_field(&self, sec: &str, ptype: &str, field_index: usize) -> Vec<String> {
        let mut values: Vec<String> = self
            .get(sec, ptype)
            .map(|a| {
                a.policy
                    .iter()
                    .filter_map(|r| r.get(field_index).cloned())
                    .collect()
            })
            .unwrap_or_default();
        values.sort();
        values.dedup();
        values
    }

    /// Drop all rules from every `p` and `g` assertion.
    pub fn clear_policy(&mut self) {
        for sec in ["p", "g"] {
            if let Some(assertions) = self.data.get_mut(sec) {
                for a in assertions.values_mut() {
                    a.clear_rules();
                }
            }
        }
    }

    // ---------- role-graph wiring ----------

    /// Bind a role manager to a `g` assertion.
    pub fn set_role_manager(&mut self, ptype: &str, rm: SharedRoleManager) {
        if let Some(a) = self.get_mut("g", ptype) {
            a.rm = Some(rm);
        }
    }

    /// Rebuild every role graph from scratch from current grouping rules.
    pub fn build_role_links(&mut self) -> Result<()> {
        let Some(assertions) = self.data.get("g") else {
            return Ok(());
        };
        for a in assertions.values() {
            let Some(rm) = &a.rm else { continue };
            let mut rm = rm.write();
            rm.clear();
            for rule in &a.policy {
                link(&mut *rm, &a.key, a.tokens.len(), rule, PolicyOp::Add)?;
            }
            tracing::debug!(ptype = %a.key, links = a.policy.len(), "rebuilt role graph");
        }
        Ok(())
    }

    /// Apply one grouping mutation to the bound role graph without a full
    /// rebuild.
    pub fn build_incremental_role_links(
        &mut self,
        op: PolicyOp,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<()> {
        let Some(a) = self.get("g", ptype) else {
            return Ok(());
        };
        let Some(rm) = &a.rm else {
            return Ok(());
        };
        let mut rm = rm.write();
        for rule in rules {
            link(&mut *rm, ptype, a.tokens.len(), rule, op)?;
        }
        Ok(())
    }

    // ---------- ordering ----------

    /// Re-sort all priority-bearing policies.
    pub fn sort_policies_by_priority(&mut self) {
        if let Some(assertions) = self.data.get_mut("p") {
            for a in assertions.values_mut() {
                a.sort_by_priority();
            }
        }
    }

    /// Order rules so more-specific subjects come before less-specific ones,
    /// by topological rank over the subject graph. Only applies when the
    /// effect operator is the subject-priority variant.
    pub fn sort_policies_by_subject_hierarchy(&mut self) {
        let is_subject_priority = self
            .get("e", "e")
            .map(|a| a.value == "subjectPriority(p_eft) || deny")
            .unwrap_or(false);
        if !is_subject_priority {
            return;
        }

        // child -> parents, from the primary grouping policy
        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(g) = self.get("g", "g") {
            for rule in &g.policy {
                if rule.len() >= 2 {
                    parents
                        .entry(rule[0].clone())
                        .or_default()
                        .push(rule[1].clone());
                }
            }
        }

        let mut rank: HashMap<String, usize> = HashMap::new();
        let names: Vec<String> = parents
            .iter()
            .flat_map(|(c, ps)| std::iter::once(c.clone()).chain(ps.iter().cloned()))
            .collect();
        for name in names {
            subject_rank(&name, &parents, &mut rank, 0);
        }

        if let Some(assertions) = self.data.get_mut("p") {
            for a in assertions.values_mut() {
                let sub_index = a.field_index("sub").unwrap_or(0);
                a.sort_by_rank(sub_index, &rank);
            }
        }
    }
}

/// Depth of a subject below the hierarchy roots; deeper means more specific.
fn subject_rank(
    name: &str,
    parents: &HashMap<String, Vec<String>>,
    rank: &mut HashMap<String, usize>,
    depth_guard: usize,
) -> usize {
    if let Some(&r) = rank.get(name) {
        return r;
    }
    // cycle guard: a graph deeper than its node count must have looped
    if depth_guard > parents.len() {
        return 0;
    }
    let r = parents
        .get(name)
        .map(|ps| {
            1 + ps
                .iter()
                .map(|p| subject_rank(p, parents, rank, depth_guard + 1))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    rank.insert(name.to_string(), r);
    r
}

/// Apply one grouping rule to a role manager. A two-field relation links
/// `(child, parent)`; a three-field relation carries the domain in between.
fn link(
    rm: &mut dyn crate::rbac::RoleManager,
    ptype: &str,
    arity: usize,
    rule: &[String],
    op: PolicyOp,
) -> Result<()> {
    if rule.len() < 2 || rule.len() < arity {
        return Err(PortcullisError::InvalidPolicySize {
            ptype: ptype.to_string(),
            expected: arity,
            actual: rule.len(),
        });
    }
    let domain = if arity >= 3 { Some(rule[2].as_str()) } else { None };
    match op {
        PolicyOp::Add => {
            rm.add_link(&rule[0], &rule[1], domain);
            Ok(())
        }
        PolicyOp::Remove => rm.delete_link(&rule[0], &rule[1], domain),
    }
}
