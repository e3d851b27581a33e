//! Persistence adapters.
//!
//! An adapter moves policy rules between the in-memory model and some
//! backing store. The core trait covers loading, saving and single-rule
//! mutation; optional capabilities (filtered loading, batches, in-place
//! updates) are separate traits discovered through the `as_*` accessors,
//! so callers feature-test with a runtime interface assertion instead of
//! probing for methods.
//!
//! The policy text format is one rule per line: `<ptype>, <field1>, ...`
//! with `, ` as the separator and `#` starting a comment line.

mod file_adapter;
mod memory;
mod string_adapter;

pub use file_adapter::FileAdapter;
pub use memory::MemoryAdapter;
pub use string_adapter::StringAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{PortcullisError, Result};
use crate::model::{section_of, Model};

/// Per-section inclusion lists for filtered loading. Values align with rule
/// fields; an empty string matches anything. An empty list disables the
/// filter for that section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub p: Vec<String>,
    #[serde(default)]
    pub g: Vec<String>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.p.is_empty() && self.g.is_empty()
    }

    /// Whether a rule of the given section passes the filter.
    pub fn matches(&self, sec: &str, rule: &[String]) -> bool {
        let values = match sec {
            "p" => &self.p,
            "g" => &self.g,
            _ => return true,
        };
        values.is_empty() || crate::model::rule_matches(rule, 0, values)
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    async fn load_policy(&mut self, model: &mut Model) -> Result<()>;
    async fn save_policy(&mut self, model: &mut Model) -> Result<()>;

    async fn add_policy(&mut self, sec: &str, ptype: &str, rule: &[String]) -> Result<bool>;
    async fn remove_policy(&mut self, sec: &str, ptype: &str, rule: &[String]) -> Result<bool>;
    async fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool>;

    /// Whether the currently loaded view omits rules.
    fn is_filtered(&self) -> bool {
        false
    }

    fn as_filtered(&mut self) -> Option<&mut dyn FilteredAdapter> {
        None
    }

    fn as_batch(&mut self) -> Option<&mut dyn BatchAdapter> {
        None
    }

    fn as_updatable(&mut self) -> Option<&mut dyn UpdatableAdapter> {
        None
    }
}

/// Loading a caller-filtered subset of the policy.
#[async_trait]
pub trait FilteredAdapter: Adapter {
    async fn load_filtered_policy(&mut self, model: &mut Model, filter: &Filter) -> Result<()>;
}

/// All-or-nothing batch mutation.
#[async_trait]
pub trait BatchAdapter: Adapter {
    async fn add_policies(&mut self, sec: &str, ptype: &str, rules: &[Vec<String>])
        -> Result<bool>;
    async fn remove_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool>;
}

/// In-place rule replacement.
#[async_trait]
pub trait UpdatableAdapter: Adapter {
    async fn update_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        old: &[String],
        new: &[String],
    ) -> Result<bool>;

    async fn update_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> Result<bool>;

    /// Replace every rule matching the filter with the new batch; returns
    /// the replaced rules.
    async fn update_filtered_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Vec<String>>>;
}

/// Parse one policy-text line into the model. Blank lines and `#` comments
/// are skipped; duplicates already present in the model are ignored.
pub fn load_policy_line(line: &str, model: &mut Model) -> Result<()> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(());
    }
    let mut fields = line.split(", ").map(str::trim);
    let ptype = fields.next().unwrap_or_default().to_string();
    let rule: Vec<String> = fields.map(str::to_string).collect();
    let sec = section_of(&ptype);

    let assertion = model.require(sec, &ptype)?;
    if rule.len() != assertion.tokens.len() {
        return Err(PortcullisError::InvalidPolicySize {
            ptype,
            expected: assertion.tokens.len(),
            actual: rule.len(),
        });
    }
    model.add_policy(sec, &ptype, rule);
    Ok(())
}

/// Render the model's policies in the policy text format.
pub fn policy_to_text(model: &Model) -> String {
    let mut out = String::new();
    for sec in ["p", "g"] {
        for (ptype, assertion) in model.assertions(sec) {
            for rule in &assertion.policy {
                out.push_str(ptype);
                for field in rule {
                    out.push_str(", ");
                    out.push_str(field);
                }
                out.push('\n');
            }
        }
    }
    out
}
