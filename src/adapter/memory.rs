//! In-process adapter backing policies with a plain rule list. The test
//! workhorse: it implements every optional capability.

use async_trait::async_trait;

use crate::adapter::{Adapter, BatchAdapter, Filter, FilteredAdapter, UpdatableAdapter};
use crate::errors::Result;
use crate::model::{rule_matches, Model};

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredRule {
    sec: String,
    ptype: String,
    rule: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    rules: Vec<StoredRule>,
    filtered: bool,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn position(&self, sec: &str, ptype: &str, rule: &[String]) -> Option<usize> {
        self.rules
            .iter()
            .position(|s| s.sec == sec && s.ptype == ptype && s.rule == rule)
    }

    fn insert(&mut self, sec: &str, ptype: &str, rule: &[String]) -> bool {
        if self.position(sec, ptype, rule).is_some() {
            return false;
        }
        self.rules.push(StoredRule {
            sec: sec.to_string(),
            ptype: ptype.to_string(),
            rule: rule.to_vec(),
        });
        true
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn load_policy(&mut self, model: &mut Model) -> Result<()> {
        for stored in &self.rules {
            model.add_policy(&stored.sec, &stored.ptype, stored.rule.clone());
        }
        self.filtered = false;
        Ok(())
    }

    async fn save_policy(&mut self, model: &mut Model) -> Result<()> {
        self.rules.clear();
        for sec in ["p", "g"] {
            for (ptype, assertion) in model.assertions(sec) {
                for rule in &assertion.policy {
                    self.rules.push(StoredRule {
                        sec: sec.to_string(),
                        ptype: ptype.clone(),
                        rule: rule.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn add_policy(&mut self, sec: &str, ptype: &str, rule: &[String]) -> Result<bool> {
        Ok(self.insert(sec, ptype, rule))
    }

    async fn remove_policy(&mut self, sec: &str, ptype: &str, rule: &[String]) -> Result<bool> {
        match self.position(sec, ptype, rule) {
            Some(i) => {
                self.rules.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool> {
        let before = self.rules.len();
        self.rules.retain(|s| {
            !(s.sec == sec && s.ptype == ptype && rule_matches(&s.rule, field_index, field_values))
        });
        Ok(self.rules.len() != before)
    }

    fn is_filtered(&self) -> bool {
        self.filtered
    }

    fn as_filtered(&mut self) -> Option<&mut dyn FilteredAdapter> {
        Some(self)
    }

    fn as_batch(&mut self) -> Option<&mut dyn BatchAdapter> {
        Some(self)
    }

    fn as_updatable(&mut self) -> Option<&mut dyn UpdatableAdapter> {
        Some(self)
    }
}

#[async_trait]
impl FilteredAdapter for MemoryAdapter {
    async fn load_filtered_policy(&mut self, model: &mut Model, filter: &Filter) -> Result<()> {
        for stored in &self.rules {
            if filter.matches(&stored.sec, &stored.rule) {
                model.add_policy(&stored.sec, &stored.ptype, stored.rule.clone());
            }
        }
        self.filtered = !filter.is_empty();
        Ok(())
    }
}

#[async_trait]
impl BatchAdapter for MemoryAdapter {
    async fn add_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool> {
        if rules
            .iter()
            .any(|r| self.position(sec, ptype, r).is_some())
        {
            return Ok(false);
        }
        for rule in rules {
            self.insert(sec, ptype, rule);
        }
        Ok(true)
    }

    async fn remove_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<bool> {
        if rules
            .iter()
            .any(|r| self.position(sec, ptype, r).is_none())
        {
            return Ok(false);
        }
        for rule in rules {
            if let Some(i) = self.position(sec, ptype, rule) {
                self.rules.remove(i);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl UpdatableAdapter for MemoryAdapter {
    async fn update_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        old: &[String],
        new: &[String],
    ) -> Result<bool> {
        match self.position(sec, ptype, old) {
            Some(i) => {
                self.rules[i].rule = new.to_vec();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> Result<bool> {
        if old.len() != new.len()
            || old.iter().any(|r| self.position(sec, ptype, r).is_none())
        {
            return Ok(false);
        }
        for (o, n) in old.iter().zip(new) {
            self.update_policy(sec, ptype, o, n).await?;
        }
        Ok(true)
    }

    async fn update_filtered_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Vec<String>>> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.rules.len());
        for stored in std::mem::take(&mut self.rules) {
            if stored.sec == sec
                && stored.ptype == ptype
                && rule_matches(&stored.rule, field_index, field_values)
            {
                removed.push(stored.rule);
            } else {
                kept.push(stored);
            }
        }
        self.rules = kept;
        for rule in new_rules {
            self.insert(sec, ptype, rule);
        }
        Ok(removed)
    }
}
