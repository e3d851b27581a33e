//! The core enforcer: orchestrates model compilation, request evaluation
//! and policy mutation.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::adapter::{Adapter, FileAdapter, Filter};
use crate::dispatcher::Dispatcher;
use crate::effect::{EffectKind, EffectStream, Verdict};
use crate::errors::{PortcullisError, Result};
use crate::expr::{self, EvalValue, Expr, MatcherFn};
use crate::functions::{builtin_functions, role_predicate};
use crate::model::{escape_assertion, Model, PolicyOp};
use crate::rbac::{DefaultRoleManager, MatchingFn, SharedRoleManager, DEFAULT_MAX_HIERARCHY_LEVEL};
use crate::watcher::Watcher;

static EVAL_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\beval\(([^),]*)\)").unwrap());

pub struct Enforcer {
    model: Model,
    adapter: Box<dyn Adapter>,
    watcher: Option<Box<dyn Watcher>>,
    dispatcher: Option<Box<dyn Dispatcher>>,
    fns: HashMap<String, MatcherFn>,
    effect: EffectKind,
    enabled: bool,
    auto_save: bool,
    auto_build_role_links: bool,
    auto_notify_watcher: bool,
    is_filtered: bool,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("effect", &self.effect)
            .field("enabled", &self.enabled)
            .field("auto_save", &self.auto_save)
            .field("auto_build_role_links", &self.auto_build_role_links)
            .field("auto_notify_watcher", &self.auto_notify_watcher)
            .field("is_filtered", &self.is_filtered)
            .finish_non_exhaustive()
    }
}

impl Enforcer {
    /// Construct from a model file and a policy file.
    pub async fn new(
        model_path: impl AsRef<std::path::Path>,
        policy_path: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let model = Model::from_file(model_path)?;
        Self::with_model(model, Box::new(FileAdapter::new(policy_path))).await
    }

    /// Construct from a model file and an adapter.
    pub async fn with_adapter(
        model_path: impl AsRef<std::path::Path>,
        adapter: Box<dyn Adapter>,
    ) -> Result<Self> {
        let model = Model::from_file(model_path)?;
        Self::with_model(model, adapter).await
    }

    /// Construct from an already-compiled model and an adapter.
    pub async fn with_model(mut model: Model, adapter: Box<dyn Adapter>) -> Result<Self> {
        model.require("r", "r")?;
        model.require("p", "p")?;
        model.require("m", "m")?;
        let effect = EffectKind::parse(&model.require("e", "e")?.value)?;

        let keys: Vec<String> = model
            .assertions("g")
            .iter()
            .map(|(k, _)| (*k).clone())
            .collect();
        for key in keys {
            model.set_role_manager(&key, DefaultRoleManager::shared(DEFAULT_MAX_HIERARCHY_LEVEL));
        }

        let mut enforcer = Self {
            model,
            adapter,
            watcher: None,
            dispatcher: None,
            fns: builtin_functions(),
            effect,
            enabled: true,
            auto_save: true,
            auto_build_role_links: true,
            auto_notify_watcher: true,
            is_filtered: false,
        };
        if !enforcer.adapter.is_filtered() {
            enforcer.load_policy().await?;
        }
        Ok(enforcer)
    }

    // ---------- configuration ----------

    pub fn get_model(&self) -> &Model {
        &self.model
    }

    pub fn get_mut_model(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn role_manager(&self, ptype: &str) -> Option<SharedRoleManager> {
        self.model.get("g", ptype).and_then(|a| a.rm.clone())
    }

    /// Register a custom matcher function.
    pub fn add_function(&mut self, name: &str, f: MatcherFn) {
        self.fns.insert(name.to_string(), f);
    }

    /// Enable pattern matching for role names of one grouping policy and
    /// rebuild its links.
    pub fn add_named_matching_fn(&mut self, ptype: &str, f: MatchingFn) -> Result<()> {
        let rm = self
            .role_manager(ptype)
            .ok_or_else(|| PortcullisError::Rbac(format!("no role manager for `{ptype}`")))?;
        rm.write().add_matching_fn(f);
        self.model.build_role_links()
    }

    /// Enable pattern matching for domain names of one grouping policy and
    /// rebuild its links.
    pub fn add_named_domain_matching_fn(&mut self, ptype: &str, f: MatchingFn) -> Result<()> {
        let rm = self
            .role_manager(ptype)
            .ok_or_else(|| PortcullisError::Rbac(format!("no role manager for `{ptype}`")))?;
        rm.write().add_domain_matching_fn(f);
        self.model.build_role_links()
    }

    pub fn set_watcher(&mut self, watcher: Box<dyn Watcher>) {
        self.watcher = Some(watcher);
    }

    pub fn set_dispatcher(&mut self, dispatcher: Box<dyn Dispatcher>) {
        self.dispatcher = Some(dispatcher);
    }

    /// Globally disable or re-enable enforcement. Disabled enforcement
    /// fails open: every request is allowed.
    pub fn enable_enforce(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enable_auto_save(&mut self, auto_save: bool) {
        self.auto_save = auto_save;
    }

    pub fn enable_auto_build_role_links(&mut self, auto_build: bool) {
        self.auto_build_role_links = auto_build;
    }

    pub fn enable_auto_notify_watcher(&mut self, auto_notify: bool) {
        self.auto_notify_watcher = auto_notify;
    }

    pub fn is_filtered(&self) -> bool {
        self.is_filtered
    }

    // ---------- fast policy backend ----------

    /// Index a policy on a fixed column subset for keyed iteration.
    pub fn enable_policy_index(&mut self, ptype: &str, columns: Vec<usize>) -> Result<()> {
        let a = self
            .model
            .get_mut("p", ptype)
            .ok_or_else(|| PortcullisError::Policy(format!("no policy type `{ptype}`")))?;
        a.enable_index(columns);
        Ok(())
    }

    /// Scope evaluation to rules whose key-tuple equals `keys`.
    pub fn apply_policy_filter(&mut self, ptype: &str, keys: &[String]) -> Result<()> {
        let a = self
            .model
            .get_mut("p", ptype)
            .ok_or_else(|| PortcullisError::Policy(format!("no policy type `{ptype}`")))?;
        a.apply_filter(keys)
    }

    /// Restore full-policy evaluation.
    pub fn clear_policy_filter(&mut self, ptype: &str) -> Result<()> {
        let a = self
            .model
            .get_mut("p", ptype)
            .ok_or_else(|| PortcullisError::Policy(format!("no policy type `{ptype}`")))?;
        a.clear_filter();
        Ok(())
    }

    // ---------- loading and saving ----------

    /// Reload the full policy from the adapter, rebuilding sort order and
    /// role graphs.
    pub async fn load_policy(&mut self) -> Result<()> {
        self.model.clear_policy();
        self.adapter.load_policy(&mut self.model).await?;
        self.is_filtered = self.adapter.is_filtered();
        self.post_load()
    }

    /// Load only the rules matching the filter. Fails with
    /// `FilteredUnsupported` when the adapter cannot.
    pub async fn load_filtered_policy(&mut self, filter: &Filter) -> Result<()> {
        self.model.clear_policy();
        let adapter = self
            .adapter
            .as_filtered()
            .ok_or(PortcullisError::FilteredUnsupported)?;
        adapter.load_filtered_policy(&mut self.model, filter).await?;
        self.is_filtered = self.adapter.is_filtered();
        self.post_load()
    }

    fn post_load(&mut self) -> Result<()> {
        self.model.sort_policies_by_priority();
        self.model.sort_policies_by_subject_hierarchy();
        if self.auto_build_role_links {
            self.model.build_role_links()?;
        }
        Ok(())
    }

    /// Persist the current policy through the adapter.
    pub async fn save_policy(&mut self) -> Result<()> {
        if self.is_filtered {
            return Err(PortcullisError::FilteredSave);
        }
        self.adapter.save_policy(&mut self.model).await?;
        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                if let Err(e) = w.update_for_save_policy().await {
                    tracing::warn!(error = %e, "watcher notification failed");
                }
            }
        }
        Ok(())
    }

    /// Rebuild every role graph from the current grouping rules.
    pub fn build_role_links(&mut self) -> Result<()> {
        self.model.build_role_links()
    }

    // ---------- evaluation ----------

    /// Decide a request. Values may be plain strings or JSON attribute
    /// objects for ABAC matchers.
    pub fn enforce<I, V>(&self, rvals: I) -> Result<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let rvals: Vec<Value> = rvals.into_iter().map(Into::into).collect();
        let (decision, _) = self.enforce_internal(&rvals)?;
        Ok(decision)
    }

    /// Decide a request and return the rule that produced the decisive
    /// verdict (empty when no single rule was decisive).
    pub fn enforce_ex<I, V>(&self, rvals: I) -> Result<(bool, Vec<String>)>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let rvals: Vec<Value> = rvals.into_iter().map(Into::into).collect();
        let (decision, explain) = self.enforce_internal(&rvals)?;
        Ok((decision, explain.unwrap_or_default()))
    }

    fn enforce_internal(&self, rvals: &[Value]) -> Result<(bool, Option<Vec<String>>)> {
        if !self.enabled {
            return Ok((true, None));
        }

        let r_assertion = self.model.require("r", "r")?;
        let p_assertion = self.model.require("p", "p")?;
        let m_assertion = self.model.require("m", "m")?;

        if rvals.len() != r_assertion.tokens.len() {
            return Err(PortcullisError::InvalidRequestSize {
                expected: r_assertion.tokens.len(),
                actual: rvals.len(),
            });
        }

        let mut bindings: HashMap<String, Value> = HashMap::new();
        for (token, value) in r_assertion.tokens.iter().zip(rvals) {
            bindings.insert(token.clone(), value.clone());
        }

        let mut fns = self.fns.clone();
        for (key, assertion) in self.model.assertions("g") {
            if let Some(rm) = &assertion.rm {
                fns.insert(key.clone(), role_predicate(rm.clone()));
            }
        }

        let matcher_text = &m_assertion.value;
        let has_eval = EVAL_CALL.is_match(matcher_text);
        let compiled = m_assertion.matcher.as_ref();
        let mut eval_cache: HashMap<String, Expr> = HashMap::new();

        let eft_index = p_assertion.field_index("eft");
        let mut stream = EffectStream::new(self.effect);
        let mut explain: Option<Vec<String>> = None;

        let indices = p_assertion.scoped_indices();
        if indices.is_empty() {
            // Matcher-only models still get one evaluation with every policy
            // token bound to the empty string.
            if !has_eval {
                for token in &p_assertion.tokens {
                    bindings.insert(token.clone(), Value::String(String::new()));
                }
                let expr = compiled.ok_or_else(|| {
                    PortcullisError::Expression("matcher was not compiled".into())
                })?;
                let result = expr::evaluate(expr, &bindings, &fns)?;
                let (verdict, score) = classify(&result, None)?;
                stream.push(0, verdict, score);
            }
        } else {
            for &i in &indices {
                let rule = &p_assertion.policy[i];
                if rule.len() != p_assertion.tokens.len() {
                    return Err(PortcullisError::InvalidPolicySize {
                        ptype: "p".to_string(),
                        expected: p_assertion.tokens.len(),
                        actual: rule.len(),
                    });
                }
                for (token, field) in p_assertion.tokens.iter().zip(rule) {
                    bindings.insert(token.clone(), Value::String(field.clone()));
                }

                let expr = if has_eval {
                    let text = splice_eval(matcher_text, &p_assertion.tokens, rule)?;
                    if !eval_cache.contains_key(&text) {
                        let parsed = expr::parse(&text)?;
                        eval_cache.insert(text.clone(), parsed);
                    }
                    &eval_cache[&text]
                } else {
                    compiled.ok_or_else(|| {
                        PortcullisError::Expression("matcher was not compiled".into())
                    })?
                };

                let result = expr::evaluate(expr, &bindings, &fns)?;
                let eft = eft_index.and_then(|e| rule.get(e).map(String::as_str));
                let (verdict, score) = classify(&result, eft)?;
                if stream.push(i, verdict, score) {
                    break;
                }
            }
        }

        let (decision, decisive) = stream.finish();
        if let Some(i) = decisive {
            if let Some(rule) = p_assertion.policy.get(i) {
                explain = Some(rule.clone());
            }
        }

        tracing::debug!(request = ?rvals, decision, "enforced request");
        Ok((decision, explain))
    }

    // ---------- mutation plumbing shared with the management surface ----------

    pub(crate) async fn add_policy_internal(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> Result<bool> {
        self.check_arity(sec, ptype, &rule)?;

        if let Some(d) = self.dispatcher.as_mut() {
            d.add_policies(sec, ptype, std::slice::from_ref(&rule), self.auto_save)
                .await?;
            return Ok(true);
        }

        if self.model.has_policy(sec, ptype, &rule) {
            return Ok(false);
        }
        self.model.add_policy(sec, ptype, rule.clone());

        if self.auto_save {
            match self.adapter.add_policy(sec, ptype, &rule).await {
                Ok(_) | Err(PortcullisError::AdapterUnsupported(_)) => {}
                Err(e) => {
                    self.model.remove_policy(sec, ptype, &rule);
                    return Err(e);
                }
            }
        }

        self.after_mutation(sec, ptype, PolicyOp::Add, std::slice::from_ref(&rule))?;

        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                if let Err(e) = w.update_for_add_policy(sec, ptype, &rule).await {
                    tracing::warn!(error = %e, "watcher notification failed");
                }
            }
        }
        Ok(true)
    }

    pub(crate) async fn add_policies_internal(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        for rule in &rules {
            self.check_arity(sec, ptype, rule)?;
        }

        if let Some(d) = self.dispatcher.as_mut() {
            d.add_policies(sec, ptype, &rules, self.auto_save).await?;
            return Ok(true);
        }

        if !self.model.add_policies(sec, ptype, &rules) {
            return Ok(false);
        }

        if self.auto_save {
            match self.persist_add(sec, ptype, &rules).await {
                Ok(()) | Err(PortcullisError::AdapterUnsupported(_)) => {}
                Err(e) => {
                    self.model.remove_policies(sec, ptype, &rules);
                    return Err(e);
                }
            }
        }

        self.after_mutation(sec, ptype, PolicyOp::Add, &rules)?;

        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                if let Err(e) = w.update_for_add_policies(sec, ptype, &rules).await {
                    tracing::warn!(error = %e, "watcher notification failed");
                }
            }
        }
        Ok(true)
    }

    pub(crate) async fn remove_policy_internal(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> Result<bool> {
        if let Some(d) = self.dispatcher.as_mut() {
            d.remove_policies(sec, ptype, std::slice::from_ref(&rule), self.auto_save)
                .await?;
            return Ok(true);
        }

        if !self.model.remove_policy(sec, ptype, &rule) {
            return Ok(false);
        }

        if self.auto_save {
            match self.adapter.remove_policy(sec, ptype, &rule).await {
                Ok(_) | Err(PortcullisError::AdapterUnsupported(_)) => {}
                Err(e) => {
                    self.model.add_policy(sec, ptype, rule.clone());
                    return Err(e);
                }
            }
        }

        self.after_mutation(sec, ptype, PolicyOp::Remove, std::slice::from_ref(&rule))?;

        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                if let Err(e) = w.update_for_remove_policy(sec, ptype, &rule).await {
                    tracing::warn!(error = %e, "watcher notification failed");
                }
            }
        }
        Ok(true)
    }

    pub(crate) async fn remove_policies_internal(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        if let Some(d) = self.dispatcher.as_mut() {
            d.remove_policies(sec, ptype, &rules, self.auto_save).await?;
            return Ok(true);
        }

        if !self.model.remove_policies(sec, ptype, &rules) {
            return Ok(false);
        }

        if self.auto_save {
            match self.persist_remove(sec, ptype, &rules).await {
                Ok(()) | Err(PortcullisError::AdapterUnsupported(_)) => {}
                Err(e) => {
                    self.model.add_policies(sec, ptype, &rules);
                    return Err(e);
                }
            }
        }

        self.after_mutation(sec, ptype, PolicyOp::Remove, &rules)?;

        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                if let Err(e) = w.update_for_remove_policies(sec, ptype, &rules).await {
                    tracing::warn!(error = %e, "watcher notification failed");
                }
            }
        }
        Ok(true)
    }

    pub(crate) async fn remove_filtered_policy_internal(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> Result<(bool, Vec<Vec<String>>)> {
        if let Some(d) = self.dispatcher.as_mut() {
            d.remove_filtered_policy(sec, ptype, field_index, &field_values, self.auto_save)
                .await?;
            return Ok((true, Vec::new()));
        }

        let (changed, removed) =
            self.model
                .remove_filtered_policy(sec, ptype, field_index, &field_values);
        if !changed {
            return Ok((false, removed));
        }

        if self.auto_save {
            match self
                .adapter
                .remove_filtered_policy(sec, ptype, field_index, &field_values)
                .await
            {
                Ok(_) | Err(PortcullisError::AdapterUnsupported(_)) => {}
                Err(e) => {
                    self.model.add_policies(sec, ptype, &removed);
                    return Err(e);
                }
            }
        }

        self.after_mutation(sec, ptype, PolicyOp::Remove, &removed)?;

        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                if let Err(e) = w
                    .update_for_remove_filtered_policy(sec, ptype, field_index, &field_values)
                    .await
                {
                    tracing::warn!(error = %e, "watcher notification failed");
                }
            }
        }
        Ok((true, removed))
    }

    pub(crate) async fn update_policy_internal(
        &mut self,
        sec: &str,
        ptype: &str,
        old: Vec<String>,
        new: Vec<String>,
    ) -> Result<bool> {
        self.check_arity(sec, ptype, &new)?;

        if let Some(d) = self.dispatcher.as_mut() {
            d.update_policy(sec, ptype, &old, &new, self.auto_save)
                .await?;
            return Ok(true);
        }

        if !self.model.update_policy(sec, ptype, &old, new.clone()) {
            return Ok(false);
        }

        if self.auto_save {
            // prefer the in-place capability, fall back to remove + add
            let in_place = match self.adapter.as_updatable() {
                Some(updatable) => {
                    Some(updatable.update_policy(sec, ptype, &old, &new).await.map(|_| ()))
                }
                None => None,
            };
            let outcome = match in_place {
                Some(result) => result,
                None => match self.adapter.remove_policy(sec, ptype, &old).await {
                    Ok(_) => self.adapter.add_policy(sec, ptype, &new).await.map(|_| ()),
                    Err(e) => Err(e),
                },
            };
            match outcome {
                Ok(()) | Err(PortcullisError::AdapterUnsupported(_)) => {}
                Err(e) => {
                    self.model.update_policy(sec, ptype, &new, old.clone());
                    return Err(e);
                }
            }
        }

        if sec == "g" && self.auto_build_role_links {
            let result = self
                .model
                .build_incremental_role_links(PolicyOp::Remove, ptype, std::slice::from_ref(&old))
                .and_then(|_| {
                    self.model.build_incremental_role_links(
                        PolicyOp::Add,
                        ptype,
                        std::slice::from_ref(&new),
                    )
                });
            if let Err(e) = result {
                self.model.build_role_links()?;
                return Err(e);
            }
        }
        self.model.sort_policies_by_subject_hierarchy();

        if self.auto_notify_watcher {
            if let Some(w) = self.watcher.as_mut() {
                if let Err(e) = w.update().await {
                    tracing::warn!(error = %e, "watcher notification failed");
                }
            }
        }
        Ok(true)
    }

    pub(crate) async fn update_policies_internal(
        &mut self,
        sec: &str,
        ptype: &str,
        old: Vec<Vec<String>>,
        new: Vec<Vec<String>>,
    ) -> Result<bool> {
        if old.len() != new.len() {
            return Ok(false);
        }
        let mut updated = Vec::new();
        for (o, n) in old.iter().zip(&new) {
            if self
                .update_policy_internal(sec, ptype, o.clone(), n.clone())
                .await?
            {
                updated.push((o.clone(), n.clone()));
            }
        }
        Ok(!updated.is_empty())
    }

    pub(crate) async fn update_filtered_policies_internal(
        &mut self,
        sec: &str,
        ptype: &str,
        new_rules: Vec<Vec<String>>,
        field_index: usize,
        field_values: Vec<String>,
    ) -> Result<(bool, Vec<Vec<String>>)> {
        for rule in &new_rules {
            self.check_arity(sec, ptype, rule)?;
        }

        let (changed, removed) = self
            .remove_filtered_policy_internal(sec, ptype, field_index, field_values)
            .await?;
        let added = self.add_policies_internal(sec, ptype, new_rules).await?;
        Ok((changed || added, removed))
    }

    /// Drop every policy rule, locally or through the dispatcher.
    pub async fn clear_policy(&mut self) -> Result<()> {
        if let Some(d) = self.dispatcher.as_mut() {
            d.clear_policy(self.auto_save).await?;
            return Ok(());
        }
        self.model.clear_policy();
        if self.auto_build_role_links {
            self.model.build_role_links()?;
        }
        Ok(())
    }

    async fn persist_add(&mut self, sec: &str, ptype: &str, rules: &[Vec<String>]) -> Result<()> {
        let batched = match self.adapter.as_batch() {
            Some(batch) => Some(batch.add_policies(sec, ptype, rules).await.map(|_| ())),
            None => None,
        };
        match batched {
            Some(result) => result,
            None => {
                for rule in rules {
                    self.adapter.add_policy(sec, ptype, rule).await?;
                }
                Ok(())
            }
        }
    }

    async fn persist_remove(&mut self, sec: &str, ptype: &str, rules: &[Vec<String>]) -> Result<()> {
        let batched = match self.adapter.as_batch() {
            Some(batch) => Some(batch.remove_policies(sec, ptype, rules).await.map(|_| ())),
            None => None,
        };
        match batched {
            Some(result) => result,
            None => {
                for rule in rules {
                    self.adapter.remove_policy(sec, ptype, rule).await?;
                }
                Ok(())
            }
        }
    }

    fn check_arity(&self, sec: &str, ptype: &str, rule: &[String]) -> Result<()> {
        let assertion = self.model.require(sec, ptype)?;
        if rule.len() != assertion.tokens.len() {
            return Err(PortcullisError::InvalidPolicySize {
                ptype: ptype.to_string(),
                expected: assertion.tokens.len(),
                actual: rule.len(),
            });
        }
        Ok(())
    }

    /// Post-mutation bookkeeping: incremental role links for grouping
    /// changes (with a full rebuild before surfacing a failure) and
    /// re-sorting for subject-hierarchy models.
    fn after_mutation(
        &mut self,
        sec: &str,
        ptype: &str,
        op: PolicyOp,
        rules: &[Vec<String>],
    ) -> Result<()> {
        if sec == "g" && self.auto_build_role_links {
            if let Err(e) = self.model.build_incremental_role_links(op, ptype, rules) {
                self.model.build_role_links()?;
                return Err(e);
            }
            self.model.sort_policies_by_subject_hierarchy();
        }
        Ok(())
    }
}

/// Classify one matcher result into a verdict plus numeric score.
fn classify(result: &EvalValue, eft: Option<&str>) -> Result<(Verdict, f64)> {
    let score = match result {
        EvalValue::Bool(true) => 1.0,
        EvalValue::Bool(false) => 0.0,
        EvalValue::Num(n) => *n,
        other => {
            return Err(PortcullisError::MatcherResultType(
                other.type_name().to_string(),
            ))
        }
    };
    if score == 0.0 {
        return Ok((Verdict::Indeterminate, 0.0));
    }
    let verdict = match eft {
        None => Verdict::Allow,
        Some("allow") => Verdict::Allow,
        Some("deny") => Verdict::Deny,
        Some(_) => Verdict::Indeterminate,
    };
    Ok((verdict, score))
}

/// Replace each `eval(name)` with the parenthesized, escaped value of the
/// named policy field from the current rule.
fn splice_eval(matcher: &str, tokens: &[String], rule: &[String]) -> Result<String> {
    let mut text = matcher.to_string();
    for cap in EVAL_CALL.captures_iter(matcher) {
        let name = cap[1].trim();
        let idx = tokens
            .iter()
            .position(|t| t == name)
            .ok_or_else(|| PortcullisError::MatcherEval(name.to_string()))?;
        let replacement = format!("({})", escape_assertion(&rule[idx]));
        text = text.replace(&cap[0], &replacement);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let (v, s) = classify(&EvalValue::Bool(true), None).unwrap();
        assert_eq!((v, s), (Verdict::Allow, 1.0));

        let (v, _) = classify(&EvalValue::Bool(true), Some("deny")).unwrap();
        assert_eq!(v, Verdict::Deny);

        let (v, _) = classify(&EvalValue::Bool(true), Some("maybe")).unwrap();
        assert_eq!(v, Verdict::Indeterminate);

        let (v, s) = classify(&EvalValue::Bool(false), Some("deny")).unwrap();
        assert_eq!((v, s), (Verdict::Indeterminate, 0.0));

        let (v, s) = classify(&EvalValue::Num(2.0), None).unwrap();
        assert_eq!((v, s), (Verdict::Allow, 2.0));

        assert!(matches!(
            classify(&EvalValue::Str("x".into()), None),
            Err(PortcullisError::MatcherResultType(_))
        ));
    }

    #[test]
    fn test_splice_eval() {
        let tokens = vec!["p_sub_rule".to_string(), "p_obj".to_string()];
        let rule = vec!["r.sub == \"alice\"".to_string(), "data1".to_string()];
        let out = splice_eval("eval(p_sub_rule) && r_obj == p_obj", &tokens, &rule).unwrap();
        assert_eq!(out, "(r_sub == \"alice\") && r_obj == p_obj");
    }

    #[test]
    fn test_splice_eval_unknown_field() {
        let tokens = vec!["p_sub".to_string()];
        let rule = vec!["alice".to_string()];
        let err = splice_eval("eval(p_nope)", &tokens, &rule).unwrap_err();
        assert!(matches!(err, PortcullisError::MatcherEval(ref n) if n == "p_nope"));
    }
}
