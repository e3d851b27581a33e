//! Typed management surface over the enforcer: policy and grouping CRUD,
//! RBAC helpers and implicit role/permission expansion.
//!
//! Every mutation goes through the enforcer's internal plumbing, which
//! persists through the adapter (auto-save), notifies the watcher
//! (auto-notify) and keeps role graphs current (auto-build).

use std::collections::{HashSet, VecDeque};

use crate::enforcer::Enforcer;
use crate::errors::Result;

fn to_rule<I>(fields: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    fields.into_iter().map(Into::into).collect()
}

impl Enforcer {
    // ---------- policy reads ----------

    pub fn get_policy(&self) -> Vec<Vec<String>> {
        self.get_named_policy("p")
    }

    pub fn get_named_policy(&self, ptype: &str) -> Vec<Vec<String>> {
        self.get_model().get_policy("p", ptype)
    }

    /// Rules whose fields starting at `field_index` equal the given values;
    /// an empty string is a wildcard.
    pub fn get_filtered_policy<I>(&self, field_index: usize, field_values: I) -> Vec<Vec<String>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.get_filtered_named_policy("p", field_index, field_values)
    }

    pub fn get_filtered_named_policy<I>(
        &self,
        ptype: &str,
        field_index: usize,
        field_values: I,
    ) -> Vec<Vec<String>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.get_model()
            .get_filtered_policy("p", ptype, field_index, &to_rule(field_values))
    }

    pub fn has_policy<I>(&self, rule: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.has_named_policy("p", rule)
    }

    pub fn has_named_policy<I>(&self, ptype: &str, rule: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.get_model().has_policy("p", ptype, &to_rule(rule))
    }

    pub fn get_all_subjects(&self) -> Vec<String> {
        self.get_all_named_subjects("p")
    }

    pub fn get_all_named_subjects(&self, ptype: &str) -> Vec<String> {
        let idx = self
            .get_model()
            .get("p", ptype)
            .and_then(|a| a.field_index("sub"))
            .unwrap_or(0);
        self.get_model().get_values_for_field("p", ptype, idx)
    }

    pub fn get_all_objects(&self) -> Vec<String> {
        self.get_all_named_objects("p")
    }

    pub fn get_all_named_objects(&self, ptype: &str) -> Vec<String> {
        let idx = self
            .get_model()
            .get("p", ptype)
            .and_then(|a| a.field_index("obj"))
            .unwrap_or(1);
        self.get_model().get_values_for_field("p", ptype, idx)
    }

    pub fn get_all_actions(&self) -> Vec<String> {
        self.get_all_named_actions("p")
    }

    pub fn get_all_named_actions(&self, ptype: &str) -> Vec<String> {
        let idx = self
            .get_model()
            .get("p", ptype)
            .and_then(|a| a.field_index("act"))
            .unwrap_or(2);
        self.get_model().get_values_for_field("p", ptype, idx)
    }

    /// Role names appearing as parents in the grouping policy.
    pub fn get_all_roles(&self) -> Vec<String> {
        self.get_all_named_roles("g")
    }

    pub fn get_all_named_roles(&self, ptype: &str) -> Vec<String> {
        self.get_model().get_values_for_field("g", ptype, 1)
    }

    // ---------- policy writes ----------

    pub async fn add_policy<I>(&mut self, rule: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.add_named_policy("p", rule).await
    }

    pub async fn add_named_policy<I>(&mut self, ptype: &str, rule: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.add_policy_internal("p", ptype, to_rule(rule)).await
    }

    /// All-or-nothing batch insert: if any rule already exists the whole
    /// batch is rejected.
    pub async fn add_policies(&mut self, rules: Vec<Vec<String>>) -> Result<bool> {
        self.add_named_policies("p", rules).await
    }

    pub async fn add_named_policies(
        &mut self,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        self.add_policies_internal("p", ptype, rules).await
    }

    pub async fn remove_policy<I>(&mut self, rule: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.remove_named_policy("p", rule).await
    }

    pub async fn remove_named_policy<I>(&mut self, ptype: &str, rule: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.remove_policy_internal("p", ptype, to_rule(rule)).await
    }

    pub async fn remove_policies(&mut self, rules: Vec<Vec<String>>) -> Result<bool> {
        self.remove_named_policies("p", rules).await
    }

    pub async fn remove_named_policies(
        &mut self,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        self.remove_policies_internal("p", ptype, rules).await
    }

    pub async fn remove_filtered_policy<I>(
        &mut self,
        field_index: usize,
        field_values: I,
    ) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.remove_filtered_named_policy("p", field_index, field_values)
            .await
    }

    pub async fn remove_filtered_named_policy<I>(
        &mut self,
        ptype: &str,
        field_index: usize,
        field_values: I,
    ) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let (changed, _) = self
            .remove_filtered_policy_internal("p", ptype, field_index, to_rule(field_values))
            .await?;
        Ok(changed)
    }

    pub async fn update_policy(&mut self, old: Vec<String>, new: Vec<String>) -> Result<bool> {
        self.update_named_policy("p", old, new).await
    }

    pub async fn update_named_policy(
        &mut self,
        ptype: &str,
        old: Vec<String>,
        new: Vec<String>,
    ) -> Result<bool> {
        self.update_policy_internal("p", ptype, old, new).await
    }

    pub async fn update_policies(
        &mut self,
        old: Vec<Vec<String>>,
        new: Vec<Vec<String>>,
    ) -> Result<bool> {
        self.update_policies_internal("p", "p", old, new).await
    }

    /// Delete every rule matching the filter and insert the new batch.
    /// Returns whether anything changed plus the removed rules.
    pub async fn update_filtered_policies<I>(
        &mut self,
        new_rules: Vec<Vec<String>>,
        field_index: usize,
        field_values: I,
    ) -> Result<(bool, Vec<Vec<String>>)>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.update_filtered_policies_internal(
            "p",
            "p",
            new_rules,
            field_index,
            to_rule(field_values),
        )
        .await
    }

    // ---------- grouping reads ----------

    pub fn get_grouping_policy(&self) -> Vec<Vec<String>> {
        self.get_named_grouping_policy("g")
    }

    pub fn get_named_grouping_policy(&self, ptype: &str) -> Vec<Vec<String>> {
        self.get_model().get_policy("g", ptype)
    }

    pub fn has_grouping_policy<I>(&self, rule: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.has_named_grouping_policy("g", rule)
    }

    pub fn has_named_grouping_policy<I>(&self, ptype: &str, rule: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.get_model().has_policy("g", ptype, &to_rule(rule))
    }

    pub fn get_filtered_grouping_policy<I>(
        &self,
        field_index: usize,
        field_values: I,
    ) -> Vec<Vec<String>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.get_model()
            .get_filtered_policy("g", "g", field_index, &to_rule(field_values))
    }

    // ---------- grouping writes ----------

    pub async fn add_grouping_policy<I>(&mut self, rule: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.add_named_grouping_policy("g", rule).await
    }

    pub async fn add_named_grouping_policy<I>(&mut self, ptype: &str, rule: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.add_policy_internal("g", ptype, to_rule(rule)).await
    }

    pub async fn add_grouping_policies(&mut self, rules: Vec<Vec<String>>) -> Result<bool> {
        self.add_policies_internal("g", "g", rules).await
    }

    pub async fn remove_grouping_policy<I>(&mut self, rule: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.remove_named_grouping_policy("g", rule).await
    }

    pub async fn remove_named_grouping_policy<I>(&mut self, ptype: &str, rule: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.remove_policy_internal("g", ptype, to_rule(rule)).await
    }

    pub async fn remove_grouping_policies(&mut self, rules: Vec<Vec<String>>) -> Result<bool> {
        self.remove_policies_internal("g", "g", rules).await
    }

    pub async fn remove_filtered_grouping_policy<I>(
        &mut self,
        field_index: usize,
        field_values: I,
    ) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let (changed, _) = self
            .remove_filtered_policy_internal("g", "g", field_index, to_rule(field_values))
            .await?;
        Ok(changed)
    }

    pub async fn update_grouping_policy(
        &mut self,
        old: Vec<String>,
        new: Vec<String>,
    ) -> Result<bool> {
        self.update_policy_internal("g", "g", old, new).await
    }

    // ---------- RBAC helpers ----------

    /// Direct roles of a user, one hop in the primary role graph.
    pub fn get_roles_for_user(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        self.role_manager("g")
            .map(|rm| rm.read().get_roles(user, domain))
            .unwrap_or_default()
    }

    /// Direct members of a role.
    pub fn get_users_for_role(&self, role: &str, domain: Option<&str>) -> Vec<String> {
        self.role_manager("g")
            .map(|rm| rm.read().get_users(role, domain))
            .unwrap_or_default()
    }

    pub fn has_role_for_user(&self, user: &str, role: &str, domain: Option<&str>) -> bool {
        self.get_roles_for_user(user, domain)
            .iter()
            .any(|r| r == role)
    }

    pub async fn add_role_for_user(
        &mut self,
        user: &str,
        role: &str,
        domain: Option<&str>,
    ) -> Result<bool> {
        self.add_grouping_policy(grouping_rule(user, role, domain))
            .await
    }

    pub async fn add_roles_for_user(
        &mut self,
        user: &str,
        roles: Vec<String>,
        domain: Option<&str>,
    ) -> Result<bool> {
        let rules = roles
            .iter()
            .map(|role| grouping_rule(user, role, domain))
            .collect();
        self.add_grouping_policies(rules).await
    }

    pub async fn delete_role_for_user(
        &mut self,
        user: &str,
        role: &str,
        domain: Option<&str>,
    ) -> Result<bool> {
        self.remove_grouping_policy(grouping_rule(user, role, domain))
            .await
    }

    /// Remove every role of a user (within one domain when given).
    pub async fn delete_roles_for_user(
        &mut self,
        user: &str,
        domain: Option<&str>,
    ) -> Result<bool> {
        let filter = match domain {
            Some(d) => vec![user.to_string(), String::new(), d.to_string()],
            None => vec![user.to_string()],
        };
        self.remove_filtered_grouping_policy(0, filter).await
    }

    /// Remove the user from every grouping rule and every policy rule whose
    /// subject it is.
    pub async fn delete_user(&mut self, user: &str) -> Result<bool> {
        let removed_groupings = self
            .remove_filtered_grouping_policy(0, [user.to_string()])
            .await?;
        let removed_policies = self.remove_filtered_policy(0, [user.to_string()]).await?;
        Ok(removed_groupings || removed_policies)
    }

    /// Remove a role: its grouping links and the policies granted to it.
    pub async fn delete_role(&mut self, role: &str) -> Result<bool> {
        let removed_groupings = self
            .remove_filtered_grouping_policy(1, [role.to_string()])
            .await?;
        let removed_policies = self.remove_filtered_policy(0, [role.to_string()]).await?;
        Ok(removed_groupings || removed_policies)
    }

    /// Remove a permission from every subject holding it directly.
    pub async fn delete_permission(&mut self, permission: Vec<String>) -> Result<bool> {
        self.remove_filtered_policy(1, permission).await
    }

    pub async fn add_permission_for_user(
        &mut self,
        user: &str,
        permission: Vec<String>,
    ) -> Result<bool> {
        self.add_policy(permission_rule(user, permission)).await
    }

    pub async fn delete_permission_for_user(
        &mut self,
        user: &str,
        permission: Vec<String>,
    ) -> Result<bool> {
        self.remove_policy(permission_rule(user, permission)).await
    }

    pub async fn delete_permissions_for_user(&mut self, user: &str) -> Result<bool> {
        self.remove_filtered_policy(0, [user.to_string()]).await
    }

    /// Policies whose subject is the user (scoped to a domain when given;
    /// the domain is assumed to be the second policy field).
    pub fn get_permissions_for_user(&self, user: &str, domain: Option<&str>) -> Vec<Vec<String>> {
        let filter = match domain {
            Some(d) => vec![user.to_string(), d.to_string()],
            None => vec![user.to_string()],
        };
        self.get_filtered_policy(0, filter)
    }

    pub fn has_permission_for_user(&self, user: &str, permission: Vec<String>) -> bool {
        self.has_policy(permission_rule(user, permission))
    }

    // ---------- implicit expansion ----------

    /// Every role reachable from the user through any role graph, in
    /// first-visit breadth-first order.
    pub fn get_implicit_roles_for_user(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        let managers: Vec<_> = self
            .get_model()
            .assertions("g")
            .iter()
            .filter_map(|(_, a)| a.rm.clone())
            .collect();

        let mut found = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(user.to_string());
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(user.to_string());

        while let Some(name) = queue.pop_front() {
            for rm in &managers {
                for role in rm.read().get_roles(&name, domain) {
                    if visited.insert(role.clone()) {
                        found.push(role.clone());
                        queue.push_back(role);
                    }
                }
            }
        }
        found
    }

    /// Permissions held by the user directly or through any implicit role.
    pub fn get_implicit_permissions_for_user(
        &self,
        user: &str,
        domain: Option<&str>,
    ) -> Vec<Vec<String>> {
        let mut subjects = vec![user.to_string()];
        subjects.extend(self.get_implicit_roles_for_user(user, domain));

        let mut permissions = Vec::new();
        for subject in &subjects {
            permissions.extend(self.get_permissions_for_user(subject, domain));
        }
        permissions
    }

    /// Users (subjects that are not themselves roles) granted the
    /// permission directly or through the role graphs.
    pub fn get_implicit_users_for_permission(&self, permission: Vec<String>) -> Result<Vec<String>> {
        let grouping = self.get_grouping_policy();
        let roles: HashSet<&String> = grouping.iter().filter_map(|r| r.get(1)).collect();

        let mut candidates: Vec<String> = grouping
            .iter()
            .filter_map(|r| r.first())
            .chain(self.get_all_subjects().iter())
            .cloned()
            .collect();
        candidates.sort();
        candidates.dedup();

        let mut users = Vec::new();
        for candidate in candidates {
            if roles.contains(&candidate) {
                continue;
            }
            let mut request = vec![candidate.clone()];
            request.extend(permission.iter().cloned());
            if self.enforce(request)? {
                users.push(candidate);
            }
        }
        Ok(users)
    }

    // ---------- domain helpers ----------

    pub fn get_users_for_role_in_domain(&self, role: &str, domain: &str) -> Vec<String> {
        self.get_users_for_role(role, Some(domain))
    }

    pub fn get_roles_for_user_in_domain(&self, user: &str, domain: &str) -> Vec<String> {
        self.get_roles_for_user(user, Some(domain))
    }

    pub async fn add_role_for_user_in_domain(
        &mut self,
        user: &str,
        role: &str,
        domain: &str,
    ) -> Result<bool> {
        self.add_role_for_user(user, role, Some(domain)).await
    }

    pub async fn delete_role_for_user_in_domain(
        &mut self,
        user: &str,
        role: &str,
        domain: &str,
    ) -> Result<bool> {
        self.delete_role_for_user(user, role, Some(domain)).await
    }
}

fn grouping_rule(user: &str, role: &str, domain: Option<&str>) -> Vec<String> {
    match domain {
        Some(d) => vec![user.to_string(), role.to_string(), d.to_string()],
        None => vec![user.to_string(), role.to_string()],
    }
}

fn permission_rule(user: &str, permission: Vec<String>) -> Vec<String> {
    let mut rule = vec![user.to_string()];
    rule.extend(permission);
    rule
}
