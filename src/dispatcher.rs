//! Multi-node policy coordination.
//!
//! A dispatcher fans a mutation out to every node of a cluster, typically
//! through a consensus log. When one is attached, the enforcer forwards
//! mutations to it instead of touching the local model directly; the
//! dispatcher is then responsible for applying the change everywhere,
//! including locally. The `should_persist` flag tells the receiving node
//! whether its own adapter should be invoked.

use async_trait::async_trait;

use crate::errors::Result;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn add_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
        should_persist: bool,
    ) -> Result<()>;

    async fn remove_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
        should_persist: bool,
    ) -> Result<()>;

    async fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
        should_persist: bool,
    ) -> Result<()>;

    async fn clear_policy(&mut self, should_persist: bool) -> Result<()>;

    async fn update_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        old: &[String],
        new: &[String],
        should_persist: bool,
    ) -> Result<()>;
}
