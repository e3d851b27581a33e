//! External change-notification hooks.
//!
//! A watcher propagates policy changes to other enforcer instances. The
//! enforcer calls the fine-grained hook matching the mutation; the default
//! implementations collapse everything onto `update`. Watcher failures are
//! logged and never abort the mutation that triggered them.

use async_trait::async_trait;

use crate::errors::Result;

/// Callback invoked when a remote change notification arrives.
pub type UpdateCallback = Box<dyn FnMut() + Send>;

#[async_trait]
pub trait Watcher: Send + Sync {
    /// Register the callback to run when another instance changes policy.
    fn set_update_callback(&mut self, callback: UpdateCallback);

    /// Notify other instances that the policy changed in an unspecified way.
    async fn update(&mut self) -> Result<()>;

    async fn update_for_add_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _rule: &[String],
    ) -> Result<()> {
        self.update().await
    }

    async fn update_for_remove_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _rule: &[String],
    ) -> Result<()> {
        self.update().await
    }

    async fn update_for_remove_filtered_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _field_values: &[String],
    ) -> Result<()> {
        self.update().await
    }

    async fn update_for_save_policy(&mut self) -> Result<()> {
        self.update().await
    }

    async fn update_for_add_policies(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _rules: &[Vec<String>],
    ) -> Result<()> {
        self.update().await
    }

    async fn update_for_remove_policies(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _rules: &[Vec<String>],
    ) -> Result<()> {
        self.update().await
    }
}
