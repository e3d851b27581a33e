//! Shared-access wrapper around an enforcer.
//!
//! Reads (enforcement, listings) take the shared side of a `tokio` RwLock;
//! mutations take the exclusive side. The lock is write-preferring, so a
//! steady stream of readers cannot starve a writer. Watcher notifications
//! are emitted after the exclusive guard is dropped: a watcher callback
//! that re-loads policy needs that guard itself, and notifying under the
//! lock would deadlock.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::adapter::Filter;
use crate::enforcer::Enforcer;
use crate::errors::Result;
use crate::watcher::Watcher;

#[derive(Clone)]
pub struct LockedEnforcer {
    inner: Arc<RwLock<Enforcer>>,
    watcher: Arc<Mutex<Option<Box<dyn Watcher>>>>,
    reload: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl LockedEnforcer {
    pub fn new(enforcer: Enforcer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(enforcer)),
            watcher: Arc::new(Mutex::new(None)),
            reload: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Shared guard for read operations not wrapped here.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, Enforcer> {
        self.inner.read().await
    }

    /// Exclusive guard for write operations not wrapped here. Note that
    /// watcher notification is the caller's concern on this path.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, Enforcer> {
        self.inner.write().await
    }

    /// Attach a watcher. The inner enforcer's own notification is disabled;
    /// the wrapper notifies after releasing the exclusive lock instead.
    pub async fn set_watcher(&self, watcher: Box<dyn Watcher>) {
        self.inner.write().await.enable_auto_notify_watcher(false);
        *self.watcher.lock().await = Some(watcher);
    }

    // ---------- reads ----------

    pub async fn enforce<I, V>(&self, rvals: I) -> Result<bool>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.inner.read().await.enforce(rvals)
    }

    pub async fn enforce_ex<I, V>(&self, rvals: I) -> Result<(bool, Vec<String>)>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.inner.read().await.enforce_ex(rvals)
    }

    pub async fn get_policy(&self) -> Vec<Vec<String>> {
        self.inner.read().await.get_policy()
    }

    pub async fn has_policy<I>(&self, rule: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.inner.read().await.has_policy(rule)
    }

    pub async fn get_grouping_policy(&self) -> Vec<Vec<String>> {
        self.inner.read().await.get_grouping_policy()
    }

    pub async fn get_roles_for_user(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        self.inner.read().await.get_roles_for_user(user, domain)
    }

    // ---------- writes ----------

    pub async fn load_policy(&self) -> Result<()> {
        self.inner.write().await.load_policy().await
    }

    pub async fn load_filtered_policy(&self, filter: &Filter) -> Result<()> {
        self.inner.write().await.load_filtered_policy(filter).await
    }

    pub async fn save_policy(&self) -> Result<()> {
        {
            self.inner.write().await.save_policy().await?;
        }
        let mut watcher = self.watcher.lock().await;
        if let Some(w) = watcher.as_mut() {
            if let Err(e) = w.update_for_save_policy().await {
                tracing::warn!(error = %e, "watcher notification failed");
            }
        }
        Ok(())
    }

    pub async fn add_policy(&self, rule: Vec<String>) -> Result<bool> {
        let changed = {
            self.inner.write().await.add_policy(rule.clone()).await?
        };
        if changed {
            self.notify_add("p", "p", &rule).await;
        }
        Ok(changed)
    }

    pub async fn remove_policy(&self, rule: Vec<String>) -> Result<bool> {
        let changed = {
            self.inner.write().await.remove_policy(rule.clone()).await?
        };
        if changed {
            self.notify_remove("p", "p", &rule).await;
        }
        Ok(changed)
    }

    pub async fn add_grouping_policy(&self, rule: Vec<String>) -> Result<bool> {
        let changed = {
            self.inner
                .write()
                .await
                .add_grouping_policy(rule.clone())
                .await?
        };
        if changed {
            self.notify_add("g", "g", &rule).await;
        }
        Ok(changed)
    }

    pub async fn remove_grouping_policy(&self, rule: Vec<String>) -> Result<bool> {
        let changed = {
            self.inner
                .write()
                .await
                .remove_grouping_policy(rule.clone())
                .await?
        };
        if changed {
            self.notify_remove("g", "g", &rule).await;
        }
        Ok(changed)
    }

    pub async fn add_role_for_user(
        &self,
        user: &str,
        role: &str,
        domain: Option<&str>,
    ) -> Result<bool> {
        let rule = match domain {
            Some(d) => vec![user.to_string(), role.to_string(), d.to_string()],
            None => vec![user.to_string(), role.to_string()],
        };
        self.add_grouping_policy(rule).await
    }

    pub async fn clear_policy(&self) -> Result<()> {
        self.inner.write().await.clear_policy().await
    }

    // ---------- background reload ----------

    /// Start a background task reloading the policy on an interval.
    /// Returns false if a reload task is already running.
    pub fn start_auto_load_policy(&self, every: Duration) -> bool {
        let mut slot = self.reload.lock();
        if slot.is_some() {
            return false;
        }
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                if let Err(e) = inner.write().await.load_policy().await {
                    tracing::warn!(error = %e, "background policy reload failed");
                }
            }
        });
        *slot = Some(handle);
        true
    }

    /// Stop the background reload task. Returns false if none was running.
    pub fn stop_auto_load_policy(&self) -> bool {
        match self.reload.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_auto_loading(&self) -> bool {
        self.reload.lock().is_some()
    }

    async fn notify_add(&self, sec: &str, ptype: &str, rule: &[String]) {
        let mut watcher = self.watcher.lock().await;
        if let Some(w) = watcher.as_mut() {
            if let Err(e) = w.update_for_add_policy(sec, ptype, rule).await {
                tracing::warn!(error = %e, "watcher notification failed");
            }
        }
    }

    async fn notify_remove(&self, sec: &str, ptype: &str, rule: &[String]) {
        let mut watcher = self.watcher.lock().await;
        if let Some(w) = watcher.as_mut() {
            if let Err(e) = w.update_for_remove_policy(sec, ptype, rule).await {
                tracing::warn!(error = %e, "watcher notification failed");
            }
        }
    }
}
