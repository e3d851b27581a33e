//! Read-only adapter over an in-memory policy text.

use async_trait::async_trait;

use crate::adapter::{load_policy_line, Adapter};
use crate::errors::{PortcullisError, Result};
use crate::model::Model;

/// Loads policy rules from a fixed text snapshot. There is no backing
/// store, so saving and mutating report `AdapterUnsupported`.
#[derive(Debug, Clone)]
pub struct StringAdapter {
    text: String,
}

impl StringAdapter {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl Adapter for StringAdapter {
    async fn load_policy(&mut self, model: &mut Model) -> Result<()> {
        for line in self.text.clone().lines() {
            load_policy_line(line, model)?;
        }
        Ok(())
    }

    async fn save_policy(&mut self, _model: &mut Model) -> Result<()> {
        Err(PortcullisError::AdapterUnsupported("save_policy"))
    }

    async fn add_policy(&mut self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<bool> {
        Err(PortcullisError::AdapterUnsupported("add_policy"))
    }

    async fn remove_policy(&mut self, _sec: &str, _ptype: &str, _rule: &[String]) -> Result<bool> {
        Err(PortcullisError::AdapterUnsupported("remove_policy"))
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _field_values: &[String],
    ) -> Result<bool> {
        Err(PortcullisError::AdapterUnsupported("remove_filtered_policy"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";

    #[tokio::test]
    async fn test_load_from_text() {
        let mut adapter = StringAdapter::new("p, alice, data1, read\np, bob, data2, write\n");
        let mut model = Model::from_text(MODEL).unwrap();
        adapter.load_policy(&mut model).await.unwrap();
        assert_eq!(model.get_policy("p", "p").len(), 2);
    }

    #[tokio::test]
    async fn test_save_unsupported() {
        let mut adapter = StringAdapter::new("");
        let mut model = Model::from_text(MODEL).unwrap();
        assert!(matches!(
            adapter.save_policy(&mut model).await,
            Err(PortcullisError::AdapterUnsupported(_))
        ));
    }
}
