//! Adapter over a policy text file on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::adapter::{load_policy_line, policy_to_text, Adapter, Filter, FilteredAdapter};
use crate::errors::{PortcullisError, Result};
use crate::model::Model;

/// Loads and saves the whole policy file. Single-rule mutations are not
/// expressible against a flat file, so they report `AdapterUnsupported`;
/// the enforcer persists through `save_policy` instead when it needs to.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
    filtered: bool,
}

impl FileAdapter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            filtered: false,
        }
    }
}

#[async_trait]
impl Adapter for FileAdapter {
    async fn load_policy(&mut self, model: &mut Model) -> Result<()> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        for line in text.lines() {
            load_policy_line(line, model)?;
        }
        self.filtered = false;
        tracing::info!(path = %self.path.display(), "loaded policy file");
        Ok(())
    }

    async fn save_policy(&mut self, model: &mut Model) -> Result<()> {
        let text = policy_to_text(model);
        tokio::fs::write(&self.path, text).await?;
        tracing::info!(path = %self.path.display(), "saved policy file");
        Ok(())
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

    fn is_filtered(&self) -> bool {
        self.filtered
    }

    fn as_filtered(&mut self) -> Option<&mut dyn FilteredAdapter> {
        Some(self)
    }
}

#[async_trait]
impl FilteredAdapter for FileAdapter {
    async fn load_filtered_policy(&mut self, model: &mut Model, filter: &Filter) -> Result<()> {
        if filter.is_empty() {
            return self.load_policy(model).await;
        }
        let text = tokio::fs::read_to_string(&self.path).await?;
        let mut skipped = 0usize;
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<String> = trimmed.split(", ").map(|s| s.trim().to_string()).collect();
            let sec = crate::model::section_of(&fields[0]);
            if filter.matches(sec, &fields[1..]) {
                load_policy_line(trimmed, model)?;
            } else {
                skipped += 1;
            }
        }
        self.filtered = true;
        tracing::info!(
            path = %self.path.display(),
            skipped,
            "loaded filtered policy file"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MODEL: &str = r"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
";

    const POLICY: &str = "\
# seed rules
p, alice, data1, read
p, bob, data2, write
g, alice, data2_admin
";

    fn policy_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(POLICY.as_bytes()).unwrap();
        f
    }

    #[tokio::test]
    async fn test_load_and_save() {
        let file = policy_file();
        let mut adapter = FileAdapter::new(file.path());
        let mut model = Model::from_text(MODEL).unwrap();
        adapter.load_policy(&mut model).await.unwrap();
        assert_eq!(model.get_policy("p", "p").len(), 2);
        assert_eq!(model.get_policy("g", "g").len(), 1);
        assert!(!adapter.is_filtered());

        model.add_policy(
            "p",
            "p",
            vec!["carol".into(), "data3".into(), "read".into()],
        );
        adapter.save_policy(&mut model).await.unwrap();

        let mut reloaded = Model::from_text(MODEL).unwrap();
        let mut adapter2 = FileAdapter::new(file.path());
        adapter2.load_policy(&mut reloaded).await.unwrap();
        assert_eq!(reloaded.get_policy("p", "p").len(), 3);
    }

    #[tokio::test]
    async fn test_filtered_load() {
        let file = policy_file();
        let mut adapter = FileAdapter::new(file.path());
        let mut model = Model::from_text(MODEL).unwrap();
        let filter = Filter {
            p: vec!["alice".into()],
            g: vec![],
        };
        adapter
            .as_filtered()
            .unwrap()
            .load_filtered_policy(&mut model, &filter)
            .await
            .unwrap();
        assert_eq!(
            model.get_policy("p", "p"),
            vec![vec!["alice".to_string(), "data1".into(), "read".into()]]
        );
        // g passes untouched under an empty g filter
        assert_eq!(model.get_policy("g", "g").len(), 1);
        assert!(adapter.is_filtered());
    }

    #[tokio::test]
    async fn test_single_rule_mutations_unsupported() {
        let file = policy_file();
        let mut adapter = FileAdapter::new(file.path());
        let rule = vec!["x".to_string(), "y".into(), "z".into()];
        assert!(matches!(
            adapter.add_policy("p", "p", &rule).await,
            Err(PortcullisError::AdapterUnsupported(_))
        ));
    }
}
