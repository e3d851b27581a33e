#![allow(dead_code)]

use portcullis::adapter::{MemoryAdapter, StringAdapter};
use portcullis::{Adapter, Enforcer, Model};

pub const BASIC_MODEL: &str = r"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";

pub const RBAC_MODEL: &str = r"
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

pub const RBAC_WITH_DOMAINS_MODEL: &str = r"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act
";

pub const PRIORITY_MODEL: &str = r"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft, priority

[policy_effect]
e = priority(p_eft) || deny

[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";

pub const SUBJECT_PRIORITY_MODEL: &str = r"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[role_definition]
g = _, _

[policy_effect]
e = subjectPriority(p_eft) || deny

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
";

pub const KEYMATCH2_MODEL: &str = r"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && keyMatch2(r.obj, p.obj) && r.act == p.act
";

pub const DENY_OVERRIDE_MODEL: &str = r"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";

pub const ABAC_MODEL: &str = r"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.obj.Owner == r.sub
";

pub fn rule(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|s| s.to_string()).collect()
}

/// Route engine logs to the test output; repeated calls are harmless.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Enforcer backed by a read-only string adapter.
pub async fn enforcer(model_text: &str, policy_text: &str) -> Enforcer {
    let model = Model::from_text(model_text).expect("model must parse");
    Enforcer::with_model(model, Box::new(StringAdapter::new(policy_text)))
        .await
        .expect("enforcer must build")
}

/// Enforcer backed by a memory adapter seeded from policy lines, so that
/// auto-save persistence can be observed through reloads.
pub async fn enforcer_with_memory(model_text: &str, lines: &[&str]) -> Enforcer {
    let mut adapter = MemoryAdapter::new();
    for line in lines {
        let mut fields = line.split(", ").map(str::trim);
        let ptype = fields.next().expect("policy line must have a type");
        let rule: Vec<String> = fields.map(str::to_string).collect();
        let sec = if ptype.starts_with('g') { "g" } else { "p" };
        adapter
            .add_policy(sec, ptype, &rule)
            .await
            .expect("seeding the memory adapter must work");
    }
    let model = Model::from_text(model_text).expect("model must parse");
    Enforcer::with_model(model, Box::new(adapter))
        .await
        .expect("enforcer must build")
}
