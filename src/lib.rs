//! Portcullis - model-driven access control
//!
//! A general-purpose authorization engine. A declarative model describes
//! the request shape, policy shape, optional role hierarchies, a matcher
//! expression and a policy-effect operator; the enforcer answers queries of
//! the form "does this request satisfy the policy?". ACL, RBAC (with
//! domains, multi-level inheritance and pattern matching), ABAC and
//! priority-based deny/allow are all compositions of the same primitives.

pub mod adapter;
pub mod config;
pub mod dispatcher;
pub mod effect;
pub mod enforcer;
pub mod errors;
pub mod expr;
pub mod functions;
pub mod locked;
pub mod management;
pub mod model;
pub mod rbac;
pub mod watcher;

pub use adapter::{Adapter, FileAdapter, Filter, MemoryAdapter, StringAdapter};
pub use dispatcher::Dispatcher;
pub use enforcer::Enforcer;
pub use errors::{PortcullisError, Result};
pub use locked::LockedEnforcer;
pub use model::Model;
pub use rbac::{DefaultRoleManager, RoleManager};
pub use watcher::Watcher;
