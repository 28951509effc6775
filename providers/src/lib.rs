//! Scope-aware dependency providers.
//!
//! A provider knows how to build one value from its dependencies, and may
//! cache that value, scope it to a context or release it with a finalizer.
//!
//! # Features
//! - **Lazy, at-most-once creation**: concurrent first resolutions of a
//!   caching provider, from threads or tasks, share one creator call.
//! - **Sync & Async**: every provider resolves with `resolve` or
//!   `resolve_sync`; async creators fail fast on the sync path.
//! - **Scoped contexts**: `ContextResource` instances live in a context frame
//!   and are finalized in reverse creation order when it exits.
//! - **Ordered teardown**: containers release their caches dependents first.
//! - **Overrides**: stackable, scoped and batch overrides for testing.
//! - **Projections**: `AttrGetter` exposes one part of another provider's
//!   value as a provider of its own.
//!
//! ```
//! use fibre_providers::{Container, Context, Factory, Provider, Singleton};
//!
//! struct Settings {
//!   url: String,
//! }
//!
//! struct Client {
//!   url: String,
//! }
//!
//! let container = Container::new("app");
//! let settings = container.register(
//!   "settings",
//!   Singleton::new((), |()| Settings { url: "db://local".to_string() }),
//! );
//! let client = container.register(
//!   "client",
//!   Factory::new((settings.clone(),), |(settings,)| Client { url: settings.url.clone() }),
//! );
//!
//! let ctx = Context::new();
//! let client = client.resolve_sync(&ctx)?;
//! assert_eq!(client.url, "db://local");
//! # Ok::<(), fibre_providers::Error>(())
//! ```

pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod providers;
pub mod scope;
pub mod teardown;

mod core;
mod creation;
mod creator;
mod dependencies;
mod overrides;

pub use crate::core::{AsyncCreator, DynProvider, NodeCore, Provider, ProviderId, ProviderKind, ProviderNode, ProviderRef, SyncCreator};
pub use config::RuntimeConfig;
pub use container::{Container, OverrideBatch, OverrideSet, Registry};
pub use context::{Context, ContextGuard, ContextOptions, GlobalValue};
pub use creator::Acquired;
pub use dependencies::{Dependencies, Dependency, Literal};
pub use error::{BoxError, Error, Result};
pub use overrides::{Override, OverrideGuard, OverrideStack};
pub use providers::{
  AttrGetter, ContextResource, Dict, Factory, List, Object, Resource, Selector, SelectorKey, Singleton, State,
  ThreadLocalSingleton,
};
pub use scope::{Scope, ScopeConfig};
