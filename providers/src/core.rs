// providers/src/core.rs

//! The provider contract shared by every variant.
//!
//! A provider is split in two halves:
//!
//! - a type-erased node ([`ProviderNode`]) that owns identity, the reverse
//!   `dependents` edges and the cache-release operations, so teardown and
//!   containers can walk heterogeneous graphs;
//! - a typed handle implementing [`Provider`], which resolves values and holds
//!   the override stack.

use crate::context::Context;
use crate::error::Result;
use crate::overrides::{Override, OverrideGuard, OverrideStack};
use crate::providers::AttrGetter;
use crate::scope::{Scope, ScopeConfig};
use crate::teardown;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Process-unique provider identity. Ids grow monotonically, so ordering by
/// id is ordering by definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(u64);

impl ProviderId {
  pub(crate) fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    ProviderId(NEXT.fetch_add(1, Ordering::Relaxed))
  }

  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for ProviderId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
  Factory,
  Singleton,
  ThreadLocalSingleton,
  Resource,
  ContextResource,
  Selector,
  List,
  Dict,
  State,
  Object,
  AttrGetter,
}

impl ProviderKind {
  /// Whether the variant keeps a container-wide cache that `Container::tear_down` releases.
  pub fn owns_cache(&self) -> bool {
    matches!(
      self,
      ProviderKind::Singleton | ProviderKind::ThreadLocalSingleton | ProviderKind::Resource
    )
  }
}

impl fmt::Display for ProviderKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

/// Identity and graph bookkeeping embedded in every provider node.
pub struct NodeCore {
  id: ProviderId,
  kind: ProviderKind,
  type_name: &'static str,
  name: RwLock<Option<Arc<str>>>,
  dependents: Mutex<Vec<Weak<dyn ProviderNode>>>,
}

impl NodeCore {
  pub(crate) fn new<T: ?Sized>(kind: ProviderKind) -> Self {
    Self {
      id: ProviderId::next(),
      kind,
      type_name: std::any::type_name::<T>(),
      name: RwLock::new(None),
      dependents: Mutex::new(Vec::new()),
    }
  }

  pub fn id(&self) -> ProviderId {
    self.id
  }

  pub fn kind(&self) -> ProviderKind {
    self.kind
  }

  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  pub fn name(&self) -> Option<Arc<str>> {
    self.name.read().clone()
  }

  /// The registered name, or `Kind<Type>` for anonymous providers.
  pub fn label(&self) -> String {
    match &*self.name.read() {
      Some(name) => name.to_string(),
      None => format!("{}<{}>", self.kind, self.type_name),
    }
  }

  pub(crate) fn set_name(&self, name: &str) {
    *self.name.write() = Some(Arc::from(name));
  }

  pub(crate) fn add_dependent(&self, dependent: Weak<dyn ProviderNode>) {
    self.dependents.lock().push(dependent);
  }

  /// Live dependents in registration order. Dropped dependents are pruned.
  pub fn dependents(&self) -> Vec<ProviderRef> {
    let mut dependents = self.dependents.lock();
    dependents.retain(|weak| weak.strong_count() > 0);
    dependents.iter().filter_map(Weak::upgrade).collect()
  }
}

impl fmt::Debug for NodeCore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NodeCore")
      .field("id", &self.id)
      .field("kind", &self.kind)
      .field("label", &self.label())
      .finish()
  }
}

/// Type-erased side of a provider.
///
/// `release` and `release_sync` drop only the node's own cached state.
/// Propagation to dependents is driven by [`crate::teardown`].
pub trait ProviderNode: Send + Sync + 'static {
  fn core(&self) -> &NodeCore;

  /// Providers this node resolves before creating its own value.
  fn dependencies(&self) -> Vec<ProviderRef>;

  /// Whether creation needs an async resolution path.
  fn is_async(&self) -> bool {
    false
  }

  fn release<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<()>>;

  fn release_sync(&self, ctx: &Context, raise_on_async: bool) -> Result<()>;

  /// Whether the instance visible from `ctx` holds an async finalizer, so a
  /// raising `release_sync` would fail.
  fn has_async_finalizer(&self, _ctx: &Context) -> bool {
    false
  }

  /// Resolves the provider and discards the value.
  fn initialize<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<()>>;

  fn initialize_sync(&self, ctx: &Context) -> Result<()>;

  fn pop_override(&self);

  /// Pushes an override whose type is only known at runtime.
  fn push_override_any(&self, value: Arc<dyn Any + Send + Sync>) -> Result<()>;

  /// Scope settings, present only for context-bound providers.
  fn scope_config(&self) -> Option<ScopeConfig> {
    None
  }

  fn apply_default_scope(&self, _scope: &Scope) {}
}

pub type ProviderRef = Arc<dyn ProviderNode>;

/// Records `node` as a dependent of each of its dependencies.
pub(crate) fn register_dependents(node: &ProviderRef) {
  let weak = Arc::downgrade(node);
  for dependency in node.dependencies() {
    dependency.core().add_dependent(weak.clone());
  }
}

/// A bare, argument-free async resolver bound to a provider and a context.
pub type AsyncCreator<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<T>>> + Send + Sync>;

/// A bare, argument-free sync resolver bound to a provider and a context.
pub type SyncCreator<T> = Arc<dyn Fn() -> Result<Arc<T>> + Send + Sync>;

pub type DynProvider<T> = Arc<dyn Provider<Output = T>>;

/// Typed side of a provider: value resolution and overrides.
pub trait Provider: Send + Sync + 'static {
  type Output: Send + Sync + 'static;

  fn node(&self) -> ProviderRef;

  fn overrides(&self) -> &OverrideStack<Self::Output>;

  /// Resolves the value, awaiting async creators and dependencies as needed.
  fn resolve<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Arc<Self::Output>>>;

  /// Resolves without suspending. Fails with `AsyncInSync` when an uncached
  /// provider on the path needs async creation.
  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<Self::Output>>;

  fn id(&self) -> ProviderId {
    self.node().core().id()
  }

  fn label(&self) -> String {
    self.node().core().label()
  }

  // --- Overrides ---

  fn override_with(&self, value: Self::Output) {
    self.override_arc(Arc::new(value));
  }

  fn override_arc(&self, value: Arc<Self::Output>) {
    self.overrides().push(&self.label(), Override::Value(value));
  }

  /// Redirects resolution to another provider of the same output type.
  fn override_provider(&self, provider: DynProvider<Self::Output>) {
    self.overrides().push(&self.label(), Override::Provider(provider));
  }

  /// Overrides until the returned guard is dropped.
  fn override_scope(&self, value: Self::Output) -> OverrideGuard<'_, Self::Output> {
    self.overrides().scoped(self.label(), Override::Value(Arc::new(value)))
  }

  /// Overrides, then tears down every transitive dependent so none of them
  /// keeps a value built from the replaced one.
  fn override_tearing_down(&self, ctx: &Context, value: Self::Output) -> Result<()> {
    self.override_with(value);
    teardown::release_dependents_sync(&*self.node(), ctx, false)
  }

  /// Removes the innermost override.
  fn reset_override(&self) {
    self.overrides().pop(&self.label());
  }

  // --- Teardown ---

  fn tear_down<'a>(&'a self, ctx: &'a Context, propagate: bool) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      let node = self.node();
      teardown::tear_down(&*node, ctx, propagate).await
    })
  }

  fn tear_down_sync(&self, ctx: &Context, propagate: bool, raise_on_async: bool) -> Result<()> {
    teardown::tear_down_sync(&*self.node(), ctx, propagate, raise_on_async)
  }

  // --- Bare creators ---

  fn async_creator(&self, ctx: &Context) -> AsyncCreator<Self::Output>
  where
    Self: Clone + Sized,
  {
    let provider = self.clone();
    let ctx = ctx.clone();
    Arc::new(move || {
      let provider = provider.clone();
      let ctx = ctx.clone();
      Box::pin(async move { provider.resolve(&ctx).await })
    })
  }

  fn sync_creator(&self, ctx: &Context) -> SyncCreator<Self::Output>
  where
    Self: Clone + Sized,
  {
    let provider = self.clone();
    let ctx = ctx.clone();
    Arc::new(move || provider.resolve_sync(&ctx))
  }

  /// A provider of one part of this provider's value.
  fn attr<U, F>(&self, get: F) -> AttrGetter<U>
  where
    Self: Clone + Sized,
    U: Send + Sync + 'static,
    F: Fn(&Self::Output) -> U + Send + Sync + 'static,
  {
    AttrGetter::new(self.clone(), get)
  }

  fn into_dyn(self) -> DynProvider<Self::Output>
  where
    Self: Sized,
  {
    Arc::new(self)
  }
}

impl<P: Provider + ?Sized> Provider for Arc<P> {
  type Output = P::Output;

  fn node(&self) -> ProviderRef {
    (**self).node()
  }

  fn overrides(&self) -> &OverrideStack<P::Output> {
    (**self).overrides()
  }

  fn resolve<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Arc<P::Output>>> {
    (**self).resolve(ctx)
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<P::Output>> {
    (**self).resolve_sync(ctx)
  }
}

/// Implements `Clone`, `Debug` and [`Provider`] for a handle
/// `struct $handle<T> { inner: Arc<$inner<T>> }` whose inner type exposes
/// `core`, `overrides`, `resolve` and `resolve_sync`.
macro_rules! provider_handle {
  ($handle:ident, $output:ty) => {
    impl<T> Clone for $handle<T> {
      fn clone(&self) -> Self {
        Self {
          inner: std::sync::Arc::clone(&self.inner),
        }
      }
    }

    impl<T: Send + Sync + 'static> std::fmt::Debug for $handle<T> {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!($handle))
          .field("id", &self.inner.core.id())
          .field("label", &self.inner.core.label())
          .finish()
      }
    }

    impl<T: Send + Sync + 'static> $crate::core::Provider for $handle<T> {
      type Output = $output;

      fn node(&self) -> $crate::core::ProviderRef {
        self.inner.clone()
      }

      fn overrides(&self) -> &$crate::overrides::OverrideStack<$output> {
        &self.inner.overrides
      }

      fn resolve<'a>(
        &'a self,
        ctx: &'a $crate::context::Context,
      ) -> futures_util::future::BoxFuture<'a, $crate::error::Result<std::sync::Arc<$output>>> {
        Box::pin(self.inner.resolve(ctx))
      }

      fn resolve_sync(
        &self,
        ctx: &$crate::context::Context,
      ) -> $crate::error::Result<std::sync::Arc<$output>> {
        self.inner.resolve_sync(ctx)
      }
    }
  };
}

pub(crate) use provider_handle;

/// Expands, inside an `impl ProviderNode`, the methods every node derives
/// from its `core`, `overrides`, `resolve` and `resolve_sync`.
macro_rules! node_common {
  () => {
    fn core(&self) -> &$crate::core::NodeCore {
      &self.core
    }

    fn initialize<'a>(
      &'a self,
      ctx: &'a $crate::context::Context,
    ) -> futures_util::future::BoxFuture<'a, $crate::error::Result<()>> {
      Box::pin(async move { self.resolve(ctx).await.map(drop) })
    }

    fn initialize_sync(&self, ctx: &$crate::context::Context) -> $crate::error::Result<()> {
      self.resolve_sync(ctx).map(drop)
    }

    fn pop_override(&self) {
      self.overrides.pop(&self.core.label());
    }

    fn push_override_any(
      &self,
      value: std::sync::Arc<dyn std::any::Any + Send + Sync>,
    ) -> $crate::error::Result<()> {
      self.overrides.push_any(&self.core, value)
    }
  };
}

pub(crate) use node_common;
