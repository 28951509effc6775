// providers/src/providers/selector.rs

use crate::context::Context;
use crate::core::{node_common, provider_handle, register_dependents, DynProvider, NodeCore, Provider, ProviderKind, ProviderNode, ProviderRef};
use crate::error::{Error, Result};
use crate::overrides::OverrideStack;

use futures_util::future::BoxFuture;

use std::fmt;
use std::sync::Arc;

/// Where a [`Selector`] reads its key from, evaluated on every resolution.
pub enum SelectorKey {
  Fixed(String),
  Function(Box<dyn Fn() -> String + Send + Sync>),
  Provider(DynProvider<String>),
}

impl SelectorKey {
  pub fn from_fn<F>(select: F) -> Self
  where
    F: Fn() -> String + Send + Sync + 'static,
  {
    SelectorKey::Function(Box::new(select))
  }

  pub fn from_provider<P: Provider<Output = String>>(provider: P) -> Self {
    SelectorKey::Provider(provider.into_dyn())
  }
}

impl From<&str> for SelectorKey {
  fn from(key: &str) -> Self {
    SelectorKey::Fixed(key.to_string())
  }
}

impl From<String> for SelectorKey {
  fn from(key: String) -> Self {
    SelectorKey::Fixed(key)
  }
}

impl fmt::Debug for SelectorKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SelectorKey::Fixed(key) => f.debug_tuple("Fixed").field(key).finish(),
      SelectorKey::Function(_) => f.write_str("Function"),
      SelectorKey::Provider(provider) => f.debug_tuple("Provider").field(&provider.label()).finish(),
    }
  }
}

/// Delegates to one of several providers chosen by a key at resolution time.
/// Holds no cache of its own: tearing a selector down releases the branch its
/// key selects at that moment.
pub struct Selector<T> {
  inner: Arc<SelectorInner<T>>,
}

struct SelectorInner<T> {
  core: NodeCore,
  overrides: OverrideStack<T>,
  key: SelectorKey,
  branches: Vec<(String, DynProvider<T>)>,
}

impl<T: Send + Sync + 'static> Selector<T> {
  pub fn new<K, I, S>(key: K, branches: I) -> Self
  where
    K: Into<SelectorKey>,
    I: IntoIterator<Item = (S, DynProvider<T>)>,
    S: Into<String>,
  {
    let inner = Arc::new(SelectorInner {
      core: NodeCore::new::<T>(ProviderKind::Selector),
      overrides: OverrideStack::default(),
      key: key.into(),
      branches: branches.into_iter().map(|(name, provider)| (name.into(), provider)).collect(),
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }

  pub fn keys(&self) -> Vec<String> {
    self.inner.branches.iter().map(|(key, _)| key.clone()).collect()
  }
}

impl<T: Send + Sync + 'static> SelectorInner<T> {
  fn branch(&self, key: &str) -> Result<&DynProvider<T>> {
    self
      .branches
      .iter()
      .find(|(name, _)| name == key)
      .map(|(_, provider)| provider)
      .ok_or_else(|| Error::UnknownSelection {
        provider: self.core.label(),
        key: key.to_string(),
      })
  }

  async fn select(&self, ctx: &Context) -> Result<&DynProvider<T>> {
    let key = match &self.key {
      SelectorKey::Fixed(key) => key.clone(),
      SelectorKey::Function(select) => select(),
      SelectorKey::Provider(provider) => (*provider.resolve(ctx).await?).clone(),
    };
    tracing::trace!(provider = %self.core.label(), key = %key, "selector branch chosen");
    self.branch(&key)
  }

  fn select_sync(&self, ctx: &Context) -> Result<&DynProvider<T>> {
    let key = match &self.key {
      SelectorKey::Fixed(key) => key.clone(),
      SelectorKey::Function(select) => select(),
      SelectorKey::Provider(provider) => (*provider.resolve_sync(ctx)?).clone(),
    };
    self.branch(&key)
  }

  async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    self.select(ctx).await?.resolve(ctx).await
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    self.select_sync(ctx)?.resolve_sync(ctx)
  }
}

impl<T: Send + Sync + 'static> ProviderNode for SelectorInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    let mut nodes = Vec::with_capacity(self.branches.len() + 1);
    if let SelectorKey::Provider(provider) = &self.key {
      nodes.push(provider.node());
    }
    nodes.extend(self.branches.iter().map(|(_, provider)| provider.node()));
    nodes
  }

  fn is_async(&self) -> bool {
    self.branches.iter().any(|(_, provider)| provider.node().is_async())
  }

  /// Releases the branch the key currently selects.
  fn release<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      let branch = self.select(ctx).await?.node();
      branch.release(ctx).await
    })
  }

  fn has_async_finalizer(&self, ctx: &Context) -> bool {
    self
      .select_sync(ctx)
      .map_or(false, |branch| branch.node().has_async_finalizer(ctx))
  }

  fn release_sync(&self, ctx: &Context, raise_on_async: bool) -> Result<()> {
    self.select_sync(ctx)?.node().release_sync(ctx, raise_on_async)
  }
}

provider_handle!(Selector, T);
