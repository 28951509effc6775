// providers/src/providers/factory.rs

use crate::context::Context;
use crate::core::{node_common, provider_handle, register_dependents, NodeCore, ProviderKind, ProviderNode, ProviderRef};
use crate::creator::{bind, Creator, Recipe};
use crate::dependencies::Dependencies;
use crate::error::{BoxError, Result};
use crate::overrides::OverrideStack;

use futures_util::future::{self, BoxFuture};

use std::future::Future;
use std::sync::Arc;

/// Creates a new value on every resolution. Never caches, so teardown is a no-op.
pub struct Factory<T> {
  inner: Arc<FactoryInner<T>>,
}

struct FactoryInner<T> {
  core: NodeCore,
  overrides: OverrideStack<T>,
  recipe: Box<dyn Recipe<T>>,
}

impl<T: Send + Sync + 'static> Factory<T> {
  pub fn new<D, F>(dependencies: D, create: F) -> Self
  where
    D: Dependencies,
    F: Fn(D::Output) -> T + Send + Sync + 'static,
  {
    Self::build(bind(dependencies, Creator::infallible(create)))
  }

  pub fn try_new<D, F, E>(dependencies: D, create: F) -> Self
  where
    D: Dependencies,
    F: Fn(D::Output) -> std::result::Result<T, E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    Self::build(bind(dependencies, Creator::fallible(create)))
  }

  /// An async factory. Sync resolution always fails with `AsyncInSync`.
  pub fn new_async<D, F, Fut, E>(dependencies: D, create: F) -> Self
  where
    D: Dependencies,
    F: Fn(D::Output) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    Self::build(bind(dependencies, Creator::future(create)))
  }

  fn build(recipe: Box<dyn Recipe<T>>) -> Self {
    let inner = Arc::new(FactoryInner {
      core: NodeCore::new::<T>(ProviderKind::Factory),
      overrides: OverrideStack::default(),
      recipe,
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }
}

impl<T: Send + Sync + 'static> FactoryInner<T> {
  async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    let value = self.recipe.cook(ctx, &self.core).await?;
    Ok(Arc::new(value))
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    let value = self.recipe.cook_sync(ctx, &self.core)?;
    Ok(Arc::new(value))
  }
}

impl<T: Send + Sync + 'static> ProviderNode for FactoryInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    self.recipe.dependencies()
  }

  fn is_async(&self) -> bool {
    self.recipe.is_async()
  }

  fn release<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(future::ready(Ok(())))
  }

  fn release_sync(&self, _ctx: &Context, _raise_on_async: bool) -> Result<()> {
    Ok(())
  }
}

provider_handle!(Factory, T);
