// providers/src/providers/singleton.rs

use crate::context::Context;
use crate::core::{node_common, provider_handle, register_dependents, NodeCore, ProviderKind, ProviderNode, ProviderRef};
use crate::creation::CreationCell;
use crate::creator::{bind, Creator, Recipe};
use crate::dependencies::Dependencies;
use crate::error::{BoxError, Error, Result};
use crate::overrides::OverrideStack;

use futures_util::future::BoxFuture;

use std::future::Future;
use std::sync::Arc;

/// Creates its value once, lazily, and caches it until torn down.
///
/// Concurrent first resolutions, from threads or tasks, share a single
/// creator call. A failed or cancelled creation leaves the cache empty.
pub struct Singleton<T> {
  inner: Arc<SingletonInner<T>>,
}

struct SingletonInner<T> {
  core: NodeCore,
  overrides: OverrideStack<T>,
  recipe: Box<dyn Recipe<T>>,
  cell: CreationCell<T>,
}

impl<T: Send + Sync + 'static> Singleton<T> {
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

  /// An async singleton. Sync resolution succeeds only once the value is cached.
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
    let inner = Arc::new(SingletonInner {
      core: NodeCore::new::<T>(ProviderKind::Singleton),
      overrides: OverrideStack::default(),
      recipe,
      cell: CreationCell::new(),
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }

  /// The cached value, if any, without creating it.
  pub fn cached(&self) -> Option<Arc<T>> {
    self.inner.cell.get()
  }
}

impl<T: Send + Sync + 'static> SingletonInner<T> {
  async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    self
      .cell
      .get_or_create(|| self.core.label(), || async {
        let value = Arc::new(self.recipe.cook(ctx, &self.core).await?);
        tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "singleton created");
        Ok::<_, Error>(value)
      })
      .await
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    if let Some(value) = self.cell.get() {
      return Ok(value);
    }
    if self.recipe.is_async() {
      return Err(Error::AsyncInSync {
        provider: self.core.label(),
      });
    }
    self.cell.get_or_create_sync(
      || self.core.label(),
      || {
        let value = Arc::new(self.recipe.cook_sync(ctx, &self.core)?);
        tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "singleton created");
        Ok(value)
      },
    )
  }

  fn release_cached(&self) {
    if self.cell.take().is_some() {
      tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "singleton released");
    }
  }
}

impl<T: Send + Sync + 'static> ProviderNode for SingletonInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    self.recipe.dependencies()
  }

  fn is_async(&self) -> bool {
    self.recipe.is_async()
  }

  fn release<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.release_cached();
      Ok(())
    })
  }

  fn release_sync(&self, _ctx: &Context, _raise_on_async: bool) -> Result<()> {
    self.release_cached();
    Ok(())
  }
}

provider_handle!(Singleton, T);
