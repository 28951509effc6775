// providers/src/providers/resource.rs

use crate::context::Context;
use crate::core::{node_common, provider_handle, register_dependents, NodeCore, ProviderKind, ProviderNode, ProviderRef};
use crate::creation::CreationCell;
use crate::creator::{self, bind, Acquired, Creator, Recipe, Release};
use crate::dependencies::Dependencies;
use crate::error::{BoxError, Error, Result};
use crate::overrides::OverrideStack;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use std::future::Future;
use std::sync::Arc;

/// A cached instance and the finalizer that belongs to it.
struct Lease<T> {
  value: Arc<T>,
  release: Mutex<Option<Release>>,
}

impl<T> Lease<T> {
  fn has_async_release(&self) -> bool {
    self.release.lock().as_ref().map_or(false, Release::is_async)
  }
}

/// A singleton whose creator returns the value together with a finalizer.
/// The finalizer runs exactly once, when the instance is torn down.
pub struct Resource<T> {
  inner: Arc<ResourceInner<T>>,
}

struct ResourceInner<T> {
  core: NodeCore,
  overrides: OverrideStack<T>,
  recipe: Box<dyn Recipe<Acquired<T>>>,
  cell: CreationCell<Lease<T>>,
}

impl<T: Send + Sync + 'static> Resource<T> {
  pub fn new<D, F>(dependencies: D, acquire: F) -> Self
  where
    D: Dependencies,
    F: Fn(D::Output) -> Acquired<T> + Send + Sync + 'static,
  {
    Self::build(bind(dependencies, Creator::infallible(acquire)))
  }

  pub fn try_new<D, F, E>(dependencies: D, acquire: F) -> Self
  where
    D: Dependencies,
    F: Fn(D::Output) -> std::result::Result<Acquired<T>, E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    Self::build(bind(dependencies, Creator::fallible(acquire)))
  }

  pub fn new_async<D, F, Fut, E>(dependencies: D, acquire: F) -> Self
  where
    D: Dependencies,
    F: Fn(D::Output) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Acquired<T>, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    Self::build(bind(dependencies, Creator::future(acquire)))
  }

  fn build(recipe: Box<dyn Recipe<Acquired<T>>>) -> Self {
    let inner = Arc::new(ResourceInner {
      core: NodeCore::new::<T>(ProviderKind::Resource),
      overrides: OverrideStack::default(),
      recipe,
      cell: CreationCell::new(),
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }

  pub fn cached(&self) -> Option<Arc<T>> {
    self.inner.cell.get().map(|lease| Arc::clone(&lease.value))
  }
}

impl<T: Send + Sync + 'static> ResourceInner<T> {
  fn lease(&self, acquired: Acquired<T>) -> Arc<Lease<T>> {
    let (value, release) = acquired.into_lease();
    tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "resource acquired");
    Arc::new(Lease {
      value,
      release: Mutex::new(release),
    })
  }

  async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    let lease = self
      .cell
      .get_or_create(|| self.core.label(), || async {
        let acquired = self.recipe.cook(ctx, &self.core).await?;
        Ok::<_, Error>(self.lease(acquired))
      })
      .await?;
    Ok(Arc::clone(&lease.value))
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    if let Some(lease) = self.cell.get() {
      return Ok(Arc::clone(&lease.value));
    }
    if self.recipe.is_async() {
      return Err(Error::AsyncInSync {
        provider: self.core.label(),
      });
    }
    let lease = self.cell.get_or_create_sync(
      || self.core.label(),
      || Ok(self.lease(self.recipe.cook_sync(ctx, &self.core)?)),
    )?;
    Ok(Arc::clone(&lease.value))
  }
}

impl<T: Send + Sync + 'static> ProviderNode for ResourceInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    self.recipe.dependencies()
  }

  fn is_async(&self) -> bool {
    self.recipe.is_async()
  }

  fn release<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      let Some(lease) = self.cell.take() else {
        return Ok(());
      };
      let release = lease.release.lock().take();
      if let Some(release) = release {
        release.run().await;
      }
      tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "resource released");
      Ok(())
    })
  }

  fn has_async_finalizer(&self, _ctx: &Context) -> bool {
    self.cell.get().map_or(false, |lease| lease.has_async_release())
  }

  fn release_sync(&self, _ctx: &Context, raise_on_async: bool) -> Result<()> {
    let Some(lease) = self.cell.get() else {
      return Ok(());
    };
    if raise_on_async && lease.has_async_release() {
      return Err(Error::CannotTearDownSync {
        provider: self.core.label(),
      });
    }
    let Some(lease) = self.cell.take() else {
      return Ok(());
    };
    let release = lease.release.lock().take();
    if let Some(release) = release {
      creator::release_sync(&self.core.label(), release, raise_on_async)?;
    }
    tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "resource released");
    Ok(())
  }
}

provider_handle!(Resource, T);
