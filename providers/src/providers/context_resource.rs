// providers/src/providers/context_resource.rs

use crate::context::{Context, ContextGuard, ContextOptions, Frame, PendingTeardown};
use crate::core::{node_common, provider_handle, register_dependents, NodeCore, ProviderKind, ProviderNode, ProviderRef};
use crate::creator::{self, bind, Acquired, Creator, Recipe, Release};
use crate::dependencies::Dependencies;
use crate::error::{BoxError, Error, Result};
use crate::overrides::OverrideStack;
use crate::scope::{Scope, ScopeConfig};

use futures_util::future::BoxFuture;
use parking_lot::RwLock;

use std::future::Future;
use std::sync::Arc;

/// A resource cached per context frame.
///
/// Resolution needs a frame on the context stack that hosts this provider
/// (see [`crate::context`]). The instance lives until that frame exits, at
/// which point its finalizer runs in reverse creation order with the other
/// instances of the frame.
pub struct ContextResource<T> {
  inner: Arc<ContextResourceInner<T>>,
}

struct ContextResourceInner<T> {
  core: NodeCore,
  overrides: OverrideStack<T>,
  recipe: Box<dyn Recipe<Acquired<T>>>,
  config: RwLock<ScopeConfig>,
}

impl<T: Send + Sync + 'static> ContextResource<T> {
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
    let inner = Arc::new(ContextResourceInner {
      core: NodeCore::new::<T>(ProviderKind::ContextResource),
      overrides: OverrideStack::default(),
      recipe,
      config: RwLock::new(ScopeConfig::default()),
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }

  pub fn with_scope(self, scope: impl Into<Scope>) -> Self {
    self.inner.config.write().scope = scope.into();
    self
  }

  pub fn strict_scope(self, strict: bool) -> Self {
    self.inner.config.write().strict = strict;
    self
  }

  pub fn scope(&self) -> Scope {
    self.inner.config.read().scope.clone()
  }

  /// Enters a frame hosting only this provider. Unless forced, its declared
  /// scope must be `ANY` or match the current scope.
  pub fn enter(&self, ctx: &Context, force: bool) -> Result<ContextGuard> {
    ctx.enter(ContextOptions::new().provider(self).force(force))
  }
}

impl<T: Send + Sync + 'static> ContextResourceInner<T> {
  fn config(&self) -> ScopeConfig {
    self.config.read().clone()
  }

  fn check_strict(&self, ctx: &Context, config: &ScopeConfig) -> Result<()> {
    if config.strict && !config.scope.is_any() {
      let current = ctx.current_scope();
      if current.as_ref() != Some(&config.scope) {
        return Err(Error::invalid_context(self.core.label(), config.scope.clone(), current));
      }
    }
    Ok(())
  }

  fn register(&self, frame: &Frame, release: Option<Release>) -> Option<Release> {
    let release = release?;
    frame
      .defer(PendingTeardown::new(self.core.id(), self.core.label(), release))
      .map(PendingTeardown::into_release)
  }

  async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    let config = self.config();
    self.check_strict(ctx, &config)?;
    let (frame, cell) = ctx.locate::<T>(&self.core, &config)?;
    cell
      .get_or_create(|| self.core.label(), || async {
        let (value, release) = self.recipe.cook(ctx, &self.core).await?.into_lease();
        tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "context instance created");
        if let Some(orphan) = self.register(&frame, release) {
          tracing::debug!(provider = %self.core.label(), "frame exited during creation, releasing at once");
          orphan.run().await;
        }
        Ok::<_, Error>(value)
      })
      .await
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    let config = self.config();
    self.check_strict(ctx, &config)?;
    let (frame, cell) = ctx.locate::<T>(&self.core, &config)?;
    if let Some(value) = cell.get() {
      return Ok(value);
    }
    if self.recipe.is_async() {
      return Err(Error::AsyncInSync {
        provider: self.core.label(),
      });
    }
    cell.get_or_create_sync(
      || self.core.label(),
      || {
        let (value, release) = self.recipe.cook_sync(ctx, &self.core)?.into_lease();
        tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "context instance created");
        if let Some(orphan) = self.register(&frame, release) {
          creator::release_sync(&self.core.label(), orphan, false)?;
        }
        Ok(value)
      },
    )
  }
}

impl<T: Send + Sync + 'static> ProviderNode for ContextResourceInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    self.recipe.dependencies()
  }

  fn is_async(&self) -> bool {
    self.recipe.is_async()
  }

  /// Tears down the instance visible from `ctx` ahead of its frame's exit.
  fn release<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      let Some((frame, cell)) = ctx.find_ready::<T>(self.core.id()) else {
        return Ok(());
      };
      cell.take();
      frame.remove_slot(self.core.id());
      if let Some(pending) = frame.take_pending(self.core.id()) {
        pending.into_release().run().await;
      }
      tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "context instance released");
      Ok(())
    })
  }

  fn has_async_finalizer(&self, ctx: &Context) -> bool {
    ctx
      .find_ready::<T>(self.core.id())
      .map_or(false, |(frame, _)| frame.pending_is_async(self.core.id()))
  }

  fn release_sync(&self, ctx: &Context, raise_on_async: bool) -> Result<()> {
    let Some((frame, cell)) = ctx.find_ready::<T>(self.core.id()) else {
      return Ok(());
    };
    if raise_on_async && frame.pending_is_async(self.core.id()) {
      return Err(Error::CannotTearDownSync {
        provider: self.core.label(),
      });
    }
    cell.take();
    frame.remove_slot(self.core.id());
    if let Some(pending) = frame.take_pending(self.core.id()) {
      let label = pending.label().to_string();
      creator::release_sync(&label, pending.into_release(), raise_on_async)?;
    }
    tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "context instance released");
    Ok(())
  }

  fn scope_config(&self) -> Option<ScopeConfig> {
    Some(self.config())
  }

  fn apply_default_scope(&self, scope: &Scope) {
    let mut config = self.config.write();
    if config.scope.is_any() {
      config.scope = scope.clone();
    }
  }
}

provider_handle!(ContextResource, T);
