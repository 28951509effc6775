// providers/src/providers/thread_local.rs

use crate::context::Context;
use crate::core::{node_common, provider_handle, register_dependents, NodeCore, ProviderId, ProviderKind, ProviderNode, ProviderRef};
use crate::creator::{bind, Creator, Recipe};
use crate::dependencies::Dependencies;
use crate::error::{BoxError, Result};
use crate::overrides::OverrideStack;

use futures_util::future::BoxFuture;

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

thread_local! {
  // Instances owned by this thread, keyed by provider. Dropped with the thread.
  static INSTANCES: RefCell<HashMap<ProviderId, Arc<dyn Any + Send + Sync>>> = RefCell::new(HashMap::new());
}

fn local_get<T: Send + Sync + 'static>(id: ProviderId) -> Option<Arc<T>> {
  let instance = INSTANCES.with(|instances| instances.borrow().get(&id).cloned())?;
  instance.downcast::<T>().ok()
}

fn local_insert<T: Send + Sync + 'static>(id: ProviderId, value: Arc<T>) {
  INSTANCES.with(|instances| {
    instances.borrow_mut().insert(id, value);
  });
}

fn local_remove(id: ProviderId) -> bool {
  INSTANCES.with(|instances| instances.borrow_mut().remove(&id).is_some())
}

/// One cached instance per OS thread.
///
/// Creation is always synchronous. The async path only resolves dependencies
/// asynchronously and then caches on whichever thread completes it.
pub struct ThreadLocalSingleton<T> {
  inner: Arc<ThreadLocalInner<T>>,
}

struct ThreadLocalInner<T> {
  core: NodeCore,
  overrides: OverrideStack<T>,
  recipe: Box<dyn Recipe<T>>,
}

impl<T: Send + Sync + 'static> ThreadLocalSingleton<T> {
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

  fn build(recipe: Box<dyn Recipe<T>>) -> Self {
    let inner = Arc::new(ThreadLocalInner {
      core: NodeCore::new::<T>(ProviderKind::ThreadLocalSingleton),
      overrides: OverrideStack::default(),
      recipe,
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }
}

impl<T: Send + Sync + 'static> ThreadLocalInner<T> {
  async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    if let Some(value) = local_get::<T>(self.core.id()) {
      return Ok(value);
    }
    let value = Arc::new(self.recipe.cook(ctx, &self.core).await?);
    Ok(self.store(value))
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    if let Some(value) = local_get::<T>(self.core.id()) {
      return Ok(value);
    }
    let value = Arc::new(self.recipe.cook_sync(ctx, &self.core)?);
    Ok(self.store(value))
  }

  // A nested resolution on this thread may have stored first; that one wins.
  fn store(&self, value: Arc<T>) -> Arc<T> {
    if let Some(existing) = local_get::<T>(self.core.id()) {
      return existing;
    }
    local_insert(self.core.id(), Arc::clone(&value));
    tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "thread-local instance created");
    value
  }

  fn release_local(&self) {
    if local_remove(self.core.id()) {
      tracing::debug!(provider = %self.core.label(), id = %self.core.id(), "thread-local instance released");
    }
  }
}

impl<T: Send + Sync + 'static> ProviderNode for ThreadLocalInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    self.recipe.dependencies()
  }

  fn release<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.release_local();
      Ok(())
    })
  }

  fn release_sync(&self, _ctx: &Context, _raise_on_async: bool) -> Result<()> {
    self.release_local();
    Ok(())
  }
}

provider_handle!(ThreadLocalSingleton, T);
