// providers/src/providers/object.rs

use crate::context::Context;
use crate::core::{node_common, provider_handle, register_dependents, NodeCore, ProviderKind, ProviderNode, ProviderRef};
use crate::error::Result;
use crate::overrides::OverrideStack;

use futures_util::future::BoxFuture;

use std::sync::Arc;

/// Always resolves to the same, already built value.
pub struct Object<T> {
  inner: Arc<ObjectInner<T>>,
}

struct ObjectInner<T> {
  core: NodeCore,
  overrides: OverrideStack<T>,
  value: Arc<T>,
}

impl<T: Send + Sync + 'static> Object<T> {
  pub fn new(value: T) -> Self {
    Self::from_arc(Arc::new(value))
  }

  pub fn from_arc(value: Arc<T>) -> Self {
    let inner = Arc::new(ObjectInner {
      core: NodeCore::new::<T>(ProviderKind::Object),
      overrides: OverrideStack::default(),
      value,
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }
}

impl<T: Send + Sync + 'static> ObjectInner<T> {
  async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    match self.overrides.top() {
      Some(layer) => layer.resolve(ctx).await,
      None => Ok(Arc::clone(&self.value)),
    }
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    match self.overrides.top() {
      Some(layer) => layer.resolve_sync(ctx),
      None => Ok(Arc::clone(&self.value)),
    }
  }
}

impl<T: Send + Sync + 'static> ProviderNode for ObjectInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    Vec::new()
  }

  fn release<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(async { Ok(()) })
  }

  fn release_sync(&self, _ctx: &Context, _raise_on_async: bool) -> Result<()> {
    Ok(())
  }
}

provider_handle!(Object, T);
