// providers/src/providers/attr_getter.rs

use crate::context::Context;
use crate::core::{node_common, provider_handle, register_dependents, NodeCore, Provider, ProviderKind, ProviderNode, ProviderRef};
use crate::error::Result;
use crate::overrides::OverrideStack;

use futures_util::future::{self, BoxFuture};

use std::sync::Arc;

/// Projects a part of another provider's value, such as one field of a
/// settings struct.
///
/// Every resolution resolves the source and applies the projection, so a
/// getter over a caching provider reads that provider's cached instance. The
/// getter holds no cache of its own. Teardown of the source propagates
/// through it to whatever depends on the getter.
pub struct AttrGetter<T> {
  inner: Arc<AttrGetterInner<T>>,
}

struct AttrGetterInner<T> {
  core: NodeCore,
  overrides: OverrideStack<T>,
  projection: Box<dyn Projection<T>>,
}

trait Projection<T>: Send + Sync {
  fn source(&self) -> ProviderRef;

  fn project<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Arc<T>>>;

  fn project_sync(&self, ctx: &Context) -> Result<Arc<T>>;
}

struct Projected<P, F> {
  source: P,
  get: F,
}

impl<P, F, T> Projection<T> for Projected<P, F>
where
  P: Provider,
  F: Fn(&P::Output) -> T + Send + Sync + 'static,
  T: Send + Sync + 'static,
{
  fn source(&self) -> ProviderRef {
    self.source.node()
  }

  fn project<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Arc<T>>> {
    Box::pin(async move {
      let value = self.source.resolve(ctx).await?;
      Ok(Arc::new((self.get)(&value)))
    })
  }

  fn project_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    let value = self.source.resolve_sync(ctx)?;
    Ok(Arc::new((self.get)(&value)))
  }
}

impl<T: Send + Sync + 'static> AttrGetter<T> {
  pub fn new<P, F>(provider: P, get: F) -> Self
  where
    P: Provider,
    F: Fn(&P::Output) -> T + Send + Sync + 'static,
  {
    let inner = Arc::new(AttrGetterInner {
      core: NodeCore::new::<T>(ProviderKind::AttrGetter),
      overrides: OverrideStack::default(),
      projection: Box::new(Projected { source: provider, get }),
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }

  /// The provider this getter reads from.
  pub fn source(&self) -> ProviderRef {
    self.inner.projection.source()
  }
}

impl<T: Send + Sync + 'static> AttrGetterInner<T> {
  async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    self.projection.project(ctx).await
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    self.projection.project_sync(ctx)
  }
}

impl<T: Send + Sync + 'static> ProviderNode for AttrGetterInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    vec![self.projection.source()]
  }

  fn is_async(&self) -> bool {
    self.projection.source().is_async()
  }

  fn release<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(future::ready(Ok(())))
  }

  fn release_sync(&self, _ctx: &Context, _raise_on_async: bool) -> Result<()> {
    Ok(())
  }
}

provider_handle!(AttrGetter, T);
