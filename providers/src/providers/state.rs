// providers/src/providers/state.rs

use crate::context::{Context, ContextGuard};
use crate::core::{node_common, provider_handle, register_dependents, NodeCore, ProviderKind, ProviderNode, ProviderRef};
use crate::error::{Error, Result};
use crate::overrides::OverrideStack;

use futures_util::future::BoxFuture;

use std::future::Future;
use std::sync::Arc;

/// A value supplied from outside the graph for the duration of an init block.
///
/// `init` pushes a frame carrying the value; resolving through that frame, or
/// any frame entered inside it, yields the value. Outside of it resolution
/// fails with `StateNotInitialized`.
pub struct State<T> {
  inner: Arc<StateInner<T>>,
}

struct StateInner<T> {
  core: NodeCore,
  overrides: OverrideStack<T>,
}

impl<T: Send + Sync + 'static> State<T> {
  pub fn new() -> Self {
    let inner = Arc::new(StateInner {
      core: NodeCore::new::<T>(ProviderKind::State),
      overrides: OverrideStack::default(),
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }

  /// Makes `value` visible until the guard exits. The frame keeps the
  /// enclosing global context.
  pub fn init(&self, ctx: &Context, value: T) -> Result<ContextGuard> {
    tracing::debug!(provider = %self.inner.core.label(), "state initialized");
    ctx.enter_state(self.inner.core.id(), Arc::new(value))
  }

  /// Runs `body` with `value` initialized.
  pub async fn scoped<F, Fut, R>(&self, ctx: &Context, value: T, body: F) -> Result<R>
  where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = R>,
  {
    let guard = self.init(ctx, value)?;
    let output = body(guard.context().clone()).await;
    guard.exit().await;
    Ok(output)
  }
}

impl<T: Send + Sync + 'static> Default for State<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Send + Sync + 'static> StateInner<T> {
  async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    self.lookup(ctx)
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    self.lookup(ctx)
  }

  fn lookup(&self, ctx: &Context) -> Result<Arc<T>> {
    ctx.state::<T>(self.core.id()).ok_or_else(|| Error::StateNotInitialized {
      provider: self.core.label(),
    })
  }
}

impl<T: Send + Sync + 'static> ProviderNode for StateInner<T> {
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

provider_handle!(State, T);
