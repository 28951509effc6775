// providers/src/overrides.rs

//! Per-provider override stacks.

use crate::context::Context;
use crate::core::{DynProvider, NodeCore, Provider};
use crate::error::{Error, Result};

use parking_lot::Mutex;

use std::any::Any;
use std::sync::Arc;

/// One layer of an override stack.
pub enum Override<T> {
  Value(Arc<T>),
  Provider(DynProvider<T>),
}

impl<T> Clone for Override<T> {
  fn clone(&self) -> Self {
    match self {
      Override::Value(value) => Override::Value(Arc::clone(value)),
      Override::Provider(provider) => Override::Provider(Arc::clone(provider)),
    }
  }
}

impl<T: Send + Sync + 'static> Override<T> {
  pub(crate) async fn resolve(&self, ctx: &Context) -> Result<Arc<T>> {
    match self {
      Override::Value(value) => Ok(Arc::clone(value)),
      Override::Provider(provider) => provider.resolve(ctx).await,
    }
  }

  pub(crate) fn resolve_sync(&self, ctx: &Context) -> Result<Arc<T>> {
    match self {
      Override::Value(value) => Ok(Arc::clone(value)),
      Override::Provider(provider) => provider.resolve_sync(ctx),
    }
  }
}

/// Stack of overrides. The top layer, if any, wins over normal resolution.
/// Nested override/reset pairs compose: a reset only removes the innermost layer.
pub struct OverrideStack<T> {
  layers: Mutex<Vec<Override<T>>>,
}

impl<T> Default for OverrideStack<T> {
  fn default() -> Self {
    Self {
      layers: Mutex::new(Vec::new()),
    }
  }
}

impl<T: Send + Sync + 'static> OverrideStack<T> {
  pub(crate) fn top(&self) -> Option<Override<T>> {
    self.layers.lock().last().cloned()
  }

  pub fn depth(&self) -> usize {
    self.layers.lock().len()
  }

  pub fn is_overridden(&self) -> bool {
    !self.layers.lock().is_empty()
  }

  pub(crate) fn push(&self, label: &str, layer: Override<T>) {
    let depth = {
      let mut layers = self.layers.lock();
      layers.push(layer);
      layers.len()
    };
    tracing::debug!(provider = %label, depth, "override pushed");
  }

  pub(crate) fn pop(&self, label: &str) {
    if self.layers.lock().pop().is_some() {
      tracing::debug!(provider = %label, "override popped");
    }
  }

  pub(crate) fn scoped(&self, label: String, layer: Override<T>) -> OverrideGuard<'_, T> {
    let restore_to = self.depth();
    self.push(&label, layer);
    OverrideGuard {
      stack: self,
      restore_to,
      label,
    }
  }

  pub(crate) fn push_any(&self, core: &NodeCore, value: Arc<dyn Any + Send + Sync>) -> Result<()> {
    match value.downcast::<T>() {
      Ok(value) => {
        self.push(&core.label(), Override::Value(value));
        Ok(())
      }
      Err(_) => Err(Error::OverrideTypeMismatch {
        provider: core.label(),
        expected: std::any::type_name::<T>(),
      }),
    }
  }

  fn truncate(&self, len: usize) {
    self.layers.lock().truncate(len);
  }
}

/// Restores the override stack to its previous depth when dropped.
pub struct OverrideGuard<'a, T: Send + Sync + 'static> {
  stack: &'a OverrideStack<T>,
  restore_to: usize,
  label: String,
}

impl<T: Send + Sync + 'static> Drop for OverrideGuard<'_, T> {
  fn drop(&mut self) {
    self.stack.truncate(self.restore_to);
    tracing::debug!(provider = %self.label, depth = self.restore_to, "scoped override reverted");
  }
}
