// providers/src/creator.rs

//! Creation strategies and resource finalizers.
//!
//! Every caching and non-caching variant stores a [`Recipe`]: its dependency
//! tuple bound to one [`Creator`]. The strategy is fixed when the provider is
//! built.

use crate::context::Context;
use crate::core::{NodeCore, ProviderRef};
use crate::dependencies::Dependencies;
use crate::error::{BoxError, Error, Result};

use futures_util::future::BoxFuture;

use std::future::Future;
use std::sync::Arc;

type Created<T> = std::result::Result<T, BoxError>;

pub(crate) enum Creator<A, T> {
  Call(Box<dyn Fn(A) -> Created<T> + Send + Sync>),
  Async(Box<dyn Fn(A) -> BoxFuture<'static, Created<T>> + Send + Sync>),
}

impl<A: 'static, T: 'static> Creator<A, T> {
  pub(crate) fn infallible<F>(create: F) -> Self
  where
    F: Fn(A) -> T + Send + Sync + 'static,
  {
    Creator::Call(Box::new(move |args| Ok(create(args))))
  }

  pub(crate) fn fallible<F, E>(create: F) -> Self
  where
    F: Fn(A) -> std::result::Result<T, E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    Creator::Call(Box::new(move |args| create(args).map_err(Into::into)))
  }

  pub(crate) fn future<F, Fut, E>(create: F) -> Self
  where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    Creator::Async(Box::new(move |args| {
      let pending = create(args);
      Box::pin(async move { pending.await.map_err(Into::into) })
    }))
  }

  pub(crate) fn is_async(&self) -> bool {
    matches!(self, Creator::Async(_))
  }
}

/// A dependency tuple bound to its creator, with the tuple type erased.
pub(crate) trait Recipe<T>: Send + Sync {
  fn is_async(&self) -> bool;

  fn dependencies(&self) -> Vec<ProviderRef>;

  fn cook<'a>(&'a self, ctx: &'a Context, core: &'a NodeCore) -> BoxFuture<'a, Result<T>>;

  fn cook_sync(&self, ctx: &Context, core: &NodeCore) -> Result<T>;
}

struct Bound<D: Dependencies, T> {
  dependencies: D,
  creator: Creator<D::Output, T>,
}

pub(crate) fn bind<D, T>(dependencies: D, creator: Creator<D::Output, T>) -> Box<dyn Recipe<T>>
where
  D: Dependencies,
  T: Send + 'static,
{
  Box::new(Bound {
    dependencies,
    creator,
  })
}

impl<D, T> Recipe<T> for Bound<D, T>
where
  D: Dependencies,
  T: Send + 'static,
{
  fn is_async(&self) -> bool {
    self.creator.is_async()
  }

  fn dependencies(&self) -> Vec<ProviderRef> {
    self.dependencies.nodes()
  }

  fn cook<'a>(&'a self, ctx: &'a Context, core: &'a NodeCore) -> BoxFuture<'a, Result<T>> {
    Box::pin(async move {
      let args = self.dependencies.fetch_all(ctx).await?;
      let created = match &self.creator {
        Creator::Call(create) => create(args),
        Creator::Async(create) => create(args).await,
      };
      created.map_err(|source| Error::construction(core.label(), source))
    })
  }

  fn cook_sync(&self, ctx: &Context, core: &NodeCore) -> Result<T> {
    let Creator::Call(create) = &self.creator else {
      return Err(Error::AsyncInSync {
        provider: core.label(),
      });
    };
    let args = self.dependencies.fetch_all_sync(ctx)?;
    create(args).map_err(|source| Error::construction(core.label(), source))
  }
}

enum Finalizer<T> {
  None,
  Sync(Box<dyn FnOnce(Arc<T>) + Send>),
  Async(Box<dyn FnOnce(Arc<T>) -> BoxFuture<'static, ()> + Send>),
}

/// A resource value together with the finalizer that releases it.
///
/// Without a finalizer the value is released by dropping the cache's
/// reference to it.
pub struct Acquired<T> {
  value: T,
  finalizer: Finalizer<T>,
}

impl<T: Send + Sync + 'static> Acquired<T> {
  pub fn new(value: T) -> Self {
    Self {
      value,
      finalizer: Finalizer::None,
    }
  }

  /// Runs `finalize` when the instance is torn down.
  pub fn on_release<F>(mut self, finalize: F) -> Self
  where
    F: FnOnce(Arc<T>) + Send + 'static,
  {
    self.finalizer = Finalizer::Sync(Box::new(finalize));
    self
  }

  /// Awaits `finalize` when the instance is torn down. Such a resource can
  /// only be torn down from an async teardown.
  pub fn on_release_async<F, Fut>(mut self, finalize: F) -> Self
  where
    F: FnOnce(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.finalizer = Finalizer::Async(Box::new(move |value| Box::pin(finalize(value))));
    self
  }

  pub(crate) fn into_lease(self) -> (Arc<T>, Option<Release>) {
    let value = Arc::new(self.value);
    let release = match self.finalizer {
      Finalizer::None => None,
      Finalizer::Sync(finalize) => {
        let value = Arc::clone(&value);
        Some(Release::Sync(Box::new(move || finalize(value))))
      }
      Finalizer::Async(finalize) => {
        let value = Arc::clone(&value);
        Some(Release::Async(Box::new(move || finalize(value))))
      }
    };
    (value, release)
  }
}

/// A finalizer already bound to its instance.
pub(crate) enum Release {
  Sync(Box<dyn FnOnce() + Send>),
  Async(Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>),
}

impl Release {
  pub(crate) fn is_async(&self) -> bool {
    matches!(self, Release::Async(_))
  }

  pub(crate) async fn run(self) {
    match self {
      Release::Sync(finalize) => finalize(),
      Release::Async(finalize) => finalize().await,
    }
  }

  /// Runs a sync finalizer. An async one is handed back untouched.
  pub(crate) fn run_sync(self) -> std::result::Result<(), Release> {
    match self {
      Release::Sync(finalize) => {
        finalize();
        Ok(())
      }
      async_release => Err(async_release),
    }
  }
}

/// Runs `release` from a sync teardown. An async finalizer either fails the
/// teardown or, when `raise_on_async` is off, is skipped with a warning.
pub(crate) fn release_sync(label: &str, release: Release, raise_on_async: bool) -> Result<()> {
  match release.run_sync() {
    Ok(()) => Ok(()),
    Err(_) if raise_on_async => Err(Error::CannotTearDownSync {
      provider: label.to_string(),
    }),
    Err(_) => {
      tracing::warn!(provider = %label, "skipping asynchronous finalizer during synchronous teardown");
      Ok(())
    }
  }
}
