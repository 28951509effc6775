// providers/src/dependencies.rs

//! Creator arguments.
//!
//! A provider's dependencies are a tuple. Each element is either another
//! provider, which resolves to `Arc<Output>`, or a [`Literal`], which passes
//! a clone of its value through. The tuple is resolved left to right and
//! handed to the creator in the same positions.

use crate::context::Context;
use crate::core::{Provider, ProviderRef};
use crate::error::{Error, Result};

use futures_util::future::{self, BoxFuture};

use std::sync::Arc;

pub trait Dependency: Send + Sync + 'static {
  type Output: Send + 'static;

  fn fetch<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Self::Output>>;

  fn fetch_sync(&self, ctx: &Context) -> Result<Self::Output>;

  /// The provider behind this argument, if it is one.
  fn provider_node(&self) -> Option<ProviderRef>;
}

impl<P: Provider> Dependency for P {
  type Output = Arc<P::Output>;

  fn fetch<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Self::Output>> {
    self.resolve(ctx)
  }

  fn fetch_sync(&self, ctx: &Context) -> Result<Self::Output> {
    self.resolve_sync(ctx)
  }

  fn provider_node(&self) -> Option<ProviderRef> {
    Some(self.node())
  }
}

/// A constant creator argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Literal<T>(pub T);

impl<T: Clone + Send + Sync + 'static> Dependency for Literal<T> {
  type Output = T;

  fn fetch<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<T>> {
    Box::pin(future::ready(Ok(self.0.clone())))
  }

  fn fetch_sync(&self, _ctx: &Context) -> Result<T> {
    Ok(self.0.clone())
  }

  fn provider_node(&self) -> Option<ProviderRef> {
    None
  }
}

/// An ordered set of creator arguments, implemented for `()` and tuples of
/// up to eight [`Dependency`] values.
pub trait Dependencies: Send + Sync + 'static {
  type Output: Send + 'static;

  fn fetch_all<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Self::Output>>;

  fn fetch_all_sync(&self, ctx: &Context) -> Result<Self::Output>;

  fn nodes(&self) -> Vec<ProviderRef>;
}

impl Dependencies for () {
  type Output = ();

  fn fetch_all<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(future::ready(Ok(())))
  }

  fn fetch_all_sync(&self, _ctx: &Context) -> Result<()> {
    Ok(())
  }

  fn nodes(&self) -> Vec<ProviderRef> {
    Vec::new()
  }
}

macro_rules! dependencies_tuple {
  ($($dep:ident),+) => {
    impl<$($dep: Dependency),+> Dependencies for ($($dep,)+) {
      type Output = ($(<$dep as Dependency>::Output,)+);

      #[allow(non_snake_case)]
      fn fetch_all<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<Self::Output>> {
        let ($($dep,)+) = self;
        Box::pin(async move { Ok::<_, Error>(($($dep.fetch(ctx).await?,)+)) })
      }

      #[allow(non_snake_case)]
      fn fetch_all_sync(&self, ctx: &Context) -> Result<Self::Output> {
        let ($($dep,)+) = self;
        Ok(($($dep.fetch_sync(ctx)?,)+))
      }

      #[allow(non_snake_case)]
      fn nodes(&self) -> Vec<ProviderRef> {
        let ($($dep,)+) = self;
        let mut nodes = Vec::new();
        $(nodes.extend($dep.provider_node());)+
        nodes
      }
    }
  };
}

dependencies_tuple!(A);
dependencies_tuple!(A, B);
dependencies_tuple!(A, B, C);
dependencies_tuple!(A, B, C, D);
dependencies_tuple!(A, B, C, D, E);
dependencies_tuple!(A, B, C, D, E, F);
dependencies_tuple!(A, B, C, D, E, F, G);
dependencies_tuple!(A, B, C, D, E, F, G, H);
