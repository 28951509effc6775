// providers/src/providers/collections.rs

//! Aggregating providers. Both resolve their members in definition order on
//! every resolution and cache nothing themselves.

use crate::context::Context;
use crate::core::{node_common, provider_handle, register_dependents, DynProvider, NodeCore, Provider, ProviderKind, ProviderNode, ProviderRef};
use crate::error::Result;
use crate::overrides::OverrideStack;

use futures_util::future::BoxFuture;

use std::collections::HashMap;
use std::sync::Arc;

/// Resolves to the values of its members, in order.
pub struct List<T> {
  inner: Arc<ListInner<T>>,
}

struct ListInner<T> {
  core: NodeCore,
  overrides: OverrideStack<Vec<Arc<T>>>,
  members: Vec<DynProvider<T>>,
}

impl<T: Send + Sync + 'static> List<T> {
  pub fn new(members: impl IntoIterator<Item = DynProvider<T>>) -> Self {
    let inner = Arc::new(ListInner {
      core: NodeCore::new::<Vec<Arc<T>>>(ProviderKind::List),
      overrides: OverrideStack::default(),
      members: members.into_iter().collect(),
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }

  pub fn len(&self) -> usize {
    self.inner.members.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.members.is_empty()
  }
}

impl<T: Send + Sync + 'static> ListInner<T> {
  async fn resolve(&self, ctx: &Context) -> Result<Arc<Vec<Arc<T>>>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    let mut values = Vec::with_capacity(self.members.len());
    for member in &self.members {
      values.push(member.resolve(ctx).await?);
    }
    Ok(Arc::new(values))
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<Vec<Arc<T>>>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    let values = self
      .members
      .iter()
      .map(|member| member.resolve_sync(ctx))
      .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(values))
  }
}

impl<T: Send + Sync + 'static> ProviderNode for ListInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    self.members.iter().map(|member| member.node()).collect()
  }

  fn is_async(&self) -> bool {
    self.members.iter().any(|member| member.node().is_async())
  }

  fn release<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(async { Ok(()) })
  }

  fn release_sync(&self, _ctx: &Context, _raise_on_async: bool) -> Result<()> {
    Ok(())
  }
}

provider_handle!(List, Vec<Arc<T>>);

/// Resolves to a map from member name to member value.
pub struct Dict<T> {
  inner: Arc<DictInner<T>>,
}

struct DictInner<T> {
  core: NodeCore,
  overrides: OverrideStack<HashMap<String, Arc<T>>>,
  members: Vec<(String, DynProvider<T>)>,
}

impl<T: Send + Sync + 'static> Dict<T> {
  pub fn new<I, S>(members: I) -> Self
  where
    I: IntoIterator<Item = (S, DynProvider<T>)>,
    S: Into<String>,
  {
    let inner = Arc::new(DictInner {
      core: NodeCore::new::<HashMap<String, Arc<T>>>(ProviderKind::Dict),
      overrides: OverrideStack::default(),
      members: members.into_iter().map(|(name, member)| (name.into(), member)).collect(),
    });
    let node: ProviderRef = inner.clone();
    register_dependents(&node);
    Self { inner }
  }
}

impl<T: Send + Sync + 'static> DictInner<T> {
  async fn resolve(&self, ctx: &Context) -> Result<Arc<HashMap<String, Arc<T>>>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve(ctx).await;
    }
    let mut values = HashMap::with_capacity(self.members.len());
    for (name, member) in &self.members {
      values.insert(name.clone(), member.resolve(ctx).await?);
    }
    Ok(Arc::new(values))
  }

  fn resolve_sync(&self, ctx: &Context) -> Result<Arc<HashMap<String, Arc<T>>>> {
    if let Some(layer) = self.overrides.top() {
      return layer.resolve_sync(ctx);
    }
    let mut values = HashMap::with_capacity(self.members.len());
    for (name, member) in &self.members {
      values.insert(name.clone(), member.resolve_sync(ctx)?);
    }
    Ok(Arc::new(values))
  }
}

impl<T: Send + Sync + 'static> ProviderNode for DictInner<T> {
  node_common!();

  fn dependencies(&self) -> Vec<ProviderRef> {
    self.members.iter().map(|(_, member)| member.node()).collect()
  }

  fn is_async(&self) -> bool {
    self.members.iter().any(|(_, member)| member.node().is_async())
  }

  fn release<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
    Box::pin(async { Ok(()) })
  }

  fn release_sync(&self, _ctx: &Context, _raise_on_async: bool) -> Result<()> {
    Ok(())
  }
}

provider_handle!(Dict, HashMap<String, Arc<T>>);
