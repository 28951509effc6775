// providers/src/teardown.rs

//! Teardown propagation across the dependents graph.

use crate::context::Context;
use crate::core::{ProviderId, ProviderNode, ProviderRef};
use crate::error::{Error, Result};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Every transitive dependent of `node`, breadth-first, each once.
pub fn dependents_breadth_first(node: &dyn ProviderNode) -> Vec<ProviderRef> {
  let mut visited = HashSet::from([node.core().id()]);
  let mut queue: VecDeque<ProviderRef> = node.core().dependents().into();
  let mut order = Vec::new();

  while let Some(next) = queue.pop_front() {
    if !visited.insert(next.core().id()) {
      continue;
    }
    queue.extend(next.core().dependents());
    order.push(next);
  }
  order
}

pub(crate) async fn tear_down(node: &dyn ProviderNode, ctx: &Context, propagate: bool) -> Result<()> {
  node.release(ctx).await?;
  if propagate {
    for dependent in dependents_breadth_first(node) {
      dependent.release(ctx).await?;
    }
  }
  Ok(())
}

pub(crate) fn tear_down_sync(node: &dyn ProviderNode, ctx: &Context, propagate: bool, raise_on_async: bool) -> Result<()> {
  let dependents = if propagate { dependents_breadth_first(node) } else { Vec::new() };
  if raise_on_async {
    ensure_sync_releasable(std::iter::once(node).chain(dependents.iter().map(|dependent| &**dependent)), ctx)?;
  }
  node.release_sync(ctx, raise_on_async)?;
  for dependent in &dependents {
    dependent.release_sync(ctx, raise_on_async)?;
  }
  Ok(())
}

pub(crate) fn release_dependents_sync(node: &dyn ProviderNode, ctx: &Context, raise_on_async: bool) -> Result<()> {
  let dependents = dependents_breadth_first(node);
  if raise_on_async {
    ensure_sync_releasable(dependents.iter().map(|dependent| &**dependent), ctx)?;
  }
  for dependent in &dependents {
    dependent.release_sync(ctx, raise_on_async)?;
  }
  Ok(())
}

/// Fails before anything is released if one of `nodes` needs an async teardown.
fn ensure_sync_releasable<'a>(nodes: impl IntoIterator<Item = &'a dyn ProviderNode>, ctx: &Context) -> Result<()> {
  match nodes.into_iter().find(|node| node.has_async_finalizer(ctx)) {
    Some(node) => Err(Error::CannotTearDownSync {
      provider: node.core().label(),
    }),
    None => Ok(()),
  }
}

/// Orders `nodes` and their transitive dependencies so that every provider
/// comes after all of its dependents. Among providers that are ready at the
/// same time, later definitions come first. Cycles fall back to reverse
/// definition order.
pub fn teardown_order(nodes: &[ProviderRef]) -> Vec<ProviderRef> {
  let mut remaining: BTreeMap<ProviderId, ProviderRef> = BTreeMap::new();
  let mut queue: VecDeque<ProviderRef> = nodes.iter().cloned().collect();
  while let Some(node) = queue.pop_front() {
    let id = node.core().id();
    if remaining.contains_key(&id) {
      continue;
    }
    queue.extend(node.dependencies());
    remaining.insert(id, node);
  }

  let mut blockers: HashMap<ProviderId, HashSet<ProviderId>> = HashMap::new();
  for (id, node) in &remaining {
    for dependency in node.dependencies() {
      blockers.entry(dependency.core().id()).or_default().insert(*id);
    }
  }

  let mut order = Vec::with_capacity(remaining.len());
  while !remaining.is_empty() {
    let ready: Vec<ProviderId> = remaining
      .keys()
      .rev()
      .filter(|id| blockers.get(id).map_or(true, HashSet::is_empty))
      .copied()
      .collect();

    if ready.is_empty() {
      tracing::warn!(left = remaining.len(), "dependency cycle during ordered teardown, falling back to definition order");
      while let Some((_, node)) = remaining.pop_last() {
        order.push(node);
      }
      break;
    }

    for id in ready {
      if let Some(node) = remaining.remove(&id) {
        for dependency in node.dependencies() {
          if let Some(waiting) = blockers.get_mut(&dependency.core().id()) {
            waiting.remove(&id);
          }
        }
        order.push(node);
      }
    }
  }
  order
}

/// Releases the caching providers among `nodes` in [`teardown_order`].
pub async fn tear_down_in_order(nodes: &[ProviderRef], ctx: &Context) -> Result<()> {
  for node in teardown_order(nodes) {
    if node.core().kind().owns_cache() {
      node.release(ctx).await?;
    }
  }
  Ok(())
}

pub fn tear_down_in_order_sync(nodes: &[ProviderRef], ctx: &Context, raise_on_async: bool) -> Result<()> {
  let order: Vec<ProviderRef> = teardown_order(nodes)
    .into_iter()
    .filter(|node| node.core().kind().owns_cache())
    .collect();
  if raise_on_async {
    ensure_sync_releasable(order.iter().map(|node| &**node), ctx)?;
  }
  for node in &order {
    node.release_sync(ctx, raise_on_async)?;
  }
  Ok(())
}
