// providers/src/container.rs

//! Named groups of providers with batch lifecycle operations.

use crate::config::RuntimeConfig;
use crate::context::{Context, GlobalValue};
use crate::core::{Provider, ProviderId, ProviderKind, ProviderRef};
use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::teardown;

use dashmap::DashMap;
use parking_lot::RwLock;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A named set of providers.
///
/// Registration names each provider and, when the container has a default
/// scope, gives it to every `ANY`-scoped context resource. Connected child
/// containers take part in resource initialization, teardown and context
/// entry.
pub struct Container {
  name: String,
  default_scope: Option<Scope>,
  raise_on_async_teardown: bool,
  tear_down_children_on_override: bool,
  providers: DashMap<String, ProviderRef>,
  connected: RwLock<Vec<Arc<Container>>>,
}

impl Container {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      default_scope: None,
      raise_on_async_teardown: true,
      tear_down_children_on_override: false,
      providers: DashMap::new(),
      connected: RwLock::new(Vec::new()),
    }
  }

  pub fn with_default_scope(mut self, scope: impl Into<Scope>) -> Self {
    self.default_scope = Some(scope.into());
    self
  }

  pub fn from_config(name: impl Into<String>, config: &RuntimeConfig) -> Result<Self> {
    let mut container = Self::new(name);
    container.default_scope = config.default_scope()?;
    container.raise_on_async_teardown = config.teardown.raise_on_async;
    container.tear_down_children_on_override = config.overrides.tear_down_children;
    Ok(container)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn default_scope(&self) -> Option<&Scope> {
    self.default_scope.as_ref()
  }

  // --- Registration ---

  /// Adds `provider` under `name` and hands it back.
  pub fn register<P: Provider>(&self, name: &str, provider: P) -> P {
    self.register_node(name, provider.node());
    provider
  }

  pub fn register_node(&self, name: &str, node: ProviderRef) {
    node.core().set_name(name);
    if let Some(scope) = &self.default_scope {
      node.apply_default_scope(scope);
    }
    tracing::debug!(container = %self.name, provider = %name, id = %node.core().id(), "provider registered");
    if self.providers.insert(name.to_string(), node).is_some() {
      tracing::debug!(container = %self.name, provider = %name, "replaced existing registration");
    }
  }

  pub fn connect(&self, child: Arc<Container>) {
    tracing::debug!(container = %self.name, child = %child.name, "container connected");
    self.connected.write().push(child);
  }

  pub fn connected(&self) -> Vec<Arc<Container>> {
    self.connected.read().clone()
  }

  /// A member of this container or of a connected one.
  pub fn provider(&self, name: &str) -> Option<ProviderRef> {
    if let Some(node) = self.providers.get(name) {
      return Some(Arc::clone(node.value()));
    }
    self.connected.read().iter().find_map(|child| child.provider(name))
  }

  /// Own members in definition order.
  pub fn providers(&self) -> Vec<ProviderRef> {
    let mut nodes: Vec<ProviderRef> = self.providers.iter().map(|entry| Arc::clone(entry.value())).collect();
    nodes.sort_by_key(|node| node.core().id());
    nodes
  }

  /// Own and connected members in definition order, each once.
  pub fn all_providers(&self) -> Vec<ProviderRef> {
    let mut visited = HashSet::new();
    let mut nodes = BTreeMap::new();
    self.collect(&mut visited, &mut nodes);
    nodes.into_values().collect()
  }

  fn collect(&self, visited: &mut HashSet<usize>, nodes: &mut BTreeMap<ProviderId, ProviderRef>) {
    if !visited.insert(self as *const Container as usize) {
      return;
    }
    for entry in self.providers.iter() {
      nodes.insert(entry.value().core().id(), Arc::clone(entry.value()));
    }
    for child in self.connected.read().iter() {
      child.collect(visited, nodes);
    }
  }

  /// Context-bound members, own and connected.
  pub fn context_providers(&self) -> Vec<ProviderRef> {
    self
      .all_providers()
      .into_iter()
      .filter(|node| node.scope_config().is_some())
      .collect()
  }

  // --- Lifecycle ---

  /// Resolves every `Resource`, own and connected, in definition order.
  pub async fn init_resources(&self, ctx: &Context) -> Result<()> {
    for node in self.all_providers() {
      if node.core().kind() == ProviderKind::Resource {
        node.initialize(ctx).await?;
      }
    }
    tracing::debug!(container = %self.name, "resources initialized");
    Ok(())
  }

  pub fn init_resources_sync(&self, ctx: &Context) -> Result<()> {
    for node in self.all_providers() {
      if node.core().kind() == ProviderKind::Resource {
        node.initialize_sync(ctx)?;
      }
    }
    tracing::debug!(container = %self.name, "resources initialized");
    Ok(())
  }

  /// Releases every caching member so that no provider is released before
  /// the providers depending on it.
  pub async fn tear_down(&self, ctx: &Context) -> Result<()> {
    teardown::tear_down_in_order(&self.all_providers(), ctx).await?;
    tracing::debug!(container = %self.name, "container torn down");
    Ok(())
  }

  /// Sync teardown, raising on async finalizers as configured.
  pub fn tear_down_sync(&self, ctx: &Context) -> Result<()> {
    self.tear_down_sync_with(ctx, self.raise_on_async_teardown)
  }

  pub fn tear_down_sync_with(&self, ctx: &Context, raise_on_async: bool) -> Result<()> {
    teardown::tear_down_in_order_sync(&self.all_providers(), ctx, raise_on_async)?;
    tracing::debug!(container = %self.name, "container torn down");
    Ok(())
  }

  // --- Overrides ---

  /// Applies a batch of overrides by provider name. The batch is reverted
  /// when the returned guard drops. On error nothing stays applied.
  pub fn override_providers(&self, ctx: &Context, overrides: OverrideSet) -> Result<OverrideBatch> {
    let tear_down_children = overrides
      .tear_down_children
      .unwrap_or(self.tear_down_children_on_override);
    let mut batch = OverrideBatch { nodes: Vec::new() };

    for (name, value) in overrides.values {
      let node = self.provider(&name).ok_or_else(|| Error::UnknownProvider {
        container: self.name.clone(),
        name: name.clone(),
      })?;
      node.push_override_any(value)?;
      batch.nodes.push(node);
    }

    if tear_down_children {
      for node in &batch.nodes {
        teardown::release_dependents_sync(&**node, ctx, false)?;
      }
    }
    Ok(batch)
  }

  /// Pops the innermost override of every member, own and connected.
  pub fn reset_override(&self) {
    for node in self.all_providers() {
      node.pop_override();
    }
  }
}

impl fmt::Debug for Container {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Container")
      .field("name", &self.name)
      .field("default_scope", &self.default_scope)
      .field("providers", &self.providers.len())
      .field("connected", &self.connected.read().len())
      .finish()
  }
}

/// Named override values for [`Container::override_providers`].
#[derive(Default)]
pub struct OverrideSet {
  values: Vec<(String, GlobalValue)>,
  tear_down_children: Option<bool>,
}

impl OverrideSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with<V: Send + Sync + 'static>(self, name: impl Into<String>, value: V) -> Self {
    self.with_arc(name, Arc::new(value))
  }

  /// `value` must be an `Arc` of the provider's output type.
  pub fn with_arc(mut self, name: impl Into<String>, value: GlobalValue) -> Self {
    self.values.push((name.into(), value));
    self
  }

  /// Overrides the container's configured default.
  pub fn tear_down_children(mut self, tear_down: bool) -> Self {
    self.tear_down_children = Some(tear_down);
    self
  }
}

/// Reverts a batch of overrides when dropped.
#[must_use = "the overrides are reverted as soon as the batch is dropped"]
pub struct OverrideBatch {
  nodes: Vec<ProviderRef>,
}

impl OverrideBatch {
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn reset(self) {}
}

impl fmt::Debug for OverrideBatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OverrideBatch")
      .field("providers", &self.nodes.iter().map(|node| node.core().label()).collect::<Vec<_>>())
      .finish()
  }
}

impl Drop for OverrideBatch {
  fn drop(&mut self) {
    for node in self.nodes.drain(..).rev() {
      node.pop_override();
    }
  }
}

/// An explicit collection of containers, used where every container must
/// be reached at once.
#[derive(Default)]
pub struct Registry {
  containers: RwLock<Vec<Arc<Container>>>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&self, container: Arc<Container>) -> Arc<Container> {
    self.containers.write().push(Arc::clone(&container));
    container
  }

  pub fn containers(&self) -> Vec<Arc<Container>> {
    self.containers.read().clone()
  }

  pub fn get(&self, name: &str) -> Option<Arc<Container>> {
    self.containers.read().iter().find(|container| container.name() == name).cloned()
  }

  pub fn context_providers(&self) -> Vec<ProviderRef> {
    let mut seen = HashSet::new();
    self
      .containers()
      .iter()
      .flat_map(|container| container.context_providers())
      .filter(|node| seen.insert(node.core().id()))
      .collect()
  }

  /// Tears down every container, last registered first.
  pub async fn tear_down(&self, ctx: &Context) -> Result<()> {
    for container in self.containers().iter().rev() {
      container.tear_down(ctx).await?;
    }
    Ok(())
  }

  pub fn tear_down_sync(&self, ctx: &Context) -> Result<()> {
    for container in self.containers().iter().rev() {
      container.tear_down_sync(ctx)?;
    }
    Ok(())
  }
}

impl fmt::Debug for Registry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registry")
      .field("containers", &self.containers.read().len())
      .finish()
  }
}
