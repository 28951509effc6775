// providers/src/context.rs

//! The context stack.
//!
//! A [`Context`] is a cheap handle on the innermost frame of a stack of
//! frames. Entering pushes a frame and hands back a [`ContextGuard`]; exiting
//! tears down, in reverse creation order, every context-bound instance created
//! in that frame. Handles are passed explicitly to every resolve and teardown
//! call, so concurrent tasks each own their own stack.
//!
//! A frame may *host* a context-bound provider, meaning the provider's
//! instance is created and cached in that frame:
//!
//! - a frame entered with a named scope hosts every provider declared with that scope;
//! - a provider listed explicitly (directly or through a container) is hosted
//!   when its scope is `ANY`, equals the frame's effective scope, or the entry is forced;
//! - an unnamed frame entered with nothing to host (or with a registry) hosts
//!   every `ANY`-scoped provider.
//!
//! An instance cached in an outer frame is reused, unless a frame further in
//! lists the provider explicitly or is an unnamed host-all frame for an
//! `ANY`-scoped provider. Such frames start a fresh instance.

use crate::container::{Container, Registry};
use crate::core::{NodeCore, Provider, ProviderId, ProviderRef};
use crate::creation::CreationCell;
use crate::creator::Release;
use crate::error::{Error, Result};
use crate::scope::{Scope, ScopeConfig};

use parking_lot::Mutex;

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A value stored in a context's global dictionary.
pub type GlobalValue = Arc<dyn Any + Send + Sync>;

type Slot = Arc<dyn Any + Send + Sync>;

/// A finalizer waiting for its frame to exit.
pub(crate) struct PendingTeardown {
  provider: ProviderId,
  label: String,
  release: Release,
}

impl PendingTeardown {
  pub(crate) fn new(provider: ProviderId, label: String, release: Release) -> Self {
    Self {
      provider,
      label,
      release,
    }
  }

  pub(crate) fn label(&self) -> &str {
    &self.label
  }

  pub(crate) fn into_release(self) -> Release {
    self.release
  }
}

pub(crate) struct Frame {
  depth: usize,
  scope: Option<Scope>,
  effective_scope: Option<Scope>,
  parent: Option<Arc<Frame>>,
  hosted: HashSet<ProviderId>,
  hosts_all: bool,
  globals: Arc<HashMap<String, GlobalValue>>,
  states: HashMap<ProviderId, GlobalValue>,
  slots: Mutex<HashMap<ProviderId, Slot>>,
  pending: Mutex<Vec<PendingTeardown>>,
  closed: AtomicBool,
}

impl Frame {
  fn is_open(&self) -> bool {
    !self.closed.load(Ordering::Acquire)
  }

  fn hosts(&self, id: ProviderId, config: &ScopeConfig) -> bool {
    if self.hosted.contains(&id) {
      return true;
    }
    match &self.scope {
      Some(scope) => !config.scope.is_any() && *scope == config.scope,
      None => self.hosts_all && config.scope.is_any(),
    }
  }

  /// Whether this frame starts a fresh instance of the provider, shadowing
  /// any instance cached further out.
  fn resets(&self, id: ProviderId, config: &ScopeConfig) -> bool {
    self.hosted.contains(&id) || (self.scope.is_none() && self.hosts_all && config.scope.is_any())
  }

  fn slot<T: Send + Sync + 'static>(&self, id: ProviderId) -> Option<Arc<CreationCell<T>>> {
    let slot = self.slots.lock().get(&id).cloned()?;
    slot.downcast::<CreationCell<T>>().ok()
  }

  fn slot_or_insert<T: Send + Sync + 'static>(&self, id: ProviderId) -> Arc<CreationCell<T>> {
    let mut slots = self.slots.lock();
    if let Some(cell) = slots.get(&id).and_then(|slot| Arc::clone(slot).downcast::<CreationCell<T>>().ok()) {
      return cell;
    }
    let cell = Arc::new(CreationCell::<T>::new());
    slots.insert(id, cell.clone());
    cell
  }

  pub(crate) fn remove_slot(&self, id: ProviderId) {
    self.slots.lock().remove(&id);
  }

  /// Queues a finalizer for frame exit. Hands it back if the frame already closed.
  pub(crate) fn defer(&self, teardown: PendingTeardown) -> Option<PendingTeardown> {
    let mut pending = self.pending.lock();
    if !self.is_open() {
      return Some(teardown);
    }
    pending.push(teardown);
    None
  }

  pub(crate) fn take_pending(&self, id: ProviderId) -> Option<PendingTeardown> {
    let mut pending = self.pending.lock();
    let position = pending.iter().rposition(|teardown| teardown.provider == id)?;
    Some(pending.remove(position))
  }

  pub(crate) fn pending_is_async(&self, id: ProviderId) -> bool {
    self
      .pending
      .lock()
      .iter()
      .any(|teardown| teardown.provider == id && teardown.release.is_async())
  }

  fn first_async_pending(&self) -> Option<String> {
    self
      .pending
      .lock()
      .iter()
      .rev()
      .find(|teardown| teardown.release.is_async())
      .map(|teardown| teardown.label.clone())
  }

  /// Marks the frame closed and hands back its finalizers in creation order.
  fn begin_close(&self) -> Vec<PendingTeardown> {
    let pending = {
      let mut pending = self.pending.lock();
      self.closed.store(true, Ordering::Release);
      std::mem::take(&mut *pending)
    };
    self.slots.lock().clear();
    pending
  }

  async fn close(&self) {
    let pending = self.begin_close();
    for teardown in pending.into_iter().rev() {
      tracing::debug!(provider = %teardown.label, depth = self.depth, "releasing context instance");
      teardown.release.run().await;
    }
    tracing::debug!(scope = ?self.scope, depth = self.depth, "context exited");
  }

  fn close_sync(&self) {
    let pending = self.begin_close();
    for teardown in pending.into_iter().rev() {
      tracing::debug!(provider = %teardown.label, depth = self.depth, "releasing context instance");
      if teardown.release.run_sync().is_err() {
        tracing::warn!(
          provider = %teardown.label,
          depth = self.depth,
          "skipping asynchronous finalizer during synchronous context exit"
        );
      }
    }
    tracing::debug!(scope = ?self.scope, depth = self.depth, "context exited");
  }
}

/// Parameters for entering a context.
#[derive(Clone, Default)]
pub struct ContextOptions {
  scope: Option<Scope>,
  providers: Vec<ProviderRef>,
  members: Vec<ProviderRef>,
  force: bool,
  globals: Option<HashMap<String, GlobalValue>>,
  preserve_globals: bool,
  reset_all: bool,
}

impl ContextOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Names the scope of the new frame.
  pub fn scope(mut self, scope: impl Into<Scope>) -> Self {
    self.scope = Some(scope.into());
    self
  }

  /// Gives `provider` a fresh instance in the new frame. Entry fails with
  /// `InvalidContext` when the provider's declared scope does not fit, unless
  /// forced. An `ANY`-scoped provider fits only if the entry names no scope.
  pub fn provider<P: Provider>(mut self, provider: &P) -> Self {
    self.providers.push(provider.node());
    self
  }

  pub fn node(mut self, node: ProviderRef) -> Self {
    self.providers.push(node);
    self
  }

  /// Hosts every fitting context-bound provider of `container` and of its
  /// connected containers. Providers that do not fit are skipped.
  pub fn container(mut self, container: &Container) -> Self {
    self.members.extend(container.context_providers());
    self
  }

  /// Resets every `ANY`-scoped resource of every container in `registry`.
  pub fn registry(mut self, registry: &Registry) -> Self {
    self.members.extend(registry.context_providers());
    self.reset_all = true;
    self
  }

  /// Hosts explicitly listed providers even if their scope does not fit.
  pub fn force(mut self, force: bool) -> Self {
    self.force = force;
    self
  }

  pub fn global<V: Send + Sync + 'static>(mut self, key: impl Into<String>, value: V) -> Self {
    self
      .globals
      .get_or_insert_with(HashMap::new)
      .insert(key.into(), Arc::new(value));
    self
  }

  pub fn global_context(mut self, values: HashMap<String, GlobalValue>) -> Self {
    self.globals.get_or_insert_with(HashMap::new).extend(values);
    self
  }

  /// Starts the new frame's global dictionary from the parent's.
  pub fn preserve_global_context(mut self, preserve: bool) -> Self {
    self.preserve_globals = preserve;
    self
  }
}

impl fmt::Debug for ContextOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ContextOptions")
      .field("scope", &self.scope)
      .field("providers", &self.providers.len())
      .field("members", &self.members.len())
      .field("force", &self.force)
      .field("preserve_globals", &self.preserve_globals)
      .field("reset_all", &self.reset_all)
      .finish()
  }
}

/// Handle on the current position of a context stack. Empty by default.
#[derive(Clone, Default)]
pub struct Context {
  frame: Option<Arc<Frame>>,
}

impl Context {
  /// A handle with no active context.
  pub fn new() -> Self {
    Self::default()
  }

  fn frames(&self) -> impl Iterator<Item = &Arc<Frame>> + '_ {
    std::iter::successors(self.frame.as_ref(), |frame| frame.parent.as_ref()).filter(|frame| frame.is_open())
  }

  pub fn is_active(&self) -> bool {
    self.frames().next().is_some()
  }

  /// Number of open frames on the stack.
  pub fn depth(&self) -> usize {
    self.frames().count()
  }

  /// The innermost named scope. Unnamed frames inherit it.
  pub fn current_scope(&self) -> Option<Scope> {
    self.frames().next().and_then(|frame| frame.effective_scope.clone())
  }

  /// Pushes a frame. The guard must be exited, or dropped, to tear it down.
  pub fn enter(&self, options: ContextOptions) -> Result<ContextGuard> {
    self.push_frame(options, HashMap::new())
  }

  pub(crate) fn enter_state(&self, id: ProviderId, value: GlobalValue) -> Result<ContextGuard> {
    let options = ContextOptions::new().preserve_global_context(true);
    self.push_frame(options, HashMap::from([(id, value)]))
  }

  fn push_frame(&self, options: ContextOptions, states: HashMap<ProviderId, GlobalValue>) -> Result<ContextGuard> {
    if let Some(scope) = &options.scope {
      if scope.is_any() {
        return Err(Error::UnenterableScope { scope: scope.clone() });
      }
    }

    let parent = self.frames().next().cloned();
    let effective_scope = options.scope.clone().or_else(|| self.current_scope());
    // An unscoped provider fits only an entry that names no scope of its own.
    let fits = |config: &ScopeConfig| match (&options.scope, config.scope.is_any()) {
      (_, false) => Some(&config.scope) == effective_scope.as_ref(),
      (None, true) => true,
      (Some(_), true) => false,
    };

    let mut hosted = HashSet::new();
    for node in &options.providers {
      let Some(config) = node.scope_config() else {
        continue;
      };
      if fits(&config) || options.force {
        hosted.insert(node.core().id());
      } else {
        return Err(Error::invalid_context(
          node.core().label(),
          config.scope,
          effective_scope.clone(),
        ));
      }
    }
    for node in &options.members {
      if let Some(config) = node.scope_config() {
        if fits(&config) || options.force {
          hosted.insert(node.core().id());
        }
      }
    }

    let hosts_all = options.reset_all
      || (options.scope.is_none()
        && options.providers.is_empty()
        && options.members.is_empty()
        && options.globals.is_none()
        && states.is_empty());

    let globals = match (options.preserve_globals, &parent, options.globals) {
      (true, Some(parent), None) => Arc::clone(&parent.globals),
      (true, Some(parent), Some(values)) => {
        let mut merged = (*parent.globals).clone();
        merged.extend(values);
        Arc::new(merged)
      }
      (_, _, values) => Arc::new(values.unwrap_or_default()),
    };

    let depth = parent.as_ref().map_or(1, |parent| parent.depth + 1);
    let frame = Arc::new(Frame {
      depth,
      scope: options.scope,
      effective_scope,
      parent,
      hosted,
      hosts_all,
      globals,
      states,
      slots: Mutex::new(HashMap::new()),
      pending: Mutex::new(Vec::new()),
      closed: AtomicBool::new(false),
    });
    tracing::debug!(scope = ?frame.scope, depth, hosted = frame.hosted.len(), "context entered");

    Ok(ContextGuard {
      context: Context {
        frame: Some(Arc::clone(&frame)),
      },
      frame,
      exited: false,
    })
  }

  /// Runs `body` inside a new frame and exits it afterwards.
  ///
  /// If the returned future is dropped early the guard still closes the
  /// frame, synchronously.
  pub async fn scoped<F, Fut, R>(&self, options: ContextOptions, body: F) -> Result<R>
  where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = R>,
  {
    let guard = self.enter(options)?;
    let output = body(guard.context().clone()).await;
    guard.exit().await;
    Ok(output)
  }

  /// Sync counterpart of [`scoped`](Self::scoped). Async finalizers are skipped with a warning.
  pub fn scoped_sync<F, R>(&self, options: ContextOptions, body: F) -> Result<R>
  where
    F: FnOnce(&Context) -> R,
  {
    let mut guard = self.enter(options)?;
    let output = body(guard.context());
    guard.exit_sync(false)?;
    Ok(output)
  }

  /// Looks `key` up in the innermost frame's global dictionary.
  pub fn global<T: Send + Sync + 'static>(&self, key: &str) -> Result<Option<Arc<T>>> {
    let Some(frame) = self.frames().next() else {
      return Err(Error::ContextNotSet {
        target: format!("global context key '{key}'"),
      });
    };
    Ok(frame.globals.get(key).cloned().and_then(|value| value.downcast::<T>().ok()))
  }

  /// Snapshot of the innermost frame's global dictionary.
  pub fn globals(&self) -> Result<HashMap<String, GlobalValue>> {
    match self.frames().next() {
      Some(frame) => Ok((*frame.globals).clone()),
      None => Err(Error::ContextNotSet {
        target: "global context".to_string(),
      }),
    }
  }

  /// Finds the cell a context-bound provider resolves through. Walking
  /// outwards, an occupied cell wins unless a frame that resets the provider
  /// comes first. Otherwise the innermost hosting frame gets a new cell.
  pub(crate) fn locate<T: Send + Sync + 'static>(
    &self,
    core: &NodeCore,
    config: &ScopeConfig,
  ) -> Result<(Arc<Frame>, Arc<CreationCell<T>>)> {
    if !self.is_active() {
      return Err(Error::ContextNotSet { target: core.label() });
    }
    for frame in self.frames() {
      if let Some(cell) = frame.slot::<T>(core.id()) {
        if cell.is_occupied() {
          return Ok((Arc::clone(frame), cell));
        }
      }
      if frame.resets(core.id(), config) {
        return Ok((Arc::clone(frame), frame.slot_or_insert::<T>(core.id())));
      }
    }
    for frame in self.frames() {
      if frame.hosts(core.id(), config) {
        return Ok((Arc::clone(frame), frame.slot_or_insert::<T>(core.id())));
      }
    }
    Err(Error::invalid_context(
      core.label(),
      config.scope.clone(),
      self.current_scope(),
    ))
  }

  /// The innermost frame holding a ready instance of provider `id`.
  pub(crate) fn find_ready<T: Send + Sync + 'static>(&self, id: ProviderId) -> Option<(Arc<Frame>, Arc<CreationCell<T>>)> {
    self.frames().find_map(|frame| {
      let cell = frame.slot::<T>(id)?;
      cell.get().map(|_| (Arc::clone(frame), cell))
    })
  }

  pub(crate) fn state<T: Send + Sync + 'static>(&self, id: ProviderId) -> Option<Arc<T>> {
    let value = self.frames().find_map(|frame| frame.states.get(&id).cloned())?;
    value.downcast::<T>().ok()
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("depth", &self.depth())
      .field("scope", &self.current_scope())
      .finish()
  }
}

/// An entered frame. Dereferences to the [`Context`] positioned on it.
///
/// Dropping a guard that was not exited closes the frame synchronously;
/// asynchronous finalizers are then skipped with a warning.
pub struct ContextGuard {
  context: Context,
  frame: Arc<Frame>,
  exited: bool,
}

impl ContextGuard {
  pub fn context(&self) -> &Context {
    &self.context
  }

  /// Closes the frame, awaiting every finalizer in reverse creation order.
  pub async fn exit(mut self) {
    self.exited = true;
    self.frame.close().await;
  }

  /// Closes the frame without suspending.
  ///
  /// With `raise_on_async` set, a pending async finalizer makes this fail
  /// with `CannotTearDownSync` and leaves the frame open, so it can still be
  /// exited asynchronously.
  pub fn exit_sync(&mut self, raise_on_async: bool) -> Result<()> {
    if self.exited {
      return Ok(());
    }
    if raise_on_async {
      if let Some(provider) = self.frame.first_async_pending() {
        return Err(Error::CannotTearDownSync { provider });
      }
    }
    self.exited = true;
    self.frame.close_sync();
    Ok(())
  }
}

impl Deref for ContextGuard {
  type Target = Context;

  fn deref(&self) -> &Context {
    &self.context
  }
}

impl Drop for ContextGuard {
  fn drop(&mut self) {
    if !self.exited {
      tracing::warn!(depth = self.frame.depth, "context guard dropped without exit, closing synchronously");
      self.exited = true;
      self.frame.close_sync();
    }
  }
}

impl fmt::Debug for ContextGuard {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ContextGuard")
      .field("depth", &self.frame.depth)
      .field("scope", &self.frame.scope)
      .field("exited", &self.exited)
      .finish()
  }
}
