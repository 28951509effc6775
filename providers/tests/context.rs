use fibre_providers::{
  Acquired, BoxError, Container, Context, ContextOptions, ContextResource, Error, Factory, Provider, Scope, State,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

// Each instance is named `<name><n>` so tests can tell instances apart.
fn tracked(log: &Log, name: &'static str) -> ContextResource<String> {
  let log = log.clone();
  let count = Arc::new(AtomicUsize::new(0));
  ContextResource::new((), move |()| {
    let id = format!("{name}{}", count.fetch_add(1, Ordering::SeqCst));
    log.lock().push(format!("open {id}"));
    let log = log.clone();
    Acquired::new(id).on_release(move |value| log.lock().push(format!("close {value}")))
  })
}

fn entries(log: &Log) -> Vec<String> {
  log.lock().clone()
}

#[test]
fn test_resolving_without_context_fails() {
  let log: Log = Arc::default();
  let resource = tracked(&log, "session");

  let err = resource.resolve_sync(&Context::new()).unwrap_err();

  assert!(matches!(err, Error::ContextNotSet { .. }));
  assert!(entries(&log).is_empty());
}

#[test]
fn test_instance_is_shared_in_frame_and_released_on_exit() {
  let log: Log = Arc::default();
  let resource = tracked(&log, "session");
  let ctx = Context::new();

  let mut guard = ctx.enter(ContextOptions::new()).unwrap();
  let first = resource.resolve_sync(&guard).unwrap();
  let second = resource.resolve_sync(&guard).unwrap();
  guard.exit_sync(true).unwrap();

  assert!(Arc::ptr_eq(&first, &second));
  assert_eq!(entries(&log), vec!["open session0", "close session0"]);
  assert!(!ctx.is_active());
}

#[test]
fn test_nested_reset_frame_gets_fresh_instance() {
  let log: Log = Arc::default();
  let resource = tracked(&log, "s");
  let ctx = Context::new();
  let mut outer = ctx.enter(ContextOptions::new()).unwrap();
  let outer_value = resource.resolve_sync(&outer).unwrap();

  let mut inner = outer.enter(ContextOptions::new()).unwrap();
  let inner_value = resource.resolve_sync(&inner).unwrap();
  assert_eq!(inner.depth(), 2);
  inner.exit_sync(true).unwrap();

  assert_eq!(inner_value.as_str(), "s1");
  assert!(Arc::ptr_eq(&outer_value, &resource.resolve_sync(&outer).unwrap()));
  outer.exit_sync(true).unwrap();
  assert_eq!(entries(&log), vec!["open s0", "open s1", "close s1", "close s0"]);
}

#[test]
fn test_finalizers_run_in_reverse_creation_order() {
  let log: Log = Arc::default();
  let first = tracked(&log, "a");
  let second = tracked(&log, "b");
  let third = tracked(&log, "c");
  let ctx = Context::new();

  let mut guard = ctx.enter(ContextOptions::new()).unwrap();
  second.resolve_sync(&guard).unwrap();
  first.resolve_sync(&guard).unwrap();
  third.resolve_sync(&guard).unwrap();
  guard.exit_sync(true).unwrap();

  assert_eq!(
    entries(&log),
    vec!["open b0", "open a0", "open c0", "close c0", "close a0", "close b0"]
  );
}

#[test]
fn test_dependent_is_released_before_its_dependency() {
  let log: Log = Arc::default();
  let connection = tracked(&log, "conn");
  let sink = log.clone();
  let transaction = ContextResource::new((connection.clone(),), move |(conn,)| {
    let id = format!("tx on {conn}");
    sink.lock().push(format!("open {id}"));
    let sink = sink.clone();
    Acquired::new(id).on_release(move |value| sink.lock().push(format!("close {value}")))
  });
  let ctx = Context::new();

  let mut guard = ctx.enter(ContextOptions::new()).unwrap();
  transaction.resolve_sync(&guard).unwrap();
  guard.exit_sync(true).unwrap();

  assert_eq!(
    entries(&log),
    vec!["open conn0", "open tx on conn0", "close tx on conn0", "close conn0"]
  );
}

#[tokio::test]
async fn test_cancelled_creation_leaves_frame_slot_empty() {
  let log: Log = Arc::default();
  let sink = log.clone();
  let calls = Arc::new(AtomicUsize::new(0));
  let resource = ContextResource::new_async((), move |()| {
    let n = calls.fetch_add(1, Ordering::SeqCst);
    let sink = sink.clone();
    async move {
      if n == 0 {
        tokio::time::sleep(Duration::from_secs(5)).await;
      }
      Ok::<_, BoxError>(Acquired::new(n).on_release(move |value| sink.lock().push(format!("close {value}"))))
    }
  });
  let ctx = Context::new();
  let guard = ctx.enter(ContextOptions::new()).unwrap();

  let timed_out = tokio::time::timeout(Duration::from_millis(20), resource.resolve(&guard)).await;
  assert!(timed_out.is_err());

  let value = resource.resolve(&guard).await.unwrap();
  guard.exit().await;

  assert_eq!(*value, 1);
  assert_eq!(entries(&log), vec!["close 1"]);
}

#[test]
fn test_named_scope_gates_creation() {
  let log: Log = Arc::default();
  let per_request = tracked(&log, "req").with_scope(Scope::REQUEST);
  let ctx = Context::new();

  let app = ctx.enter(ContextOptions::new().scope(Scope::APP)).unwrap();
  let err = per_request.resolve_sync(&app).unwrap_err();
  assert!(matches!(err, Error::InvalidContext { ref expected, .. } if *expected == Scope::REQUEST));

  let request = app.enter(ContextOptions::new().scope(Scope::REQUEST)).unwrap();
  assert_eq!(request.current_scope(), Some(Scope::REQUEST));
  assert_eq!(per_request.resolve_sync(&request).unwrap().as_str(), "req0");
}

#[test]
fn test_outer_instance_is_visible_from_inner_scope() {
  let log: Log = Arc::default();
  let per_app = tracked(&log, "app").with_scope(Scope::APP);
  let ctx = Context::new();

  let app = ctx.enter(ContextOptions::new().scope(Scope::APP)).unwrap();
  let outer_value = per_app.resolve_sync(&app).unwrap();
  let request = app.enter(ContextOptions::new().scope(Scope::REQUEST)).unwrap();

  assert!(Arc::ptr_eq(&outer_value, &per_app.resolve_sync(&request).unwrap()));
}

#[test]
fn test_strict_scope_rejects_resolution_from_other_scope() {
  let log: Log = Arc::default();
  let strict = tracked(&log, "app").with_scope(Scope::APP).strict_scope(true);
  let ctx = Context::new();

  let app = ctx.enter(ContextOptions::new().scope(Scope::APP)).unwrap();
  strict.resolve_sync(&app).unwrap();
  let request = app.enter(ContextOptions::new().scope(Scope::REQUEST)).unwrap();

  assert!(matches!(strict.resolve_sync(&request), Err(Error::InvalidContext { .. })));
}

#[test]
fn test_explicit_entry_checks_scope_unless_forced() {
  let log: Log = Arc::default();
  let per_request = tracked(&log, "req").with_scope(Scope::REQUEST);
  let ctx = Context::new();
  let app = ctx.enter(ContextOptions::new().scope(Scope::APP)).unwrap();

  let err = per_request.enter(&app, false).unwrap_err();
  assert!(matches!(err, Error::InvalidContext { .. }));

  let mut forced = per_request.enter(&app, true).unwrap();
  assert_eq!(per_request.resolve_sync(&forced).unwrap().as_str(), "req0");
  forced.exit_sync(true).unwrap();
  assert_eq!(entries(&log), vec!["open req0", "close req0"]);
}

#[test]
fn test_unscoped_provider_needs_force_in_named_entry() {
  let log: Log = Arc::default();
  let anywhere = tracked(&log, "any");
  let ctx = Context::new();

  let err = ctx
    .enter(ContextOptions::new().scope(Scope::APP).provider(&anywhere))
    .unwrap_err();
  assert!(matches!(err, Error::InvalidContext { .. }));

  let forced = ctx
    .enter(ContextOptions::new().scope(Scope::APP).provider(&anywhere).force(true))
    .unwrap();
  assert_eq!(anywhere.resolve_sync(&forced).unwrap().as_str(), "any0");
  drop(forced);

  let unnamed = ctx.enter(ContextOptions::new().provider(&anywhere)).unwrap();
  assert_eq!(anywhere.resolve_sync(&unnamed).unwrap().as_str(), "any1");
}

#[test]
fn test_any_scope_cannot_be_entered() {
  let err = Context::new()
    .enter(ContextOptions::new().scope(Scope::ANY))
    .unwrap_err();

  assert!(matches!(err, Error::UnenterableScope { .. }));
}

#[test]
fn test_global_context_values() {
  let ctx = Context::new();
  assert!(matches!(ctx.global::<u64>("request_id"), Err(Error::ContextNotSet { .. })));

  let outer = ctx
    .enter(ContextOptions::new().global("request_id", 7u64).global("user", String::from("ada")))
    .unwrap();
  assert_eq!(outer.global::<u64>("request_id").unwrap().as_deref(), Some(&7));
  assert!(outer.global::<String>("request_id").unwrap().is_none());

  let fresh = outer.enter(ContextOptions::new()).unwrap();
  assert!(fresh.global::<u64>("request_id").unwrap().is_none());
  drop(fresh);

  let preserved = outer
    .enter(ContextOptions::new().preserve_global_context(true).global("trace", true))
    .unwrap();
  assert_eq!(preserved.global::<u64>("request_id").unwrap().as_deref(), Some(&7));
  assert_eq!(preserved.globals().unwrap().len(), 3);
}

#[test]
fn test_state_is_visible_only_inside_init() {
  let state: State<String> = State::new();
  let greeting = Factory::new((state.clone(),), |(name,)| format!("hello {name}"));
  let ctx = Context::new();
  assert!(matches!(state.resolve_sync(&ctx), Err(Error::StateNotInitialized { .. })));

  let outer = ctx.enter(ContextOptions::new().global("tenant", 1u8)).unwrap();
  let guard = state.init(&outer, String::from("ada")).unwrap();
  assert_eq!(greeting.resolve_sync(&guard).unwrap().as_str(), "hello ada");
  assert_eq!(guard.global::<u8>("tenant").unwrap().as_deref(), Some(&1));
  drop(guard);

  assert!(matches!(state.resolve_sync(&outer), Err(Error::StateNotInitialized { .. })));
}

#[test]
fn test_dropped_guard_closes_frame() {
  let log: Log = Arc::default();
  let resource = tracked(&log, "s");
  let ctx = Context::new();

  {
    let guard = ctx.enter(ContextOptions::new()).unwrap();
    resource.resolve_sync(&guard).unwrap();
  }

  assert_eq!(entries(&log), vec!["open s0", "close s0"]);
}

#[test]
fn test_explicit_tear_down_releases_before_exit() {
  let log: Log = Arc::default();
  let resource = tracked(&log, "s");
  let ctx = Context::new();
  let mut guard = ctx.enter(ContextOptions::new()).unwrap();
  resource.resolve_sync(&guard).unwrap();

  resource.tear_down_sync(&guard, false, true).unwrap();
  let recreated = resource.resolve_sync(&guard).unwrap();
  guard.exit_sync(true).unwrap();

  assert_eq!(recreated.as_str(), "s1");
  assert_eq!(entries(&log), vec!["open s0", "close s0", "open s1", "close s1"]);
}

#[test]
fn test_container_default_scope_and_entry() {
  let log: Log = Arc::default();
  let container = Container::new("web").with_default_scope(Scope::REQUEST);
  let session = container.register("session", tracked(&log, "s"));
  let ctx = Context::new();
  assert_eq!(session.scope(), Scope::REQUEST);

  let unscoped = ctx.enter(ContextOptions::new().container(&container)).unwrap();
  assert!(matches!(session.resolve_sync(&unscoped), Err(Error::InvalidContext { .. })));
  drop(unscoped);

  let request = ctx.enter(ContextOptions::new().scope(Scope::REQUEST)).unwrap();
  let outer_value = session.resolve_sync(&request).unwrap();
  let nested = request.enter(ContextOptions::new().container(&container)).unwrap();
  let nested_value = session.resolve_sync(&nested).unwrap();

  assert_eq!(outer_value.as_str(), "s0");
  assert_eq!(nested_value.as_str(), "s1");
}

#[tokio::test]
async fn test_scoped_body_exits_frame() {
  let log: Log = Arc::default();
  let resource = tracked(&log, "s").with_scope(Scope::REQUEST);
  let ctx = Context::new();

  let handle = resource.clone();
  let value = ctx
    .scoped(ContextOptions::new().scope(Scope::REQUEST), |scoped| async move {
      handle.resolve(&scoped).await
    })
    .await
    .unwrap()
    .unwrap();

  assert_eq!(value.as_str(), "s0");
  assert_eq!(entries(&log), vec!["open s0", "close s0"]);
}

#[tokio::test]
async fn test_async_finalizer_blocks_sync_exit() {
  let log: Log = Arc::default();
  let sink = log.clone();
  let resource = ContextResource::new_async((), move |()| {
    let sink = sink.clone();
    async move {
      Ok::<_, BoxError>(Acquired::new(5u32).on_release_async(move |value| async move {
        sink.lock().push(format!("close {value}"));
      }))
    }
  });
  let ctx = Context::new();
  let mut guard = ctx.enter(ContextOptions::new()).unwrap();
  resource.resolve(&guard).await.unwrap();

  let err = guard.exit_sync(true).unwrap_err();
  assert!(matches!(err, Error::CannotTearDownSync { .. }));
  assert!(guard.is_active());

  guard.exit().await;
  assert_eq!(entries(&log), vec!["close 5"]);
}
