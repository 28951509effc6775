use fibre_providers::{BoxError, Context, Error, Factory, Provider, Singleton, ThreadLocalSingleton};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn counting_singleton() -> (Singleton<usize>, Arc<AtomicUsize>) {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let singleton = Singleton::new((), move |()| counter.fetch_add(1, Ordering::SeqCst));
  (singleton, calls)
}

#[test]
fn test_singleton_caches_first_value() {
  let (singleton, calls) = counting_singleton();
  let ctx = Context::new();

  let first = singleton.resolve_sync(&ctx).unwrap();
  let second = singleton.resolve_sync(&ctx).unwrap();

  assert!(Arc::ptr_eq(&first, &second));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(singleton.cached().as_deref(), Some(&0));
}

#[test]
fn test_tear_down_allows_recreation() {
  let (singleton, calls) = counting_singleton();
  let ctx = Context::new();
  singleton.resolve_sync(&ctx).unwrap();

  singleton.tear_down_sync(&ctx, false, true).unwrap();

  assert!(singleton.cached().is_none());
  assert_eq!(*singleton.resolve_sync(&ctx).unwrap(), 1);
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_racing_threads_share_one_creation() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let singleton = Singleton::new((), move |()| {
    thread::sleep(Duration::from_millis(25));
    counter.fetch_add(1, Ordering::SeqCst)
  });
  let barrier = Barrier::new(20);
  let ctx = Context::new();

  let values: Vec<Arc<usize>> = thread::scope(|s| {
    let mut handles = Vec::new();
    for _ in 0..20 {
      handles.push(s.spawn(|| {
        barrier.wait();
        singleton.resolve_sync(&ctx).unwrap()
      }));
    }
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_tasks_share_one_creation() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let singleton = Singleton::new_async((), move |()| {
    let counter = counter.clone();
    async move {
      tokio::time::sleep(Duration::from_millis(25)).await;
      Ok::<_, BoxError>(counter.fetch_add(1, Ordering::SeqCst))
    }
  });
  let ctx = Context::new();

  let handles: Vec<_> = (0..10)
    .map(|_| {
      let singleton = singleton.clone();
      let ctx = ctx.clone();
      tokio::spawn(async move { singleton.resolve(&ctx).await.unwrap() })
    })
    .collect();
  let mut values = Vec::new();
  for handle in handles {
    values.push(handle.await.unwrap());
  }

  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
}

#[tokio::test]
async fn test_cancelled_creation_leaves_cache_empty() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let singleton = Singleton::new_async((), move |()| {
    let counter = counter.clone();
    async move {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      if n == 0 {
        tokio::time::sleep(Duration::from_secs(5)).await;
      }
      Ok::<_, BoxError>(n)
    }
  });
  let ctx = Context::new();

  let timed_out = tokio::time::timeout(Duration::from_millis(20), singleton.resolve(&ctx)).await;
  assert!(timed_out.is_err());
  assert!(singleton.cached().is_none());

  let value = singleton.resolve(&ctx).await.unwrap();
  assert_eq!(*value, 1);
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_creation_is_retried() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let singleton = Singleton::try_new((), move |()| {
    let n = counter.fetch_add(1, Ordering::SeqCst);
    if n == 0 {
      Err("flaky")
    } else {
      Ok(n)
    }
  });
  let ctx = Context::new();

  assert!(matches!(singleton.resolve_sync(&ctx), Err(Error::Construction { .. })));
  assert!(singleton.cached().is_none());
  assert_eq!(*singleton.resolve_sync(&ctx).unwrap(), 1);
}

#[tokio::test]
async fn test_async_singleton_resolves_sync_once_cached() {
  let singleton = Singleton::new_async((), |()| async { Ok::<_, BoxError>(String::from("ready")) });
  let ctx = Context::new();

  assert!(matches!(singleton.resolve_sync(&ctx), Err(Error::AsyncInSync { .. })));
  singleton.resolve(&ctx).await.unwrap();

  assert_eq!(singleton.resolve_sync(&ctx).unwrap().as_str(), "ready");
}

#[test]
fn test_tear_down_propagates_to_transitive_dependents() {
  let root = Singleton::new((), |()| 1u32);
  let middle = Factory::new((root.clone(),), |(root,)| *root + 1);
  let leaf = Singleton::new((middle.clone(),), |(middle,)| *middle + 1);
  let ctx = Context::new();
  assert_eq!(*leaf.resolve_sync(&ctx).unwrap(), 3);

  root.tear_down_sync(&ctx, true, true).unwrap();

  assert!(root.cached().is_none());
  assert!(leaf.cached().is_none());
}

#[test]
fn test_tear_down_without_propagation_keeps_dependents() {
  let root = Singleton::new((), |()| 1u32);
  let leaf = Singleton::new((root.clone(),), |(root,)| *root + 1);
  let ctx = Context::new();
  leaf.resolve_sync(&ctx).unwrap();

  root.tear_down_sync(&ctx, false, true).unwrap();

  assert!(root.cached().is_none());
  assert_eq!(leaf.cached().as_deref(), Some(&2));
}

#[test]
fn test_circular_creation_is_reported() {
  let holder: Arc<parking_lot::Mutex<Option<Singleton<u32>>>> = Arc::new(parking_lot::Mutex::new(None));
  let inner = holder.clone();
  let ctx = Context::new();
  let ctx_inner = ctx.clone();
  let singleton = Singleton::try_new((), move |()| {
    let me = inner.lock().clone();
    match me {
      Some(me) => me.resolve_sync(&ctx_inner).map(|v| *v + 1),
      None => Ok(0),
    }
  });
  *holder.lock() = Some(singleton.clone());

  let err = singleton.resolve_sync(&ctx).unwrap_err();

  match err {
    Error::Construction { source, .. } => {
      assert!(source.downcast_ref::<Error>().is_some_and(|e| matches!(e, Error::CircularDependency { .. })));
    }
    other => panic!("expected a wrapped circular dependency, got {other:?}"),
  }
  holder.lock().take();
}

#[tokio::test]
async fn test_async_circular_creation_is_reported() {
  let holder: Arc<parking_lot::Mutex<Option<Singleton<u32>>>> = Arc::new(parking_lot::Mutex::new(None));
  let inner = holder.clone();
  let ctx = Context::new();
  let ctx_inner = ctx.clone();
  let singleton = Singleton::new_async((), move |()| {
    let me = inner.lock().clone();
    let ctx = ctx_inner.clone();
    async move {
      match me {
        Some(me) => me.resolve(&ctx).await.map(|v| *v + 1),
        None => Ok(0),
      }
    }
  });
  *holder.lock() = Some(singleton.clone());

  let result = tokio::time::timeout(Duration::from_secs(2), singleton.resolve(&ctx))
    .await
    .expect("self-referencing creation must fail instead of waiting on itself");

  match result {
    Err(Error::Construction { source, .. }) => {
      assert!(source.downcast_ref::<Error>().is_some_and(|e| matches!(e, Error::CircularDependency { .. })));
    }
    other => panic!("expected a wrapped circular dependency, got {other:?}"),
  }
  assert!(singleton.cached().is_none());
  holder.lock().take();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_caller_waits_for_task_led_creation() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let singleton = Singleton::new((), move |()| {
    thread::sleep(Duration::from_millis(150));
    counter.fetch_add(1, Ordering::SeqCst)
  });
  let ctx = Context::new();

  let leader = {
    let singleton = singleton.clone();
    let ctx = ctx.clone();
    tokio::spawn(async move { singleton.resolve(&ctx).await.unwrap() })
  };
  tokio::time::sleep(Duration::from_millis(30)).await;
  let waiter = {
    let singleton = singleton.clone();
    let ctx = ctx.clone();
    thread::spawn(move || singleton.resolve_sync(&ctx))
  };

  let led = leader.await.unwrap();
  let waited = tokio::task::spawn_blocking(move || waiter.join().unwrap())
    .await
    .unwrap()
    .unwrap();

  assert!(Arc::ptr_eq(&led, &waited));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_thread_local_singleton_is_per_thread() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let local = ThreadLocalSingleton::new((), move |()| counter.fetch_add(1, Ordering::SeqCst));
  let ctx = Context::new();

  let here = local.resolve_sync(&ctx).unwrap();
  let again = local.resolve_sync(&ctx).unwrap();
  let there = thread::scope(|s| s.spawn(|| local.resolve_sync(&ctx).unwrap()).join().unwrap());

  assert!(Arc::ptr_eq(&here, &again));
  assert_ne!(*here, *there);
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_thread_local_tear_down_clears_current_thread() {
  let (calls, local) = {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    (calls, ThreadLocalSingleton::new((), move |()| counter.fetch_add(1, Ordering::SeqCst)))
  };
  let ctx = Context::new();
  local.resolve_sync(&ctx).unwrap();

  local.tear_down_sync(&ctx, false, true).unwrap();

  assert_eq!(*local.resolve_sync(&ctx).unwrap(), 1);
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}
