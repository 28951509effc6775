use fibre_providers::{BoxError, Context, Error, Factory, Literal, Object, Provider, ProviderKind, Singleton};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_factory_creates_new_value_each_time() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let factory = Factory::new((), move |()| counter.fetch_add(1, Ordering::SeqCst));
  let ctx = Context::new();

  let first = factory.resolve_sync(&ctx).unwrap();
  let second = factory.resolve_sync(&ctx).unwrap();

  assert_eq!((*first, *second), (0, 1));
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_dependencies_are_passed_in_position() {
  let base = Singleton::new((), |()| 40u32);
  let sum = Factory::new((base.clone(), Literal(2u32)), |(base, extra)| *base + extra);

  assert_eq!(*sum.resolve_sync(&Context::new()).unwrap(), 42);
}

#[test]
fn test_creator_error_carries_provider_label() {
  let failing: Factory<u32> = Factory::try_new((), |()| Err::<u32, _>("backend unavailable"));

  let err = failing.resolve_sync(&Context::new()).unwrap_err();

  match err {
    Error::Construction { provider, source } => {
      assert!(provider.starts_with("Factory<"), "unexpected label {provider}");
      assert_eq!(source.to_string(), "backend unavailable");
    }
    other => panic!("expected a construction error, got {other:?}"),
  }
}

#[test]
fn test_async_factory_cannot_resolve_sync() {
  let factory = Factory::new_async((), |()| async { Ok::<_, BoxError>(5u8) });

  assert!(factory.node().is_async());
  assert!(matches!(
    factory.resolve_sync(&Context::new()),
    Err(Error::AsyncInSync { .. })
  ));
}

#[test]
fn test_sync_factory_over_async_dependency_fails_sync() {
  let source = Factory::new_async((), |()| async { Ok::<_, BoxError>(3u8) });
  let doubled = Factory::new((source,), |(value,)| *value * 2);

  assert!(matches!(
    doubled.resolve_sync(&Context::new()),
    Err(Error::AsyncInSync { .. })
  ));
}

#[tokio::test]
async fn test_async_factory_resolves_dependencies() {
  let config = Singleton::new((), |()| String::from("postgres://db"));
  let client = Factory::new_async((config.clone(),), |(url,)| async move {
    Ok::<_, BoxError>(format!("client for {url}"))
  });
  let ctx = Context::new();

  let value = client.resolve(&ctx).await.unwrap();

  assert_eq!(value.as_str(), "client for postgres://db");
}

#[tokio::test]
async fn test_bare_creators_resolve_like_the_provider() {
  let factory = Factory::new((Literal(7u32),), |(n,)| n * 3);
  let ctx = Context::new();

  let sync_create = factory.sync_creator(&ctx);
  let async_create = factory.async_creator(&ctx);

  assert_eq!(*sync_create().unwrap(), 21);
  assert_eq!(*async_create().await.unwrap(), 21);
}

#[test]
fn test_dyn_provider_shares_identity() {
  let factory = Factory::new((), |()| vec![1, 2, 3]);
  let erased = factory.clone().into_dyn();

  assert_eq!(erased.id(), factory.id());
  assert_eq!(*erased.resolve_sync(&Context::new()).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_object_returns_the_same_value() {
  let object = Object::new(String::from("fixed"));
  let ctx = Context::new();

  let first = object.resolve_sync(&ctx).unwrap();
  let second = object.resolve_sync(&ctx).unwrap();

  assert!(Arc::ptr_eq(&first, &second));
  assert_eq!(object.node().core().kind(), ProviderKind::Object);
}

#[test]
fn test_dependents_are_recorded_on_construction() {
  let base = Singleton::new((), |()| 1u8);
  let first = Factory::new((base.clone(),), |(b,)| *b);
  let second = Factory::new((base.clone(), first.clone()), |(b, f)| *b + *f);

  let dependents: Vec<_> = base.node().core().dependents().iter().map(|d| d.core().id()).collect();

  assert_eq!(dependents, vec![first.id(), second.id()]);
  assert_eq!(second.node().dependencies().len(), 2);
}
