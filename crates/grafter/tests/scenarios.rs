// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for declaring, building and resolving services using only the public API.

use std::io;
use std::sync::Arc;

use grafter::{
    DeclarationError, Dependency, Error, InjectionSite, Injector, InstantiationMode, Key, MemberKind, Parameter, Provide, Signature,
};
use rstest::rstest;
use testing_aids::CallCounter;

struct Object(usize);

#[derive(Debug)]
struct Reporter;

#[derive(Debug)]
struct A;

struct B;

struct Bystander;

fn counting_objects(counter: &CallCounter) -> Provide {
    let counter = counter.clone();
    Provide::factory(move |_| Ok(Object(counter.hit())))
}

#[test]
fn singleton_returns_the_same_instance() {
    let counter = CallCounter::new();
    let calls = counter.clone();
    let injector = Injector::builder()
        .provide(Provide::factory(move |_| {
            calls.hit();
            Ok(String::from("A"))
        }))
        .unwrap()
        .build()
        .unwrap();

    let first = injector.get::<String>().unwrap().unwrap();
    let second = injector.get::<String>().unwrap().unwrap();

    assert_eq!(first.as_str(), "A");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(counter.count(), 1);
}

#[rstest]
#[case::singleton(InstantiationMode::Singleton)]
#[case::lazy(InstantiationMode::Lazy)]
fn memoized_modes_produce_once(#[case] mode: InstantiationMode) {
    let counter = CallCounter::new();
    let injector = Injector::builder()
        .provide(counting_objects(&counter).mode(mode))
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(counter.count(), 0);
    let first = injector.use_service::<Object>().unwrap();
    let second = injector.use_service::<Object>().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(counter.count(), 1);
}

#[test]
fn prototype_returns_a_new_instance_every_time() {
    let counter = CallCounter::new();
    let injector = Injector::builder()
        .provide(counting_objects(&counter).prototype())
        .unwrap()
        .build()
        .unwrap();

    let instances: Vec<_> = (0..5).map(|_| injector.use_service::<Object>().unwrap()).collect();

    assert_eq!(counter.count(), 5);
    assert!(!Arc::ptr_eq(&instances[0], &instances[1]));
    let produced: Vec<_> = instances.iter().map(|object| object.0).collect();
    assert_eq!(produced, vec![0, 1, 2, 3, 4]);
}

#[test]
fn prototype_sees_the_current_instance_of_its_dependencies() {
    struct Holder(Arc<Object>);

    let counter = CallCounter::new();
    let injector = Injector::builder()
        .provide(counting_objects(&counter))
        .unwrap()
        .provide(
            Provide::factory(|args| Ok(Holder(args.get(0)?)))
                .depends_on(Dependency::required::<Object>())
                .prototype(),
        )
        .unwrap()
        .build()
        .unwrap();

    let first = injector.use_service::<Holder>().unwrap();
    let second = injector.use_service::<Holder>().unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first.0, &second.0));
    assert_eq!(counter.count(), 1);
}

#[test]
fn missing_dependency_fails_the_build() {
    let counter = CallCounter::new();
    let error = Injector::builder()
        .provide(counting_objects(&counter))
        .unwrap()
        .provide(Provide::factory(|_| Ok(Reporter)).depends_on(Dependency::required::<i32>()))
        .unwrap()
        .build()
        .unwrap_err();

    let Error::UnresolvedDependency(error) = error else {
        panic!("expected an unresolved dependency, got {error}");
    };
    assert_eq!(error.key(), &Key::of::<i32>());
    assert!(error.owner().ends_with("Reporter"));
    assert!(error.to_string().contains("Reporter"));
    assert_eq!(error.available(), &[Key::of::<Object>(), Key::of::<Reporter>()]);
    assert_eq!(counter.count(), 0);
}

#[test]
fn unresolved_parameter_is_marked_in_the_signature() {
    let signature = Signature::new("app::Client", "new", MemberKind::Constructor)
        .parameter(Parameter::of::<String>("endpoint"))
        .parameter(Parameter::of::<u32>("retries"));

    let error = Injector::builder()
        .provide(Provide::instance(String::from("https://example.com")))
        .unwrap()
        .provide(Provide::with_signature(&signature, |_| Ok(Reporter)))
        .unwrap()
        .build()
        .unwrap_err();

    let Error::UnresolvedDependency(error) = error else {
        panic!("expected an unresolved dependency, got {error}");
    };
    assert_eq!(error.owner(), "app::Client");
    assert_eq!(error.member(), "new");
    assert_eq!(error.kind(), MemberKind::Constructor);
    assert_eq!(error.index(), 1);
    assert_eq!(error.parameters()[1], "-> u32 <-");
    assert!(error.to_string().contains("constructor app::Client::new("));
}

#[test]
fn duplicate_key_names_both_declarations() {
    let builder = Injector::builder().provide(Provide::instance(String::from("P3"))).unwrap();
    let error = builder.provide(Provide::instance(String::from("P4"))).unwrap_err();

    let Error::DuplicateKey(error) = error else {
        panic!("expected a duplicate key, got {error}");
    };
    assert_eq!(error.key(), &Key::of::<String>());
    assert_eq!(error.existing().file(), file!());
    assert!(error.existing().line() < error.rejected().line());
}

#[test]
fn qualified_keys_are_distinct_services() {
    let injector = Injector::builder()
        .provide(Provide::instance(String::from("primary")).qualified("primary"))
        .unwrap()
        .provide(Provide::instance(String::from("replica")).qualified("replica"))
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(injector.use_qualified::<String>("primary").unwrap().as_str(), "primary");
    assert_eq!(injector.use_qualified::<String>("replica").unwrap().as_str(), "replica");
    assert!(injector.get::<String>().unwrap().is_none());
}

#[test]
fn optional_dependencies_may_be_absent() {
    struct Settings {
        timeout: Option<Arc<u64>>,
        retries: Option<Arc<u8>>,
    }

    let injector = Injector::builder()
        .provide(Provide::instance(3_u8))
        .unwrap()
        .provide(
            Provide::factory(|args| {
                Ok(Settings {
                    timeout: args.optional(0)?,
                    retries: args.optional(1)?,
                })
            })
            .depends_on(Dependency::optional::<u64>())
            .depends_on(Dependency::optional::<u8>()),
        )
        .unwrap()
        .build()
        .unwrap();

    let settings = injector.use_service::<Settings>().unwrap();
    assert!(settings.timeout.is_none());
    assert_eq!(settings.retries.as_deref(), Some(&3));
}

#[test]
fn prototypes_receive_their_injection_site() {
    struct Logger(InjectionSite);

    struct Service(Arc<Logger>);

    let injector = Injector::builder()
        .provide(
            Provide::factory(|args| Ok(Logger(args.site().cloned().ok_or("no injection site")?)))
                .depends_on(Dependency::site())
                .prototype(),
        )
        .unwrap()
        .provide(Provide::factory(|args| Ok(Service(args.get(0)?))).depends_on(Dependency::required::<Logger>()))
        .unwrap()
        .build()
        .unwrap();

    let direct = injector.use_service::<Logger>().unwrap();
    assert_eq!(direct.0.key(), &Key::of::<Logger>());
    assert!(direct.0.requester().is_none());

    let service = injector.use_service::<Service>().unwrap();
    assert_eq!(service.0.0.requester(), Some(&Key::of::<Service>()));
    assert_eq!(service.0.0.index(), Some(0));
}

#[rstest]
#[case::singleton(InstantiationMode::Singleton)]
#[case::lazy(InstantiationMode::Lazy)]
fn shared_services_cannot_depend_on_the_injection_site(#[case] mode: InstantiationMode) {
    let error = Injector::builder()
        .provide(Provide::factory(|_| Ok(Reporter)).depends_on(Dependency::site()).mode(mode))
        .unwrap_err();

    assert!(matches!(
        error,
        Error::Declaration(DeclarationError::InjectionSiteOnSharedNode { mode: found, .. }) if found == mode
    ));
}

#[rstest]
#[case::lazy(InstantiationMode::Lazy)]
#[case::prototype(InstantiationMode::Prototype)]
fn fixed_instances_are_always_singletons(#[case] mode: InstantiationMode) {
    let error = Injector::builder().provide(Provide::instance(1_u8).mode(mode)).unwrap_err();
    assert!(matches!(error, Error::Declaration(DeclarationError::FixedInstanceMode { .. })));
}

#[test]
fn key_override_must_keep_the_type() {
    let error = Injector::builder()
        .provide(Provide::instance(1_u8).key(Key::of::<u16>()))
        .unwrap_err();
    assert!(matches!(error, Error::Declaration(DeclarationError::KeyTypeMismatch { .. })));

    let injector = Injector::builder()
        .provide(Provide::instance(1_u8).key(Key::qualified::<u8>("one")))
        .unwrap()
        .build()
        .unwrap();
    assert!(injector.has_service(&Key::qualified::<u8>("one")));
}

#[test]
fn factory_errors_name_the_failing_service() {
    let injector = Injector::builder()
        .provide(Provide::factory(|_| Err::<u8, _>(io::Error::other("boom").into())))
        .unwrap()
        .provide(Provide::factory(|_| Ok(Reporter)).depends_on(Dependency::required::<u8>()))
        .unwrap()
        .build()
        .unwrap();

    let error = injector.use_service::<Reporter>().unwrap_err();
    let Error::Materialization { key, source } = &error else {
        panic!("expected a materialization failure, got {error}");
    };
    assert_eq!(key, &Key::of::<u8>());
    assert_eq!(source.to_string(), "boom");
    assert_eq!(error.kind(), "materialization");
}

#[test]
fn failed_materialization_is_retried() {
    let counter = CallCounter::new();
    let calls = counter.clone();
    let injector = Injector::builder()
        .provide(Provide::factory(move |_| {
            if calls.hit() == 0 {
                Err(io::Error::other("not ready").into())
            } else {
                Ok(Object(1))
            }
        }))
        .unwrap()
        .build()
        .unwrap();

    assert!(injector.use_service::<Object>().is_err());
    let first = injector.use_service::<Object>().unwrap();
    let second = injector.use_service::<Object>().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(counter.count(), 2);
}

#[test]
fn cycle_fails_on_first_access_and_spares_other_services() {
    let injector = Injector::builder()
        .provide(Provide::factory(|_| Ok(A)).depends_on(Dependency::required::<B>()))
        .unwrap()
        .provide(Provide::factory(|_| Ok(B)).depends_on(Dependency::required::<A>()))
        .unwrap()
        .provide(Provide::factory(|_| Ok(Bystander)))
        .unwrap()
        .build()
        .unwrap();

    let error = injector.use_service::<A>().unwrap_err();
    let Error::CyclicDependency(cycle) = &error else {
        panic!("expected a cycle, got {error}");
    };
    assert_eq!(cycle.path(), &[Key::of::<A>(), Key::of::<B>(), Key::of::<A>()]);

    assert!(injector.use_service::<Bystander>().is_ok());

    // Nothing is memoized, so the cycle is reported again, starting where it is entered.
    let Err(Error::CyclicDependency(cycle)) = injector.use_service::<B>() else {
        panic!("expected a cycle");
    };
    assert_eq!(cycle.path(), &[Key::of::<B>(), Key::of::<A>(), Key::of::<B>()]);
}

#[test]
fn wrong_type_is_reported_for_a_key() {
    let injector = Injector::builder()
        .provide(Provide::instance(1_u8))
        .unwrap()
        .build()
        .unwrap();

    assert!(matches!(
        injector.get_by_key::<u32>(&Key::of::<u8>()),
        Err(Error::TypeMismatch { .. })
    ));
    assert_eq!(*injector.use_key::<u8>(&Key::of::<u8>()).unwrap(), 1);
}
