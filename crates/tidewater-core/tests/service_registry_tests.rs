//! Tests for `AggregateServiceRegistry` as the command entry point.

use std::sync::Arc;

use tidewater_core::{
    AggregateService, AggregateServiceRegistry, ConfigurationError, DomainError,
    InMemoryEventStore,
};
use tidewater_test_support::{COUNTER, counter_commands, counter_definition};

fn registry() -> AggregateServiceRegistry {
    let service = AggregateService::new(counter_definition(), Arc::new(InMemoryEventStore::new()));
    let mut registry = AggregateServiceRegistry::new();
    registry.register(Arc::new(service)).unwrap();
    registry
}

#[test]
fn test_second_service_for_same_type_is_rejected() {
    let mut registry = registry();
    let duplicate =
        AggregateService::new(counter_definition(), Arc::new(InMemoryEventStore::new()));

    let result = registry.register(Arc::new(duplicate));

    assert_eq!(
        result,
        Err(ConfigurationError::DuplicateService(COUNTER.into()))
    );
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_service_lookup_by_type() {
    let registry = registry();

    assert!(registry.service_for_type(COUNTER).is_some());
    assert!(registry.service_for_type("Gauge").is_none());
    assert_eq!(
        registry
            .all_services()
            .map(|s| s.aggregate_type().to_owned())
            .collect::<Vec<_>>(),
        vec![COUNTER.to_owned()]
    );
}

#[tokio::test]
async fn test_decoded_command_is_handled_by_owning_service() {
    // Arrange
    let registry = registry();
    let commands = counter_commands();
    let create = commands.decode("Create", b"null").unwrap();
    let increment_by = commands.decode("IncrementBy", b"2").unwrap();

    // Act
    registry
        .handle_command_for(COUNTER, "c-1", Some(0), create.as_ref())
        .await
        .unwrap();
    let written = registry
        .handle_command_for(COUNTER, "c-1", Some(1), increment_by.as_ref())
        .await
        .unwrap();

    // Assert
    assert_eq!(written.len(), 2);
    assert_eq!(written[1].info().version, 3);
}

#[tokio::test]
async fn test_unknown_aggregate_type_is_not_found() {
    let registry = registry();
    let create = counter_commands().decode("Create", b"null").unwrap();

    let result = registry
        .handle_command_for("Gauge", "g-1", None, create.as_ref())
        .await;

    assert!(matches!(result, Err(DomainError::NoSuchAggregateType(ref t)) if t == "Gauge"));
}

#[test]
fn test_unknown_command_name_is_not_found() {
    let result = counter_commands().decode("Decrement", b"null");

    assert!(matches!(result, Err(DomainError::NoSuchCommand(ref n)) if n == "Decrement"));
}
