//! Command abstractions.

use std::any::{Any, TypeId};
use std::fmt;

/// Trait that every command payload implements.
///
/// Whether a command creates an aggregate or mutates an existing one is
/// decided by how it is registered on the aggregate builder.
pub trait Command: Any + Send + Sync + fmt::Debug {
    /// Rust type name of the payload, for diagnostics.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl dyn Command {
    /// Returns the command as `T` if that is its concrete type.
    #[must_use]
    pub fn downcast_ref<T: Command>(&self) -> Option<&T> {
        let any: &dyn Any = self;
        any.downcast_ref::<T>()
    }

    /// `TypeId` of the concrete command type.
    #[must_use]
    pub fn payload_type_id(&self) -> TypeId {
        let any: &dyn Any = self;
        any.type_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Open;
    impl Command for Open {}

    #[derive(Debug)]
    struct Close;
    impl Command for Close {}

    #[test]
    fn test_downcast_matches_only_concrete_type() {
        let command: Box<dyn Command> = Box::new(Open);

        assert!(command.downcast_ref::<Open>().is_some());
        assert!(command.downcast_ref::<Close>().is_none());
        assert_eq!(command.payload_type_id(), TypeId::of::<Open>());
        assert!(command.type_name().ends_with("Open"));
    }
}
