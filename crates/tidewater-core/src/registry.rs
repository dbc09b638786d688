//! Name/type registries for event and command payloads.
//!
//! Registries are populated once at startup and read-only afterwards. Wire
//! names are stable strings stored alongside serialized payloads.

use std::any::{TypeId, type_name};
use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::command::Command;
use crate::error::{ConfigurationError, DomainError};
use crate::event::{Event, EventDecoder, LazyEvent};

type EventEncoder = fn(&dyn Event) -> Result<Vec<u8>, serde_json::Error>;
type CommandDecoder = fn(&[u8]) -> Result<Box<dyn Command>, serde_json::Error>;

fn decode_event_as<T>(raw: &[u8]) -> Result<Box<dyn Event>, serde_json::Error>
where
    T: Event + DeserializeOwned,
{
    Ok(Box::new(serde_json::from_slice::<T>(raw)?))
}

fn encode_event_as<T>(event: &dyn Event) -> Result<Vec<u8>, serde_json::Error>
where
    T: Event + Serialize,
{
    match event.downcast_ref::<T>() {
        Some(event) => serde_json::to_vec(event),
        None => Err(serde::ser::Error::custom(format!(
            "payload is not a {}",
            type_name::<T>()
        ))),
    }
}

fn decode_command_as<T>(raw: &[u8]) -> Result<Box<dyn Command>, serde_json::Error>
where
    T: Command + DeserializeOwned,
{
    Ok(Box::new(serde_json::from_slice::<T>(raw)?))
}

struct EventEntry {
    type_name: &'static str,
    decode: EventDecoder,
    encode: EventEncoder,
}

/// Bidirectional mapping between event wire names and payload types.
pub struct EventRegistry {
    by_name: HashMap<String, EventEntry>,
    by_type: HashMap<TypeId, String>,
}

impl EventRegistry {
    /// Starts an empty registry.
    #[must_use]
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::default()
    }

    /// Rust type name registered under `name`.
    #[must_use]
    pub fn type_for_name(&self, name: &str) -> Option<&'static str> {
        self.by_name.get(name).map(|entry| entry.type_name)
    }

    /// Wire name registered for the payload type `T`.
    #[must_use]
    pub fn name_for_type<T: Event>(&self) -> Option<&str> {
        self.by_type.get(&TypeId::of::<T>()).map(String::as_str)
    }

    /// Wire name registered for the payload's runtime type.
    #[must_use]
    pub fn name_of(&self, event: &dyn Event) -> Option<&str> {
        self.by_type
            .get(&event.payload_type_id())
            .map(String::as_str)
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Serializes a payload, returning its wire name and bytes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoSuchEvent` if the payload type is not
    /// registered, or `DomainError::Serialization` if encoding fails.
    pub fn encode(&self, event: &dyn Event) -> Result<(&str, Vec<u8>), DomainError> {
        let name = self
            .name_of(event)
            .ok_or_else(|| DomainError::NoSuchEvent(event.type_name().to_owned()))?;
        let entry = self
            .by_name
            .get(name)
            .ok_or_else(|| DomainError::NoSuchEvent(name.to_owned()))?;
        let raw = (entry.encode)(event)
            .map_err(|e| DomainError::Serialization(format!("failed to encode {name}: {e}")))?;
        Ok((name, raw))
    }

    /// Decodes a payload stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoSuchEvent` if `name` is not registered, or
    /// `DomainError::Serialization` if decoding fails.
    pub fn decode(&self, name: &str, raw: &[u8]) -> Result<Box<dyn Event>, DomainError> {
        let entry = self
            .by_name
            .get(name)
            .ok_or_else(|| DomainError::NoSuchEvent(name.to_owned()))?;
        (entry.decode)(raw)
            .map_err(|e| DomainError::Serialization(format!("failed to decode {name}: {e}")))
    }

    /// Wraps a payload stored under `name` for decoding on first read.
    ///
    /// Returns `None` if `name` is not registered.
    #[must_use]
    pub fn lazy(&self, name: &str, raw: Vec<u8>) -> Option<LazyEvent> {
        self.by_name
            .get(name)
            .map(|entry| LazyEvent::new(name, raw, entry.decode))
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("EventRegistry").field("names", &names).finish()
    }
}

/// Collects event registrations.
#[derive(Default)]
pub struct EventRegistryBuilder {
    entries: Vec<(String, TypeId, EventEntry)>,
}

impl EventRegistryBuilder {
    /// Registers payload type `T` under `name`.
    #[must_use]
    pub fn register<T>(mut self, name: impl Into<String>) -> Self
    where
        T: Event + Serialize + DeserializeOwned,
    {
        self.entries.push((
            name.into(),
            TypeId::of::<T>(),
            EventEntry {
                type_name: type_name::<T>(),
                decode: decode_event_as::<T>,
                encode: encode_event_as::<T>,
            },
        ));
        self
    }

    /// Validates and freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if a name or a type appears twice.
    pub fn build(self) -> Result<EventRegistry, ConfigurationError> {
        let mut by_name = HashMap::new();
        let mut by_type = HashMap::new();
        for (name, type_id, entry) in self.entries {
            if by_name.contains_key(&name) {
                return Err(ConfigurationError::DuplicateName(name));
            }
            if by_type.insert(type_id, name.clone()).is_some() {
                return Err(ConfigurationError::DuplicateType(entry.type_name));
            }
            by_name.insert(name, entry);
        }
        Ok(EventRegistry { by_name, by_type })
    }
}

struct CommandEntry {
    type_name: &'static str,
    decode: CommandDecoder,
}

/// Bidirectional mapping between command wire names and payload types.
pub struct CommandRegistry {
    by_name: HashMap<String, CommandEntry>,
    by_type: HashMap<TypeId, String>,
}

impl CommandRegistry {
    /// Starts an empty registry.
    #[must_use]
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::default()
    }

    /// Rust type name registered under `name`.
    #[must_use]
    pub fn type_for_name(&self, name: &str) -> Option<&'static str> {
        self.by_name.get(name).map(|entry| entry.type_name)
    }

    /// Wire name registered for the command type `T`.
    #[must_use]
    pub fn name_for_type<T: Command>(&self) -> Option<&str> {
        self.by_type.get(&TypeId::of::<T>()).map(String::as_str)
    }

    /// Wire name registered for the command's runtime type.
    #[must_use]
    pub fn name_of(&self, command: &dyn Command) -> Option<&str> {
        self.by_type
            .get(&command.payload_type_id())
            .map(String::as_str)
    }

    /// Decodes a command body submitted under `name`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoSuchCommand` if `name` is not registered, or
    /// `DomainError::Serialization` if the body does not decode.
    pub fn decode(&self, name: &str, raw: &[u8]) -> Result<Box<dyn Command>, DomainError> {
        let entry = self
            .by_name
            .get(name)
            .ok_or_else(|| DomainError::NoSuchCommand(name.to_owned()))?;
        (entry.decode)(raw)
            .map_err(|e| DomainError::Serialization(format!("failed to decode {name}: {e}")))
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CommandRegistry").field("names", &names).finish()
    }
}

/// Collects command registrations.
#[derive(Default)]
pub struct CommandRegistryBuilder {
    entries: Vec<(String, TypeId, CommandEntry)>,
}

impl CommandRegistryBuilder {
    /// Registers command type `T` under `name`.
    #[must_use]
    pub fn register<T>(mut self, name: impl Into<String>) -> Self
    where
        T: Command + DeserializeOwned,
    {
        self.entries.push((
            name.into(),
            TypeId::of::<T>(),
            CommandEntry {
                type_name: type_name::<T>(),
                decode: decode_command_as::<T>,
            },
        ));
        self
    }

    /// Validates and freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if a name or a type appears twice.
    pub fn build(self) -> Result<CommandRegistry, ConfigurationError> {
        let mut by_name = HashMap::new();
        let mut by_type = HashMap::new();
        for (name, type_id, entry) in self.entries {
            if by_name.contains_key(&name) {
                return Err(ConfigurationError::DuplicateName(name));
            }
            if by_type.insert(type_id, name.clone()).is_some() {
                return Err(ConfigurationError::DuplicateType(entry.type_name));
            }
            by_name.insert(name, entry);
        }
        Ok(CommandRegistry { by_name, by_type })
    }
}
