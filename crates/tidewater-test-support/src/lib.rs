//! Shared test doubles and a sample aggregate for the Tidewater engine.

mod counter;
mod store;
mod stream;

pub use counter::{
    Annotate, COUNTER, Create, Created, Increment, IncrementBy, Incremented, Noted,
    counter_commands, counter_definition, counter_events,
};
pub use store::{
    BarrierEventStore, FailingEventStore, FailingSnapshotStore, RecordingEventStore,
    RecordingSnapshotStore,
};
pub use stream::{RecordingRouter, ScriptedChangeStream, StreamLog};
