pub mod event_recorder;
pub mod record;
pub mod rest;
pub mod sink;
pub mod sqlite;

pub use event_recorder::{Ack, EventRecorder, RecordError};
pub use record::{DetectionRecord, NewDetectionRecord};
pub use rest::{RestSink, RestSinkConfig};
pub use sink::{MemorySink, RecordSink, SinkError};
pub use sqlite::SqliteSink;
