//! Producer side of the kiosk ingestion benchmark.
//!
//! Synthetic kiosk events are minted from a monotonic sequence ([`sequence`]), serialized into
//! keyed JSON records ([`event`]) and pushed onto a message stream by the [`PhasedEmitter`]
//! according to an [`EmitSpec`]: one large burst, followed by paced cycles of smaller bursts.

pub mod emitter;
pub mod event;
pub mod sequence;
pub mod specification;
pub mod transport;

pub use emitter::{BackpressurePolicy, EmitError, EmitReport, PhasedEmitter};
pub use event::{EventSerializer, EventTemplate, SyntheticEvent, WireRecord};
pub use sequence::{ENTITY_CHUNK_SIZE, SequenceAllocator, derive_entity_id};
pub use specification::EmitSpec;
pub use transport::{FlushError, OutboundTransport, PublishError};
