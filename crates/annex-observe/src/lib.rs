//! Observability layer for the Annex platform.
//!
//! Implements the append-only public event log. This is the "trust as
//! public computation" layer: every identity operation, federation change,
//! and moderation action is recorded with a per-server monotone sequence
//! number that any authorized party can query and audit.
//!
//! Writers never call [`emit_event`] on its own connection: the event
//! append always shares the transaction of the domain write it describes,
//! so a committed mutation and its event are inseparable.
//!
//! # Event domains
//!
//! | Domain | Example events |
//! |--------|---------------|
//! | `IDENTITY` | `IDENTITY_REGISTERED`, `IDENTITY_ACTIVATED` |
//! | `PRESENCE` | (reserved for the presence graph plane) |
//! | `FEDERATION` | `FEDERATION_HANDSHAKE`, `FEDERATED_IDENTITY_ATTESTED` |
//! | `AGENT` | (reserved for the agent plane) |
//! | `MODERATION` | `POLICY_UPDATED`, `CAPABILITIES_UPDATED` |

mod error;
mod event;
mod store;

pub use error::ObserveError;
pub use event::{EventDomain, EventPayload, ParseEventDomainError, PublicEvent};
pub use store::{emit_event, latest_seq, query_events, EventFilter};
