//! Typed, append-oriented property graph: nodes, edges, edge-events,
//! observations, versions, a filesystem path guard, and the bounded
//! working-set projector used to build LLM prompts.

mod error;
pub mod gc;
mod model;
mod path_guard;
pub mod schema;
pub mod store;
pub mod working_set;

pub use error::{GraphError, ValidationErrorKind};
pub use gc::{GcReport, MaintenanceConfig, RetentionPolicy};
pub use model::{Edge, EdgeEvent, EventRelation, Layer, Node, NodeVersion, Observation, Relation};
pub use path_guard::{PathGuard, PathGuardError};
pub use store::{DataPatch, EdgeDirection, GraphStore, DEFAULT_PARTITION};
pub use working_set::{WorkingSet, WorkingSetCandidates};
