//! The five persistent kinds: Node, Edge, EdgeEvent, Observation, NodeVersion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weave_ids::Id;

/// Semantic layer a node belongs to. `Observation` is a conceptual fourth
/// layer only — [`crate::store::GraphStore::create_node`] rejects it before
/// it ever reaches SQL, matching the invariant that observations live in
/// their own append-only table, not in `nodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Context,
    System,
    Automation,
    Observation,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Context => "context",
            Layer::System => "system",
            Layer::Automation => "automation",
            Layer::Observation => "observation",
        }
    }
}

impl std::str::FromStr for Layer {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "context" => Ok(Layer::Context),
            "system" => Ok(Layer::System),
            "automation" => Ok(Layer::Automation),
            "observation" => Ok(Layer::Observation),
            other => Err(format!("unknown layer: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    DependsOn,
    Owns,
    Uses,
    GeneratedBy,
    InstanceOf,
    ChildOf,
    ConfiguredBy,
    Implements,
    Affects,
    DerivedFrom,
    Justifies,
    BasedOn,
    PointsTo,
    Supersedes,
    AssignedTo,
    Produces,
    ScopedTo,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::DependsOn => "depends_on",
            Relation::Owns => "owns",
            Relation::Uses => "uses",
            Relation::GeneratedBy => "generated_by",
            Relation::InstanceOf => "instance_of",
            Relation::ChildOf => "child_of",
            Relation::ConfiguredBy => "configured_by",
            Relation::Implements => "implements",
            Relation::Affects => "affects",
            Relation::DerivedFrom => "derived_from",
            Relation::Justifies => "justifies",
            Relation::BasedOn => "based_on",
            Relation::PointsTo => "points_to",
            Relation::Supersedes => "supersedes",
            Relation::AssignedTo => "assigned_to",
            Relation::Produces => "produces",
            Relation::ScopedTo => "scoped_to",
        }
    }
}

impl std::str::FromStr for Relation {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Relation::*;
        Ok(match s {
            "depends_on" => DependsOn,
            "owns" => Owns,
            "uses" => Uses,
            "generated_by" => GeneratedBy,
            "instance_of" => InstanceOf,
            "child_of" => ChildOf,
            "configured_by" => ConfiguredBy,
            "implements" => Implements,
            "affects" => Affects,
            "derived_from" => DerivedFrom,
            "justifies" => Justifies,
            "based_on" => BasedOn,
            "points_to" => PointsTo,
            "supersedes" => Supersedes,
            "assigned_to" => AssignedTo,
            "produces" => Produces,
            "scoped_to" => ScopedTo,
            other => return Err(format!("unknown relation: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventRelation {
    ResultedIn,
    Observed,
    Measured,
    FailedWith,
    Triggered,
    Completed,
    Started,
    Modified,
}

impl EventRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventRelation::ResultedIn => "resulted_in",
            EventRelation::Observed => "observed",
            EventRelation::Measured => "measured",
            EventRelation::FailedWith => "failed_with",
            EventRelation::Triggered => "triggered",
            EventRelation::Completed => "completed",
            EventRelation::Started => "started",
            EventRelation::Modified => "modified",
        }
    }
}

impl std::str::FromStr for EventRelation {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use EventRelation::*;
        Ok(match s {
            "resulted_in" => ResultedIn,
            "observed" => Observed,
            "measured" => Measured,
            "failed_with" => FailedWith,
            "triggered" => Triggered,
            "completed" => Completed,
            "started" => Started,
            "modified" => Modified,
            other => return Err(format!("unknown event relation: {other}")),
        })
    }
}

/// A typed entity in one of the three writable semantic layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub layer: Layer,
    pub node_type: String,
    pub name: String,
    pub data: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub embedding_hash: Option<String>,
    pub embedded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: Id,
    pub source: Id,
    pub target: Id,
    pub relation: Relation,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub deprecated_at: Option<DateTime<Utc>>,
}

impl Edge {
    pub fn is_active(&self) -> bool {
        self.deprecated_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeEvent {
    pub id: Id,
    pub source: Id,
    pub target: Id,
    pub event_relation: EventRelation,
    pub success: bool,
    pub duration_ms: Option<u64>,
    pub data: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: Id,
    pub node: Id,
    pub observation_type: String,
    pub value: Option<f64>,
    pub data: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeVersion {
    pub id: Id,
    pub node: Id,
    pub version: u32,
    pub data: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}
