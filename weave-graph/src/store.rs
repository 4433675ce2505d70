//! The graph store: nodes, edges, edge-events, observations, and automatic
//! version snapshots. Ported from the connection-per-call + `spawn_blocking`
//! idiom — every operation opens its own `rusqlite::Connection` on a blocking
//! thread rather than holding one open across awaits.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use weave_ids::Id;

use crate::error::GraphError;
use crate::model::{EdgeEvent, EventRelation, Layer, Node, NodeVersion, Observation, Relation};
use crate::schema::SchemaDef;

/// Reads/traversals are given this long before downgrading to a partial or
/// empty result (spec's "2-second timeout" rule).
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Partition assigned to `edge_events`/`observations` rows whose month
/// bucket hasn't been resolved yet, consumed by [`crate::gc`] which
/// relocates them into their real month partition in batches.
pub const DEFAULT_PARTITION: &str = "unpartitioned";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone)]
pub enum DataPatch {
    Replace(serde_json::Value),
    /// RFC 7396-style merge patch: object keys in the patch overwrite the
    /// same keys in the target; a `null` value removes the key; nested
    /// objects are merged recursively; non-object patches replace wholesale.
    Merge(serde_json::Value),
}

fn merge_patch(target: &serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
    match (target, patch) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) => {
            let mut result = target_map.clone();
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    result.remove(key);
                } else {
                    let merged = match result.get(key) {
                        Some(existing) => merge_patch(existing, patch_value),
                        None => patch_value.clone(),
                    };
                    result.insert(key.clone(), merged);
                }
            }
            serde_json::Value::Object(result)
        }
        _ => patch.clone(),
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn partition_month(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m").to_string()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Clone)]
pub struct GraphStore {
    db_path: PathBuf,
}

impl GraphStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let db_path = path.as_ref().to_path_buf();
        let migrate_path = db_path.clone();
        tokio::task::spawn_blocking(move || Self::migrate(&migrate_path))
            .await
            .map_err(|e| GraphError::Storage(e.to_string()))??;
        Ok(Self { db_path })
    }

    fn connect(db_path: &Path) -> Result<rusqlite::Connection, GraphError> {
        rusqlite::Connection::open(db_path).map_err(|e| GraphError::Storage(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn raw_connection_for_test(&self) -> Result<rusqlite::Connection, GraphError> {
        Self::connect(&self.db_path)
    }

    fn migrate(db_path: &Path) -> Result<(), GraphError> {
        let conn = Self::connect(db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                layer TEXT NOT NULL CHECK (layer != 'observation'),
                node_type TEXT NOT NULL,
                name TEXT NOT NULL,
                data TEXT NOT NULL,
                embedding BLOB,
                embedding_hash TEXT,
                embedded_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_active_name
                ON nodes(layer, node_type, name) WHERE deleted_at IS NULL;

            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                relation TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                deprecated_at INTEGER,
                CHECK (source != target)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);

            CREATE TABLE IF NOT EXISTS edge_events (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                event_relation TEXT NOT NULL,
                success INTEGER NOT NULL,
                duration_ms INTEGER,
                data TEXT NOT NULL,
                occurred_at INTEGER NOT NULL,
                partition_month TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_edge_events_partition ON edge_events(partition_month);
            CREATE INDEX IF NOT EXISTS idx_edge_events_occurred ON edge_events(occurred_at);

            CREATE TABLE IF NOT EXISTS observations (
                id TEXT PRIMARY KEY,
                node TEXT NOT NULL,
                observation_type TEXT NOT NULL,
                value REAL,
                data TEXT NOT NULL,
                observed_at INTEGER NOT NULL,
                partition_month TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_observations_partition ON observations(partition_month);
            CREATE INDEX IF NOT EXISTS idx_observations_node ON observations(node);

            CREATE TABLE IF NOT EXISTS node_versions (
                id TEXT PRIMARY KEY,
                node TEXT NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_node_versions_node ON node_versions(node);

            CREATE TABLE IF NOT EXISTS partitions (
                month TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| GraphError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT OR IGNORE INTO partitions (month, created_at) VALUES (?1, ?2)",
            params![DEFAULT_PARTITION, datetime_to_millis(Utc::now())],
        )
        .map_err(|e| GraphError::Storage(e.to_string()))?;
        Ok(())
    }

    fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
        let id: String = row.get("id")?;
        let layer: String = row.get("layer")?;
        let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
        let embedded_at: Option<i64> = row.get("embedded_at")?;
        let deleted_at: Option<i64> = row.get("deleted_at")?;
        let data: String = row.get("data")?;

        Ok(Node {
            id: id.parse().unwrap_or_else(|_| Id::new()),
            layer: layer.parse().unwrap_or(Layer::Context),
            node_type: row.get("node_type")?,
            name: row.get("name")?,
            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
            embedding: embedding_blob.map(|bytes| {
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            }),
            embedding_hash: row.get("embedding_hash")?,
            embedded_at: embedded_at.map(millis_to_datetime),
            created_at: millis_to_datetime(row.get("created_at")?),
            updated_at: millis_to_datetime(row.get("updated_at")?),
            deleted_at: deleted_at.map(millis_to_datetime),
        })
    }

    /// Rejects `Layer::Observation`, validates name length, checks for an
    /// active duplicate, validates against `schema` if given, then inserts
    /// the node plus its first `NodeVersion` row.
    pub async fn create_node(
        &self,
        layer: Layer,
        node_type: impl Into<String>,
        name: impl Into<String>,
        data: serde_json::Value,
        schema: Option<SchemaDef>,
    ) -> Result<Node, GraphError> {
        if layer == Layer::Observation {
            return Err(GraphError::LayerRejected);
        }
        let node_type = node_type.into();
        let name = name.into();
        if name.len() > 255 {
            return Err(GraphError::NameTooLong);
        }
        if let Some(schema) = &schema {
            crate::schema::validate(&data, schema)?;
        }

        let db_path = self.db_path.clone();
        let id = Id::new();
        let now = Utc::now();
        let data_str = serde_json::to_string(&data)?;

        let (layer_str, node_type2, name2) = (layer.as_str().to_string(), node_type.clone(), name.clone());

        tokio::task::spawn_blocking(move || -> Result<(), GraphError> {
            let conn = Self::connect(&db_path)?;

            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM nodes WHERE layer=?1 AND node_type=?2 AND name=?3 AND deleted_at IS NULL",
                    params![layer_str, node_type2, name2],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            if exists.is_some() {
                return Err(GraphError::DuplicateName {
                    layer: layer_str,
                    node_type: node_type2,
                    name: name2,
                });
            }

            conn.execute(
                "INSERT INTO nodes (id, layer, node_type, name, data, created_at, updated_at) VALUES (?1,?2,?3,?4,?5,?6,?6)",
                params![id.to_string(), layer_str, node_type2, name2, data_str, datetime_to_millis(now)],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;

            conn.execute(
                "INSERT INTO node_versions (id, node, version, data, recorded_at) VALUES (?1,?2,1,?3,?4)",
                params![Id::new().to_string(), id.to_string(), data_str, datetime_to_millis(now)],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;

            Ok(())
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))??;

        Ok(Node {
            id,
            layer,
            node_type,
            name,
            data,
            embedding: None,
            embedding_hash: None,
            embedded_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub async fn get_node(&self, id: Id) -> Result<Option<Node>, GraphError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Node>, GraphError> {
            let conn = Self::connect(&db_path)?;
            conn.query_row("SELECT * FROM nodes WHERE id = ?1", params![id.to_string()], Self::row_to_node)
                .optional()
                .map_err(|e| GraphError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    pub async fn find_node_by_name(
        &self,
        layer: Layer,
        node_type: &str,
        name: &str,
    ) -> Result<Option<Node>, GraphError> {
        let db_path = self.db_path.clone();
        let layer_str = layer.as_str().to_string();
        let node_type = node_type.to_string();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Node>, GraphError> {
            let conn = Self::connect(&db_path)?;
            conn.query_row(
                "SELECT * FROM nodes WHERE layer=?1 AND node_type=?2 AND name=?3 AND deleted_at IS NULL",
                params![layer_str, node_type, name],
                Self::row_to_node,
            )
            .optional()
            .map_err(|e| GraphError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    /// Lists non-deleted nodes of `(layer, node_type)`, most recently
    /// updated first, capped at `limit`. Backs the prompt-pipeline sources
    /// that project a bounded recent slice (tasks, constraints, insights,
    /// decisions, suggestions, work orders, active agents).
    pub async fn list_nodes_by_type(&self, layer: Layer, node_type: &str, limit: usize) -> Result<Vec<Node>, GraphError> {
        let db_path = self.db_path.clone();
        let layer_str = layer.as_str().to_string();
        let node_type = node_type.to_string();
        let limit = limit as i64;
        tokio::task::spawn_blocking(move || -> Result<Vec<Node>, GraphError> {
            let conn = Self::connect(&db_path)?;
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM nodes WHERE layer=?1 AND node_type=?2 AND deleted_at IS NULL \
                     ORDER BY updated_at DESC LIMIT ?3",
                )
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![layer_str, node_type, limit], Self::row_to_node)
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| GraphError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    /// Get-or-create keyed on (layer, type, name); race-safe by attempting
    /// insert first and falling back to the existing row on a uniqueness
    /// conflict rather than racing a separate select-then-insert.
    pub async fn upsert_node(
        &self,
        layer: Layer,
        node_type: impl Into<String>,
        name: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<Node, GraphError> {
        let node_type = node_type.into();
        let name = name.into();
        match self.create_node(layer, node_type.clone(), name.clone(), data, None).await {
            Ok(node) => Ok(node),
            Err(GraphError::DuplicateName { .. }) => self
                .find_node_by_name(layer, &node_type, &name)
                .await?
                .ok_or_else(|| GraphError::Storage("upsert race: node vanished after conflict".to_string())),
            Err(e) => Err(e),
        }
    }

    /// Applies `patch` to the node's `data`, bumping `updated_at` and
    /// writing a new `NodeVersion` row. The node's `layer`/`node_type` are
    /// immutable and not touched here.
    pub async fn update_node(&self, id: Id, patch: DataPatch) -> Result<Node, GraphError> {
        let current = self.get_node(id).await?.ok_or(GraphError::NodeNotFound(id))?;
        let new_data = match patch {
            DataPatch::Replace(v) => v,
            DataPatch::Merge(v) => merge_patch(&current.data, &v),
        };
        let data_str = serde_json::to_string(&new_data)?;
        let db_path = self.db_path.clone();
        let now = Utc::now();

        let version = tokio::task::spawn_blocking(move || -> Result<u32, GraphError> {
            let conn = Self::connect(&db_path)?;
            conn.execute(
                "UPDATE nodes SET data=?1, updated_at=?2 WHERE id=?3",
                params![data_str, datetime_to_millis(now), id.to_string()],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;

            let next_version: i64 = conn
                .query_row("SELECT COALESCE(MAX(version),0)+1 FROM node_versions WHERE node=?1", params![id.to_string()], |r| r.get(0))
                .map_err(|e| GraphError::Storage(e.to_string()))?;

            conn.execute(
                "INSERT INTO node_versions (id, node, version, data, recorded_at) VALUES (?1,?2,?3,?4,?5)",
                params![Id::new().to_string(), id.to_string(), next_version, data_str, datetime_to_millis(now)],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;

            Ok(next_version as u32)
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))??;

        let _ = version;
        Ok(Node {
            data: new_data,
            updated_at: now,
            ..current
        })
    }

    /// Sets `deleted_at` (idempotent — already-deleted nodes are untouched)
    /// and cascades by deprecating every incident, still-active edge.
    pub async fn soft_delete_node(&self, id: Id) -> Result<(), GraphError> {
        let db_path = self.db_path.clone();
        let now = Utc::now();
        tokio::task::spawn_blocking(move || -> Result<(), GraphError> {
            let conn = Self::connect(&db_path)?;
            conn.execute(
                "UPDATE nodes SET deleted_at=?1 WHERE id=?2 AND deleted_at IS NULL",
                params![datetime_to_millis(now), id.to_string()],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;
            conn.execute(
                "UPDATE edges SET deprecated_at=?1 WHERE (source=?2 OR target=?2) AND deprecated_at IS NULL",
                params![datetime_to_millis(now), id.to_string()],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    /// Atomic write of (embedding vector, content hash, embedding timestamp).
    pub async fn update_embedding(&self, id: Id, embedding: Vec<f32>, content_hash: String) -> Result<(), GraphError> {
        let bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
        let db_path = self.db_path.clone();
        let now = Utc::now();
        tokio::task::spawn_blocking(move || -> Result<(), GraphError> {
            let conn = Self::connect(&db_path)?;
            conn.execute(
                "UPDATE nodes SET embedding=?1, embedding_hash=?2, embedded_at=?3 WHERE id=?4",
                params![bytes, content_hash, datetime_to_millis(now), id.to_string()],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    /// Ranks non-deleted, embedded nodes by cosine similarity to `query`,
    /// optionally restricted to one node type, returning the top `limit`.
    /// Similarity is computed in-process rather than in SQL since SQLite
    /// has no vector extension here; the embedded-node count this system
    /// deals with (working-set-scale, not corpus-scale) makes that fine.
    pub async fn search_by_embedding(&self, query: &[f32], node_type: Option<&str>, limit: usize) -> Result<Vec<(Node, f32)>, GraphError> {
        let db_path = self.db_path.clone();
        let query = query.to_vec();
        let node_type = node_type.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || -> Result<Vec<(Node, f32)>, GraphError> {
            let conn = Self::connect(&db_path)?;
            let sql = match &node_type {
                Some(_) => "SELECT * FROM nodes WHERE deleted_at IS NULL AND embedding IS NOT NULL AND node_type = ?1",
                None => "SELECT * FROM nodes WHERE deleted_at IS NULL AND embedding IS NOT NULL",
            };
            let mut stmt = conn.prepare(sql).map_err(|e| GraphError::Storage(e.to_string()))?;
            let rows = if let Some(nt) = &node_type {
                stmt.query_map(params![nt], Self::row_to_node)
            } else {
                stmt.query_map([], Self::row_to_node)
            }
            .map_err(|e| GraphError::Storage(e.to_string()))?;

            let mut scored = Vec::new();
            for row in rows {
                let node = row.map_err(|e| GraphError::Storage(e.to_string()))?;
                if let Some(embedding) = &node.embedding {
                    let score = cosine_similarity(&query, embedding);
                    scored.push((node, score));
                }
            }
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(limit);
            Ok(scored)
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    pub async fn create_edge(
        &self,
        source: Id,
        target: Id,
        relation: Relation,
        data: serde_json::Value,
    ) -> Result<crate::model::Edge, GraphError> {
        if source == target {
            return Err(GraphError::SelfLoop);
        }
        if self.get_node(source).await?.filter(|n| !n.is_deleted()).is_none() {
            return Err(GraphError::EdgeEndpointMissing(source));
        }
        if self.get_node(target).await?.filter(|n| !n.is_deleted()).is_none() {
            return Err(GraphError::EdgeEndpointMissing(target));
        }

        let id = Id::new();
        let now = Utc::now();
        let data_str = serde_json::to_string(&data)?;
        let db_path = self.db_path.clone();
        let relation_str = relation.as_str().to_string();

        tokio::task::spawn_blocking(move || -> Result<(), GraphError> {
            let conn = Self::connect(&db_path)?;
            conn.execute(
                "INSERT INTO edges (id, source, target, relation, data, created_at) VALUES (?1,?2,?3,?4,?5,?6)",
                params![id.to_string(), source.to_string(), target.to_string(), relation_str, data_str, datetime_to_millis(now)],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))??;

        Ok(crate::model::Edge {
            id,
            source,
            target,
            relation,
            data,
            created_at: now,
            deprecated_at: None,
        })
    }

    pub async fn deprecate_edge(&self, id: Id) -> Result<(), GraphError> {
        let db_path = self.db_path.clone();
        let now = Utc::now();
        tokio::task::spawn_blocking(move || -> Result<(), GraphError> {
            let conn = Self::connect(&db_path)?;
            conn.execute(
                "UPDATE edges SET deprecated_at=?1 WHERE id=?2 AND deprecated_at IS NULL",
                params![datetime_to_millis(now), id.to_string()],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<crate::model::Edge> {
        let id: String = row.get("id")?;
        let source: String = row.get("source")?;
        let target: String = row.get("target")?;
        let relation: String = row.get("relation")?;
        let data: String = row.get("data")?;
        let deprecated_at: Option<i64> = row.get("deprecated_at")?;
        Ok(crate::model::Edge {
            id: id.parse().unwrap_or_else(|_| Id::new()),
            source: source.parse().unwrap_or_else(|_| Id::new()),
            target: target.parse().unwrap_or_else(|_| Id::new()),
            relation: relation.parse().unwrap_or(Relation::Uses),
            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
            created_at: millis_to_datetime(row.get("created_at")?),
            deprecated_at: deprecated_at.map(millis_to_datetime),
        })
    }

    /// Lists edges touching `node_id`. Filters to active (non-deprecated)
    /// edges unless `include_deprecated` is set.
    pub async fn list_edges(
        &self,
        node_id: Id,
        direction: EdgeDirection,
        include_deprecated: bool,
    ) -> Result<Vec<crate::model::Edge>, GraphError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<crate::model::Edge>, GraphError> {
            let conn = Self::connect(&db_path)?;
            let id_str = node_id.to_string();
            let (where_clause, params_vec): (&str, Vec<&dyn rusqlite::ToSql>) = match direction {
                EdgeDirection::Outgoing => ("source = ?1", vec![&id_str]),
                EdgeDirection::Incoming => ("target = ?1", vec![&id_str]),
                EdgeDirection::Both => ("(source = ?1 OR target = ?1)", vec![&id_str]),
            };
            let sql = if include_deprecated {
                format!("SELECT * FROM edges WHERE {where_clause}")
            } else {
                format!("SELECT * FROM edges WHERE {where_clause} AND deprecated_at IS NULL")
            };
            let mut stmt = conn.prepare(&sql).map_err(|e| GraphError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params_vec.as_slice(), Self::row_to_edge)
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| GraphError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    pub async fn create_edge_event(
        &self,
        source: Id,
        target: Id,
        event_relation: EventRelation,
        success: bool,
        duration_ms: Option<u64>,
        data: serde_json::Value,
        occurred_at: Option<DateTime<Utc>>,
    ) -> Result<EdgeEvent, GraphError> {
        let id = Id::new();
        let occurred_at = occurred_at.unwrap_or_else(Utc::now);
        let data_str = serde_json::to_string(&data)?;
        let db_path = self.db_path.clone();
        let relation_str = event_relation.as_str().to_string();
        let month = partition_month(occurred_at);

        tokio::task::spawn_blocking(move || -> Result<(), GraphError> {
            let conn = Self::connect(&db_path)?;
            conn.execute(
                "INSERT OR IGNORE INTO partitions (month, created_at) VALUES (?1, ?2)",
                params![month, datetime_to_millis(Utc::now())],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT INTO edge_events (id, source, target, event_relation, success, duration_ms, data, occurred_at, partition_month) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    id.to_string(),
                    source.to_string(),
                    target.to_string(),
                    relation_str,
                    success as i64,
                    duration_ms.map(|d| d as i64),
                    data_str,
                    datetime_to_millis(occurred_at),
                    month,
                ],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))??;

        Ok(EdgeEvent {
            id,
            source,
            target,
            event_relation,
            success,
            duration_ms,
            data,
            occurred_at,
        })
    }

    /// Lists edge-events in `[since, until]`, optionally filtered to one
    /// relation, ordered by occurrence. Backs the pattern engine's
    /// co-editing/churn/tool-sequence scans, which need a global view across
    /// sessions rather than one node's history.
    pub async fn list_edge_events_in_range(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        relation: Option<EventRelation>,
    ) -> Result<Vec<EdgeEvent>, GraphError> {
        let db_path = self.db_path.clone();
        let relation_str = relation.map(|r| r.as_str().to_string());
        tokio::task::spawn_blocking(move || -> Result<Vec<EdgeEvent>, GraphError> {
            let conn = Self::connect(&db_path)?;
            let sql = match &relation_str {
                Some(_) => "SELECT * FROM edge_events WHERE occurred_at BETWEEN ?1 AND ?2 AND event_relation=?3 ORDER BY occurred_at",
                None => "SELECT * FROM edge_events WHERE occurred_at BETWEEN ?1 AND ?2 ORDER BY occurred_at",
            };
            let mut stmt = conn.prepare(sql).map_err(|e| GraphError::Storage(e.to_string()))?;
            let row_to_event = |row: &rusqlite::Row| -> rusqlite::Result<EdgeEvent> {
                let id: String = row.get("id")?;
                let source: String = row.get("source")?;
                let target: String = row.get("target")?;
                let relation: String = row.get("event_relation")?;
                let data: String = row.get("data")?;
                let duration_ms: Option<i64> = row.get("duration_ms")?;
                Ok(EdgeEvent {
                    id: id.parse().unwrap_or_else(|_| Id::new()),
                    source: source.parse().unwrap_or_else(|_| Id::new()),
                    target: target.parse().unwrap_or_else(|_| Id::new()),
                    event_relation: relation.parse::<EventRelation>().unwrap_or(EventRelation::Triggered),
                    success: row.get::<_, i64>("success")? != 0,
                    duration_ms: duration_ms.map(|d| d as u64),
                    data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                    occurred_at: millis_to_datetime(row.get("occurred_at")?),
                })
            };
            let rows = match &relation_str {
                Some(r) => stmt
                    .query_map(params![datetime_to_millis(since), datetime_to_millis(until), r], row_to_event)
                    .map_err(|e| GraphError::Storage(e.to_string()))?,
                None => stmt
                    .query_map(params![datetime_to_millis(since), datetime_to_millis(until)], row_to_event)
                    .map_err(|e| GraphError::Storage(e.to_string()))?,
            };
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| GraphError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    pub async fn create_observation(
        &self,
        node: Id,
        observation_type: impl Into<String>,
        value: Option<f64>,
        data: serde_json::Value,
        observed_at: Option<DateTime<Utc>>,
    ) -> Result<Observation, GraphError> {
        let id = Id::new();
        let observed_at = observed_at.unwrap_or_else(Utc::now);
        let observation_type = observation_type.into();
        let data_str = serde_json::to_string(&data)?;
        let db_path = self.db_path.clone();
        let month = partition_month(observed_at);
        let ot = observation_type.clone();

        tokio::task::spawn_blocking(move || -> Result<(), GraphError> {
            let conn = Self::connect(&db_path)?;
            conn.execute(
                "INSERT OR IGNORE INTO partitions (month, created_at) VALUES (?1, ?2)",
                params![month, datetime_to_millis(Utc::now())],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT INTO observations (id, node, observation_type, value, data, observed_at, partition_month) VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![id.to_string(), node.to_string(), ot, value, data_str, datetime_to_millis(observed_at), month],
            )
            .map_err(|e| GraphError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))??;

        Ok(Observation {
            id,
            node,
            observation_type,
            value,
            data,
            observed_at,
        })
    }

    pub async fn list_observations_in_range(
        &self,
        node: Id,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Observation>, GraphError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Observation>, GraphError> {
            let conn = Self::connect(&db_path)?;
            let mut stmt = conn
                .prepare("SELECT * FROM observations WHERE node=?1 AND observed_at BETWEEN ?2 AND ?3 ORDER BY observed_at")
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(
                    params![node.to_string(), datetime_to_millis(since), datetime_to_millis(until)],
                    |row| {
                        let id: String = row.get("id")?;
                        let node: String = row.get("node")?;
                        let data: String = row.get("data")?;
                        Ok(Observation {
                            id: id.parse().unwrap_or_else(|_| Id::new()),
                            node: node.parse().unwrap_or_else(|_| Id::new()),
                            observation_type: row.get("observation_type")?,
                            value: row.get("value")?,
                            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                            observed_at: millis_to_datetime(row.get("observed_at")?),
                        })
                    },
                )
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| GraphError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    pub async fn get_node_versions(&self, node: Id) -> Result<Vec<NodeVersion>, GraphError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<NodeVersion>, GraphError> {
            let conn = Self::connect(&db_path)?;
            let mut stmt = conn
                .prepare("SELECT * FROM node_versions WHERE node=?1 ORDER BY version")
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![node.to_string()], |row| {
                    let id: String = row.get("id")?;
                    let node: String = row.get("node")?;
                    let data: String = row.get("data")?;
                    Ok(NodeVersion {
                        id: id.parse().unwrap_or_else(|_| Id::new()),
                        node: node.parse().unwrap_or_else(|_| Id::new()),
                        version: row.get::<_, i64>("version")? as u32,
                        data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                        recorded_at: millis_to_datetime(row.get("recorded_at")?),
                    })
                })
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| GraphError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    /// Breadth-first walk bounded by `max_depth`, downgrading to whatever
    /// was found so far (with a `tracing::warn!`) if it exceeds
    /// [`READ_TIMEOUT`] rather than failing the caller outright.
    pub async fn traverse(&self, start: Id, direction: EdgeDirection, max_depth: usize) -> Result<Vec<Id>, GraphError> {
        let fut = self.traverse_inner(start, direction, max_depth);
        match tokio::time::timeout(READ_TIMEOUT, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(node = %start, "graph traversal timed out; returning partial result");
                Ok(vec![start])
            }
        }
    }

    async fn traverse_inner(&self, start: Id, direction: EdgeDirection, max_depth: usize) -> Result<Vec<Id>, GraphError> {
        let mut visited = vec![start];
        let mut frontier = vec![start];
        for _ in 0..max_depth {
            let mut next_frontier = Vec::new();
            for node in &frontier {
                let edges = self.list_edges(*node, direction, false).await?;
                for edge in edges {
                    let neighbor = if edge.source == *node { edge.target } else { edge.source };
                    if !visited.contains(&neighbor) {
                        visited.push(neighbor);
                        next_frontier.push(neighbor);
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        Ok(visited)
    }

    /// Returns the first path found from `from` to `to` within `max_depth`
    /// hops, or `None` if none exists within the bound.
    pub async fn find_path(&self, from: Id, to: Id, max_depth: usize) -> Result<Option<Vec<Id>>, GraphError> {
        let fut = self.find_path_inner(from, to, max_depth);
        match tokio::time::timeout(READ_TIMEOUT, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%from, %to, "path search timed out; returning no path");
                Ok(None)
            }
        }
    }

    async fn find_path_inner(&self, from: Id, to: Id, max_depth: usize) -> Result<Option<Vec<Id>>, GraphError> {
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(vec![from]);
        let mut visited = std::collections::HashSet::new();
        visited.insert(from);

        while let Some(path) = queue.pop_front() {
            if path.len() > max_depth + 1 {
                continue;
            }
            let last = *path.last().unwrap();
            if last == to {
                return Ok(Some(path));
            }
            let edges = self.list_edges(last, EdgeDirection::Both, false).await?;
            for edge in edges {
                let neighbor = if edge.source == last { edge.target } else { edge.source };
                if visited.insert(neighbor) {
                    let mut next_path = path.clone();
                    next_path.push(neighbor);
                    queue.push_back(next_path);
                }
            }
        }
        Ok(None)
    }

    /// Soft-deletes `session` nodes older than `cutoff`. Queries are scoped
    /// to `node_type='session'`, so promoted insights/decisions/tasks a
    /// session led to are never touched by this call. Returns the count
    /// soft-deleted.
    pub async fn soft_delete_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, GraphError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, GraphError> {
            let conn = Self::connect(&db_path)?;
            let now = datetime_to_millis(Utc::now());
            let changed = conn
                .execute(
                    "UPDATE nodes SET deleted_at=?1 WHERE node_type='session' AND deleted_at IS NULL AND created_at < ?2",
                    params![now, datetime_to_millis(cutoff)],
                )
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            Ok(changed as u64)
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    /// Moves up to `batch_size` rows out of [`DEFAULT_PARTITION`] in both
    /// `edge_events` and `observations`, re-deriving each row's real month
    /// from its own timestamp. Returns the number of rows relocated.
    pub async fn relocate_default_partition_rows(&self, batch_size: usize) -> Result<u64, GraphError> {
        let db_path = self.db_path.clone();
        let batch_size = batch_size as i64;
        tokio::task::spawn_blocking(move || -> Result<u64, GraphError> {
            let conn = Self::connect(&db_path)?;
            let mut relocated = 0u64;

            let mut stmt = conn
                .prepare("SELECT id, occurred_at FROM edge_events WHERE partition_month = ?1 LIMIT ?2")
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            let rows: Vec<(String, i64)> = stmt
                .query_map(params![DEFAULT_PARTITION, batch_size], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| GraphError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            drop(stmt);
            for (id, occurred_at) in rows {
                let month = partition_month(millis_to_datetime(occurred_at));
                conn.execute("UPDATE edge_events SET partition_month=?1 WHERE id=?2", params![month, id])
                    .map_err(|e| GraphError::Storage(e.to_string()))?;
                relocated += 1;
            }

            let mut stmt = conn
                .prepare("SELECT id, observed_at FROM observations WHERE partition_month = ?1 LIMIT ?2")
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            let rows: Vec<(String, i64)> = stmt
                .query_map(params![DEFAULT_PARTITION, batch_size], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| GraphError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| GraphError::Storage(e.to_string()))?;
            drop(stmt);
            for (id, observed_at) in rows {
                let month = partition_month(millis_to_datetime(observed_at));
                conn.execute("UPDATE observations SET partition_month=?1 WHERE id=?2", params![month, id])
                    .map_err(|e| GraphError::Storage(e.to_string()))?;
                relocated += 1;
            }

            Ok(relocated)
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }

    /// Ensures a `partitions` row exists for the current month through
    /// `months_ahead` months out. Returns the number of partitions newly
    /// created.
    pub async fn ensure_future_partitions(&self, months_ahead: u32) -> Result<u64, GraphError> {
        let db_path = self.db_path.clone();
        let now = Utc::now();
        tokio::task::spawn_blocking(move || -> Result<u64, GraphError> {
            let conn = Self::connect(&db_path)?;
            let mut created = 0u64;
            for offset in 0..=months_ahead {
                let target = add_months(now, offset);
                let month = partition_month(target);
                let changed = conn
                    .execute(
                        "INSERT OR IGNORE INTO partitions (month, created_at) VALUES (?1, ?2)",
                        params![month, datetime_to_millis(now)],
                    )
                    .map_err(|e| GraphError::Storage(e.to_string()))?;
                created += changed as u64;
            }
            Ok(created)
        })
        .await
        .map_err(|e| GraphError::Storage(e.to_string()))?
    }
}

fn add_months(dt: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let total_months = dt.format("%m").to_string().parse::<u32>().unwrap_or(1) - 1 + months;
    let year = dt.format("%Y").to_string().parse::<i32>().unwrap_or(1970) + (total_months / 12) as i32;
    let month = total_months % 12 + 1;
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationErrorKind;
    use serde_json::json;

    async fn temp_store() -> (GraphStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("graph.db");
        let store = GraphStore::open(&db).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn create_node_rejects_observation_layer() {
        let (store, _dir) = temp_store().await;
        let err = store
            .create_node(Layer::Observation, "x", "y", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::LayerRejected));
    }

    #[tokio::test]
    async fn create_node_rejects_duplicate_active_name() {
        let (store, _dir) = temp_store().await;
        store.create_node(Layer::Context, "task", "alpha", json!({}), None).await.unwrap();
        let err = store
            .create_node(Layer::Context, "task", "alpha", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn soft_delete_allows_name_reuse() {
        let (store, _dir) = temp_store().await;
        let node = store.create_node(Layer::Context, "task", "alpha", json!({}), None).await.unwrap();
        store.soft_delete_node(node.id).await.unwrap();
        let recreated = store.create_node(Layer::Context, "task", "alpha", json!({}), None).await;
        assert!(recreated.is_ok());
    }

    #[tokio::test]
    async fn update_node_merge_patch_preserves_untouched_keys() {
        let (store, _dir) = temp_store().await;
        let node = store
            .create_node(Layer::Context, "task", "alpha", json!({"status": "open", "priority": 1}), None)
            .await
            .unwrap();
        let updated = store
            .update_node(node.id, DataPatch::Merge(json!({"status": "done"})))
            .await
            .unwrap();
        assert_eq!(updated.data["status"], "done");
        assert_eq!(updated.data["priority"], 1);
    }

    #[tokio::test]
    async fn merge_patch_null_removes_key() {
        let (store, _dir) = temp_store().await;
        let node = store
            .create_node(Layer::Context, "task", "alpha", json!({"status": "open", "scratch": "x"}), None)
            .await
            .unwrap();
        let updated = store
            .update_node(node.id, DataPatch::Merge(json!({"scratch": null})))
            .await
            .unwrap();
        assert!(updated.data.get("scratch").is_none());
    }

    #[tokio::test]
    async fn update_node_writes_new_version() {
        let (store, _dir) = temp_store().await;
        let node = store.create_node(Layer::Context, "task", "alpha", json!({"v": 1}), None).await.unwrap();
        store.update_node(node.id, DataPatch::Replace(json!({"v": 2}))).await.unwrap();
        let versions = store.get_node_versions(node.id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].version, 2);
    }

    #[tokio::test]
    async fn soft_delete_cascades_to_incident_edges() {
        let (store, _dir) = temp_store().await;
        let a = store.create_node(Layer::Context, "task", "a", json!({}), None).await.unwrap();
        let b = store.create_node(Layer::Context, "task", "b", json!({}), None).await.unwrap();
        let edge = store.create_edge(a.id, b.id, Relation::DependsOn, json!({})).await.unwrap();

        store.soft_delete_node(a.id).await.unwrap();

        let edges = store.list_edges(b.id, EdgeDirection::Both, false).await.unwrap();
        assert!(edges.is_empty());
        let edges_incl = store.list_edges(b.id, EdgeDirection::Both, true).await.unwrap();
        assert_eq!(edges_incl.len(), 1);
        assert_eq!(edges_incl[0].id, edge.id);
    }

    #[tokio::test]
    async fn create_edge_rejects_self_loop() {
        let (store, _dir) = temp_store().await;
        let a = store.create_node(Layer::Context, "task", "a", json!({}), None).await.unwrap();
        let err = store.create_edge(a.id, a.id, Relation::DependsOn, json!({})).await.unwrap_err();
        assert!(matches!(err, GraphError::SelfLoop));
    }

    #[tokio::test]
    async fn create_edge_rejects_missing_endpoint() {
        let (store, _dir) = temp_store().await;
        let a = store.create_node(Layer::Context, "task", "a", json!({}), None).await.unwrap();
        let missing = Id::new();
        let err = store.create_edge(a.id, missing, Relation::DependsOn, json!({})).await.unwrap_err();
        assert!(matches!(err, GraphError::EdgeEndpointMissing(_)));
    }

    #[tokio::test]
    async fn update_embedding_roundtrips_vector() {
        let (store, _dir) = temp_store().await;
        let node = store.create_node(Layer::System, "file", "a.rs", json!({}), None).await.unwrap();
        store.update_embedding(node.id, vec![0.1, 0.2, 0.3], "hash1".to_string()).await.unwrap();
        let reloaded = store.get_node(node.id).await.unwrap().unwrap();
        assert_eq!(reloaded.embedding_hash.as_deref(), Some("hash1"));
        let vec = reloaded.embedding.unwrap();
        assert_eq!(vec.len(), 3);
        assert!((vec[0] - 0.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_by_embedding_ranks_by_similarity() {
        let (store, _dir) = temp_store().await;
        let close = store.create_node(Layer::System, "file", "close.rs", json!({}), None).await.unwrap();
        let far = store.create_node(Layer::System, "file", "far.rs", json!({}), None).await.unwrap();
        store.update_embedding(close.id, vec![1.0, 0.0], "h1".to_string()).await.unwrap();
        store.update_embedding(far.id, vec![0.0, 1.0], "h2".to_string()).await.unwrap();

        let results = store.search_by_embedding(&[1.0, 0.0], Some("file"), 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.id, close.id);
        assert!(results[0].1 > results[1].1);
    }

    #[tokio::test]
    async fn list_nodes_by_type_caps_and_orders_by_recency() {
        let (store, _dir) = temp_store().await;
        for name in ["t1", "t2", "t3"] {
            store.create_node(Layer::Context, "task", name, json!({}), None).await.unwrap();
        }
        let listed = store.list_nodes_by_type(Layer::Context, "task", 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "t3");
    }

    #[tokio::test]
    async fn traverse_finds_transitive_neighbors() {
        let (store, _dir) = temp_store().await;
        let a = store.create_node(Layer::Context, "task", "a", json!({}), None).await.unwrap();
        let b = store.create_node(Layer::Context, "task", "b", json!({}), None).await.unwrap();
        let c = store.create_node(Layer::Context, "task", "c", json!({}), None).await.unwrap();
        store.create_edge(a.id, b.id, Relation::DependsOn, json!({})).await.unwrap();
        store.create_edge(b.id, c.id, Relation::DependsOn, json!({})).await.unwrap();

        let reached = store.traverse(a.id, EdgeDirection::Outgoing, 2).await.unwrap();
        assert!(reached.contains(&c.id));
    }

    #[tokio::test]
    async fn find_path_returns_shortest_hop_path() {
        let (store, _dir) = temp_store().await;
        let a = store.create_node(Layer::Context, "task", "a", json!({}), None).await.unwrap();
        let b = store.create_node(Layer::Context, "task", "b", json!({}), None).await.unwrap();
        let c = store.create_node(Layer::Context, "task", "c", json!({}), None).await.unwrap();
        store.create_edge(a.id, b.id, Relation::DependsOn, json!({})).await.unwrap();
        store.create_edge(b.id, c.id, Relation::DependsOn, json!({})).await.unwrap();

        let path = store.find_path(a.id, c.id, 5).await.unwrap().unwrap();
        assert_eq!(path, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn find_path_returns_none_when_unreachable() {
        let (store, _dir) = temp_store().await;
        let a = store.create_node(Layer::Context, "task", "a", json!({}), None).await.unwrap();
        let b = store.create_node(Layer::Context, "task", "b", json!({}), None).await.unwrap();
        let path = store.find_path(a.id, b.id, 5).await.unwrap();
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn observations_and_edge_events_are_time_ranged() {
        let (store, _dir) = temp_store().await;
        let a = store.create_node(Layer::Context, "task", "a", json!({}), None).await.unwrap();
        store.create_observation(a.id, "churn", Some(3.0), json!({}), None).await.unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        let until = Utc::now() + chrono::Duration::hours(1);
        let obs = store.list_observations_in_range(a.id, since, until).await.unwrap();
        assert_eq!(obs.len(), 1);
    }

    #[tokio::test]
    async fn create_node_validates_against_schema() {
        let (store, _dir) = temp_store().await;
        let schema = SchemaDef {
            required: vec!["status".to_string()],
            fields: Default::default(),
        };
        let err = store
            .create_node(Layer::Context, "task", "alpha", json!({}), Some(schema))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(ValidationErrorKind::MissingRequired(_))));
    }
}
