//! Pattern detection and proposal scoring. Detection is a set of pure
//! functions over already-fetched edge-events/observations, returning typed
//! pattern structs — the same "pure function over a snapshot" shape used
//! throughout [`crate::prompt`]. [`PatternEngine`] owns the only I/O: pulling
//! a window's worth of graph state and turning survivors into `suggestion`
//! nodes.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use weave_graph::{EventRelation, GraphError, GraphStore, Layer, Node};
use weave_ids::Id;

/// A task with no update in this many days is considered stale.
pub const STALE_TASK_DAYS: i64 = 7;

/// A pattern (co-edit, churn, tool sequence) needs at least this many
/// occurrences before it's reported; anything rarer is window noise.
pub const MIN_SUPPORT: u32 = 2;

/// Keywords that nudge a suggestion's score when they appear in both the
/// suggestion text and a task's text — a cheap stand-in for topic modelling.
const DOMAIN_KEYWORDS: &[&str] = &["test", "bug", "security", "performance", "refactor", "docs", "migration", "flaky"];

const DOMAIN_BONUS_PER_KEYWORD: f32 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct CoEditPattern {
    pub file_a: String,
    pub file_b: String,
    pub co_occurrences: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileChurnPattern {
    pub file: String,
    pub modify_count: u32,
    pub session_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSequencePattern {
    pub first_tool: String,
    pub second_tool: String,
    pub occurrences: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DetectedPatterns {
    pub co_edits: Vec<CoEditPattern>,
    pub churn: Vec<FileChurnPattern>,
    pub tool_sequences: Vec<ToolSequencePattern>,
}

fn unordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Every pair of distinct files modified within the same session counts once
/// per session; aggregated across the whole window.
pub fn detect_co_editing(modify_events: &[(Id, String)]) -> Vec<CoEditPattern> {
    let mut by_session: HashMap<Id, HashSet<String>> = HashMap::new();
    for (session, file) in modify_events {
        by_session.entry(*session).or_default().insert(file.clone());
    }

    let mut counts: HashMap<(String, String), u32> = HashMap::new();
    for files in by_session.values() {
        let mut files: Vec<&String> = files.iter().collect();
        files.sort();
        for i in 0..files.len() {
            for j in (i + 1)..files.len() {
                *counts.entry(unordered_pair(files[i], files[j])).or_insert(0) += 1;
            }
        }
    }

    let mut patterns: Vec<CoEditPattern> = counts
        .into_iter()
        .filter(|(_, n)| *n >= MIN_SUPPORT)
        .map(|((file_a, file_b), co_occurrences)| CoEditPattern { file_a, file_b, co_occurrences })
        .collect();
    patterns.sort_by(|a, b| b.co_occurrences.cmp(&a.co_occurrences).then(a.file_a.cmp(&b.file_a)));
    patterns
}

/// Files modified many times across many distinct sessions.
pub fn detect_file_churn(modify_events: &[(Id, String)]) -> Vec<FileChurnPattern> {
    let mut modify_count: HashMap<String, u32> = HashMap::new();
    let mut sessions: HashMap<String, HashSet<Id>> = HashMap::new();
    for (session, file) in modify_events {
        *modify_count.entry(file.clone()).or_insert(0) += 1;
        sessions.entry(file.clone()).or_default().insert(*session);
    }

    let mut patterns: Vec<FileChurnPattern> = modify_count
        .into_iter()
        .filter(|(_, n)| *n >= MIN_SUPPORT)
        .map(|(file, modify_count)| {
            let session_count = sessions.get(&file).map(|s| s.len() as u32).unwrap_or(0);
            FileChurnPattern { file, modify_count, session_count }
        })
        .filter(|p| p.session_count >= 2)
        .collect();
    patterns.sort_by(|a, b| b.modify_count.cmp(&a.modify_count).then(a.file.cmp(&b.file)));
    patterns
}

/// Ordered pairs of tool invocations within the same session.
pub fn detect_tool_sequences(session_tool_calls: &HashMap<Id, Vec<String>>) -> Vec<ToolSequencePattern> {
    let mut counts: HashMap<(String, String), u32> = HashMap::new();
    for calls in session_tool_calls.values() {
        for pair in calls.windows(2) {
            *counts.entry((pair[0].clone(), pair[1].clone())).or_insert(0) += 1;
        }
    }

    let mut patterns: Vec<ToolSequencePattern> = counts
        .into_iter()
        .filter(|(_, n)| *n >= MIN_SUPPORT)
        .map(|((first_tool, second_tool), occurrences)| ToolSequencePattern { first_tool, second_tool, occurrences })
        .collect();
    patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then(a.first_tool.cmp(&b.first_tool)));
    patterns
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() > 2)
        .collect()
}

/// Jaccard overlap of the two texts' token sets, in `[0, 1]`.
fn token_overlap_score(a: &str, b: &str) -> f32 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f32;
    let union = ta.union(&tb).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn domain_bonus(a: &str, b: &str) -> f32 {
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    DOMAIN_KEYWORDS.iter().filter(|kw| a.contains(*kw) && b.contains(*kw)).count() as f32 * DOMAIN_BONUS_PER_KEYWORD
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionKind {
    CoEdit,
    FileChurn,
    ToolSequence,
    StaleTask,
    MissionGap,
}

impl SuggestionKind {
    fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::CoEdit => "co_edit",
            SuggestionKind::FileChurn => "file_churn",
            SuggestionKind::ToolSequence => "tool_sequence",
            SuggestionKind::StaleTask => "stale_task",
            SuggestionKind::MissionGap => "mission_gap",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuggestionCandidate {
    pub name: String,
    pub kind: SuggestionKind,
    pub description: String,
    pub source_refs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScoredSuggestion {
    pub candidate: SuggestionCandidate,
    pub score: u8,
}

/// Builds candidates from detected patterns, stale tasks, high-churn files
/// with no matching task, and mission-criterion coverage gaps. Does not
/// score or dedup — that's [`score_and_dedup`].
pub fn build_candidates(
    patterns: &DetectedPatterns,
    stale_tasks: &[Node],
    churn_without_task: &[FileChurnPattern],
    mission_gaps: &[String],
) -> Vec<SuggestionCandidate> {
    let mut candidates = Vec::new();

    for pair in &patterns.co_edits {
        candidates.push(SuggestionCandidate {
            name: format!("Consider linking {} and {}", pair.file_a, pair.file_b),
            kind: SuggestionKind::CoEdit,
            description: format!(
                "{} and {} were modified together in {} sessions; consider a shared task or test.",
                pair.file_a, pair.file_b, pair.co_occurrences
            ),
            source_refs: vec![pair.file_a.clone(), pair.file_b.clone()],
        });
    }

    for file in churn_without_task {
        candidates.push(SuggestionCandidate {
            name: format!("Track churn in {}", file.file),
            kind: SuggestionKind::FileChurn,
            description: format!(
                "{} was modified {} times across {} sessions with no corresponding task.",
                file.file, file.modify_count, file.session_count
            ),
            source_refs: vec![file.file.clone()],
        });
    }

    for seq in &patterns.tool_sequences {
        candidates.push(SuggestionCandidate {
            name: format!("Automate {} then {}", seq.first_tool, seq.second_tool),
            kind: SuggestionKind::ToolSequence,
            description: format!(
                "{} was followed by {} {} times in the same session; consider a composite tool.",
                seq.first_tool, seq.second_tool, seq.occurrences
            ),
            source_refs: vec![seq.first_tool.clone(), seq.second_tool.clone()],
        });
    }

    for task in stale_tasks {
        candidates.push(SuggestionCandidate {
            name: format!("Revisit stale task: {}", task.name),
            kind: SuggestionKind::StaleTask,
            description: format!("{} has not been updated in at least {} days.", task.name, STALE_TASK_DAYS),
            source_refs: vec![task.name.clone()],
        });
    }

    for gap in mission_gaps {
        candidates.push(SuggestionCandidate {
            name: format!("Cover mission criterion: {gap}"),
            kind: SuggestionKind::MissionGap,
            description: format!("No active task appears to address the mission criterion \"{gap}\"."),
            source_refs: vec![gap.clone()],
        });
    }

    candidates
}

/// Scores each candidate against active tasks by token-overlap plus domain
/// bonus, normalised to 0–100, and drops candidates whose name collides with
/// one already kept (first-seen, highest score wins on a tie).
pub fn score_and_dedup(candidates: Vec<SuggestionCandidate>, active_tasks: &[Node]) -> Vec<ScoredSuggestion> {
    let task_texts: Vec<String> = active_tasks
        .iter()
        .map(|t| {
            let description = t.data.get("description").and_then(|v| v.as_str()).unwrap_or_default();
            format!("{} {}", t.name, description)
        })
        .collect();

    let mut scored: Vec<ScoredSuggestion> = candidates
        .into_iter()
        .map(|candidate| {
            let best = task_texts
                .iter()
                .map(|task_text| {
                    let overlap = token_overlap_score(&candidate.description, task_text);
                    let bonus = domain_bonus(&candidate.description, task_text);
                    (overlap + bonus).min(1.0)
                })
                .fold(0.0f32, f32::max);
            let score = (best * 100.0).round().clamp(0.0, 100.0) as u8;
            ScoredSuggestion { candidate, score }
        })
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score));

    let mut seen = HashSet::new();
    scored.retain(|s| seen.insert(s.candidate.name.clone()));
    scored
}

pub struct PatternEngine {
    store: GraphStore,
}

impl PatternEngine {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    async fn modify_events(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<(Id, String)>, GraphError> {
        let events = self.store.list_edge_events_in_range(since, until, Some(EventRelation::Modified)).await?;
        let mut cache: HashMap<Id, Option<String>> = HashMap::new();
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            let name = match cache.get(&event.target) {
                Some(cached) => cached.clone(),
                None => {
                    let resolved = self.store.get_node(event.target).await?.map(|n| n.name);
                    cache.insert(event.target, resolved.clone());
                    resolved
                }
            };
            if let Some(name) = name {
                out.push((event.source, name));
            }
        }
        Ok(out)
    }

    async fn session_tool_calls(&self, modify_events: &[(Id, String)], since: DateTime<Utc>, until: DateTime<Utc>) -> Result<HashMap<Id, Vec<String>>, GraphError> {
        let sessions: HashSet<Id> = modify_events.iter().map(|(s, _)| *s).collect();
        let mut calls = HashMap::new();
        for session in sessions {
            let observations = self.store.list_observations_in_range(session, since, until).await?;
            let tools: Vec<String> = observations
                .into_iter()
                .filter(|o| o.observation_type == "tool.post")
                .filter_map(|o| o.data.get("tool").and_then(|v| v.as_str()).map(|s| s.to_string()))
                .collect();
            if !tools.is_empty() {
                calls.insert(session, tools);
            }
        }
        Ok(calls)
    }

    async fn stale_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Node>, GraphError> {
        let tasks = self.store.list_nodes_by_type(Layer::Context, "task", 500).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.data.get("status").and_then(|v| v.as_str()) == Some("open"))
            .filter(|t| now.signed_duration_since(t.updated_at) >= Duration::days(STALE_TASK_DAYS))
            .collect())
    }

    async fn active_tasks(&self) -> Result<Vec<Node>, GraphError> {
        let tasks = self.store.list_nodes_by_type(Layer::Context, "task", 500).await?;
        Ok(tasks.into_iter().filter(|t| t.data.get("status").and_then(|v| v.as_str()) == Some("open")).collect())
    }

    async fn mission_gaps(&self, active_tasks: &[Node]) -> Result<Vec<String>, GraphError> {
        let missions = self.store.list_nodes_by_type(Layer::Context, "mission", 1).await?;
        let Some(mission) = missions.into_iter().next() else {
            return Ok(Vec::new());
        };
        let criteria: Vec<String> = mission
            .data
            .get("criteria")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default();

        const COVERAGE_THRESHOLD: f32 = 0.05;
        let gaps = criteria
            .into_iter()
            .filter(|criterion| {
                !active_tasks.iter().any(|t| {
                    let description = t.data.get("description").and_then(|v| v.as_str()).unwrap_or_default();
                    let task_text = format!("{} {}", t.name, description);
                    token_overlap_score(criterion, &task_text) >= COVERAGE_THRESHOLD
                })
            })
            .collect();
        Ok(gaps)
    }

    fn churn_without_task(churn: &[FileChurnPattern], active_tasks: &[Node]) -> Vec<FileChurnPattern> {
        churn
            .iter()
            .filter(|file| {
                !active_tasks.iter().any(|t| {
                    let description = t.data.get("description").and_then(|v| v.as_str()).unwrap_or_default();
                    let task_text = format!("{} {}", t.name, description);
                    task_text.to_lowercase().contains(&file.file.to_lowercase())
                })
            })
            .cloned()
            .collect()
    }

    /// Runs detection + scoring over the window `[now - window, now]` and
    /// upserts a `suggestion` node for each surviving candidate.
    pub async fn run(&self, now: DateTime<Utc>, window: Duration) -> Result<Vec<ScoredSuggestion>, GraphError> {
        let since = now - window;
        let modify_events = self.modify_events(since, now).await?;
        let session_tool_calls = self.session_tool_calls(&modify_events, since, now).await?;

        let patterns = DetectedPatterns {
            co_edits: detect_co_editing(&modify_events),
            churn: detect_file_churn(&modify_events),
            tool_sequences: detect_tool_sequences(&session_tool_calls),
        };

        let active_tasks = self.active_tasks().await?;
        let stale = self.stale_tasks(now).await?;
        let mission_gaps = self.mission_gaps(&active_tasks).await?;
        let churn_without_task = Self::churn_without_task(&patterns.churn, &active_tasks);

        let candidates = build_candidates(&patterns, &stale, &churn_without_task, &mission_gaps);
        let scored = score_and_dedup(candidates, &active_tasks);

        for suggestion in &scored {
            self.store
                .upsert_node(
                    Layer::Context,
                    "suggestion",
                    &suggestion.candidate.name,
                    serde_json::json!({
                        "kind": suggestion.candidate.kind.as_str(),
                        "description": suggestion.candidate.description,
                        "score": suggestion.score,
                        "source_refs": suggestion.candidate.source_refs,
                    }),
                )
                .await?;
        }

        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_ids::Id;

    fn node(node_type: &str, name: &str, data: serde_json::Value, updated_at: DateTime<Utc>) -> Node {
        Node {
            id: Id::new(),
            layer: Layer::Context,
            node_type: node_type.to_string(),
            name: name.to_string(),
            data,
            embedding: None,
            embedding_hash: None,
            embedded_at: None,
            created_at: updated_at,
            updated_at,
            deleted_at: None,
        }
    }

    #[test]
    fn co_editing_requires_minimum_support() {
        let session = Id::new();
        let events = vec![(session, "a.rs".to_string()), (session, "b.rs".to_string())];
        assert!(detect_co_editing(&events).is_empty());
    }

    #[test]
    fn co_editing_pairs_files_from_same_session() {
        let s1 = Id::new();
        let s2 = Id::new();
        let events = vec![
            (s1, "a.rs".to_string()),
            (s1, "b.rs".to_string()),
            (s2, "a.rs".to_string()),
            (s2, "b.rs".to_string()),
        ];
        let patterns = detect_co_editing(&events);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].co_occurrences, 2);
        assert_eq!((patterns[0].file_a.as_str(), patterns[0].file_b.as_str()), ("a.rs", "b.rs"));
    }

    #[test]
    fn file_churn_requires_multiple_sessions() {
        let session = Id::new();
        let events = vec![(session, "a.rs".to_string()), (session, "a.rs".to_string())];
        assert!(detect_file_churn(&events).is_empty());
    }

    #[test]
    fn file_churn_counts_across_sessions() {
        let s1 = Id::new();
        let s2 = Id::new();
        let events = vec![(s1, "a.rs".to_string()), (s2, "a.rs".to_string())];
        let patterns = detect_file_churn(&events);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].modify_count, 2);
        assert_eq!(patterns[0].session_count, 2);
    }

    #[test]
    fn tool_sequences_pair_consecutive_calls() {
        let mut calls = HashMap::new();
        calls.insert(Id::new(), vec!["read_file".to_string(), "write_file".to_string()]);
        calls.insert(Id::new(), vec!["read_file".to_string(), "write_file".to_string()]);
        let patterns = detect_tool_sequences(&calls);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrences, 2);
    }

    #[test]
    fn token_overlap_scores_identical_text_as_one() {
        assert_eq!(token_overlap_score("fix the flaky test", "fix the flaky test"), 1.0);
    }

    #[test]
    fn token_overlap_scores_disjoint_text_as_zero() {
        assert_eq!(token_overlap_score("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn score_and_dedup_drops_duplicate_names_keeping_highest_score() {
        let now = Utc::now();
        let tasks = vec![node("task", "fix parser", serde_json::json!({"status": "open", "description": "fix the parser bug"}), now)];
        let candidates = vec![
            SuggestionCandidate {
                name: "dup".to_string(),
                kind: SuggestionKind::StaleTask,
                description: "fix the parser bug".to_string(),
                source_refs: vec![],
            },
            SuggestionCandidate {
                name: "dup".to_string(),
                kind: SuggestionKind::StaleTask,
                description: "unrelated text entirely".to_string(),
                source_refs: vec![],
            },
        ];
        let scored = score_and_dedup(candidates, &tasks);
        assert_eq!(scored.len(), 1);
        assert!(scored[0].score > 0);
    }

    #[test]
    fn build_candidates_covers_all_pattern_kinds() {
        let now = Utc::now();
        let patterns = DetectedPatterns {
            co_edits: vec![CoEditPattern { file_a: "a.rs".to_string(), file_b: "b.rs".to_string(), co_occurrences: 3 }],
            churn: vec![],
            tool_sequences: vec![ToolSequencePattern { first_tool: "read".to_string(), second_tool: "write".to_string(), occurrences: 4 }],
        };
        let stale = vec![node("task", "old task", serde_json::json!({"status": "open"}), now - Duration::days(30))];
        let churn_without_task = vec![FileChurnPattern { file: "c.rs".to_string(), modify_count: 5, session_count: 3 }];
        let gaps = vec!["ship docs".to_string()];
        let candidates = build_candidates(&patterns, &stale, &churn_without_task, &gaps);
        assert_eq!(candidates.len(), 4);
        assert!(candidates.iter().any(|c| c.kind == SuggestionKind::CoEdit));
        assert!(candidates.iter().any(|c| c.kind == SuggestionKind::ToolSequence));
        assert!(candidates.iter().any(|c| c.kind == SuggestionKind::StaleTask));
        assert!(candidates.iter().any(|c| c.kind == SuggestionKind::MissionGap));
    }

    async fn store_fixture() -> (GraphStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::open(dir.path().join("graph.sqlite")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn engine_run_produces_suggestion_node_for_co_edited_files() {
        let (store, _dir) = store_fixture().await;

        let session1 = store.create_node(Layer::Context, "session", "s1", serde_json::json!({}), None).await.unwrap();
        let session2 = store.create_node(Layer::Context, "session", "s2", serde_json::json!({}), None).await.unwrap();
        let file_a = store.upsert_node(Layer::System, "file", "a.rs", serde_json::json!({})).await.unwrap();
        let file_b = store.upsert_node(Layer::System, "file", "b.rs", serde_json::json!({})).await.unwrap();

        for session in [&session1, &session2] {
            for file in [&file_a, &file_b] {
                store
                    .create_edge_event(session.id, file.id, EventRelation::Modified, true, None, serde_json::json!({}), None)
                    .await
                    .unwrap();
            }
        }

        let engine = PatternEngine::new(store.clone());
        let scored = engine.run(Utc::now(), Duration::days(1)).await.unwrap();
        assert!(scored.iter().any(|s| s.candidate.kind == SuggestionKind::CoEdit));

        let suggestion = store.find_node_by_name(Layer::Context, "suggestion", "Consider linking a.rs and b.rs").await.unwrap();
        assert!(suggestion.is_some());
    }
}
