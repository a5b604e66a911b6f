//! Deterministic merge of a local memory with a remote event.
//!
//! The resolver never consults node identity; any replica applying the
//! same pair under the same strategy produces the same result, which is
//! what lets concurrent writes converge without coordination.

use std::collections::HashSet;
use std::sync::Arc;

use crate::clock::VectorClock;
use crate::event::MemoryEvent;
use crate::types::Memory;

/// Merge function injected for [`MergeStrategy::Custom`].
pub type CustomMergeFn = dyn Fn(&Memory, &MemoryEvent) -> Memory + Send + Sync;

/// How concurrent revisions of one memory are reconciled.
#[derive(Clone, Default)]
pub enum MergeStrategy {
    /// Greater of `updated_at` / event timestamp wins wholesale;
    /// ties favor local.
    #[default]
    LastWriteWins,
    /// Higher importance wins; ties favor local.
    Importance,
    /// Causal order decides; concurrent clocks fall through to
    /// field-wise merge, unparseable clocks to last-write-wins.
    VectorClock,
    /// Field-wise merge of both revisions.
    MergeAll,
    /// Injected function; `None` behaves as last-write-wins.
    Custom(Option<Arc<CustomMergeFn>>),
}

impl MergeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MergeStrategy::LastWriteWins => "last_write_wins",
            MergeStrategy::Importance => "importance",
            MergeStrategy::VectorClock => "vector_clock",
            MergeStrategy::MergeAll => "merge_all",
            MergeStrategy::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of [`CrdtResolver::resolve_with_report`].
#[derive(Debug, Clone)]
pub struct ResolutionReport {
    pub memory_id: String,
    pub strategy: &'static str,
    pub conflict_detected: bool,
    pub conflict_description: String,
    pub changed_fields: Vec<String>,
}

/// Stateless merge engine configured with one [`MergeStrategy`].
#[derive(Clone, Default)]
pub struct CrdtResolver {
    strategy: MergeStrategy,
}

impl CrdtResolver {
    pub fn new(strategy: MergeStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &MergeStrategy {
        &self.strategy
    }

    /// Merge a remote revision into the local one.
    pub fn resolve(&self, local: &Memory, remote: &MemoryEvent) -> Memory {
        match &self.strategy {
            MergeStrategy::LastWriteWins => last_write_wins(local, remote),
            MergeStrategy::Importance => {
                if remote.importance > local.importance {
                    remote_wins(local, remote)
                } else {
                    local.clone()
                }
            }
            MergeStrategy::VectorClock => self.resolve_by_clock(local, remote),
            MergeStrategy::MergeAll => merge_all(local, remote),
            MergeStrategy::Custom(Some(merge)) => merge(local, remote),
            MergeStrategy::Custom(None) => last_write_wins(local, remote),
        }
    }

    fn resolve_by_clock(&self, local: &Memory, remote: &MemoryEvent) -> Memory {
        let local_clock = VectorClock::from_json(&local.vector_clock);
        let remote_clock = remote.parse_clock();

        match (local_clock, remote_clock) {
            (Ok(local_vc), Ok(remote_vc)) => {
                if remote_vc.happens_before(&local_vc) {
                    local.clone()
                } else if local_vc.happens_before(&remote_vc) {
                    remote_wins(local, remote)
                } else if local_vc == remote_vc {
                    local.clone()
                } else {
                    merge_all(local, remote)
                }
            }
            // A clock we cannot read carries no causal information.
            _ => last_write_wins(local, remote),
        }
    }

    /// `(conflicting, description)` naming the first field that
    /// differs among content, importance, and tags.
    pub fn detect_conflict(&self, local: &Memory, remote: &MemoryEvent) -> (bool, String) {
        if local.content != remote.content {
            return (true, "content differs between replicas".to_string());
        }
        if (local.importance - remote.importance).abs() > 0.0 {
            return (
                true,
                format!(
                    "importance differs: local {} vs remote {}",
                    local.importance, remote.importance
                ),
            );
        }
        let local_tags: HashSet<&str> = local.tags.iter().map(String::as_str).collect();
        let remote_tags: HashSet<&str> = remote.tags.iter().map(String::as_str).collect();
        if local_tags != remote_tags {
            return (true, "tag sets differ between replicas".to_string());
        }
        (false, String::new())
    }

    /// Detect, merge, and describe what changed.
    pub fn resolve_with_report(
        &self,
        local: &Memory,
        remote: &MemoryEvent,
    ) -> (Memory, ResolutionReport) {
        let (conflict_detected, conflict_description) = self.detect_conflict(local, remote);
        let merged = self.resolve(local, remote);

        let mut changed_fields = Vec::new();
        if merged.content != local.content {
            changed_fields.push("content".to_string());
        }
        if merged.importance != local.importance {
            changed_fields.push("importance".to_string());
        }
        if merged.tags != local.tags {
            changed_fields.push("tags".to_string());
        }
        if merged.embedding != local.embedding {
            changed_fields.push("embedding".to_string());
        }
        if merged.metadata != local.metadata {
            changed_fields.push("metadata".to_string());
        }
        if merged.entities != local.entities {
            changed_fields.push("entities".to_string());
        }

        let report = ResolutionReport {
            memory_id: merged.id.clone(),
            strategy: self.strategy.name(),
            conflict_detected,
            conflict_description,
            changed_fields,
        };
        (merged, report)
    }
}

fn last_write_wins(local: &Memory, remote: &MemoryEvent) -> Memory {
    if remote.timestamp > local.updated_at {
        remote_wins(local, remote)
    } else {
        local.clone()
    }
}

/// The remote revision replaces local content wholesale. Local
/// bookkeeping that must stay monotonic (creation time, access count)
/// is preserved.
fn remote_wins(local: &Memory, remote: &MemoryEvent) -> Memory {
    let mut merged = local.clone();
    merged.content = remote.content.clone();
    merged.importance = remote.importance;
    merged.tags = remote.tags.clone();
    merged.metadata = remote.metadata.clone();
    merged.entities = remote.entities.clone();
    if !remote.embedding.is_empty() {
        merged.embedding = remote.embedding.clone();
    }
    if !remote.session_id.is_empty() {
        merged.session_id = remote.session_id.clone();
    }
    merged.updated_at = remote.timestamp.max(local.updated_at);
    merged.vector_clock = remote.vector_clock.clone();
    merged
}

/// Field-wise merge. Deterministic and commutative up to the
/// content-length tie-break on timestamps.
fn merge_all(local: &Memory, remote: &MemoryEvent) -> Memory {
    let mut merged = local.clone();

    // Content: longer string wins; equal lengths go to the newer side.
    let remote_newer = remote.timestamp > local.updated_at;
    if remote.content.len() > local.content.len()
        || (remote.content.len() == local.content.len() && remote_newer)
    {
        merged.content = remote.content.clone();
    }

    merged.importance = local.importance.max(remote.importance);

    if !remote.embedding.is_empty() {
        merged.embedding = remote.embedding.clone();
    }

    merged.created_at = local.created_at.min(remote.timestamp);
    merged.updated_at = local.updated_at.max(remote.timestamp);

    // Metadata union; remote keys overwrite on collision.
    for (key, value) in &remote.metadata {
        merged.metadata.insert(key.clone(), value.clone());
    }

    // Tag set-union preserving first-seen order.
    let mut seen: HashSet<&str> = local.tags.iter().map(String::as_str).collect();
    for tag in &remote.tags {
        if seen.insert(tag.as_str()) {
            merged.tags.push(tag.clone());
        }
    }

    // Entity union by id; higher extraction confidence wins a collision.
    for remote_entity in &remote.entities {
        match merged.entities.iter_mut().find(|e| e.id == remote_entity.id) {
            Some(existing) => {
                if remote_entity.confidence > existing.confidence {
                    *existing = remote_entity.clone();
                }
            }
            None => merged.entities.push(remote_entity.clone()),
        }
    }

    // Merged causality covers both inputs when both clocks parse.
    if let (Ok(mut local_vc), Ok(remote_vc)) = (
        VectorClock::from_json(&local.vector_clock),
        remote.parse_clock(),
    ) {
        local_vc.update(&remote_vc);
        merged.vector_clock = local_vc.to_json();
    } else {
        merged.vector_clock = remote.vector_clock.clone();
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemoryEventType;
    use chrono::Duration;

    fn local_memory(content: &str, clock: &VectorClock) -> Memory {
        let mut memory = Memory::new("user-1", content);
        memory.vector_clock = clock.to_json();
        memory
    }

    fn remote_event(local: &Memory, content: &str, clock: &VectorClock) -> MemoryEvent {
        let mut replica = local.clone();
        replica.content = content.to_string();
        replica.vector_clock = clock.to_json();
        let mut event =
            MemoryEvent::for_memory(MemoryEventType::MemoryUpdated, "node-b", &replica, clock);
        event.timestamp = local.updated_at + Duration::seconds(5);
        event
    }

    #[test]
    fn last_write_wins_prefers_newer_remote() {
        let resolver = CrdtResolver::new(MergeStrategy::LastWriteWins);
        let local = local_memory("local", &VectorClock::new());
        let remote = remote_event(&local, "remote", &VectorClock::new());

        let merged = resolver.resolve(&local, &remote);
        assert_eq!(merged.content, "remote");
    }

    #[test]
    fn last_write_wins_ties_favor_local() {
        let resolver = CrdtResolver::new(MergeStrategy::LastWriteWins);
        let local = local_memory("local", &VectorClock::new());
        let mut remote = remote_event(&local, "remote", &VectorClock::new());
        remote.timestamp = local.updated_at;

        let merged = resolver.resolve(&local, &remote);
        assert_eq!(merged.content, "local");
    }

    #[test]
    fn importance_strategy_keeps_higher() {
        let resolver = CrdtResolver::new(MergeStrategy::Importance);
        let mut local = local_memory("local", &VectorClock::new());
        local.importance = 0.9;
        let mut remote = remote_event(&local, "remote", &VectorClock::new());
        remote.importance = 0.4;

        assert_eq!(resolver.resolve(&local, &remote).content, "local");

        local.importance = 0.2;
        remote.importance = 0.8;
        assert_eq!(resolver.resolve(&local, &remote).content, "remote");
    }

    #[test]
    fn vector_clock_remote_happens_after() {
        let resolver = CrdtResolver::new(MergeStrategy::VectorClock);
        let local = local_memory("local", &VectorClock::from([("A", 1)]));
        let remote = remote_event(&local, "remote", &VectorClock::from([("A", 2)]));

        let merged = resolver.resolve(&local, &remote);
        assert_eq!(merged.content, "remote");
    }

    #[test]
    fn vector_clock_remote_happens_before() {
        let resolver = CrdtResolver::new(MergeStrategy::VectorClock);
        let local = local_memory("local", &VectorClock::from([("A", 2)]));
        let remote = remote_event(&local, "remote", &VectorClock::from([("A", 1)]));

        let merged = resolver.resolve(&local, &remote);
        assert_eq!(merged.content, "local");
    }

    #[test]
    fn vector_clock_concurrent_falls_through_to_merge_all() {
        let resolver = CrdtResolver::new(MergeStrategy::VectorClock);
        let local = local_memory("local", &VectorClock::from([("A", 2), ("B", 1)]));
        let remote = remote_event(&local, "remote", &VectorClock::from([("A", 1), ("B", 2)]));

        // Concurrent clocks; the longer content wins the merge.
        let merged = resolver.resolve(&local, &remote);
        assert_eq!(merged.content, "remote");
    }

    #[test]
    fn vector_clock_parse_failure_falls_back_to_lww() {
        let resolver = CrdtResolver::new(MergeStrategy::VectorClock);
        let mut local = local_memory("local", &VectorClock::new());
        local.vector_clock = "garbage".to_string();
        let remote = remote_event(&local, "remote", &VectorClock::from([("A", 1)]));

        let merged = resolver.resolve(&local, &remote);
        assert_eq!(merged.content, "remote");
    }

    #[test]
    fn merge_all_combines_fields() {
        let resolver = CrdtResolver::new(MergeStrategy::MergeAll);
        let mut local = local_memory("short", &VectorClock::from([("A", 1)]));
        local.importance = 0.3;
        local.tags = vec!["a".to_string(), "b".to_string()];
        local
            .metadata
            .insert("keep".to_string(), serde_json::Value::from("local"));
        local
            .metadata
            .insert("clash".to_string(), serde_json::Value::from("local"));

        let mut remote = remote_event(&local, "much longer content", &VectorClock::from([("B", 1)]));
        remote.importance = 0.7;
        remote.tags = vec!["b".to_string(), "c".to_string()];
        remote.metadata.clear();
        remote
            .metadata
            .insert("clash".to_string(), serde_json::Value::from("remote"));
        remote.embedding = vec![0.5, 0.6];

        let merged = resolver.resolve(&local, &remote);
        assert_eq!(merged.content, "much longer content");
        assert_eq!(merged.importance, 0.7);
        assert_eq!(merged.embedding, vec![0.5, 0.6]);
        assert_eq!(merged.tags, vec!["a", "b", "c"]);
        assert_eq!(
            merged.metadata.get("clash").unwrap(),
            &serde_json::Value::from("remote")
        );
        assert_eq!(
            merged.metadata.get("keep").unwrap(),
            &serde_json::Value::from("local")
        );
        assert!(merged.updated_at >= local.updated_at);

        let merged_clock = VectorClock::from_json(&merged.vector_clock).unwrap();
        assert_eq!(merged_clock.get("A"), 1);
        assert_eq!(merged_clock.get("B"), 1);
    }

    #[test]
    fn merge_all_equal_lengths_take_newer_side() {
        let resolver = CrdtResolver::new(MergeStrategy::MergeAll);
        let local = local_memory("aaaa", &VectorClock::new());
        let remote = remote_event(&local, "bbbb", &VectorClock::new());

        // Remote timestamp is newer; equal-length content goes remote.
        let merged = resolver.resolve(&local, &remote);
        assert_eq!(merged.content, "bbbb");
    }

    #[test]
    fn merge_all_is_commutative_for_differing_lengths() {
        let resolver = CrdtResolver::new(MergeStrategy::MergeAll);

        let clock_a = VectorClock::from([("A", 2), ("B", 1)]);
        let clock_b = VectorClock::from([("A", 1), ("B", 2)]);

        let mut side_a = local_memory("short", &clock_a);
        side_a.importance = 0.3;
        side_a.tags = vec!["x".to_string()];
        let mut side_b = local_memory("considerably longer", &clock_b);
        side_b.id = side_a.id.clone();
        side_b.importance = 0.8;
        side_b.tags = vec!["y".to_string()];
        side_b.updated_at = side_a.updated_at;
        side_b.created_at = side_a.created_at;

        let mut event_b =
            MemoryEvent::for_memory(MemoryEventType::MemoryUpdated, "node-b", &side_b, &clock_b);
        event_b.timestamp = side_a.updated_at;
        let mut event_a =
            MemoryEvent::for_memory(MemoryEventType::MemoryUpdated, "node-a", &side_a, &clock_a);
        event_a.timestamp = side_b.updated_at;

        let ab = resolver.resolve(&side_a, &event_b);
        let ba = resolver.resolve(&side_b, &event_a);

        assert_eq!(ab.content, ba.content);
        assert_eq!(ab.importance, ba.importance);
        let ab_tags: HashSet<&str> = ab.tags.iter().map(String::as_str).collect();
        let ba_tags: HashSet<&str> = ba.tags.iter().map(String::as_str).collect();
        assert_eq!(ab_tags, ba_tags);
    }

    #[test]
    fn custom_none_behaves_as_lww() {
        let resolver = CrdtResolver::new(MergeStrategy::Custom(None));
        let local = local_memory("local", &VectorClock::new());
        let remote = remote_event(&local, "remote", &VectorClock::new());
        assert_eq!(resolver.resolve(&local, &remote).content, "remote");
    }

    #[test]
    fn custom_function_is_used() {
        let merge: Arc<CustomMergeFn> = Arc::new(|local, remote| {
            let mut merged = local.clone();
            merged.content = format!("{}+{}", local.content, remote.content);
            merged
        });
        let resolver = CrdtResolver::new(MergeStrategy::Custom(Some(merge)));
        let local = local_memory("local", &VectorClock::new());
        let remote = remote_event(&local, "remote", &VectorClock::new());
        assert_eq!(resolver.resolve(&local, &remote).content, "local+remote");
    }

    #[test]
    fn detect_conflict_names_first_difference() {
        let resolver = CrdtResolver::default();
        let local = local_memory("same", &VectorClock::new());
        let mut remote = remote_event(&local, "same", &VectorClock::new());
        remote.importance = local.importance;
        remote.tags = local.tags.clone();

        let (conflict, _) = resolver.detect_conflict(&local, &remote);
        assert!(!conflict);

        remote.content = "different".to_string();
        let (conflict, description) = resolver.detect_conflict(&local, &remote);
        assert!(conflict);
        assert!(description.contains("content"));

        remote.content = local.content.clone();
        remote.tags = vec!["extra".to_string()];
        let (conflict, description) = resolver.detect_conflict(&local, &remote);
        assert!(conflict);
        assert!(description.contains("tag"));
    }

    #[test]
    fn report_lists_changed_fields() {
        let resolver = CrdtResolver::new(MergeStrategy::MergeAll);
        let mut local = local_memory("short", &VectorClock::new());
        local.importance = 0.2;
        let mut remote = remote_event(&local, "a longer piece of content", &VectorClock::new());
        remote.importance = 0.9;

        let (merged, report) = resolver.resolve_with_report(&local, &remote);
        assert_eq!(merged.content, "a longer piece of content");
        assert!(report.conflict_detected);
        assert_eq!(report.strategy, "merge_all");
        assert!(report.changed_fields.contains(&"content".to_string()));
        assert!(report.changed_fields.contains(&"importance".to_string()));
        assert_eq!(report.memory_id, local.id);
    }
}
