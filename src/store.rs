//! Deduplicating response store.
//!
//! Accumulates normalized responses keyed by survey-response identity. The
//! key derivation and the collision rule are chosen by a `MergePolicy`;
//! surviving records are returned in first-insertion order.

use crate::models::ResponseRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How identity keys are derived and how collisions are resolved.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum MergePolicy {
    /// Key on the protocol alone, first record wins.
    #[serde(rename = "protocol")]
    #[value(name = "protocol")]
    ProtocolOnly,
    /// Key on (protocol, agent, question id), first record wins.
    #[default]
    #[serde(rename = "composite")]
    #[value(name = "composite")]
    Composite,
    /// Key on the protocol alone, a strictly higher priority replaces the stored record.
    #[serde(rename = "priority")]
    #[value(name = "priority")]
    PriorityMerge,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::ProtocolOnly => write!(f, "protocol"),
            MergePolicy::Composite => write!(f, "composite"),
            MergePolicy::PriorityMerge => write!(f, "priority"),
        }
    }
}

/// Survey-response identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Protocol(String),
    Composite {
        protocol: String,
        agent: String,
        question_id: String,
    },
    /// Issued to records without a protocol; unique within a store.
    Synthetic {
        account: String,
        survey: String,
        sequence: u64,
    },
}

impl IdentityKey {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, IdentityKey::Synthetic { .. })
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Protocol(protocol) => write!(f, "{}", protocol),
            IdentityKey::Composite {
                protocol,
                agent,
                question_id,
            } => write!(f, "{}|{}|{}", protocol, agent, question_id),
            IdentityKey::Synthetic {
                account,
                survey,
                sequence,
            } => write!(f, "noprot_{}_{}_{}", account, survey, sequence),
        }
    }
}

/// What `put` did with the offered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
    /// The stored record was kept and the offered one dropped.
    Kept,
}

impl PutOutcome {
    /// Whether the store contents changed.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, PutOutcome::Kept)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    key: IdentityKey,
    record: ResponseRecord,
    priority: i32,
}

/// Insertion-ordered map from identity key to the chosen record.
#[derive(Debug, Clone)]
pub struct DedupStore {
    policy: MergePolicy,
    slots: Vec<Slot>,
    index: HashMap<IdentityKey, usize>,
    next_sequence: u64,
}

impl Default for DedupStore {
    fn default() -> Self {
        Self::new(MergePolicy::default())
    }
}

impl DedupStore {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            slots: Vec::new(),
            index: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[allow(dead_code)] // Pairs with len()
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Derive the identity key of a record under this store's policy.
    ///
    /// Records without a protocol get a fresh synthetic key each call.
    pub fn key_for(&mut self, record: &ResponseRecord) -> IdentityKey {
        let Some(protocol) = record.protocol.clone() else {
            self.next_sequence += 1;
            return IdentityKey::Synthetic {
                account: record.account_id.clone(),
                survey: record.survey_id.clone(),
                sequence: self.next_sequence,
            };
        };

        match self.policy {
            MergePolicy::ProtocolOnly | MergePolicy::PriorityMerge => {
                IdentityKey::Protocol(protocol)
            }
            MergePolicy::Composite => IdentityKey::Composite {
                protocol,
                agent: record.agent.clone(),
                question_id: record.question_id.clone(),
            },
        }
    }

    /// Offer a record under an explicit key.
    pub fn put(&mut self, key: IdentityKey, record: ResponseRecord, priority: i32) -> PutOutcome {
        if let Some(&pos) = self.index.get(&key) {
            let slot = &mut self.slots[pos];
            if self.policy == MergePolicy::PriorityMerge && priority > slot.priority {
                slot.record = record;
                slot.priority = priority;
                return PutOutcome::Replaced;
            }
            return PutOutcome::Kept;
        }

        self.index.insert(key.clone(), self.slots.len());
        self.slots.push(Slot {
            key,
            record,
            priority,
        });
        PutOutcome::Inserted
    }

    /// Offer a record, deriving its key from the policy.
    pub fn insert(&mut self, record: ResponseRecord, priority: i32) -> PutOutcome {
        let key = self.key_for(&record);
        self.put(key, record, priority)
    }

    /// Fold another store into this one, in the other store's order.
    ///
    /// Synthetic keys are reissued from this store's sequence so they stay
    /// unique across the merged result. Returns the number of admitted records.
    pub fn absorb(&mut self, other: DedupStore) -> usize {
        let mut admitted = 0;
        for slot in other.slots {
            let key = if slot.key.is_synthetic() {
                self.key_for(&slot.record)
            } else {
                slot.key
            };
            if self.put(key, slot.record, slot.priority).is_admitted() {
                admitted += 1;
            }
        }
        admitted
    }

    #[allow(dead_code)] // Inspection helper
    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.slots.iter().map(|s| &s.key)
    }

    /// Take every surviving record in first-insertion order, leaving the store empty.
    pub fn drain(&mut self) -> Vec<ResponseRecord> {
        self.index.clear();
        self.slots.drain(..).map(|s| s.record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn record(protocol: Option<&str>, agent: &str, question: &str, grade: i32) -> ResponseRecord {
        ResponseRecord {
            protocol: protocol.map(String::from),
            agent: agent.to_string(),
            sector: "OUTROS".to_string(),
            grade: Some(grade),
            comment: String::new(),
            responded_at: "2025-01-02".to_string(),
            account_id: "1".to_string(),
            account_name: "Conta".to_string(),
            survey_id: "10".to_string(),
            question_id: question.to_string(),
            question_text: "Atendimento".to_string(),
            service: None,
            deep_link: None,
        }
    }

    fn sample() -> Vec<ResponseRecord> {
        vec![
            record(Some("100"), "ANA", "1", 9),
            record(Some("100"), "ANA", "2", 7),
            record(Some("100"), "BRUNO", "1", 5),
            record(Some("200"), "ANA", "1", 10),
            record(Some("200"), "ANA", "1", 3),
            record(None, "CAIO", "1", 8),
            record(None, "CAIO", "1", 8),
        ]
    }

    #[test]
    fn test_protocol_policy_never_grows_and_keys_are_unique() {
        let input = sample();
        let mut store = DedupStore::new(MergePolicy::ProtocolOnly);
        for r in input.clone() {
            store.insert(r, 0);
        }

        assert!(store.len() <= input.len());
        let keys: HashSet<String> = store.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys.len(), store.len());
        // 100, 200 and two protocol-less responses
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_protocol_policy_is_first_wins() {
        let mut store = DedupStore::new(MergePolicy::ProtocolOnly);
        assert_eq!(store.insert(record(Some("200"), "ANA", "1", 10), 0), PutOutcome::Inserted);
        assert_eq!(store.insert(record(Some("200"), "ANA", "1", 3), 5), PutOutcome::Kept);

        let records = store.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].grade, Some(10));
    }

    #[test]
    fn test_composite_policy_keeps_distinct_agent_question_pairs() {
        let mut store = DedupStore::new(MergePolicy::Composite);
        for r in sample() {
            store.insert(r, 0);
        }

        let records = store.drain();
        let protocol_100: Vec<_> = records
            .iter()
            .filter(|r| r.protocol.as_deref() == Some("100"))
            .collect();
        assert_eq!(protocol_100.len(), 3);
        // 3 for protocol 100, 1 for protocol 200, 2 synthetic
        assert_eq!(records.len(), 6);
    }

    #[test]
    fn test_priority_policy_replaces_only_on_strictly_higher_priority() {
        let mut store = DedupStore::new(MergePolicy::PriorityMerge);
        store.insert(record(Some("300"), "ANA", "1", 4), 0);
        store.insert(record(Some("400"), "ANA", "1", 6), 0);

        assert_eq!(store.insert(record(Some("300"), "ANA", "2", 9), 0), PutOutcome::Kept);
        assert_eq!(store.insert(record(Some("300"), "ANA", "3", 10), 10), PutOutcome::Replaced);
        assert_eq!(store.insert(record(Some("300"), "ANA", "4", 1), 10), PutOutcome::Kept);

        let records = store.drain();
        assert_eq!(records.len(), 2);
        // Replacement keeps the original position
        assert_eq!(records[0].question_id, "3");
        assert_eq!(records[1].protocol.as_deref(), Some("400"));
    }

    #[test]
    fn test_reinserting_same_records_is_idempotent() {
        let with_protocol: Vec<_> = sample().into_iter().filter(|r| r.protocol.is_some()).collect();

        let mut once = DedupStore::default();
        for r in with_protocol.clone() {
            once.insert(r, 0);
        }

        let mut twice = DedupStore::default();
        for r in with_protocol.iter().chain(with_protocol.iter()) {
            twice.insert(r.clone(), 0);
        }

        assert_eq!(once.drain(), twice.drain());
    }

    #[test]
    fn test_reinserting_protocol_less_records_duplicates_them() {
        let without: Vec<_> = sample().into_iter().filter(|r| r.protocol.is_none()).collect();

        let mut store = DedupStore::default();
        for r in without.iter().chain(without.iter()) {
            assert_eq!(store.insert(r.clone(), 0), PutOutcome::Inserted);
        }
        assert_eq!(store.len(), 2 * without.len());
    }

    #[test]
    fn test_synthetic_keys_are_distinct() {
        let mut store = DedupStore::default();
        let r = record(None, "CAIO", "1", 8);

        let first = store.key_for(&r);
        let second = store.key_for(&r);
        assert_ne!(first, second);
        assert_eq!(first.to_string(), "noprot_1_10_1");
        assert_eq!(second.to_string(), "noprot_1_10_2");
    }

    #[test]
    fn test_absorb_reissues_synthetic_keys() {
        let mut left = DedupStore::default();
        left.insert(record(None, "CAIO", "1", 8), 0);
        left.insert(record(Some("100"), "ANA", "1", 9), 0);

        let mut right = DedupStore::default();
        right.insert(record(None, "DORA", "1", 6), 0);
        right.insert(record(Some("100"), "ANA", "1", 2), 0);

        let mut run = DedupStore::default();
        assert_eq!(run.absorb(left), 2);
        assert_eq!(run.absorb(right), 1);

        let keys: Vec<String> = run.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["noprot_1_10_1", "100|ANA|1", "noprot_1_10_2"]);

        let records = run.drain();
        assert_eq!(records[1].grade, Some(9));
        assert!(run.is_empty());
    }

    #[test]
    fn test_merge_policy_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: MergePolicy,
        }
        let parsed: Wrapper = toml::from_str("policy = \"protocol\"").unwrap();
        assert_eq!(parsed.policy, MergePolicy::ProtocolOnly);
        assert_eq!(MergePolicy::PriorityMerge.to_string(), "priority");
    }
}
