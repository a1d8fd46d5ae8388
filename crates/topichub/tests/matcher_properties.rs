//! Property tests for pattern matching, coverage and specificity.
//!
//! Uses proptest to check that the regex matcher, the segment-level `covers`
//! relation and the pattern index agree with each other.

use std::cmp::Ordering;

use proptest::prelude::*;
use topichub::{compare_specificity, Matcher, PatternIndex, Topic};

// ============================================================================
// STRATEGIES
// ============================================================================

/// Literal segments from a small alphabet so patterns and topics collide often
fn literal() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "x-1", "y_2", "z:3"]).prop_map(String::from)
}

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => literal(),
        1 => Just("*".to_string()),
        1 => Just("**".to_string()),
    ]
}

fn concrete_topic() -> impl Strategy<Value = String> {
    prop::collection::vec(literal(), 1..6).prop_map(|parts| parts.join("."))
}

fn pattern() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..5).prop_map(|parts| parts.join("."))
}

fn parse(raw: &str) -> Topic {
    Topic::parse(raw, '.').expect("generated topics are valid")
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn test_concrete_topic_matches_itself(topic in concrete_topic()) {
        let matcher = Matcher::compile(&topic, '.').unwrap();
        prop_assert!(matcher.test(&topic));
    }

    #[test]
    fn test_regex_agrees_with_covers(pattern in pattern(), topic in concrete_topic()) {
        let matcher = Matcher::compile(&pattern, '.').unwrap();
        let covers = parse(&pattern).covers(&parse(&topic));
        prop_assert_eq!(matcher.test(&topic), covers);
    }

    #[test]
    fn test_covers_is_transitive_on_instances(
        general in pattern(),
        specific in pattern(),
        topic in concrete_topic(),
    ) {
        let general_topic = parse(&general);
        let specific_topic = parse(&specific);
        if general_topic.covers(&specific_topic)
            && Matcher::compile(&specific, '.').unwrap().test(&topic)
        {
            prop_assert!(Matcher::compile(&general, '.').unwrap().test(&topic));
        }
    }

    #[test]
    fn test_specificity_is_antisymmetric(a in pattern(), b in pattern()) {
        let forward = compare_specificity(&a, &b, '.');
        let backward = compare_specificity(&b, &a, '.');
        prop_assert_eq!(forward, backward.reverse());
    }

    #[test]
    fn test_literals_compare_equal(a in concrete_topic(), b in concrete_topic()) {
        prop_assert_eq!(compare_specificity(&a, &b, '.'), Ordering::Equal);
    }

    #[test]
    fn test_index_finds_exactly_the_matching_patterns(
        patterns in prop::collection::vec(pattern(), 1..12),
        topic in concrete_topic(),
    ) {
        let mut index = PatternIndex::new('.');
        for p in &patterns {
            index.insert(p, ()).unwrap();
        }

        let mut found: Vec<String> = index
            .find_matching(&parse(&topic))
            .into_iter()
            .map(|entry| entry.pattern().to_string())
            .collect();
        found.sort();

        let mut expected: Vec<String> = patterns
            .iter()
            .filter(|p| Matcher::compile(p, '.').unwrap().test(&topic))
            .cloned()
            .collect();
        expected.sort();
        expected.dedup();

        prop_assert_eq!(found, expected);
    }

    #[test]
    fn test_index_stays_complete_after_removals(
        patterns in prop::collection::vec(pattern(), 2..12),
        remove_every in 2usize..4,
        topic in concrete_topic(),
    ) {
        let mut index = PatternIndex::new('.');
        for p in &patterns {
            index.insert(p, ()).unwrap();
        }
        let mut kept = Vec::new();
        for (i, p) in patterns.iter().enumerate() {
            if i % remove_every == 0 {
                index.remove_entry(p);
            } else {
                kept.push(p.clone());
            }
        }
        // A pattern listed twice may have been removed by its first occurrence
        kept.retain(|p| index.get(p).is_some());

        let mut found: Vec<String> = index
            .find_matching(&parse(&topic))
            .into_iter()
            .map(|entry| entry.pattern().to_string())
            .collect();
        found.sort();

        let mut expected: Vec<String> = kept
            .into_iter()
            .filter(|p| Matcher::compile(p, '.').unwrap().test(&topic))
            .collect();
        expected.sort();
        expected.dedup();

        prop_assert_eq!(found, expected);
    }

    #[test]
    fn test_matching_entries_come_most_specific_first(
        patterns in prop::collection::vec(pattern(), 1..10),
        topic in concrete_topic(),
    ) {
        let mut index = PatternIndex::new('.');
        for p in &patterns {
            index.insert(p, ()).unwrap();
        }

        let found = index.find_matching(&parse(&topic));
        for pair in found.windows(2) {
            let order = compare_specificity(pair[0].pattern(), pair[1].pattern(), '.');
            prop_assert_ne!(order, Ordering::Greater);
        }
    }
}
