use megamind::config::ConfigError;
use megamind::core::{Encoding, Object, Predicate, Subgraph, Subject, Triple};
use megamind::ingest::{DistinctSubjectMode, SubgraphStats};
use megamind::Error;

const BOB: &[u8] = br#"{"triples":[{"subject":{"type":"Person","tuid":"1"},"predicate":{"name":"name"},"object":{"string":"Bob"}}]}"#;

#[test]
fn test_error_display() {
    let err = Error::Config(ConfigError::UnknownEncoding("yaml".to_string()));
    assert_eq!(
        format!("{}", err),
        "Configuration error: unsupported encoding 'yaml' (expected 'json' or 'proto')"
    );
}

#[test]
fn test_bob_scenario() {
    let subgraph = Encoding::Json.decode(BOB).unwrap();
    let stats = SubgraphStats::of(&subgraph, DistinctSubjectMode::Reference);

    assert_eq!(stats.num_of_triples, 1);
    assert_eq!(stats.num_of_distinct_subjects, 1);
}

#[test]
fn test_empty_subgraph_stats() {
    for raw in [&b"{}"[..], &b"{\"triples\":[]}"[..]] {
        let subgraph = Encoding::Json.decode(raw).unwrap();
        for mode in [DistinctSubjectMode::Reference, DistinctSubjectMode::IncludeNested] {
            assert_eq!(SubgraphStats::of(&subgraph, mode), SubgraphStats::default());
        }
    }
    assert_eq!(Encoding::Proto.decode(&[]).unwrap(), Subgraph::default());
}

#[test]
fn test_distinct_top_level_subjects() {
    let tuids = ["1", "2", "3", "2", "1", "4"];
    let subgraph = Subgraph::new(
        tuids
            .iter()
            .map(|tuid| Triple::new(Subject::new("Person", tuid), Predicate::new("age"), Object::string("42")))
            .collect(),
    );

    for mode in [DistinctSubjectMode::Reference, DistinctSubjectMode::IncludeNested] {
        assert_eq!(SubgraphStats::of(&subgraph, mode).num_of_distinct_subjects, 4);
    }
}

#[test]
fn test_identity_is_type_and_tuid() {
    // "ab" + "c" and "a" + "bc" concatenate to the same string but are distinct subjects.
    let subgraph = Subgraph::new(vec![
        Triple::new(Subject::new("ab", "c"), Predicate::new("p"), Object::string("x")),
        Triple::new(Subject::new("a", "bc"), Predicate::new("p"), Object::string("x")),
    ]);

    assert_eq!(SubgraphStats::of(&subgraph, DistinctSubjectMode::Reference).num_of_distinct_subjects, 2);
}
