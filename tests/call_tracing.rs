//! Tracer behavior against an in-memory symbol database: depth bounds,
//! cycle handling, exclusion filters, unique-chain reduction, statistics.

mod common;

use std::sync::Arc;

use common::MockSymbols;
use lock_trace::domain::tracer::{CallTracer, PathFilter};

fn tracer(mock: MockSymbols) -> CallTracer {
    CallTracer::new(Arc::new(mock))
}

fn functions(paths: &[lock_trace::domain::call_path::CallPath]) -> Vec<Vec<String>> {
    paths.iter().map(|p| p.functions.clone()).collect()
}

#[tokio::test]
async fn caller_paths_respect_the_depth_bound() {
    let mut mock = MockSymbols::new();
    mock.call("a", "b");
    mock.call("b", "c");
    mock.call("c", "d");
    mock.call("d", "e");

    let paths = tracer(mock)
        .trace_callers("e", Some(2), &PathFilter::default())
        .await
        .expect("trace");

    assert!(!paths.is_empty());
    for path in &paths {
        assert!(path.len() <= 3, "path too long: {path}");
        assert_eq!(path.last(), Some("e"));
        assert_eq!(path.depth, path.len() - 1);
    }
}

#[tokio::test]
async fn callee_paths_respect_the_depth_bound_and_start_at_source() {
    let mut mock = MockSymbols::new();
    mock.call("a", "b");
    mock.call("b", "c");
    mock.call("c", "d");

    let paths = tracer(mock)
        .trace_callees("a", Some(2), &PathFilter::default())
        .await
        .expect("trace");

    for path in &paths {
        assert!(path.len() <= 3);
        assert_eq!(path.functions.first().map(String::as_str), Some("a"));
    }
}

#[tokio::test]
async fn two_node_cycle_never_repeats_a_function_on_one_branch() {
    let mut mock = MockSymbols::new();
    mock.call("a", "b");
    mock.call("b", "a");

    let t = tracer(mock);
    for paths in [
        t.trace_callers("a", None, &PathFilter::default()).await.expect("callers"),
        t.trace_callees("a", None, &PathFilter::default()).await.expect("callees"),
    ] {
        assert!(!paths.is_empty());
        for path in &paths {
            let mut names = path.functions.clone();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), path.functions.len(), "cycle in {path}");
        }
    }
}

#[tokio::test]
async fn the_same_function_may_appear_on_independent_branches() {
    // Both x and y call helper, which calls target.
    let mut mock = MockSymbols::new();
    mock.call("x", "helper");
    mock.call("y", "helper");
    mock.call("helper", "target");

    let paths = tracer(mock)
        .trace_callers("target", None, &PathFilter::default())
        .await
        .expect("trace");

    let chains = functions(&paths);
    assert!(chains.contains(&vec!["x".to_string(), "helper".to_string(), "target".to_string()]));
    assert!(chains.contains(&vec!["y".to_string(), "helper".to_string(), "target".to_string()]));
}

#[tokio::test]
async fn unique_caller_chains_contain_no_suffix_pairs() {
    let mut mock = MockSymbols::new();
    mock.call("main", "sub");
    mock.call("sub", "target");
    mock.call("other", "target");

    let chains = tracer(mock)
        .unique_call_chains("target", None, &PathFilter::default())
        .await
        .expect("chains");

    for a in &chains {
        for b in &chains {
            if a.functions.len() < b.functions.len() {
                assert!(
                    !b.functions.ends_with(&a.functions),
                    "{a} is a suffix of {b}"
                );
            }
        }
    }
    assert_eq!(
        functions(&chains),
        vec![
            vec!["other".to_string(), "target".to_string()],
            vec!["main".to_string(), "sub".to_string(), "target".to_string()],
        ]
    );
}

#[tokio::test]
async fn unique_callee_chains_contain_no_prefix_pairs() {
    let mut mock = MockSymbols::new();
    mock.call("source", "mid");
    mock.call("mid", "leaf");
    mock.call("source", "other_leaf");

    let chains = tracer(mock)
        .unique_callee_chains("source", None, &PathFilter::default())
        .await
        .expect("chains");

    for a in &chains {
        for b in &chains {
            if a.functions.len() < b.functions.len() {
                assert!(
                    !b.functions.starts_with(&a.functions),
                    "{a} is a prefix of {b}"
                );
            }
        }
    }
    assert_eq!(chains.len(), 2);
}

#[tokio::test]
async fn excluded_functions_never_appear_in_results() {
    let mut mock = MockSymbols::new();
    mock.call("main", "debug_print");
    mock.call("debug_print", "target");
    mock.call("other", "target");

    let filter = PathFilter {
        functions: ["debug_print".to_string()].into_iter().collect(),
        directories: Default::default(),
    };
    let paths = tracer(mock)
        .trace_callers("target", None, &filter)
        .await
        .expect("trace");

    for path in &paths {
        assert!(!path.functions.iter().any(|f| f == "debug_print"));
    }
    let chains = functions(&paths);
    assert!(chains.contains(&vec!["other".to_string(), "target".to_string()]));
}

#[tokio::test]
async fn directory_exclusion_is_a_substring_match_on_definition_paths() {
    let mut mock = MockSymbols::new();
    mock.call("net_helper", "target");
    mock.call("fs_helper", "target");
    mock.define("net_helper", "drivers/internet/helper.c");
    mock.define("fs_helper", "fs/ext4/inode.c");

    // Excluding "net" also catches "internet/" -- substring, not segment.
    let filter = PathFilter {
        functions: Default::default(),
        directories: ["net".to_string()].into_iter().collect(),
    };
    let chains = tracer(mock)
        .unique_call_chains("target", None, &filter)
        .await
        .expect("chains");

    let chains = functions(&chains);
    assert!(!chains
        .iter()
        .any(|c| c.contains(&"net_helper".to_string())));
    assert!(chains.contains(&vec!["fs_helper".to_string(), "target".to_string()]));
}

#[tokio::test]
async fn call_statistics_count_raw_and_distinct_names() {
    let mut mock = MockSymbols::new();
    mock.call_at("x", "f", 10, "f();");
    mock.call_at("x", "f", 20, "f();");
    mock.call_at("y", "f", 5, "f();");
    mock.call_at("f", "z", 7, "z();");
    mock.call_at("f", "z", 9, "z();");

    let stats = tracer(mock).call_statistics("f").await.expect("stats");

    assert_eq!(stats.caller_count, 3);
    assert_eq!(stats.unique_callers, 2);
    assert_eq!(stats.callee_count, 2);
    assert_eq!(stats.unique_callees, 1);
    assert!(stats.unique_callers <= stats.caller_count);
    assert!(stats.unique_callees <= stats.callee_count);
}

#[tokio::test]
async fn depth_map_records_minimum_distance_from_roots() {
    let mut mock = MockSymbols::new();
    mock.call("a", "b");
    mock.call("b", "c");
    mock.call("a", "c");

    let map = tracer(mock)
        .function_depth_map(&["a".to_string()])
        .await
        .expect("depth map");

    assert_eq!(map.get("a"), Some(&0));
    assert_eq!(map.get("b"), Some(&1));
    assert_eq!(map.get("c"), Some(&1));
}

#[tokio::test]
async fn depth_map_terminates_on_cycles() {
    let mut mock = MockSymbols::new();
    mock.call("a", "b");
    mock.call("b", "a");

    let map = tracer(mock)
        .function_depth_map(&["a".to_string()])
        .await
        .expect("depth map");

    assert_eq!(map.get("a"), Some(&0));
    assert_eq!(map.get("b"), Some(&1));
}

#[tokio::test]
async fn find_call_paths_explores_sibling_branches_independently() {
    let mut mock = MockSymbols::new();
    mock.call("a", "b");
    mock.call("a", "c");
    mock.call("b", "d");
    mock.call("c", "d");

    let paths = tracer(mock)
        .find_call_paths("a", "d", None)
        .await
        .expect("paths");

    assert_eq!(
        functions(&paths),
        vec![
            vec!["a".to_string(), "b".to_string(), "d".to_string()],
            vec!["a".to_string(), "c".to_string(), "d".to_string()],
        ]
    );
}

#[tokio::test]
async fn find_call_paths_survives_cycles_and_missing_targets() {
    let mut mock = MockSymbols::new();
    mock.call("a", "b");
    mock.call("b", "a");

    let paths = tracer(mock)
        .find_call_paths("a", "nowhere", None)
        .await
        .expect("paths");
    assert!(paths.is_empty());
}

#[tokio::test]
async fn find_call_paths_stops_at_the_target() {
    let mut mock = MockSymbols::new();
    mock.call("a", "t");
    mock.call("t", "beyond");

    let paths = tracer(mock)
        .find_call_paths("a", "t", None)
        .await
        .expect("paths");

    assert_eq!(functions(&paths), vec![vec!["a".to_string(), "t".to_string()]]);
}

#[tokio::test]
async fn unknown_functions_terminate_branches_quietly() {
    let mock = MockSymbols::new();

    let paths = tracer(mock)
        .trace_callers("ghost", None, &PathFilter::default())
        .await
        .expect("trace");

    // The ghost itself is the only recorded chain.
    assert_eq!(functions(&paths), vec![vec!["ghost".to_string()]]);
}

#[tokio::test]
async fn callback_search_recovers_function_pointer_callers() {
    let mut mock = MockSymbols::new();
    // hsr_dev_open has no direct callers, only a callback registration;
    // dev_open invokes the registered field.
    mock.call("dev_open", "ndo_open");
    mock.assign("hsr_dev_open", "ndo_open", "drivers/net/hsr.c", 88);
    mock.define("hsr_dev_open", "drivers/net/hsr.c");

    let with_callbacks = tracer(mock)
        .unique_call_chains("hsr_dev_open", None, &PathFilter::default())
        .await
        .expect("chains");

    assert_eq!(
        functions(&with_callbacks),
        vec![vec!["dev_open".to_string(), "hsr_dev_open".to_string()]]
    );
}

#[tokio::test]
async fn disabling_callback_search_hides_indirect_callers() {
    let mut mock = MockSymbols::new();
    mock.call("dev_open", "ndo_open");
    mock.assign("hsr_dev_open", "ndo_open", "drivers/net/hsr.c", 88);

    let chains = CallTracer::new(Arc::new(mock))
        .with_callback_search(false)
        .unique_call_chains("hsr_dev_open", None, &PathFilter::default())
        .await
        .expect("chains");

    assert_eq!(functions(&chains), vec![vec!["hsr_dev_open".to_string()]]);
}

#[tokio::test]
async fn build_call_graph_snapshots_both_relations() {
    let mut mock = MockSymbols::new();
    mock.call("a", "b");
    mock.call("b", "c");

    let graph = tracer(mock)
        .build_call_graph(&["a".to_string()])
        .await
        .expect("graph");

    assert_eq!(graph.len(), 3);
    assert_eq!(graph.callees_of("a").len(), 1);
    assert_eq!(graph.callers_of("c").len(), 1);
    assert!(graph.callees_of("c").is_empty());
}

#[tokio::test]
async fn chain_direction_is_reflected_in_path_orientation() {
    let mut mock = MockSymbols::new();
    mock.call("outer", "inner");

    let t = tracer(mock);
    let callers = t
        .trace_callers("inner", None, &PathFilter::default())
        .await
        .expect("callers");
    let callees = t
        .trace_callees("outer", None, &PathFilter::default())
        .await
        .expect("callees");

    assert!(functions(&callers).contains(&vec!["outer".to_string(), "inner".to_string()]));
    assert!(functions(&callees).contains(&vec!["outer".to_string(), "inner".to_string()]));
}
