use treeflow_core::{AgentState, CompletionVerdict};
use treeflow_graph::{RouteOutcome, Router, TerminalReason};
use treeflow_store::SqliteStore;
use treeflow_test_utils::{onboarding_v1, ScriptedEvaluator, USER_CONFIRMED};

#[test]
fn test_onboarding_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("treeflow.db");
    let fx = onboarding_v1();

    {
        let store = SqliteStore::open(&path).unwrap();
        store.save_flow(&fx.flow).unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let loaded = store.load_flow(fx.flow.id()).unwrap();
    assert_eq!(loaded.name, "Onboarding");
    assert_eq!(loaded.entry_step().unwrap().id(), &fx.a);

    let eval = ScriptedEvaluator::new().with(USER_CONFIRMED, true);
    let router = Router::new(&loaded, &eval);
    let outcome = router
        .route(&fx.a, CompletionVerdict::FullyCompleted, &AgentState::new())
        .unwrap();
    assert_eq!(outcome.next_step(), Some(&fx.b));

    eval.set(USER_CONFIRMED, false);
    let outcome = router
        .route(&fx.a, CompletionVerdict::FullyCompleted, &AgentState::new())
        .unwrap();
    assert_eq!(outcome, RouteOutcome::Terminal(TerminalReason::NoMatch));
}

#[test]
fn test_delete_flow_cascades_everything() {
    let store = SqliteStore::in_memory().unwrap();
    let fx = onboarding_v1();
    store.save_flow(&fx.flow).unwrap();
    assert_eq!(store.connection_count(fx.flow.id()).unwrap(), 1);

    store.delete_flow(fx.flow.id()).unwrap();
    assert_eq!(store.connection_count(fx.flow.id()).unwrap(), 0);
    assert!(store.load_flow(fx.flow.id()).is_err());
    // The connection went with the flow, so it can no longer be removed.
    assert!(store.disconnect(&fx.connection).is_err());
}

#[test]
fn test_wiring_through_store_matches_in_memory_rules() {
    let store = SqliteStore::in_memory().unwrap();
    let mut fx = onboarding_v1();
    fx.flow.disconnect(&fx.connection).unwrap();
    store.save_flow(&fx.flow).unwrap();
    assert_eq!(store.connection_count(fx.flow.id()).unwrap(), 0);

    let id = store.connect(&fx.success, &fx.b_input).unwrap();
    assert!(store.connect(&fx.success, &fx.b_input).is_err());

    let loaded = store.load_flow(fx.flow.id()).unwrap();
    assert_eq!(loaded.connection_for_output(&fx.success).unwrap().id, id);
}
