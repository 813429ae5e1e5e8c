use plugflow_engine::{
    Constant, MAKE, Plan, PlanOrder, ProcessRegistry, QUERY, Report, SharedProcess, Shell, Value,
    core_registry, load_workflow,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counting_registry(created: Arc<AtomicUsize>) -> ProcessRegistry {
    let mut registry = core_registry();
    registry.register_type("Gen", move |_id, args, _registry| {
        created.fetch_add(1, Ordering::SeqCst);
        let value = args.get(0, "value").cloned().unwrap_or(Value::Integer(0));
        Ok(Arc::new(Constant::new(value)) as SharedProcess)
    });
    registry
}

#[test]
fn gen_into_sum_expected_single_connection_and_producer_evaluated_first() {
    let created = Arc::new(AtomicUsize::new(0));
    let mut workflow = load_workflow(
        r#"digraph gen {
            "p1" [label="Gen(5)"];
            "p2" [label="Sum"];
            p1 -> p2;
        }"#,
        &counting_registry(Arc::clone(&created)),
    )
    .expect("description should load");
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(
        workflow.all_connections(),
        vec![(Shell::new("p1", "value"), Shell::new("p2", "lhs"))]
    );

    let total = workflow
        .evaluate(&Shell::new("p2", "total"), QUERY)
        .expect("sum should evaluate");
    assert_eq!(total, Value::Integer(5));

    let graph = workflow.call_graph();
    assert_eq!(graph.len(), 2);
    let order: Vec<&str> = graph
        .to_call_list(true, &|_| false)
        .into_iter()
        .map(|(frame, _)| frame.node.as_str())
        .collect();
    assert_eq!(order, vec!["p1", "p2"]);
}

#[test]
fn wiring_third_source_with_all_slots_blocked_expected_force_reconnect() {
    let mut workflow = load_workflow(
        r#"digraph blocked {
            old [label="Constant(1)"];
            new [label="Constant(2)"];
            s [label=Sum];
            old -> s;
            old -> s;
            new -> s;
        }"#,
        &core_registry(),
    )
    .expect("description should load");
    assert_eq!(
        workflow.input_of(&Shell::new("s", "lhs")),
        Some(&Shell::new("old", "value"))
    );
    assert_eq!(
        workflow.input_of(&Shell::new("s", "rhs")),
        Some(&Shell::new("new", "value"))
    );
    let total = workflow
        .evaluate(&Shell::new("s", "total"), QUERY)
        .expect("sum should evaluate");
    assert_eq!(total, Value::Integer(3));
}

#[test]
fn wiring_third_source_with_slots_held_by_different_sources_expected_one_reconnect() {
    let mut workflow = load_workflow(
        r#"digraph crowded {
            a [label="Constant(1)"];
            b [label="Constant(2)"];
            late [label="Constant(30)"];
            s [label=Sum];
            a -> s;
            b -> s;
            late -> s;
        }"#,
        &core_registry(),
    )
    .expect("description should load");
    assert_eq!(
        workflow.all_connections(),
        vec![
            (Shell::new("a", "value"), Shell::new("s", "lhs")),
            (Shell::new("late", "value"), Shell::new("s", "rhs")),
        ]
    );
    let total = workflow
        .evaluate(&Shell::new("s", "total"), QUERY)
        .expect("sum should evaluate");
    assert_eq!(total, Value::Integer(31));
}

#[test]
fn report_for_two_node_chain_expected_two_lines_through_consuming_plug() {
    let mut workflow = load_workflow(
        r#"digraph chain { a [label="Constant(4)"]; b [label=Sum]; a -> b; }"#,
        &core_registry(),
    )
    .expect("description should load");
    workflow
        .evaluate(&Shell::new("b", "total"), QUERY)
        .expect("sum should evaluate");

    let lines = Plan::new(workflow.call_graph()).make_report(None);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "1. b adds up 4 when asked for total");
    assert_eq!(lines[1], "2. a provides 4 through lhs to sum");

    let leaves_first = Plan::new(workflow.call_graph())
        .with_order(PlanOrder::LeavesFirst)
        .make_report(None);
    assert!(leaves_first[0].contains("a provides 4"));
}

#[test]
fn clear_cache_then_query_expected_same_value() {
    let mut workflow = load_workflow(
        r#"digraph roundtrip { a [label="Constant(2)"]; b [label="Constant(3)"]; s [label=Sum]; a -> s; b -> s; }"#,
        &core_registry(),
    )
    .expect("description should load");
    let total = Shell::new("s", "total");
    let before = workflow.evaluate(&total, QUERY).expect("first evaluation");
    workflow.clear_shell_cache(&total, true);
    assert!(!workflow.has_cache(&total));
    let after = workflow.evaluate(&total, QUERY).expect("second evaluation");
    assert_eq!(before, after);
    assert_eq!(after, Value::Integer(5));
}

#[test]
fn duplicate_expected_same_connections_and_values() {
    let registry = core_registry();
    let mut workflow = load_workflow(
        r#"digraph copy { a [label="Constant(2)"]; s [label=Sum]; a -> s; }"#,
        &registry,
    )
    .expect("description should load");
    let total = Shell::new("s", "total");
    workflow.evaluate(&total, MAKE).expect("original evaluation");

    let mut copy = workflow.duplicate(&registry).expect("duplicate should build");
    assert_eq!(copy.all_connections(), workflow.all_connections());
    assert!(!copy.has_cache(&total));
    assert_eq!(
        copy.evaluate(&total, MAKE).expect("copy evaluation"),
        Value::Integer(2)
    );
}
