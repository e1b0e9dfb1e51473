use std::time::Duration;
use streamrule::metrics::{MetricsCollector, NodeMetrics, NodeRole};

#[test]
fn test_snapshot_keys_per_instance() {
    let collector = MetricsCollector::new();
    let src = collector.register(NodeRole::Source, "demo", 0);
    let op0 = collector.register(NodeRole::Operator, "filter", 0);
    let op1 = collector.register(NodeRole::Operator, "filter", 1);
    let sink = collector.register(NodeRole::Sink, "memory_0", 0);

    src.record_in(3);
    src.record_out(3);
    op0.record_in(2);
    op0.record_out(1);
    op1.record_in(1);
    op1.record_exception("cannot compare string with bigint");
    op1.set_buffer_length(4);
    op1.record_latency(Duration::from_micros(250));
    sink.record_in(1);

    let snap = collector.snapshot();
    assert_eq!(snap["source_demo_0_records_out_total"], 3);
    assert_eq!(snap["op_filter_0_records_in_total"], 2);
    assert_eq!(snap["op_filter_0_records_out_total"], 1);
    assert_eq!(snap["op_filter_1_exceptions_total"], 1);
    assert_eq!(snap["op_filter_1_last_exception"], "cannot compare string with bigint");
    assert_eq!(snap["op_filter_1_buffer_length"], 4);
    assert_eq!(snap["op_filter_1_process_latency_us"], 250);
    assert_eq!(snap["op_filter_0_last_exception"], "");
    assert_eq!(snap["sink_memory_0_0_records_in_total"], 1);
    assert!(snap["sink_memory_0_0_last_invocation"].as_i64().unwrap() > 0);
    // eight metrics per instance
    assert_eq!(snap.len(), 4 * 8);
}

#[test]
fn test_totals_sum_instances() {
    let collector = MetricsCollector::new();
    for i in 0..3 {
        collector.register(NodeRole::Operator, "project", i).record_in(i + 1);
    }
    collector.register(NodeRole::Sink, "project", 0).record_in(100);

    assert_eq!(collector.total(NodeRole::Operator, "project", NodeMetrics::records_in), 6);
    assert_eq!(collector.total(NodeRole::Sink, "project", NodeMetrics::records_in), 100);
    assert_eq!(collector.total(NodeRole::Operator, "missing", NodeMetrics::records_in), 0);
    assert!(collector.to_json().is_object());
}
