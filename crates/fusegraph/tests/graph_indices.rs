use fusegraph::graph::{
    utils::{
        add_f32_constant, add_f32_input, add_f32_output, add_f32_transient, add_single_output_op,
        reduce_mean, tensor_spec,
    },
    AffineQuantization, DType, DataError, DataflowGraph, GraphError, OpKind, OpParams,
    ReduceParams, TensorData, TensorRole,
};

#[test]
fn indices_track_producers_and_consumers() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[2, 2]);
    let a = add_f32_transient(&mut graph, &[2, 2]);
    let b = add_f32_output(&mut graph, &[2, 2]);

    let neg = graph
        .add_operator(OpKind::Neg, &[x], &[a], OpParams::None)
        .expect("neg");
    let add = graph
        .add_operator(OpKind::Add, &[x, a], &[b], OpParams::None)
        .expect("add");

    assert_eq!(graph.producer_of(a), Some(neg));
    assert_eq!(graph.producer_of(b), Some(add));
    assert_eq!(graph.producer_of(x), None, "inputs have no producer");
    assert_eq!(graph.consumers_of(x), &[neg, add]);
    assert_eq!(graph.consumers_of(a), &[add]);
    assert!(graph.consumers_of(b).is_empty());
    assert_eq!(graph.operator_count(), 2);
    assert_eq!(graph.graph_inputs(), vec![x]);
    assert_eq!(graph.graph_outputs(), vec![b]);
    graph.verify().expect("fresh graph verifies");
}

#[test]
fn reading_a_tensor_twice_registers_one_consumer() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[4]);
    let y = add_f32_output(&mut graph, &[4]);
    let square = graph
        .add_operator(OpKind::Multiply, &[x, x], &[y], OpParams::None)
        .expect("square");

    assert_eq!(graph.consumers_of(x), &[square]);
    graph.remove_operator(square).expect("remove");
    assert!(graph.consumers_of(x).is_empty());
}

#[test]
fn second_producer_is_rejected_without_side_effects() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[4]);
    let y = add_f32_output(&mut graph, &[4]);
    let first = graph
        .add_operator(OpKind::Relu, &[x], &[y], OpParams::None)
        .expect("first producer");

    let err = graph
        .add_operator(OpKind::Neg, &[x], &[y], OpParams::None)
        .expect_err("second producer must fail");
    assert_eq!(
        err,
        GraphError::OutputAlreadyProduced {
            tensor: y,
            producer: first
        }
    );
    assert_eq!(graph.operator_count(), 1);
    assert_eq!(graph.consumers_of(x), &[first], "failed add left no consumer");
    graph.verify().expect("graph unchanged");
}

#[test]
fn operators_cannot_write_constants_or_inputs() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[2]);
    let c = add_f32_constant(&mut graph, &[2], &[1.0, 2.0]).expect("constant");

    assert_eq!(
        graph.add_operator(OpKind::Neg, &[x], &[c], OpParams::None),
        Err(GraphError::ConstantProduced { tensor: c })
    );
    let other = add_f32_input(&mut graph, &[2]);
    assert_eq!(
        graph.add_operator(OpKind::Neg, &[x], &[other], OpParams::None),
        Err(GraphError::InputProduced { tensor: other })
    );
}

#[test]
fn parameter_block_must_match_kind() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[2, 3]);
    let y = add_f32_output(&mut graph, &[2, 1]);

    let err = graph
        .add_operator(OpKind::Reduce, &[x], &[y], OpParams::None)
        .expect_err("reduce without parameters");
    assert_eq!(err, GraphError::ParamsKindMismatch { kind: OpKind::Reduce });

    graph
        .add_operator(
            OpKind::Reduce,
            &[x],
            &[y],
            OpParams::Reduce(ReduceParams::mean(&[-1])),
        )
        .expect("reduce with parameters");
}

#[test]
fn stale_handles_are_reported() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[2]);
    let y = add_f32_output(&mut graph, &[2]);
    let op = graph
        .add_operator(OpKind::Relu, &[x], &[y], OpParams::None)
        .expect("relu");

    graph.remove_operator(op).expect("first removal");
    assert_eq!(
        graph.remove_operator(op),
        Err(GraphError::StaleOperator { op })
    );
    assert!(!graph.contains(op));
    assert_eq!(graph.kind_of(op), None);
    assert_eq!(graph.producer_of(y), None);

    graph.remove_tensor(y).expect("orphaned tensor removal");
    assert_eq!(
        graph.add_operator(OpKind::Relu, &[x], &[y], OpParams::None),
        Err(GraphError::StaleTensor { tensor: y })
    );
}

#[test]
fn removed_slots_are_never_reused() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[2]);
    let y = add_f32_transient(&mut graph, &[2]);
    let first = graph
        .add_operator(OpKind::Relu, &[x], &[y], OpParams::None)
        .expect("relu");
    graph.remove_operator(first).expect("remove");

    let second = graph
        .add_operator(OpKind::Neg, &[x], &[y], OpParams::None)
        .expect("neg");
    assert_ne!(first, second);
    assert!(second > first, "handles grow with insertion order");
}

#[test]
fn referenced_tensors_cannot_be_removed() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[2]);
    let y = add_f32_output(&mut graph, &[2]);
    graph
        .add_operator(OpKind::Relu, &[x], &[y], OpParams::None)
        .expect("relu");

    assert_eq!(
        graph.remove_tensor(x),
        Err(GraphError::TensorInUse { tensor: x })
    );
    assert_eq!(
        graph.remove_tensor(y),
        Err(GraphError::TensorInUse { tensor: y })
    );
    assert_eq!(graph.tensor_count(), 2);
}

#[test]
fn replace_input_moves_consumer_edges() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[2]);
    let z = add_f32_input(&mut graph, &[2]);
    let y = add_f32_output(&mut graph, &[2]);
    let add = graph
        .add_operator(OpKind::Add, &[x, x], &[y], OpParams::None)
        .expect("add");

    graph.replace_input(add, x, z).expect("replace");
    assert!(graph.consumers_of(x).is_empty());
    assert_eq!(graph.consumers_of(z), &[add]);
    assert_eq!(graph.operator(add).expect("live").inputs(), &[z, z]);

    assert_eq!(
        graph.replace_input(add, x, z),
        Err(GraphError::InputNotFound { op: add, tensor: x })
    );
    graph.verify().expect("indices follow the rewrite");
}

#[test]
fn verify_reports_transients_without_producer() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[2]);
    let dangling = add_f32_transient(&mut graph, &[2]);
    let y = add_f32_output(&mut graph, &[2]);
    graph
        .add_operator(OpKind::Add, &[x, dangling], &[y], OpParams::None)
        .expect("add");

    assert_eq!(
        graph.verify(),
        Err(GraphError::MissingProducer { tensor: dangling })
    );
}

#[test]
fn topological_order_follows_dependencies() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[2]);
    let a = add_f32_transient(&mut graph, &[2]);
    let b = add_f32_transient(&mut graph, &[2]);
    let y = add_f32_output(&mut graph, &[2]);

    // Registered consumer-first.
    let last = graph
        .add_operator(OpKind::Add, &[a, b], &[y], OpParams::None)
        .expect("add");
    let relu = graph
        .add_operator(OpKind::Relu, &[x], &[a], OpParams::None)
        .expect("relu");
    let neg = graph
        .add_operator(OpKind::Neg, &[a], &[b], OpParams::None)
        .expect("neg");

    assert_eq!(
        graph.topological_order().expect("acyclic"),
        vec![relu, neg, last]
    );
}

#[test]
fn topological_order_reports_cycles() {
    let mut graph = DataflowGraph::new();
    let a = add_f32_transient(&mut graph, &[2]);
    let b = add_f32_transient(&mut graph, &[2]);
    let first = graph
        .add_operator(OpKind::Neg, &[a], &[b], OpParams::None)
        .expect("neg");
    let second = graph
        .add_operator(OpKind::Relu, &[b], &[a], OpParams::None)
        .expect("relu");

    let err = graph.topological_order().expect_err("cycle");
    assert_eq!(err.unscheduled, vec![first, second]);
}

#[test]
fn constants_decode_from_every_storage_type() -> anyhow::Result<()> {
    let mut graph = DataflowGraph::new();

    let half = graph.add_constant(
        tensor_spec(DType::F16, &[2], TensorRole::Constant),
        TensorData::from_f16(&[0.5, -1.25]),
    )?;
    assert_eq!(graph.constant_f32(half)?, vec![0.5, -1.25]);

    let brain: Vec<u8> = [1.5f32, -2.0]
        .iter()
        .flat_map(|v| half::bf16::from_f32(*v).to_le_bytes())
        .collect();
    let brain = graph.add_constant(
        tensor_spec(DType::Bf16, &[2], TensorRole::Constant),
        TensorData::new(brain.into()),
    )?;
    assert_eq!(graph.constant_f32(brain)?, vec![1.5, -2.0]);

    let quantized = graph.add_constant(
        tensor_spec(DType::Ui8, &[3], TensorRole::Constant).with_quantization(
            AffineQuantization {
                scale: 0.5,
                zero_point: 128,
            },
        ),
        TensorData::new(vec![128u8, 130, 126].into()),
    )?;
    assert_eq!(graph.constant_f32(quantized)?, vec![0.0, 1.0, -1.0]);

    let x = add_f32_input(&mut graph, &[2]);
    assert_eq!(graph.constant_f32(x), Err(DataError::NotConstant));
    Ok(())
}

#[test]
fn constant_payload_must_fill_the_shape() {
    let mut graph = DataflowGraph::new();
    let err = graph
        .add_constant(
            tensor_spec(DType::F32, &[4], TensorRole::Constant),
            TensorData::from_f32(&[1.0, 2.0]),
        )
        .expect_err("short payload");
    assert!(matches!(
        err,
        GraphError::ConstantData {
            source: DataError::ByteLength {
                expected: 16,
                actual: 8
            },
            ..
        }
    ));
    assert_eq!(graph.tensor_count(), 0);
}

#[test]
fn text_dump_lists_tensors_and_operators() {
    let mut graph = DataflowGraph::new();
    let x = add_f32_input(&mut graph, &[1, 8]);
    add_single_output_op(
        &mut graph,
        OpKind::Reduce,
        &[x],
        tensor_spec(DType::F32, &[1, 1], TensorRole::Output),
        reduce_mean(&[1]),
    )
    .expect("mean");

    let text = graph.to_string();
    assert!(text.contains("%t0: f32[1, 8] input"), "{text}");
    assert!(
        text.contains("op0 = reduce(mean, axes=[1], keep_dims) %t0 -> %t1"),
        "{text}"
    );
}
