use super::*;
use crate::backend::ExecutionBackend;
use crate::backend::cpu::CpuBackend;
use crate::graph::validate::resolve_topology;
use crate::schedule::schedule_topology;
use crate::test_kernels::{Coordinates, Fill, Mix, Scale, Viewer};

fn fill(graph: &mut NodeGraph, label: &str) -> NodeId {
    graph.add_node(
        label,
        Fill {
            size: Size::new(4, 4),
            value: Value::Color([1.0; 4]),
        },
    )
}

fn plan(graph: &NodeGraph, sinks: &[NodeId], unit: &[NodeId]) -> PixelPlan {
    let topo = resolve_topology(graph, sinks).unwrap();
    let schedule = schedule_topology(graph, &topo, sinks);
    PixelPlan::build(graph, &topo, &schedule, unit, false).unwrap()
}

#[test]
fn one_output_feeding_two_sockets_is_one_declared_input() {
    let mut g = NodeGraph::new();
    let a = fill(&mut g, "a");
    let mix = g.add_node("mix", Mix);
    let view = g.add_node("view", Viewer);
    g.link(a, "Image", mix, "A");
    g.link(a, "Image", mix, "B");
    g.link(mix, "Result", view, "Image");

    let p = plan(&g, &[view], &[mix]);
    assert_eq!(p.inputs.len(), 1);
    assert_eq!(p.inputs[0].key, DeclaredInputKey::Output(OutputRef { node: a, socket: 0 }));
    assert_eq!(p.inputs[0].internal_count, 2);
    assert_eq!(p.inputs[0].name, "a.Image");
    assert_eq!(p.inputs[0].descriptor.domain_priority, 0);
    assert!(p.inputs[0].descriptor.skip_type_conversion);

    let operands = &p.kernel.nodes[0].operands;
    assert_eq!(operands[0].source, OperandSource::Input(0));
    assert_eq!(operands[1].source, OperandSource::Input(0));
    assert_eq!(operands[2].source, OperandSource::Constant(Value::Float(0.5)));

    assert_eq!(p.outputs.len(), 1);
    assert_eq!(p.outputs[0].reference_count, 1);
    assert_eq!(p.outputs[0].source, OutputRef { node: mix, socket: 0 });
}

#[test]
fn internal_links_stay_inside_the_kernel() {
    let mut g = NodeGraph::new();
    let a = fill(&mut g, "a");
    let s1 = g.add_node("s1", Scale(0.5));
    let s2 = g.add_node("s2", Scale(2.0));
    let view = g.add_node("view", Viewer);
    g.link(a, "Image", s1, "Color");
    g.link(s1, "Result", s2, "Color");
    g.link(s2, "Result", view, "Image");

    let p = plan(&g, &[view], &[s1, s2]);
    assert_eq!(p.inputs.len(), 1);
    assert_eq!(p.kernel.inputs, vec![ResultType::Color]);
    assert_eq!(
        p.kernel.nodes[1].operands[0].source,
        OperandSource::Node { node: 0, output: 0 }
    );
    assert_eq!(p.outputs.len(), 1);
    assert_eq!(p.outputs[0].source, OutputRef { node: s2, socket: 0 });
    assert_eq!(p.kernel.outputs[0].node, 1);
    assert!(p.previews.is_empty());
}

#[test]
fn previews_and_external_consumers_become_outputs() {
    let mut g = NodeGraph::new();
    let a = fill(&mut g, "a");
    let s1 = g.add_node("s1", Scale(0.5));
    let s2 = g.add_node("s2", Scale(2.0));
    let v1 = g.add_node("v1", Viewer);
    let v2 = g.add_node("v2", Viewer);
    let idle = g.add_node("idle", Viewer);
    g.link(a, "Image", s1, "Color");
    g.link(s1, "Result", s2, "Color");
    g.link(s2, "Result", v1, "Image");
    g.link(s2, "Result", v2, "Image");
    g.link(s1, "Result", idle, "Image");
    g.set_preview(s1, true).unwrap();

    let p = plan(&g, &[v1, v2], &[s1, s2]);
    let sources = p.outputs.iter().map(|o| o.source.node).collect::<Vec<_>>();
    assert_eq!(sources, vec![s1, s2]);
    // The idle viewer is not scheduled, so only the preview holds s1.
    assert_eq!(p.outputs[0].reference_count, 1);
    assert_eq!(p.outputs[1].reference_count, 2);
    assert_eq!(p.previews, vec![(s1, 0)]);
}

#[test]
fn declared_priorities_follow_unit_position() {
    let mut g = NodeGraph::new();
    let a = fill(&mut g, "a");
    let b = fill(&mut g, "b");
    let c = fill(&mut g, "c");
    let s = g.add_node("s", Scale(1.0));
    let mix = g.add_node("mix", Mix);
    g.link(c, "Image", s, "Color");
    g.link(a, "Image", mix, "B");
    g.link(b, "Image", mix, "Factor");
    g.link(s, "Result", mix, "A");

    let p = plan(&g, &[mix], &[s, mix]);
    let by_name = |name: &str| {
        p.inputs
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.descriptor.domain_priority)
            .unwrap()
    };
    assert_eq!(by_name("c.Image"), 0);
    assert_eq!(by_name("a.Image"), (1 << 16) | 1);
    assert_eq!(by_name("b.Image"), (1 << 16) | 2);
    // The factor input reads a color producer; the kernel converts it per pixel.
    let factor = p.inputs.iter().position(|i| i.name == "b.Image").unwrap();
    assert_eq!(p.inputs[factor].descriptor.expected_type, ResultType::Color);
    assert_eq!(p.kernel.nodes[1].operands[2].ty, ResultType::Float);
}

#[test]
fn unlinked_implicit_inputs_are_declared() {
    let mut g = NodeGraph::new();
    let coords = g.add_node("coords", Coordinates);
    let p = plan(&g, &[coords], &[coords]);
    assert_eq!(
        p.inputs[0].key,
        DeclaredInputKey::Implicit(ImplicitInput::TextureCoordinates)
    );
    assert_eq!(p.kernel.inputs, vec![ResultType::Vector2]);
    // A sink with no consumers declares no outputs.
    assert!(p.outputs.is_empty());
}

#[test]
fn operation_exposes_internal_counts() {
    let mut g = NodeGraph::new();
    let a = fill(&mut g, "a");
    let b = fill(&mut g, "b");
    let mix = g.add_node("mix", Mix);
    let view = g.add_node("view", Viewer);
    g.link(a, "Image", mix, "A");
    g.link(a, "Image", mix, "Factor");
    g.link(b, "Image", mix, "B");
    g.link(mix, "Result", view, "Image");

    let p = plan(&g, &[view], &[mix]);
    let kernel = CpuBackend::default().compile_kernel(&p.kernel).unwrap();
    let op = PixelOperation::new(&p, kernel, ExecutionTarget::Accelerated);
    assert_eq!(op.internal_reference_count(0), 2);
    assert_eq!(op.internal_reference_count(1), 1);
    assert_eq!(op.internal_reference_count(7), 0);
    assert_eq!(op.internal_reference_counts(), &[2, 1]);
    assert_eq!(op.nodes(), &[mix]);
    assert_eq!(op.target(), ExecutionTarget::Accelerated);
}
