use std::fmt::Write;

use crate::graph::AuthGraph;
use crate::node::AuthGraphNode;

impl AuthGraph {
  /// Render the graph in Graphviz DOT format.
  pub fn to_dot(&self) -> String {
    let mut out = String::from("digraph auth_flow {\n  rankdir=LR;\n");

    for (id, node) in self.nodes() {
      let (label, shape) = match node {
        AuthGraphNode::Step(step) => (format!("step {}", escape(&step.step_id)), "box"),
        AuthGraphNode::DecisionPoint(_) => ("decision".to_string(), "diamond"),
        AuthGraphNode::DynamicDecision(dynamic) => {
          let events: Vec<String> = dynamic.handlers.keys().map(|e| escape(e)).collect();
          (format!("on {}", events.join(",")), "diamond")
        }
        AuthGraphNode::Fail(_) => ("fail".to_string(), "octagon"),
        AuthGraphNode::End => ("end".to_string(), "doublecircle"),
      };
      let style = if Some(id) == self.start_node() {
        ", style=bold"
      } else {
        ""
      };
      let _ = writeln!(out, "  {id} [label=\"{label}\", shape={shape}{style}];");
    }

    for (id, node) in self.nodes() {
      match node {
        AuthGraphNode::Step(step) => {
          if let Some(next) = step.next {
            let _ = writeln!(out, "  {id} -> {next};");
          }
        }
        AuthGraphNode::DecisionPoint(decision) => {
          for outcome in &decision.outcomes {
            let _ = writeln!(
              out,
              "  {id} -> {} [label=\"{}\"];",
              outcome.destination,
              escape(&outcome.label)
            );
          }
          if let Some(default) = decision.default_edge {
            let _ = writeln!(out, "  {id} -> {default} [style=dashed];");
          }
        }
        AuthGraphNode::DynamicDecision(dynamic) => {
          if let Some(default) = dynamic.default_edge {
            let _ = writeln!(out, "  {id} -> {default} [style=dashed];");
          }
        }
        AuthGraphNode::Fail(_) | AuthGraphNode::End => {}
      }
    }

    out.push_str("}\n");
    out
  }
}

/// Escape a value for use inside a quoted DOT string.
fn escape(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use authgraph_config::StepConfig;

  use super::*;

  #[test]
  fn test_to_dot() {
    let mut steps = BTreeMap::new();
    steps.insert("1".to_string(), StepConfig::new("1"));
    let mut graph = AuthGraph::new(steps);
    let step = graph.add_step_node("1").unwrap();
    let end = graph.add_node(AuthGraphNode::End);
    graph.attach_to_leaf(step, end).unwrap();
    graph.set_start_node(step).unwrap();

    let dot = graph.to_dot();
    assert!(dot.starts_with("digraph auth_flow {"));
    assert!(dot.contains("n0 [label=\"step 1\", shape=box, style=bold];"));
    assert!(dot.contains("n1 [label=\"end\", shape=doublecircle];"));
    assert!(dot.contains("n0 -> n1;"));
  }

  #[test]
  fn test_to_dot_escapes_labels() {
    let mut steps = BTreeMap::new();
    steps.insert(r#"say "hi"\now"#.to_string(), StepConfig::new(r#"say "hi"\now"#));
    let mut graph = AuthGraph::new(steps);
    let step = graph.add_step_node(r#"say "hi"\now"#).unwrap();
    let end = graph.add_node(AuthGraphNode::End);
    let decision = graph
      .add_decision_point([(r#"acr "gold""#, step)], Some(end))
      .unwrap();
    graph.set_start_node(decision).unwrap();

    let dot = graph.to_dot();
    assert!(dot.contains(r#"n0 [label="step say \"hi\"\\now", shape=box];"#), "{dot}");
    assert!(dot.contains(r#"n2 -> n0 [label="acr \"gold\""];"#), "{dot}");
  }
}
