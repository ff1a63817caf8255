use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rillcore::{NodeId, Workflow, WorkflowError};
use std::collections::{HashMap, HashSet, VecDeque};

/// Topology view of a workflow.
///
/// The wiring itself must stay acyclic; loops are cyclic *re-execution*
/// of an acyclic region delimited by a loop-start/loop-end pair, not
/// cycles in the graph.
pub struct WorkflowGraph {
    graph: DiGraph<NodeId, ()>,
    index: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Build a dependency graph from the workflow and reject cycles.
    pub fn build(workflow: &Workflow) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node_spec in &workflow.nodes {
            let idx = graph.add_node(node_spec.id.clone());
            index.insert(node_spec.id.clone(), idx);
        }

        for conn in &workflow.connections {
            let from = index
                .get(&conn.from_node)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.from_node.to_string()))?;
            let to = index
                .get(&conn.to_node)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.to_node.to_string()))?;
            // parallel port connections between the same pair collapse to one edge
            graph.update_edge(*from, *to, ());
        }

        if toposort(&graph, None).is_err() {
            return Err(WorkflowError::CyclicDependency);
        }

        Ok(Self { graph, index })
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.graph.node_weights().cloned().collect()
    }

    pub fn predecessors(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    pub fn successors(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// All nodes reachable downstream of `id`, excluding `id` itself.
    pub fn downstream(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        self.reach(start, Direction::Outgoing)
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    /// Nodes strictly between a loop head and tail: reachable from the
    /// head and co-reachable to the tail, excluding both endpoints.
    pub fn loop_body(&self, head: &NodeId, tail: &NodeId) -> Vec<NodeId> {
        let (Some(&head_idx), Some(&tail_idx)) = (self.index.get(head), self.index.get(tail))
        else {
            return Vec::new();
        };
        let forward = self.reach(head_idx, Direction::Outgoing);
        let backward = self.reach(tail_idx, Direction::Incoming);
        forward
            .intersection(&backward)
            .filter(|&&idx| idx != head_idx && idx != tail_idx)
            .map(|&idx| self.graph[idx].clone())
            .collect()
    }

    fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// BFS reachability from `start` in the given direction, exclusive.
    fn reach(&self, start: NodeIndex, direction: Direction) -> HashSet<NodeIndex> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for next in self.graph.neighbors_directed(idx, direction) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }
}
