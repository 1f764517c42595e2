//! # Precedence Graph & Stratifier
//!
//! Builds the predicate dependency graph, finds strongly-connected
//! components with Tarjan's algorithm, topologically sorts the SCC
//! condensation, and greedily merges independent consecutive strata into
//! **pseudo-strata** that the compiler can run under `Par` (spec §4.5).
//!
//! ```text
//! Rules -> PrecedenceGraph -> tarjan_scc -> condensation -> topo_sort -> merge_pseudo_strata
//!                                                                              |
//!                                                                              v
//!                                                          PredSym -> (pseudo_stratum, stratum_in_pseudo)
//! ```
//!
//! A cycle surviving the condensation's topological sort is an internal
//! bug (Tarjan guarantees the condensation is a DAG); a positive-weight
//! edge from a predicate back into its own SCC through a *negative* edge is
//! a stratification error reported to the caller, not a bug.

use crate::ast::{BodyLiteral, Datalog};
use crate::error::{bug, SolveError};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Positive,
    Negative,
}

/// Directed graph over predicate names: an edge `head -> body_atom` for
/// every rule `head(...) :- ..., body_atom(...), ...`.
#[derive(Debug, Default)]
pub struct PrecedenceGraph {
    vertices: Vec<String>,
    index_of: HashMap<String, usize>,
    edges: Vec<Vec<(usize, DependencyKind)>>,
}

impl PrecedenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn vertex(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index_of.get(name) {
            return i;
        }
        let i = self.vertices.len();
        self.vertices.push(name.to_string());
        self.index_of.insert(name.to_string(), i);
        self.edges.push(Vec::new());
        i
    }

    pub fn from_datalog(datalog: &Datalog) -> Self {
        let mut g = PrecedenceGraph::new();
        for rel in &datalog.relations {
            g.vertex(&rel.name);
        }
        for rule in &datalog.rules {
            let head = g.vertex(&rule.head_sym);
            for lit in &rule.body {
                if let BodyLiteral::Atom(atom) = lit {
                    let dst = g.vertex(&atom.sym);
                    let kind = if atom.is_negative() {
                        DependencyKind::Negative
                    } else {
                        DependencyKind::Positive
                    };
                    g.edges[head].push((dst, kind));
                }
            }
        }
        g
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn name(&self, v: usize) -> &str {
        &self.vertices[v]
    }

    pub fn index(&self, name: &str) -> Option<usize> {
        self.index_of.get(name).copied()
    }
}

/// Tarjan's SCC algorithm, iterative to avoid stack depth on large
/// programs. Returns each vertex's SCC id and the SCCs in the order they
/// were *closed* (reverse of a valid topological order of the condensation).
struct Tarjan<'g> {
    graph: &'g PrecedenceGraph,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    scc_of: Vec<usize>,
    sccs: Vec<Vec<usize>>,
}

impl<'g> Tarjan<'g> {
    fn new(graph: &'g PrecedenceGraph) -> Self {
        let n = graph.vertex_count();
        Tarjan {
            graph,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            scc_of: vec![usize::MAX; n],
            sccs: Vec::new(),
        }
    }

    fn run(mut self) -> (Vec<usize>, Vec<Vec<usize>>) {
        for v in 0..self.graph.vertex_count() {
            if self.index[v].is_none() {
                self.strongconnect(v);
            }
        }
        (self.scc_of, self.sccs)
    }

    /// Explicit work-stack version of Tarjan's recursive algorithm: each
    /// frame remembers which outgoing edge it is resuming from.
    fn strongconnect(&mut self, root: usize) {
        let mut call_stack: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(&(v, mut edge_pos)) = call_stack.last() {
            if self.index[v].is_none() {
                self.index[v] = Some(self.next_index);
                self.lowlink[v] = self.next_index;
                self.next_index += 1;
                self.stack.push(v);
                self.on_stack[v] = true;
            }

            let edges = &self.graph.edges[v];
            let mut descended = false;
            while edge_pos < edges.len() {
                let (w, _) = edges[edge_pos];
                edge_pos += 1;
                if self.index[w].is_none() {
                    call_stack.last_mut().unwrap_or_else(|| bug!("tarjan call stack empty")).1 = edge_pos;
                    call_stack.push((w, 0));
                    descended = true;
                    break;
                } else if self.on_stack[w] {
                    self.lowlink[v] = self.lowlink[v].min(
                        self.index[w].unwrap_or_else(|| bug!("tarjan missing index for on-stack vertex")),
                    );
                }
            }
            if descended {
                continue;
            }
            call_stack.last_mut().unwrap_or_else(|| bug!("tarjan call stack empty")).1 = edge_pos;

            call_stack.pop();
            if let Some(&(parent, _)) = call_stack.last() {
                self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[v]);
            }

            if self.lowlink[v] == self.index[v].unwrap_or_else(|| bug!("tarjan missing index at pop")) {
                let scc_id = self.sccs.len();
                let mut members = Vec::new();
                loop {
                    let w = self.stack.pop().unwrap_or_else(|| bug!("tarjan stack empty during SCC pop"));
                    self.on_stack[w] = false;
                    self.scc_of[w] = scc_id;
                    members.push(w);
                    if w == v {
                        break;
                    }
                }
                self.sccs.push(members);
            }
        }
    }
}

/// `(pseudo_stratum_index, stratum_index_within_pseudo_stratum)` per
/// predicate name.
pub type StrataMap = HashMap<String, (usize, usize)>;

/// Computes SCCs, condenses, topologically sorts, checks for a negative
/// cycle, and merges independent consecutive strata into pseudo-strata.
pub struct Stratifier;

impl Stratifier {
    pub fn stratify(graph: &PrecedenceGraph) -> Result<StrataMap, SolveError> {
        let (scc_of, sccs) = Tarjan::new(graph).run();
        let num_sccs = sccs.len();

        // Condensation edges, deduplicated, with kind = Negative if any
        // underlying edge between the two SCCs is negative.
        let mut cond_edges: Vec<HashSet<usize>> = vec![HashSet::new(); num_sccs];
        for v in 0..graph.vertex_count() {
            for &(w, kind) in &graph.edges[v] {
                let (sv, sw) = (scc_of[v], scc_of[w]);
                if sv == sw {
                    if kind == DependencyKind::Negative {
                        return Err(SolveError::Stratification(vec![graph.name(v).to_string()]));
                    }
                    continue;
                }
                cond_edges[sv].insert(sw);
            }
        }

        // Topological sort of the condensation (a DAG by construction).
        // `cond_edges[sv]` holds the SCCs `sv` depends on, so a valid
        // evaluation order must place each `sw` ahead of every `sv` that
        // depends on it: build the forward "evaluate before" graph
        // `sw -> sv` and run Kahn's algorithm over that.
        let mut eval_after: Vec<Vec<usize>> = vec![Vec::new(); num_sccs];
        let mut in_degree = vec![0usize; num_sccs];
        for (sv, deps) in cond_edges.iter().enumerate() {
            for &sw in deps {
                eval_after[sw].push(sv);
                in_degree[sv] += 1;
            }
        }
        let mut queue: std::collections::VecDeque<usize> =
            (0..num_sccs).filter(|&s| in_degree[s] == 0).collect();
        let mut topo = Vec::with_capacity(num_sccs);
        while let Some(s) = queue.pop_front() {
            topo.push(s);
            for &next in &eval_after[s] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        if topo.len() != num_sccs {
            bug!("topological sort of SCC condensation did not cover every vertex: stratification invariant violated");
        }
        // `topo` is now in dependency-first evaluation order directly.

        // Pseudo-stratum merge: walk strata in evaluation order, starting a
        // new pseudo-stratum only when the next stratum depends on
        // something already placed in the current pseudo-stratum (spec
        // §4.5: independent consecutive strata are grouped for `Par`).
        let mut pseudo_of_stratum = vec![0usize; num_sccs];
        let mut within_of_stratum = vec![0usize; num_sccs];
        let mut current_pseudo = 0usize;
        let mut current_members: HashSet<usize> = HashSet::new();
        let mut within_counter = 0usize;
        for &scc in &topo {
            let depends_on_current = cond_edges[scc].iter().any(|dst| current_members.contains(dst));
            if depends_on_current {
                current_pseudo += 1;
                current_members.clear();
                within_counter = 0;
            }
            current_members.insert(scc);
            pseudo_of_stratum[scc] = current_pseudo;
            within_of_stratum[scc] = within_counter;
            within_counter += 1;
        }

        let mut map = StrataMap::new();
        for v in 0..graph.vertex_count() {
            let scc = scc_of[v];
            map.insert(graph.name(v).to_string(), (pseudo_of_stratum[scc], within_of_stratum[scc]));
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{AtomBuilder, RuleBuilder};
    use crate::ast::Datalog;
    use crate::predicate::Denotation;

    fn tc_program() -> Datalog {
        let mut d = Datalog::new();
        d.declare("edge", 2, Denotation::Relational);
        d.declare("path", 2, Denotation::Relational);
        d.add_rule(
            RuleBuilder::new("path")
                .head_var("x")
                .head_var("y")
                .atom(AtomBuilder::new("edge").var("x").var("y").edb())
                .build(),
        );
        d.add_rule(
            RuleBuilder::new("path")
                .head_var("x")
                .head_var("z")
                .atom(AtomBuilder::new("path").var("x").var("y"))
                .atom(AtomBuilder::new("edge").var("y").var("z").edb())
                .build(),
        );
        d
    }

    #[test]
    fn recursive_predicate_forms_one_stratum() {
        let d = tc_program();
        let g = PrecedenceGraph::from_datalog(&d);
        let strata = Stratifier::stratify(&g).unwrap();
        // edge has no dependencies, path depends on edge and itself.
        assert!(strata["edge"] <= strata["path"]);
    }

    #[test]
    fn negation_within_one_scc_is_a_stratification_error() {
        let mut d = Datalog::new();
        d.declare("a", 1, Denotation::Relational);
        d.declare("b", 1, Denotation::Relational);
        d.add_rule(
            RuleBuilder::new("a")
                .head_var("x")
                .atom(AtomBuilder::new("b").var("x"))
                .build(),
        );
        d.add_rule(
            RuleBuilder::new("b")
                .head_var("x")
                .atom(AtomBuilder::new("a").var("x").negated())
                .build(),
        );
        let g = PrecedenceGraph::from_datalog(&d);
        assert!(Stratifier::stratify(&g).is_err());
    }

    #[test]
    fn orphans_negation_stratifies_cleanly() {
        let mut d = Datalog::new();
        d.declare("person", 1, Denotation::Relational);
        d.declare("parent", 2, Denotation::Relational);
        d.declare("has_parent", 1, Denotation::Relational);
        d.declare("orphan", 1, Denotation::Relational);
        d.add_rule(
            RuleBuilder::new("has_parent")
                .head_var("c")
                .atom(AtomBuilder::new("parent").var("c").wild().edb())
                .build(),
        );
        d.add_rule(
            RuleBuilder::new("orphan")
                .head_var("c")
                .atom(AtomBuilder::new("person").var("c").edb())
                .atom(AtomBuilder::new("has_parent").var("c").negated())
                .build(),
        );
        let g = PrecedenceGraph::from_datalog(&d);
        let strata = Stratifier::stratify(&g).unwrap();
        assert!(strata["has_parent"] < strata["orphan"]);
    }
}
