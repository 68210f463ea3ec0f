//! Propagation Passes
//!
//! A propagation pass brings every calculation of a graph up to date with the
//! writes made since the last commit (the frontier).
//!
//! # How a Pass Works
//!
//! 1. The scheduler builds a plan: the affected calculations in dependency
//!    order. A cycle rejects the pass before any calculation runs.
//!
//! 2. Calculations observing a frontier node, and calculations that never
//!    ran, start `Dirty`. The rest of the plan starts `MaybeDirty`.
//!
//! 3. The pass walks the plan. A `MaybeDirty` calculation whose inputs did
//!    not change by the time it is reached is skipped (early cutoff). A
//!    `Dirty` one recomputes and writes its outputs; outputs that actually
//!    change mark their observers `Dirty`.
//!
//! 4. A calculation asking for an effect suspends the pass. The caller
//!    answers with a `Resolution` and the pass resumes where it stopped.
//!
//! 5. Every write of the pass is journaled. A failed, rejected or dropped
//!    pass restores the journal, so either all writes of a pass commit or
//!    none do.
//!
//! 6. Every bump of the pass carries one stamp: the open version of the
//!    outermost graph holding the target. Nested graphs such as entities
//!    share it, and commit advances all of them.
//!
//! # State Machine
//!
//! ```text
//! Idle -> Computing -> ResolvingEffect -> Computing -> ... -> Committed
//!              \                \
//!               +----------------+--> Rejected
//! ```
//!
//! A pass holds `&mut ChronoGraph`, so passes never interleave.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::mem;

use indexmap::IndexSet;
use serde_json::Value;
use tracing::{debug, debug_span, trace, warn, Span};

use super::chrono_graph::{apply_write, graph_version, outermost_graph, ChronoGraph, Journal};
use super::id::Version;
use super::node::{DirtyState, Node, NodeId};
use super::scheduler::Scheduler;
use crate::chrono::{
    AcceptAll, CalcResult, Computation, Continuation, EffectRequest, EffectResolver, Outputs,
    Resolution,
};
use crate::error::{ChronoError, ChronoResult};

/// Where a pass is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Created, nothing planned yet.
    Idle,

    /// Running calculations.
    Computing,

    /// Suspended on an effect.
    ResolvingEffect,

    /// Finished; every write of the pass is kept.
    Committed,

    /// Finished; every write of the pass was rolled back.
    Rejected,
}

/// Summary of a committed pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// The version stamped on every bump of the pass.
    pub version: Version,

    /// Nodes whose payload changed: consumed frontier nodes and outputs the
    /// pass actually changed.
    pub changed: IndexSet<NodeId>,

    /// Calculations that ran, in the order they finished.
    pub recomputed: Vec<NodeId>,
}

/// Terminal result of a pass.
pub type PropagationResult = Result<Commit, ChronoError>;

/// What driving a pass produced.
#[derive(Debug)]
pub enum Step<'g> {
    /// The pass waits for `request` to be resolved through `pass.resume`.
    Suspended {
        request: EffectRequest,
        pass: PropagationPass<'g>,
    },

    /// The pass is over.
    Finished(PropagationResult),
}

/// A calculation parked on an effect.
struct Suspension {
    node: NodeId,
    round: usize,
    inputs: Value,
    request: EffectRequest,
    resume: Continuation,
}

enum Settled {
    Next,
    Suspended,
}

/// One propagation pass over a graph.
///
/// Dropping a pass that has started but not finished rolls back its writes.
pub struct PropagationPass<'g> {
    graph: &'g mut ChronoGraph,
    target: NodeId,
    /// Stamp carried by every bump this pass makes.
    version: Version,
    state: PassState,
    order: Vec<NodeId>,
    scope: IndexSet<NodeId>,
    cursor: usize,
    marks: HashMap<NodeId, DirtyState>,
    consumed: IndexSet<NodeId>,
    journal: Journal,
    changed: IndexSet<NodeId>,
    recomputed: Vec<NodeId>,
    suspension: Option<Suspension>,
    span: Span,
}

impl<'g> PropagationPass<'g> {
    fn new(graph: &'g mut ChronoGraph, target: NodeId) -> Self {
        let version = graph_version(&graph.nodes, target);
        Self {
            graph,
            target,
            version,
            state: PassState::Idle,
            order: Vec::new(),
            scope: IndexSet::new(),
            cursor: 0,
            marks: HashMap::new(),
            consumed: IndexSet::new(),
            journal: Journal::default(),
            changed: IndexSet::new(),
            recomputed: Vec::new(),
            suspension: None,
            span: debug_span!("propagate", graph = %target),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PassState {
        self.state
    }

    /// The graph node being propagated.
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// The effect the pass is waiting on, if suspended.
    pub fn request(&self) -> Option<&EffectRequest> {
        self.suspension.as_ref().map(|suspension| &suspension.request)
    }

    /// Read access to the graph mid-pass. Values written so far by the pass
    /// are visible.
    pub fn graph(&self) -> &ChronoGraph {
        &*self.graph
    }

    /// Run until the pass finishes or suspends on an effect.
    pub fn run(self) -> Step<'g> {
        self.drive()
    }

    /// Answer the pending effect and keep running.
    ///
    /// On a pass that is not suspended this is the same as `run`.
    pub fn resume(mut self, resolution: Resolution) -> Step<'g> {
        let Some(suspension) = self.suspension.take() else {
            return self.drive();
        };
        let span = self.span.clone();
        let _enter = span.enter();
        self.state = PassState::Computing;

        let Suspension {
            node,
            round,
            inputs,
            request,
            resume,
        } = suspension;

        let result = match resolution {
            Resolution::Resume(value) => resume(value),
            Resolution::Reject(reason) => {
                let err = ChronoError::EffectRejected {
                    node,
                    kind: request.effect.kind,
                    reason,
                };
                return Step::Finished(self.reject(err));
            }
        };

        match self.settle(node, round + 1, inputs, result) {
            Ok(Settled::Next) => {
                self.cursor += 1;
                self.drive()
            }
            Ok(Settled::Suspended) => self.suspended(),
            Err(err) => Step::Finished(self.reject(err)),
        }
    }

    /// Give up on the pass and roll back its writes.
    pub fn abandon(mut self) -> PropagationResult {
        self.reject(ChronoError::PassAbandoned)
    }

    fn suspended(self) -> Step<'g> {
        match self.request().cloned() {
            Some(request) => Step::Suspended {
                request,
                pass: self,
            },
            None => self.drive(),
        }
    }

    fn drive(mut self) -> Step<'g> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.state == PassState::Idle {
            if let Err(err) = self.start() {
                return Step::Finished(self.reject(err));
            }
        }
        if self.suspension.is_some() {
            return self.suspended();
        }

        while let Some(&id) = self.order.get(self.cursor) {
            if self.marks.get(&id) != Some(&DirtyState::Dirty) {
                trace!(node = %id, "inputs unchanged, skipping");
                self.cursor += 1;
                continue;
            }

            let mutation = match self.graph.node(id).map(Node::as_mutation) {
                Ok(Some(node)) => node.mutation().clone(),
                _ => {
                    self.cursor += 1;
                    continue;
                }
            };
            let values = self.graph.input_values(&mutation);
            let inputs = values.to_json();
            trace!(node = %id, %inputs, "recomputing");

            let result = mutation.calculate(&values);
            match self.settle(id, 0, inputs, result) {
                Ok(Settled::Next) => self.cursor += 1,
                Ok(Settled::Suspended) => return self.suspended(),
                Err(err) => return Step::Finished(self.reject(err)),
            }
        }

        Step::Finished(self.commit())
    }

    /// Plan the pass and seed the dirty marks.
    fn start(&mut self) -> ChronoResult<()> {
        self.state = PassState::Computing;

        let plan = Scheduler::new(&self.graph.nodes).plan(
            self.target,
            &self.graph.frontier,
            self.graph.config.cycle_check,
        )?;
        let planned: IndexSet<NodeId> = plan.order.iter().copied().collect();

        let graph = &*self.graph;
        let consumed: IndexSet<NodeId> = graph
            .frontier
            .iter()
            .copied()
            .filter(|id| {
                plan.scope.contains(id)
                    || graph
                        .node(*id)
                        .is_ok_and(|node| node.observed_by().iter().any(|o| planned.contains(o)))
            })
            .collect();

        for &id in &plan.order {
            let node = graph.node(id)?;
            let dirty = node
                .as_mutation()
                .is_some_and(|m| m.dirty_state() == DirtyState::Dirty)
                || node.from_edges().iter().any(|input| consumed.contains(input));
            let mark = if dirty {
                DirtyState::Dirty
            } else {
                DirtyState::MaybeDirty
            };
            self.marks.insert(id, mark);
        }

        debug!(
            frontier = consumed.len(),
            scheduled = plan.order.len(),
            "propagation pass started"
        );

        self.changed.extend(consumed.iter().copied());
        self.consumed = consumed;
        self.order = plan.order;
        self.scope = plan.scope;
        Ok(())
    }

    /// Handle one step of a calculation.
    fn settle(
        &mut self,
        id: NodeId,
        round: usize,
        inputs: Value,
        result: CalcResult,
    ) -> ChronoResult<Settled> {
        match result {
            Ok(Computation::Done(value)) => {
                self.write_outputs(id, value)?;
                self.marks.insert(id, DirtyState::Clean);
                self.recomputed.push(id);
                Ok(Settled::Next)
            }
            Ok(Computation::Effect(effect, resume)) => {
                let limit = self.graph.config.max_effects_per_node;
                if round >= limit {
                    return Err(ChronoError::EffectLimitExceeded { node: id, limit });
                }
                let request = EffectRequest {
                    node: id,
                    label: self.graph.label_of(id),
                    round,
                    effect,
                };
                debug!(node = %id, kind = %request.effect.kind, round, "suspending on effect");
                self.suspension = Some(Suspension {
                    node: id,
                    round,
                    inputs,
                    request,
                    resume,
                });
                self.state = PassState::ResolvingEffect;
                Ok(Settled::Suspended)
            }
            Err(source) => Err(ChronoError::Calculation {
                node: id,
                label: self.graph.label_of(id),
                inputs,
                source,
            }),
        }
    }

    fn write_outputs(&mut self, id: NodeId, value: Value) -> ChronoResult<()> {
        let outputs: Outputs = self
            .graph
            .node(id)?
            .as_mutation()
            .map(|node| node.mutation().outputs().iter().copied().collect())
            .unwrap_or_default();

        for output in outputs {
            if !apply_write(
                &mut self.graph.nodes,
                output,
                value.clone(),
                self.version,
                &mut self.journal,
            )? {
                continue;
            }
            self.changed.insert(output);
            for observer in self.graph.node(output)?.observed_by() {
                if let Some(mark) = self.marks.get_mut(observer) {
                    *mark = DirtyState::Dirty;
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self) -> PropagationResult {
        let graph = &mut *self.graph;

        for &id in &self.order {
            if let Some(node) = graph.nodes.get_mut(id.index()).and_then(Node::as_mutation_mut) {
                node.dirty = DirtyState::Clean;
            }
        }
        for id in self.consumed.iter().chain(self.changed.iter()) {
            graph.frontier.shift_remove(id);
            graph.pending.forget(*id);
        }
        self.journal = Journal::default();

        let version = self.version;
        let outermost = outermost_graph(&graph.nodes, self.target);
        for id in [outermost, self.target].iter().chain(self.scope.iter()) {
            if let Some(graph_node) = graph.nodes.get_mut(id.index()).and_then(Node::as_graph_mut) {
                graph_node.advance_version();
            }
        }

        self.state = PassState::Committed;
        debug!(
            %version,
            changed = self.changed.len(),
            recomputed = self.recomputed.len(),
            "propagation pass committed"
        );

        Ok(Commit {
            version,
            changed: mem::take(&mut self.changed),
            recomputed: mem::take(&mut self.recomputed),
        })
    }

    fn reject(&mut self, err: ChronoError) -> PropagationResult {
        self.rollback();
        self.state = PassState::Rejected;
        warn!(error = %err, "propagation pass rejected");
        Err(err)
    }

    fn rollback(&mut self) {
        let journal = mem::take(&mut self.journal);
        trace!(nodes = journal.len(), "rolling back pass writes");
        journal.rollback(&mut self.graph.nodes);
        self.suspension = None;
    }
}

impl Drop for PropagationPass<'_> {
    fn drop(&mut self) {
        if matches!(
            self.state,
            PassState::Computing | PassState::ResolvingEffect
        ) {
            self.rollback();
            self.state = PassState::Rejected;
            warn!(graph = %self.target, "unfinished propagation pass dropped, writes rolled back");
        }
    }
}

impl fmt::Debug for PropagationPass<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagationPass")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("order", &self.order)
            .field("cursor", &self.cursor)
            .field("request", &self.request())
            .finish()
    }
}

impl ChronoGraph {
    /// Start a pass over the root graph. Nothing runs until the pass is
    /// driven with `run`.
    pub fn begin_pass(&mut self) -> PropagationPass<'_> {
        let root = self.root;
        PropagationPass::new(self, root)
    }

    /// Start a pass over `graph` and everything it transitively contains.
    pub fn begin_pass_for(&mut self, graph: NodeId) -> ChronoResult<PropagationPass<'_>> {
        self.node(graph)?
            .as_graph()
            .ok_or(ChronoError::NotAGraph(graph))?;
        Ok(PropagationPass::new(self, graph))
    }

    /// Propagate the root graph, resuming every effect with `true`.
    pub fn propagate(&mut self) -> PropagationResult {
        self.propagate_with(&mut AcceptAll)
    }

    /// Propagate the root graph, resolving effects with `resolver`.
    pub fn propagate_with<R>(&mut self, resolver: &mut R) -> PropagationResult
    where
        R: EffectResolver + ?Sized,
    {
        drive_with(self.begin_pass(), resolver)
    }

    /// Propagate `graph`, resolving effects with `resolver`.
    pub fn propagate_graph_with<R>(&mut self, graph: NodeId, resolver: &mut R) -> PropagationResult
    where
        R: EffectResolver + ?Sized,
    {
        drive_with(self.begin_pass_for(graph)?, resolver)
    }

    /// Propagate the root graph, awaiting each effect resolution.
    ///
    /// Pairs with `ChannelResolver`:
    ///
    /// ```rust,ignore
    /// let (resolver, inbox) = effect_channel(8);
    /// graph.propagate_async(|request| resolver.resolve(request)).await?;
    /// ```
    pub async fn propagate_async<F, Fut>(&mut self, mut resolver: F) -> PropagationResult
    where
        F: FnMut(EffectRequest) -> Fut,
        Fut: Future<Output = Resolution>,
    {
        let mut step = self.begin_pass().run();
        loop {
            match step {
                Step::Finished(result) => return result,
                Step::Suspended { request, pass } => {
                    let resolution = resolver(request).await;
                    step = pass.resume(resolution);
                }
            }
        }
    }
}

fn drive_with<R>(pass: PropagationPass<'_>, resolver: &mut R) -> PropagationResult
where
    R: EffectResolver + ?Sized,
{
    let mut step = pass.run();
    loop {
        match step {
            Step::Finished(result) => return result,
            Step::Suspended { request, pass } => {
                let resolution = resolver.resolve(&request);
                step = pass.resume(resolution);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chrono::{Atom, Comparator, Effect, Mutation, VersionedReference};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn int(value: &Value) -> i64 {
        value.as_i64().unwrap_or(0)
    }

    /// `a -> double -> b -> inc -> c`, all in the root graph.
    struct Chain {
        graph: ChronoGraph,
        a: NodeId,
        b: NodeId,
        c: NodeId,
        double: NodeId,
        inc: NodeId,
    }

    fn chain() -> Chain {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let a = graph.create_atom(Atom::observable());
        let b = graph.create_atom(Atom::observable());
        let c = graph.create_atom(Atom::observable());
        let double = graph
            .create_mutation(Mutation::positional([a], [b], |args| Ok(json!(int(&args[0]) * 2).into())))
            .unwrap();
        let inc = graph
            .create_mutation(Mutation::positional([b], [c], |args| Ok(json!(int(&args[0]) + 1).into())))
            .unwrap();
        graph.add_nodes(root, &[a, b, c, double, inc]).unwrap();
        Chain {
            graph,
            a,
            b,
            c,
            double,
            inc,
        }
    }

    fn confirm(a: NodeId, out: NodeId) -> Mutation {
        Mutation::positional([a], [out], |args| {
            let value = args[0].clone();
            Ok(Computation::effect(
                Effect::new("confirm", value.clone()),
                move |answer| {
                    let confirmed = if answer == json!(true) { value } else { Value::Null };
                    Ok(confirmed.into())
                },
            ))
        })
    }

    #[test]
    fn chain_propagates_in_order() {
        let mut chain = chain();
        chain.graph.write(chain.a, json!(5)).unwrap();

        let commit = chain.graph.propagate().unwrap();

        assert_eq!(chain.graph.get(chain.b), Some(&json!(10)));
        assert_eq!(chain.graph.get(chain.c), Some(&json!(11)));
        assert_eq!(commit.recomputed, vec![chain.double, chain.inc]);
        assert!(commit.changed.contains(&chain.a));
        assert!(commit.changed.contains(&chain.c));
        assert!(chain.graph.frontier().is_empty());
    }

    #[test]
    fn clean_graph_commits_nothing() {
        let mut chain = chain();
        chain.graph.propagate().unwrap();

        let commit = chain.graph.propagate().unwrap();
        assert!(commit.recomputed.is_empty());
        assert!(commit.changed.is_empty());
    }

    #[test]
    fn equal_output_cuts_off_downstream() {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let a = graph.create_atom(Atom::observable());
        let parity = graph.create_atom(Atom::observable());
        let label = graph.create_atom(Atom::observable());
        let runs = Arc::new(AtomicUsize::new(0));

        let to_parity = graph
            .create_mutation(Mutation::positional([a], [parity], |args| {
                Ok(json!(int(&args[0]) % 2).into())
            }))
            .unwrap();
        let counted = Arc::clone(&runs);
        let to_label = graph
            .create_mutation(Mutation::positional([parity], [label], move |args| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(json!(format!("parity {}", int(&args[0]))).into())
            }))
            .unwrap();
        graph
            .add_nodes(root, &[a, parity, label, to_parity, to_label])
            .unwrap();

        graph.write(a, json!(1)).unwrap();
        graph.propagate().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        graph.write(a, json!(3)).unwrap();
        let commit = graph.propagate().unwrap();
        assert_eq!(commit.recomputed, vec![to_parity]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_stepping_through_an_effect() {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let a = graph.create_atom(Atom::observable());
        let out = graph.create_atom(Atom::observable());
        let calc = graph.create_mutation(confirm(a, out)).unwrap();
        graph.set_label(calc, "confirm-a").unwrap();
        graph.add_nodes(root, &[a, out, calc]).unwrap();
        graph.write(a, json!(7)).unwrap();

        let pass = graph.begin_pass();
        assert_eq!(pass.state(), PassState::Idle);

        let Step::Suspended { request, pass } = pass.run() else {
            panic!("expected the pass to suspend");
        };
        assert_eq!(pass.state(), PassState::ResolvingEffect);
        assert_eq!(request.label, "confirm-a");
        assert_eq!(request.effect.payload, json!(7));
        assert_eq!(pass.request(), Some(&request));

        let Step::Finished(result) = pass.resume(Resolution::Resume(json!(true))) else {
            panic!("expected the pass to finish");
        };
        assert_eq!(result.unwrap().recomputed, vec![calc]);
        assert_eq!(graph.get(out), Some(&json!(7)));
    }

    #[test]
    fn rejected_effect_rolls_back_the_pass() {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let a = graph.create_atom(Atom::observable());
        let copy = graph.create_atom(Atom::observable());
        let out = graph.create_atom(Atom::observable());
        let copier = graph
            .create_mutation(Mutation::positional([a], [copy], |args| Ok(args[0].clone().into())))
            .unwrap();
        let gate = graph.create_mutation(confirm(copy, out)).unwrap();
        graph.add_nodes(root, &[a, copy, out, copier, gate]).unwrap();
        graph.write(a, json!(1)).unwrap();

        let mut deny = |_: &EffectRequest| Resolution::Reject("denied".into());
        let err = graph.propagate_with(&mut deny).unwrap_err();

        assert!(matches!(err, ChronoError::EffectRejected { ref reason, .. } if reason == "denied"));
        assert_eq!(graph.get(copy), None);
        assert_eq!(graph.node(copy).unwrap().write_count(), 0);
        assert!(graph.frontier().contains(&a));
        assert_eq!(graph.get(a), Some(&json!(1)));
    }

    #[test]
    fn dropping_a_suspended_pass_rolls_back() {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let a = graph.create_atom(Atom::observable());
        let copy = graph.create_atom(Atom::observable());
        let out = graph.create_atom(Atom::observable());
        let copier = graph
            .create_mutation(Mutation::positional([a], [copy], |args| Ok(args[0].clone().into())))
            .unwrap();
        let gate = graph.create_mutation(confirm(copy, out)).unwrap();
        graph.add_nodes(root, &[a, copy, out, copier, gate]).unwrap();
        graph.write(a, json!(2)).unwrap();

        match graph.begin_pass().run() {
            Step::Suspended { pass, .. } => {
                assert_eq!(pass.graph().get(copy), Some(&json!(2)));
                drop(pass);
            }
            Step::Finished(result) => panic!("expected a suspension, got {result:?}"),
        }

        assert_eq!(graph.get(copy), None);
        assert!(graph.frontier().contains(&a));

        // The pending frontier is still there for the next pass
        graph.propagate().unwrap();
        assert_eq!(graph.get(out), Some(&json!(2)));
    }

    #[test]
    fn abandoning_a_pass() {
        let mut chain = chain();
        chain.graph.write(chain.a, json!(1)).unwrap();

        let err = chain.graph.begin_pass().abandon().unwrap_err();
        assert!(matches!(err, ChronoError::PassAbandoned));
        assert_eq!(chain.graph.get(chain.b), None);
    }

    #[test]
    fn effect_limit_is_enforced() {
        fn ask(round: u64) -> CalcResult {
            Ok(Computation::effect(
                Effect::new("again", json!(round)),
                move |_| ask(round + 1),
            ))
        }

        let config = crate::config::PropagationConfig {
            max_effects_per_node: 3,
            ..Default::default()
        };
        let mut graph = ChronoGraph::with_config(config);
        let root = graph.root();
        let a = graph.create_atom(Atom::observable());
        let out = graph.create_atom(Atom::observable());
        let endless = graph
            .create_mutation(Mutation::positional([a], [out], |_| ask(0)))
            .unwrap();
        graph.add_nodes(root, &[a, out, endless]).unwrap();

        let mut rounds = Vec::new();
        let mut resolver = |request: &EffectRequest| {
            rounds.push(request.round);
            Resolution::Resume(Value::Null)
        };
        let err = graph.propagate_with(&mut resolver).unwrap_err();

        assert!(matches!(err, ChronoError::EffectLimitExceeded { limit: 3, .. }));
        assert_eq!(rounds, vec![0, 1, 2]);
    }

    #[test]
    fn calculation_failure_names_the_node() {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let a = graph.create_atom(Atom::observable());
        let out = graph.create_atom(Atom::observable());
        let fails = graph
            .create_mutation(Mutation::keyed([("a", a)], [out], |_| Err("bad input".into())))
            .unwrap();
        graph.set_label(fails, "fails").unwrap();
        graph.add_nodes(root, &[a, out, fails]).unwrap();
        graph.write(a, json!(4)).unwrap();

        match graph.propagate().unwrap_err() {
            ChronoError::Calculation {
                node,
                label,
                inputs,
                ..
            } => {
                assert_eq!(node, fails);
                assert_eq!(label, "fails");
                assert_eq!(inputs, json!({"a": 4}));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            graph.node(fails).unwrap().as_mutation().unwrap().dirty_state(),
            DirtyState::Dirty
        );
    }

    #[test]
    fn commit_advances_graph_versions() {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let reference = graph.create_reference(VersionedReference::new());
        graph.enter_graph(reference, root).unwrap();

        graph.write(reference, json!("first")).unwrap();
        let first = graph.propagate().unwrap().version;
        graph.write(reference, json!("second")).unwrap();
        let second = graph.propagate().unwrap().version;

        assert!(second > first);
        assert_eq!(graph.read_as_of(reference, first).unwrap(), Some(&json!("first")));
        assert_eq!(graph.read_as_of(reference, second).unwrap(), Some(&json!("second")));
    }

    #[test]
    fn nested_graphs_share_the_pass_version() {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let inner = graph.create_graph();
        graph.enter_graph(inner, root).unwrap();
        let a = graph.create_atom(Atom::observable());
        let nested = graph.create_reference(VersionedReference::observable(Comparator::default()));
        let top = graph.create_reference(VersionedReference::observable(Comparator::default()));
        let copy = graph
            .create_mutation(Mutation::positional([a], [nested, top], |args| {
                Ok(args[0].clone().into())
            }))
            .unwrap();
        graph.enter_graph(top, root).unwrap();
        for id in [a, nested, copy] {
            graph.enter_graph(id, inner).unwrap();
        }

        graph.write(a, json!(1)).unwrap();
        let first = graph.propagate().unwrap().version;
        assert_eq!(graph.read_as_of(nested, first).unwrap(), Some(&json!(1)));
        assert_eq!(graph.read_as_of(top, first).unwrap(), Some(&json!(1)));

        // A pass over the inner graph still stamps with the outermost version.
        graph.write(a, json!(2)).unwrap();
        let second = graph.propagate_graph_with(inner, &mut AcceptAll).unwrap().version;
        assert!(second > first);
        assert_eq!(graph.read_as_of(nested, second).unwrap(), Some(&json!(2)));
        assert_eq!(graph.read_as_of(top, second).unwrap(), Some(&json!(2)));
        assert_eq!(graph.read_as_of(nested, first).unwrap(), Some(&json!(1)));

        graph.write(a, json!(3)).unwrap();
        let third = graph.propagate().unwrap().version;
        assert!(third > second);
        assert_eq!(graph.read_as_of(nested, second).unwrap(), Some(&json!(2)));
    }

    #[test]
    fn nodes_outside_the_propagated_graph_are_left_alone() {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let inner = graph.create_graph();
        let a = graph.create_atom(Atom::observable());
        let b = graph.create_atom(Atom::observable());
        let x = graph.create_atom(Atom::observable());
        let y = graph.create_atom(Atom::observable());
        let inside = graph
            .create_mutation(Mutation::positional([a], [b], |args| Ok(args[0].clone().into())))
            .unwrap();
        let outside = graph
            .create_mutation(Mutation::positional([x], [y], |args| Ok(args[0].clone().into())))
            .unwrap();
        graph.add_nodes(inner, &[a, b, inside]).unwrap();
        graph.add_nodes(root, &[inner, x, y, outside]).unwrap();
        graph.write(a, json!(1)).unwrap();
        graph.write(x, json!(2)).unwrap();

        graph.propagate_graph_with(inner, &mut AcceptAll).unwrap();
        assert_eq!(graph.get(b), Some(&json!(1)));
        assert_eq!(graph.get(y), None);
        assert!(graph.frontier().contains(&x));

        graph.propagate().unwrap();
        assert_eq!(graph.get(y), Some(&json!(2)));
    }

    #[test]
    fn begin_pass_for_requires_a_graph() {
        let mut graph = ChronoGraph::new();
        let a = graph.create_atom(Atom::new());
        assert!(matches!(
            graph.begin_pass_for(a),
            Err(ChronoError::NotAGraph(_))
        ));
    }

    #[tokio::test]
    async fn async_driver_awaits_resolutions() {
        let mut graph = ChronoGraph::new();
        let root = graph.root();
        let a = graph.create_atom(Atom::observable());
        let out = graph.create_atom(Atom::observable());
        let calc = graph.create_mutation(confirm(a, out)).unwrap();
        graph.add_nodes(root, &[a, out, calc]).unwrap();
        graph.write(a, json!("ok")).unwrap();

        let commit = graph
            .propagate_async(|request| async move {
                assert_eq!(request.effect.kind, "confirm");
                Resolution::Resume(json!(true))
            })
            .await
            .unwrap();

        assert_eq!(commit.recomputed, vec![calc]);
        assert_eq!(graph.get(out), Some(&json!("ok")));
    }
}
