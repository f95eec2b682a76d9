//! Realtime processing graph core.
//!
//! This module defines the minimal `Generator` trait, the per-stage `Stage`
//! trait and `StageGraph<S>`: an arena-indexed directed acyclic graph of
//! stages that produces one **mono** sample at a time.
//!
//! Design goals
//! - Stages and edges live in flat arenas addressed by `StageId` / `EdgeId`
//! - Each edge is owned once by the graph; `connect`/`disconnect` are explicit edits
//! - Cycles, self loops and duplicate edges are rejected at edit time
//! - Edits may allocate; `next()` never does (topological order is cached)
//! - Generic over the stage type, so voices can be built without trait objects

use crate::error::GraphError;

/// Anything that can generate one sample at a time.
pub trait Generator {
    /// Called when the generator is (re)initialized or when the sample rate changes.
    fn reset(&mut self, sr: f32);

    /// Generate the next mono sample. Implementations should assume the sample
    /// rate has been communicated via `reset`.
    fn next(&mut self) -> f32;
}

/// One processing node: consumes the summed output of its inputs.
pub trait Stage {
    fn reset(&mut self, sr: f32);
    fn process(&mut self, input: f32) -> f32;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl StageId {
    #[inline] pub fn index(self) -> usize { self.0 }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EdgeId(usize);

impl EdgeId {
    #[inline] pub fn index(self) -> usize { self.0 }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Edge {
    from: usize,
    to: usize,
}

/// Arena DAG of stages with a single designated output.
#[derive(Clone, Debug)]
pub struct StageGraph<S> {
    stages: Vec<S>,
    edges: Vec<Option<Edge>>,
    order: Vec<usize>,
    outputs: Vec<f32>,
    output: Option<usize>,
    sr: f32,
}

impl<S: Stage> StageGraph<S> {
    pub fn new(sr: f32) -> Self {
        Self {
            stages: Vec::new(),
            edges: Vec::new(),
            order: Vec::new(),
            outputs: Vec::new(),
            output: None,
            sr: sr.max(1.0),
        }
    }

    /// Add a stage; it is reset to the graph's sample rate.
    pub fn add_stage(&mut self, mut stage: S) -> StageId {
        stage.reset(self.sr);
        self.stages.push(stage);
        self.outputs.push(0.0);
        self.rebuild_order();
        StageId(self.stages.len() - 1)
    }

    /// Route the output of `from` into the input of `to`.
    pub fn connect(&mut self, from: StageId, to: StageId) -> Result<EdgeId, GraphError> {
        self.check_stage(from)?;
        self.check_stage(to)?;
        if from == to {
            return Err(GraphError::SelfLoop(from.0));
        }
        let edge = Edge { from: from.0, to: to.0 };
        if self.edges.iter().flatten().any(|e| *e == edge) {
            return Err(GraphError::DuplicateEdge { from: from.0, to: to.0 });
        }
        if self.reaches(to.0, from.0) {
            return Err(GraphError::Cycle { from: from.0, to: to.0 });
        }

        let id = match self.edges.iter().position(Option::is_none) {
            Some(slot) => {
                self.edges[slot] = Some(edge);
                slot
            }
            None => {
                self.edges.push(Some(edge));
                self.edges.len() - 1
            }
        };
        self.rebuild_order();
        Ok(EdgeId(id))
    }

    /// Remove an edge. Its id may be reused by a later `connect`.
    pub fn disconnect(&mut self, edge: EdgeId) -> Result<(), GraphError> {
        match self.edges.get_mut(edge.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.rebuild_order();
                Ok(())
            }
            _ => Err(GraphError::UnknownEdge(edge.0)),
        }
    }

    pub fn set_output(&mut self, stage: StageId) -> Result<(), GraphError> {
        self.check_stage(stage)?;
        self.output = Some(stage.0);
        Ok(())
    }

    #[inline]
    pub fn stage(&self, id: StageId) -> Option<&S> {
        self.stages.get(id.0)
    }

    #[inline]
    pub fn stage_mut(&mut self, id: StageId) -> Option<&mut S> {
        self.stages.get_mut(id.0)
    }

    #[inline] pub fn stage_count(&self) -> usize { self.stages.len() }
    #[inline] pub fn edge_count(&self) -> usize { self.edges.iter().flatten().count() }
    #[inline] pub fn sample_rate(&self) -> f32 { self.sr }

    /// Stage indices in evaluation order.
    #[inline] pub fn order(&self) -> &[usize] { &self.order }

    /// Evaluate every stage once in topological order; returns the output stage's sample.
    #[inline]
    pub fn process(&mut self) -> f32 {
        for &i in &self.order {
            let mut input = 0.0;
            for e in self.edges.iter().flatten() {
                if e.to == i {
                    input += self.outputs[e.from];
                }
            }
            self.outputs[i] = self.stages[i].process(input);
        }
        self.output.map_or(0.0, |i| self.outputs[i])
    }

    fn check_stage(&self, id: StageId) -> Result<(), GraphError> {
        if id.0 < self.stages.len() { Ok(()) } else { Err(GraphError::UnknownStage(id.0)) }
    }

    /// Is `target` reachable from `start` along existing edges?
    fn reaches(&self, start: usize, target: usize) -> bool {
        let mut seen = vec![false; self.stages.len()];
        let mut stack = vec![start];
        while let Some(n) = stack.pop() {
            if n == target {
                return true;
            }
            if std::mem::replace(&mut seen[n], true) {
                continue;
            }
            stack.extend(self.edges.iter().flatten().filter(|e| e.from == n).map(|e| e.to));
        }
        false
    }

    /// Kahn's algorithm; ties resolved by stage index so the order is deterministic.
    fn rebuild_order(&mut self) {
        let n = self.stages.len();
        let mut indegree = vec![0usize; n];
        for e in self.edges.iter().flatten() {
            indegree[e.to] += 1;
        }
        self.order.clear();
        let mut ready: Vec<usize> = (0..n).rev().filter(|&i| indegree[i] == 0).collect();
        while let Some(i) = ready.pop() {
            self.order.push(i);
            for e in self.edges.iter().flatten().filter(|e| e.from == i) {
                indegree[e.to] -= 1;
                if indegree[e.to] == 0 {
                    ready.push(e.to);
                    ready.sort_unstable_by(|a, b| b.cmp(a));
                }
            }
        }
    }
}

impl<S: Stage> Generator for StageGraph<S> {
    fn reset(&mut self, sr: f32) {
        self.sr = sr.max(1.0);
        for stage in &mut self.stages {
            stage.reset(self.sr);
        }
        self.outputs.fill(0.0);
    }

    #[inline]
    fn next(&mut self) -> f32 {
        self.process()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test stage: `y = gain * x + offset`.
    #[derive(Debug)]
    struct Affine {
        gain: f32,
        offset: f32,
        sr: f32,
    }

    impl Stage for Affine {
        fn reset(&mut self, sr: f32) { self.sr = sr; }
        fn process(&mut self, input: f32) -> f32 { self.gain * input + self.offset }
    }

    fn affine(gain: f32, offset: f32) -> Affine {
        Affine { gain, offset, sr: 0.0 }
    }

    #[test]
    fn chain_evaluates_in_order() {
        let mut g = StageGraph::new(48_000.0);
        let out = g.add_stage(affine(2.0, 0.0));
        let src = g.add_stage(affine(0.0, 1.0));
        let mid = g.add_stage(affine(3.0, 0.0));
        g.connect(src, mid).unwrap();
        g.connect(mid, out).unwrap();
        g.set_output(out).unwrap();
        assert_eq!(g.order(), &[1, 2, 0]);
        assert_eq!(g.next(), 6.0);
        assert_eq!(g.stage(src).unwrap().sr, 48_000.0);
    }

    #[test]
    fn fan_in_sums_inputs() {
        let mut g = StageGraph::new(1.0);
        let a = g.add_stage(affine(0.0, 1.0));
        let b = g.add_stage(affine(0.0, 2.0));
        let sum = g.add_stage(affine(1.0, 0.0));
        g.connect(a, sum).unwrap();
        g.connect(b, sum).unwrap();
        g.set_output(sum).unwrap();
        assert_eq!(g.process(), 3.0);
    }

    #[test]
    fn rejects_bad_edits() {
        let mut g = StageGraph::new(1.0);
        let a = g.add_stage(affine(1.0, 0.0));
        let b = g.add_stage(affine(1.0, 0.0));
        let c = g.add_stage(affine(1.0, 0.0));
        g.connect(a, b).unwrap();
        g.connect(b, c).unwrap();
        assert_eq!(g.connect(c, a), Err(GraphError::Cycle { from: 2, to: 0 }));
        assert_eq!(g.connect(a, a), Err(GraphError::SelfLoop(0)));
        assert_eq!(g.connect(a, b), Err(GraphError::DuplicateEdge { from: 0, to: 1 }));
        assert_eq!(g.connect(a, StageId(9)), Err(GraphError::UnknownStage(9)));
        assert_eq!(g.set_output(StageId(5)), Err(GraphError::UnknownStage(5)));
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn disconnect_frees_the_edge() {
        let mut g = StageGraph::new(1.0);
        let a = g.add_stage(affine(0.0, 1.0));
        let b = g.add_stage(affine(1.0, 0.0));
        g.set_output(b).unwrap();
        let e = g.connect(a, b).unwrap();
        assert_eq!(g.process(), 1.0);
        g.disconnect(e).unwrap();
        assert_eq!(g.process(), 0.0);
        assert_eq!(g.disconnect(e), Err(GraphError::UnknownEdge(e.index())));
        // after removal the reverse edge is legal
        g.connect(b, a).unwrap();
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn graph_without_output_is_silent() {
        let mut g = StageGraph::new(1.0);
        g.add_stage(affine(0.0, 1.0));
        assert_eq!(g.next(), 0.0);
    }
}
