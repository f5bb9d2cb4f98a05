//! Plan DAG as an arena of indices: steps are `Vec<PlanStep>`, edges are
//! `Vec<usize>` dependency lists. Cycle detection is Tarjan's SCC with an
//! explicit stack — no recursion, matching the iterative style the rest
//! of this workspace uses for traversal.

use agentgov_core::types::PlanStep;

pub struct PlanArena {
    pub steps: Vec<PlanStep>,
    /// `depends_on[i]` lists the arena indices step `i` depends on.
    depends_on: Vec<Vec<usize>>,
}

impl PlanArena {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        let depends_on = steps
            .iter()
            .map(|step| {
                step.depends_on
                    .iter()
                    .filter_map(|dep_id| steps.iter().position(|s| &s.step_id == dep_id))
                    .collect()
            })
            .collect();
        Self { steps, depends_on }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn dependencies_of(&self, index: usize) -> &[usize] {
        &self.depends_on[index]
    }

    /// Tarjan's strongly connected components, iterative (explicit stack).
    /// Returns groups of arena indices; any group of size > 1 is a cycle.
    pub fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        let n = self.steps.len();
        let mut index_counter = 0usize;
        let mut indices = vec![None; n];
        let mut lowlink = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut sccs = Vec::new();

        for start in 0..n {
            if indices[start].is_some() {
                continue;
            }

            // Explicit-stack Tarjan: each work-stack frame is (node, next
            // child index to visit).
            let mut work: Vec<(usize, usize)> = vec![(start, 0)];

            while let Some(&(v, child_idx)) = work.last() {
                if child_idx == 0 {
                    indices[v] = Some(index_counter);
                    lowlink[v] = index_counter;
                    index_counter += 1;
                    stack.push(v);
                    on_stack[v] = true;
                }

                let neighbors = &self.depends_on[v];
                if child_idx < neighbors.len() {
                    let w = neighbors[child_idx];
                    work.last_mut().unwrap().1 += 1;

                    if indices[w].is_none() {
                        work.push((w, 0));
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(indices[w].unwrap());
                    }
                } else {
                    work.pop();
                    if let Some(&(parent, _)) = work.last() {
                        lowlink[parent] = lowlink[parent].min(lowlink[v]);
                    }

                    if lowlink[v] == indices[v].unwrap() {
                        let mut component = Vec::new();
                        loop {
                            let w = stack.pop().unwrap();
                            on_stack[w] = false;
                            component.push(w);
                            if w == v {
                                break;
                            }
                        }
                        sccs.push(component);
                    }
                }
            }
        }

        sccs
    }

    /// Indices with no unresolved dependency, in the order a caller can
    /// safely start executing them.
    pub fn initial_frontier(&self) -> Vec<usize> {
        (0..self.steps.len()).filter(|&i| self.depends_on[i].is_empty()).collect()
    }

    /// Group all steps into dependency levels for level-batched parallel
    /// execution. Assumes the arena has already been verified acyclic (or
    /// that any remaining cycles have been classified `Iterative` and
    /// their extra edges removed before calling this).
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let n = self.steps.len();
        let mut level_of = vec![None; n];
        let mut remaining: Vec<usize> = (0..n).collect();
        let mut current_level = 0;
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| self.depends_on[i].iter().all(|&d| level_of[d].is_some()))
                .collect();

            if ready.is_empty() {
                // Residual cycle; break by taking whatever's left as one
                // level so execution still terminates.
                levels.push(remaining.clone());
                break;
            }

            for &i in &ready {
                level_of[i] = Some(current_level);
            }
            remaining.retain(|i| !ready.contains(i));
            levels.push(ready);
            current_level += 1;
        }

        levels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleClass {
    Iterative,
    Deadlock,
}

/// Classify a detected cycle by comparing two successive outputs of the
/// same step: iterative iff the output strictly differs between
/// iterations, deadlocked otherwise.
pub fn classify_cycle(first_output: &serde_json::Value, second_output: &serde_json::Value) -> CycleClass {
    if first_output == second_output {
        CycleClass::Deadlock
    } else {
        CycleClass::Iterative
    }
}
