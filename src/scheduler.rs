//! # Dependency Scheduling
//!
//! Orders the selected units so every unit runs after its dependencies.
//!
//! Two query styles serve the two executor modes:
//!
//! - [`DependencyScheduler::linear_order`]: a depth-first order for sequential runs.
//! - [`DependencyScheduler::ready_set`]: the units that may start now, given what
//!   has completed and what is in flight, for parallel runs.
//!
//! Dependencies on units outside the current selection count as satisfied;
//! their values are read from the previous run's records. Cycles are rejected
//! when the scheduler is built, before any unit executes.

use crate::errors::{Result, SnapbookError};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct Node {
    path: String,
    deps: Vec<String>,
}

/// Dependency graph over the selected units.
#[derive(Debug, Clone)]
pub struct DependencyScheduler {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyScheduler {
    /// Builds the graph of `selected` units (`(path, dependency paths)`, in
    /// registration order). `known` holds every registered unit path.
    ///
    /// Fails with `MissingDependency` for a dependency nobody registered and
    /// with `CircularOrMissingDependency` for a cycle among selected units.
    pub fn new<I>(selected: I, known: &HashSet<String>) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let nodes: Vec<Node> = selected
            .into_iter()
            .map(|(path, deps)| Node { path, deps })
            .collect();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.path.clone(), i))
            .collect();
        let scheduler = Self { nodes, index };

        for node in &scheduler.nodes {
            if let Some(dep) = node
                .deps
                .iter()
                .find(|d| !known.contains(*d) && !scheduler.index.contains_key(*d))
            {
                return Err(SnapbookError::MissingDependency {
                    unit: node.path.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        scheduler.check_acyclic()?;
        Ok(scheduler)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Paths in registration order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.path.as_str())
    }

    /// Dependencies of `path` that are part of the selection.
    pub fn selected_deps(&self, path: &str) -> Vec<&str> {
        self.index
            .get(path)
            .map(|&i| {
                self.nodes[i]
                    .deps
                    .iter()
                    .filter(|d| self.index.contains_key(*d))
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rejects cycles among the selected units.
    pub fn check_acyclic(&self) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();
        for i in 0..self.nodes.len() {
            if marks[i] == Mark::Unvisited {
                self.find_cycle(i, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn find_cycle(&self, i: usize, marks: &mut [Mark], stack: &mut Vec<usize>) -> Result<()> {
        marks[i] = Mark::InProgress;
        stack.push(i);
        for dep in &self.nodes[i].deps {
            let Some(&j) = self.index.get(dep) else {
                continue;
            };
            match marks[j] {
                Mark::Done => {}
                Mark::Unvisited => self.find_cycle(j, marks, stack)?,
                Mark::InProgress => {
                    let start = stack.iter().position(|&k| k == j).unwrap_or(0);
                    let mut units: Vec<String> =
                        stack[start..].iter().map(|&k| self.nodes[k].path.clone()).collect();
                    units.push(self.nodes[j].path.clone());
                    return Err(SnapbookError::CircularOrMissingDependency { units });
                }
            }
        }
        stack.pop();
        marks[i] = Mark::Done;
        Ok(())
    }

    /// Depth-first order in which every unit follows its selected dependencies.
    pub fn linear_order(&self) -> Result<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        for i in 0..self.nodes.len() {
            self.visit(i, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    fn visit(&self, i: usize, marks: &mut [Mark], order: &mut Vec<String>) -> Result<()> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(SnapbookError::CircularOrMissingDependency {
                    units: vec![self.nodes[i].path.clone()],
                })
            }
            Mark::Unvisited => {}
        }
        marks[i] = Mark::InProgress;
        for dep in &self.nodes[i].deps {
            if let Some(&j) = self.index.get(dep) {
                self.visit(j, marks, order)?;
            }
        }
        marks[i] = Mark::Done;
        order.push(self.nodes[i].path.clone());
        Ok(())
    }

    /// Units that may start now, in registration order.
    ///
    /// A unit is ready when it has not completed, is not in flight, and each
    /// dependency has completed or lies outside the selection.
    pub fn ready_set(&self, completed: &HashSet<String>, in_flight: &HashSet<String>) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| !completed.contains(&n.path) && !in_flight.contains(&n.path))
            .filter(|n| {
                n.deps
                    .iter()
                    .all(|d| completed.contains(d) || !self.index.contains_key(d))
            })
            .map(|n| n.path.clone())
            .collect()
    }

    /// Detects a stalled parallel run: work remains, nothing runs, nothing is ready.
    pub fn check_progress(&self, completed: &HashSet<String>, in_flight: &HashSet<String>) -> Result<()> {
        if !in_flight.is_empty() || completed.len() >= self.nodes.len() {
            return Ok(());
        }
        if self.ready_set(completed, in_flight).is_empty() {
            let units = self
                .nodes
                .iter()
                .filter(|n| !completed.contains(&n.path))
                .map(|n| n.path.clone())
                .collect();
            return Err(SnapbookError::CircularOrMissingDependency { units });
        }
        Ok(())
    }
}
