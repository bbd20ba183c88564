//! Two-level task graph: marks ordered by their dependencies, each mark
//! expanded into a Query -> Layout -> Render -> Persist chain.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::mark::MarkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Query,
    Layout,
    Render,
    Persist,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Query, Stage::Layout, Stage::Render, Stage::Persist];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Layout => "layout",
            Self::Render => "render",
            Self::Persist => "persist",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub mark: MarkId,
    pub stage: Stage,
}

impl TaskId {
    pub fn new(mark: MarkId, stage: Stage) -> Self {
        Self { mark, stage }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mark, self.stage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Complete,
    Failed,
}

/// Runs the body of one task.
#[async_trait]
pub trait TaskRunner: Send {
    async fn run_task(&mut self, task: TaskId) -> Result<()>;
}

/// Kahn's algorithm over `nodes`; the ready set is ordered by `key`.
/// Returns the nodes left unordered on failure.
pub(crate) fn kahn<N, K, F>(
    nodes: &[N],
    edges: &BTreeSet<(N, N)>,
    key: F,
) -> std::result::Result<Vec<N>, Vec<N>>
where
    N: Copy + Ord,
    K: Ord,
    F: Fn(N) -> K,
{
    let mut in_degree: BTreeMap<N, usize> = nodes.iter().map(|&n| (n, 0)).collect();
    let mut out: BTreeMap<N, Vec<N>> = BTreeMap::new();
    for &(from, to) in edges {
        if let Some(deg) = in_degree.get_mut(&to) {
            *deg += 1;
        }
        out.entry(from).or_default().push(to);
    }

    let mut ready: BTreeSet<(K, N)> = in_degree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(&n, _)| (key(n), n))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some((_, node)) = ready.pop_first() {
        order.push(node);
        for &next in out.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(deg) = in_degree.get_mut(&next) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert((key(next), next));
                }
            }
        }
    }

    if order.len() == nodes.len() {
        Ok(order)
    } else {
        let done: BTreeSet<N> = order.into_iter().collect();
        Err(nodes.iter().copied().filter(|n| !done.contains(n)).collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    marks: BTreeSet<MarkId>,
    /// `(src, dest)`: dest reads src's persisted mark table.
    dependencies: BTreeSet<(MarkId, MarkId)>,
    states: BTreeMap<TaskId, TaskState>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mark(&mut self, mark: MarkId) {
        if self.marks.insert(mark) {
            for stage in Stage::ALL {
                self.states.insert(TaskId::new(mark, stage), TaskState::Pending);
            }
        }
    }

    pub fn add_dependency(&mut self, src: MarkId, dest: MarkId) {
        self.add_mark(src);
        self.add_mark(dest);
        self.dependencies.insert((src, dest));
    }

    pub fn contains(&self, mark: MarkId) -> bool {
        self.marks.contains(&mark)
    }

    pub fn dependencies(&self) -> impl Iterator<Item = (MarkId, MarkId)> + '_ {
        self.dependencies.iter().copied()
    }

    pub fn state(&self, task: TaskId) -> Option<TaskState> {
        self.states.get(&task).copied()
    }

    pub fn mark_order(&self) -> Result<Vec<MarkId>> {
        let marks: Vec<MarkId> = self.marks.iter().copied().collect();
        kahn(&marks, &self.dependencies, |m| m).map_err(|marks| Error::Cycle { marks })
    }

    /// Every task in execution order.
    pub fn task_order(&self) -> Result<Vec<TaskId>> {
        let marks = self.mark_order()?;
        let position: BTreeMap<MarkId, usize> =
            marks.iter().enumerate().map(|(i, &m)| (m, i)).collect();

        let tasks: Vec<TaskId> = marks
            .iter()
            .flat_map(|&m| Stage::ALL.map(|s| TaskId::new(m, s)))
            .collect();
        let mut edges = BTreeSet::new();
        for &m in &marks {
            for pair in Stage::ALL.windows(2) {
                edges.insert((TaskId::new(m, pair[0]), TaskId::new(m, pair[1])));
            }
        }
        for &(src, dest) in &self.dependencies {
            edges.insert((TaskId::new(src, Stage::Persist), TaskId::new(dest, Stage::Query)));
        }

        kahn(&tasks, &edges, |t| (position.get(&t.mark).copied(), t.stage)).map_err(|left| {
            let marks: BTreeSet<MarkId> = left.iter().map(|t| t.mark).collect();
            Error::Cycle {
                marks: marks.into_iter().collect(),
            }
        })
    }

    /// Run every task in order. Stops at the first failure, leaving that
    /// task `Failed` and the rest `Pending`.
    pub async fn execute<R>(&mut self, runner: &mut R) -> Result<()>
    where
        R: TaskRunner + ?Sized,
    {
        let order = self.task_order()?;
        for state in self.states.values_mut() {
            *state = TaskState::Pending;
        }

        log::info!("executing {} tasks over {} marks", order.len(), self.marks.len());
        for task in order {
            self.states.insert(task, TaskState::Running);
            log::debug!("task {} running", task);
            match runner.run_task(task).await {
                Ok(()) => {
                    self.states.insert(task, TaskState::Complete);
                    log::debug!("task {} complete", task);
                }
                Err(source) => {
                    self.states.insert(task, TaskState::Failed);
                    log::debug!("task {} failed: {}", task, source);
                    return Err(Error::TaskFailure {
                        task,
                        source: Box::new(source),
                    });
                }
            }
        }
        Ok(())
    }
}
