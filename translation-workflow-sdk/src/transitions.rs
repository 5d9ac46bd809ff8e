//! Per-task-type phase transition tables.
//!
//! Each task type owns an explicit set of legal `(from, to)` edges. The
//! status tool and the streaming validator both check edges against the
//! same [`TransitionTables`] value, usually [`standard_tables`].
//!
//! Legal edges:
//! - `translation`: absent → planning, planning → working, working → review,
//!   review → end, review → working
//! - `polish` / `proofreading` / `chapter_summary`: absent → planning,
//!   planning → working, working → end
//!
//! `end` is terminal in every table.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use thiserror::Error;

use crate::types::{Phase, PhaseDisplay, TaskType};

/// A directed edge; `None` as origin is the pre-creation state.
pub type Edge = (Option<Phase>, Phase);

/// Structural problems with a table definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("table for {task_type} must contain exactly one entry edge absent → planning (found {found})")]
    EntryEdge { task_type: TaskType, found: String },

    #[error("table for {task_type} has an edge leaving end: end → {to}")]
    EdgeFromEnd { task_type: TaskType, to: Phase },
}

/// Legal edges for one task type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    task_type: TaskType,
    edges: BTreeSet<Edge>,
}

impl TransitionTable {
    /// Build a table, rejecting definitions that break the entry/terminal invariants.
    pub fn new<I>(task_type: TaskType, edges: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = Edge>,
    {
        let table = Self {
            task_type,
            edges: edges.into_iter().collect(),
        };
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> Result<(), TableError> {
        let entry_edges: Vec<&Edge> = self.edges.iter().filter(|(from, _)| from.is_none()).collect();
        if entry_edges.len() != 1 || entry_edges[0].1 != Phase::Planning {
            let found = entry_edges
                .iter()
                .map(|(from, to)| format!("{} → {}", PhaseDisplay(*from), to))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(TableError::EntryEdge {
                task_type: self.task_type,
                found: if found.is_empty() { "none".to_string() } else { found },
            });
        }

        if let Some((_, to)) = self.edges.iter().find(|(from, _)| *from == Some(Phase::End)) {
            return Err(TableError::EdgeFromEnd {
                task_type: self.task_type,
                to: *to,
            });
        }

        Ok(())
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn allows(&self, from: Option<Phase>, to: Phase) -> bool {
        self.edges.contains(&(from, to))
    }

    /// Phases reachable in one step from `from`, in phase order.
    pub fn targets_from(&self, from: Option<Phase>) -> Vec<Phase> {
        self.edges
            .iter()
            .filter(|(origin, _)| *origin == from)
            .map(|(_, to)| *to)
            .collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }
}

/// The full table set, keyed by task type.
#[derive(Debug, Clone, Default)]
pub struct TransitionTables {
    tables: HashMap<TaskType, TransitionTable>,
}

impl TransitionTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TransitionTable) -> Self {
        self.tables.insert(table.task_type(), table);
        self
    }

    /// Tables for every built-in task type.
    pub fn standard() -> Self {
        use Phase::{End, Planning, Review, Working};

        let translation = [
            (None, Planning),
            (Some(Planning), Working),
            (Some(Working), Review),
            (Some(Review), End),
            (Some(Review), Working),
        ];
        let single_pass = [(None, Planning), (Some(Planning), Working), (Some(Working), End)];

        let mut tables = Self::new();
        for task_type in TaskType::ALL {
            let edges: &[Edge] = match task_type {
                TaskType::Translation => &translation,
                TaskType::Polish | TaskType::Proofreading | TaskType::ChapterSummary => &single_pass,
            };
            // The literal edge lists above always satisfy the table invariants.
            if let Ok(table) = TransitionTable::new(task_type, edges.iter().copied()) {
                tables = tables.with_table(table);
            }
        }
        tables
    }

    pub fn table(&self, task_type: TaskType) -> Option<&TransitionTable> {
        self.tables.get(&task_type)
    }

    /// Resolve a raw task type string to its table.
    pub fn table_for(&self, task_type: &str) -> Option<&TransitionTable> {
        TaskType::parse(task_type).and_then(|kind| self.table(kind))
    }

    pub fn is_allowed(&self, task_type: TaskType, from: Option<Phase>, to: Phase) -> bool {
        self.table(task_type)
            .map(|table| table.allows(from, to))
            .unwrap_or(false)
    }

    /// Comma separated names of every task type with a table, sorted.
    pub fn known_types(&self) -> String {
        let mut names: Vec<&str> = self.tables.keys().map(|kind| kind.as_str()).collect();
        names.sort_unstable();
        names.join(", ")
    }
}

/// Process-wide tables shared by every validation path.
pub fn standard_tables() -> &'static TransitionTables {
    static TABLES: OnceLock<TransitionTables> = OnceLock::new();
    TABLES.get_or_init(TransitionTables::standard)
}
