//! Changes deferred while updates are suspended.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::schema::Schema;
use crate::value::Record;

/// One bulk request's worth of changes: a doc type on a connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub connection: String,
    pub doc_type: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection, self.doc_type)
    }
}

#[derive(Clone)]
pub enum PendingOp {
    /// Index `record`. With `refetch` the record was deleted earlier in the
    /// same scope and its current state is read from the store at flush time.
    Upsert {
        record: Arc<dyn Record>,
        refetch: bool,
    },
    Delete,
}

impl PendingOp {
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl fmt::Debug for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upsert { refetch, .. } => write!(f, "Upsert {{ refetch: {} }}", refetch),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

#[derive(Clone)]
pub struct PendingChange {
    pub schema: Arc<Schema>,
    pub pk: String,
    pub op: PendingOp,
}

impl fmt::Debug for PendingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingChange")
            .field("doc_type", &self.schema.doc_type())
            .field("pk", &self.pk)
            .field("op", &self.op)
            .finish()
    }
}

#[derive(Default)]
struct Group {
    changes: Vec<PendingChange>,
    by_pk: HashMap<String, usize>,
}

/// Pending changes grouped per (connection, doc type) and reduced per
/// primary key: the last operation wins.
#[derive(Default)]
pub struct ChangeQueue {
    groups: BTreeMap<GroupKey, Group>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, schema: Arc<Schema>, pk: String, op: PendingOp) {
        let key = GroupKey {
            connection: schema.using().to_string(),
            doc_type: schema.doc_type().to_string(),
        };
        let group = self.groups.entry(key).or_default();
        match group.by_pk.get(&pk) {
            Some(&slot) => {
                let existing = &mut group.changes[slot];
                existing.op = match (&existing.op, op) {
                    (_, PendingOp::Delete) => PendingOp::Delete,
                    (PendingOp::Delete, PendingOp::Upsert { record, .. }) => PendingOp::Upsert {
                        record,
                        refetch: true,
                    },
                    (PendingOp::Upsert { refetch, .. }, PendingOp::Upsert { record, .. }) => {
                        PendingOp::Upsert {
                            record,
                            refetch: *refetch,
                        }
                    }
                };
            }
            None => {
                group.by_pk.insert(pk.clone(), group.changes.len());
                group.changes.push(PendingChange { schema, pk, op });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(|g| g.changes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(|g| g.changes.is_empty())
    }

    /// Take every group, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<(GroupKey, Vec<PendingChange>)> {
        std::mem::take(&mut self.groups)
            .into_iter()
            .map(|(key, group)| (key, group.changes))
            .collect()
    }
}
