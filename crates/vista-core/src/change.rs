#![forbid(unsafe_code)]

//! Structural change events flowing through a decorator chain.
//!
//! Every event carries indices expressed in the coordinate space of the
//! sequence it describes, as that sequence looks at the moment the event is
//! raised. For [`CollectionChange::Moved`], `new_index` is the position the
//! item occupies once the move is complete.

use std::fmt;

use crate::error::{PipelineError, Result};

/// Element bound for items flowing through a pipeline.
pub trait Item: Clone + PartialEq + fmt::Debug + 'static {}

impl<T: Clone + PartialEq + fmt::Debug + 'static> Item for T {}

/// Extra payload attached to an item-changed notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChangeArgs {
    /// Name of the property that changed, if known.
    pub property: Option<String>,
}

impl ChangeArgs {
    /// Args naming no particular property.
    #[must_use]
    pub const fn none() -> Self {
        Self { property: None }
    }

    /// Args naming the changed property.
    #[must_use]
    pub fn property(name: impl Into<String>) -> Self {
        Self {
            property: Some(name.into()),
        }
    }
}

/// Discriminant of a [`CollectionChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Replaced,
    Moved,
    Removed,
    Changed,
    Reset,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Added => "added",
            Self::Replaced => "replaced",
            Self::Moved => "moved",
            Self::Removed => "removed",
            Self::Changed => "changed",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// One structural change to an observable sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange<T> {
    Added {
        item: T,
        index: usize,
    },
    Replaced {
        old_item: T,
        new_item: T,
        index: usize,
    },
    Moved {
        item: T,
        old_index: usize,
        new_index: usize,
    },
    Removed {
        item: T,
        index: usize,
    },
    /// A property of the item at `index` changed; the sequence shape did not.
    Changed {
        item: T,
        index: usize,
        args: ChangeArgs,
    },
    /// The whole sequence was replaced by `items`.
    Reset {
        items: Vec<T>,
    },
}

impl<T> CollectionChange<T> {
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Added { .. } => ChangeKind::Added,
            Self::Replaced { .. } => ChangeKind::Replaced,
            Self::Moved { .. } => ChangeKind::Moved,
            Self::Removed { .. } => ChangeKind::Removed,
            Self::Changed { .. } => ChangeKind::Changed,
            Self::Reset { .. } => ChangeKind::Reset,
        }
    }

    /// Whether the event alters which items are present or where.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        !matches!(self, Self::Changed { .. })
    }
}

impl<T: Clone> CollectionChange<T> {
    /// Apply this change to a mirror of the sequence it describes.
    ///
    /// This is the synchronizer contract: a `Vec` that starts equal to the
    /// observed sequence and receives every change in order stays equal.
    pub fn apply_to(&self, target: &mut Vec<T>) -> Result<()> {
        let len = target.len();
        match self {
            Self::Added { item, index } => {
                check(*index, len + 1)?;
                target.insert(*index, item.clone());
            }
            Self::Replaced {
                new_item, index, ..
            } => {
                check(*index, len)?;
                target[*index] = new_item.clone();
            }
            Self::Moved {
                old_index,
                new_index,
                ..
            } => {
                check(*old_index, len)?;
                check(*new_index, len)?;
                let item = target.remove(*old_index);
                target.insert(*new_index, item);
            }
            Self::Removed { index, .. } => {
                check(*index, len)?;
                target.remove(*index);
            }
            Self::Changed { index, .. } => check(*index, len)?,
            Self::Reset { items } => {
                target.clear();
                target.extend(items.iter().cloned());
            }
        }
        Ok(())
    }
}

fn check(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(PipelineError::IndexOutOfRange { index, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_sequence_mirrors_source() {
        let mut mirror = vec![1, 2, 3];
        let changes = [
            CollectionChange::Added { item: 9, index: 1 },
            CollectionChange::Moved {
                item: 3,
                old_index: 3,
                new_index: 0,
            },
            CollectionChange::Replaced {
                old_item: 9,
                new_item: 7,
                index: 2,
            },
            CollectionChange::Removed { item: 2, index: 3 },
        ];
        for change in &changes {
            change.apply_to(&mut mirror).unwrap();
        }
        assert_eq!(mirror, vec![3, 1, 7]);
    }

    #[test]
    fn apply_rejects_out_of_range() {
        let mut mirror = vec![1];
        let err = CollectionChange::Removed { item: 1, index: 4 }
            .apply_to(&mut mirror)
            .unwrap_err();
        assert_eq!(err, PipelineError::IndexOutOfRange { index: 4, len: 1 });
    }

    #[test]
    fn changed_is_not_structural() {
        let change = CollectionChange::Changed {
            item: 'a',
            index: 0,
            args: ChangeArgs::property("name"),
        };
        assert!(!change.is_structural());
        assert_eq!(change.kind().to_string(), "changed");
    }
}
