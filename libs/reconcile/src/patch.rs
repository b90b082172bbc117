//! Change-sets computed by resources.

use std::fmt;

/// Which change a patch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    None,
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    /// The tie-break every resource follows.
    ///
    /// - current absent, desired present: create (never update, even if a
    ///   partial current also differs)
    /// - current present, desired absent: delete
    /// - both present and unequal: update
    /// - otherwise: nothing
    pub fn decide(current_absent: bool, desired_absent: bool, equal: bool) -> Self {
        match (current_absent, desired_absent) {
            (true, true) => ChangeKind::None,
            (true, false) => ChangeKind::Create,
            (false, true) => ChangeKind::Delete,
            (false, false) if equal => ChangeKind::None,
            (false, false) => ChangeKind::Update,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::None => "none",
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single change one resource applies in one pass.
///
/// An enum rather than three optional fields: a concern never needs creation
/// and deletion at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<C, U = C, D = C> {
    Empty,
    Create(C),
    Update(U),
    Delete(D),
}

impl<C, U, D> Patch<C, U, D> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Patch::Empty => ChangeKind::None,
            Patch::Create(_) => ChangeKind::Create,
            Patch::Update(_) => ChangeKind::Update,
            Patch::Delete(_) => ChangeKind::Delete,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Patch::Empty)
    }
}

impl<C, U, D> Default for Patch<C, U, D> {
    fn default() -> Self {
        Patch::Empty
    }
}

/// A state snapshot that diffs as a whole.
pub trait Snapshot: Clone {
    /// Nothing exists (current) or nothing should exist (desired).
    fn is_absent(&self) -> bool;

    /// Kind-specific equality, ignoring provider-populated fields.
    fn same_as(&self, other: &Self) -> bool;
}

impl<S: Snapshot> Patch<S, S, S> {
    /// Diff two snapshots: create and update carry the desired snapshot,
    /// delete carries the current one.
    pub fn diff(current: &S, desired: &S) -> Self {
        let equal = current.same_as(desired);
        match ChangeKind::decide(current.is_absent(), desired.is_absent(), equal) {
            ChangeKind::None => Patch::Empty,
            ChangeKind::Create => Patch::Create(desired.clone()),
            ChangeKind::Update => Patch::Update(desired.clone()),
            ChangeKind::Delete => Patch::Delete(current.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[derive(Debug, Clone, PartialEq)]
    struct Named(Option<(String, u32)>);

    impl Snapshot for Named {
        fn is_absent(&self) -> bool {
            self.0.is_none()
        }

        fn same_as(&self, other: &Self) -> bool {
            self == other
        }
    }

    fn named(name: &str, version: u32) -> Named {
        Named(Some((name.to_string(), version)))
    }

    #[rstest]
    #[case::both_absent(true, true, false, ChangeKind::None)]
    #[case::create(true, false, false, ChangeKind::Create)]
    #[case::create_wins_over_update(true, false, true, ChangeKind::Create)]
    #[case::delete(false, true, false, ChangeKind::Delete)]
    #[case::update(false, false, false, ChangeKind::Update)]
    #[case::equal(false, false, true, ChangeKind::None)]
    fn test_decide(
        #[case] current_absent: bool,
        #[case] desired_absent: bool,
        #[case] equal: bool,
        #[case] expected: ChangeKind,
    ) {
        assert_eq!(
            ChangeKind::decide(current_absent, desired_absent, equal),
            expected
        );
    }

    #[test]
    fn test_diff_payloads() {
        let current = named("demo-main", 1);
        let desired = named("demo-main", 2);

        assert_eq!(
            Patch::diff(&Named(None), &desired),
            Patch::Create(desired.clone())
        );
        assert_eq!(
            Patch::diff(&current, &desired),
            Patch::Update(desired.clone())
        );
        assert_eq!(
            Patch::diff(&current, &Named(None)),
            Patch::Delete(current.clone())
        );
        assert!(Patch::diff(&current, &current.clone()).is_empty());
    }

    fn snapshot() -> impl Strategy<Value = Named> {
        prop_oneof![
            Just(Named(None)),
            ("[a-c]", 0u32..3).prop_map(|(n, v)| named(&n, v)),
        ]
    }

    proptest! {
        #[test]
        fn prop_tie_break(current in snapshot(), desired in snapshot()) {
            let patch = Patch::diff(&current, &desired);
            let expected = if current.is_absent() && desired.is_absent() {
                ChangeKind::None
            } else if current.is_absent() {
                ChangeKind::Create
            } else if desired.is_absent() {
                ChangeKind::Delete
            } else if current == desired {
                ChangeKind::None
            } else {
                ChangeKind::Update
            };
            prop_assert_eq!(patch.kind(), expected);
        }
    }
}
