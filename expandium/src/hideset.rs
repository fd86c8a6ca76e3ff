use std::rc::Rc;

/// The set of macro names whose expansion is currently blocked.
///
/// A persistent singly-linked list: `insert` and `union` build new spines
/// that share their tails with the originals, so nested rescans can carry
/// independent sets without copying. Membership and union are O(size),
/// which is all the expansion engine requires — the sets are bounded by
/// the macro nesting depth, not by the macro table.
#[derive(Clone, Debug, Default)]
pub(crate) struct HideSet(Option<Rc<Node>>);

#[derive(Debug)]
struct Node {
    name: String,
    rest: Option<Rc<Node>>,
}

impl HideSet {
    pub(crate) fn new() -> Self {
        HideSet(None)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        let mut cur = self.0.as_ref();
        while let Some(node) = cur {
            if node.name == name {
                return true;
            }
            cur = node.rest.as_ref();
        }
        false
    }

    /// A new set with `name` added; the receiver is untouched.
    pub(crate) fn insert(&self, name: &str) -> Self {
        if self.contains(name) {
            return self.clone();
        }
        HideSet(Some(Rc::new(Node {
            name: name.to_string(),
            rest: self.0.clone(),
        })))
    }

    /// The union of two sets, sharing structure with `self`.
    pub(crate) fn union(&self, other: &HideSet) -> Self {
        let mut merged = self.clone();
        let mut cur = other.0.as_ref();
        while let Some(node) = cur {
            merged = merged.insert(&node.name);
            cur = node.rest.as_ref();
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_contains() {
        let empty = HideSet::new();
        let a = empty.insert("A");
        let ab = a.insert("B");
        assert!(!empty.contains("A"));
        assert!(a.contains("A") && !a.contains("B"));
        assert!(ab.contains("A") && ab.contains("B"));
    }

    #[test]
    fn union_shares_members() {
        let a = HideSet::new().insert("A");
        let b = HideSet::new().insert("B").insert("C");
        let u = a.union(&b);
        assert!(u.contains("A") && u.contains("B") && u.contains("C"));
        // operands are unchanged
        assert!(!a.contains("B"));
        assert!(!b.contains("A"));
    }

    #[test]
    fn duplicate_insert_is_a_noop() {
        let a = HideSet::new().insert("A");
        let again = a.insert("A");
        assert!(again.contains("A"));
    }
}
