//! Paired-label bookkeeping for nested control constructs.
//!
//! Four independent stacks, one per [`LabelRole`]. A construct pushes its label when it
//! opens and pops that same label when it closes; constructs nest but never overlap, so
//! one stack per role is enough to pair them at any depth.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Anything that hands out globally unique labels.
pub trait LabelSource {
    fn fresh_label(&mut self) -> Label;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelRole {
    /// if/else: entry of the else branch.
    SelectionNear,
    /// if/else: construct exit.
    SelectionFar,
    /// while: loop test re-entry.
    IterationNear,
    /// while: loop exit.
    IterationFar,
}

impl fmt::Display for LabelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LabelRole::SelectionNear => "selection-near",
            LabelRole::SelectionFar => "selection-far",
            LabelRole::IterationNear => "iteration-near",
            LabelRole::IterationFar => "iteration-far",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("pop from empty {0} label stack")]
pub struct LabelUnderflow(pub LabelRole);

#[derive(Debug, Default)]
pub struct LabelStacks {
    selection_near: Vec<Label>,
    selection_far: Vec<Label>,
    iteration_near: Vec<Label>,
    iteration_far: Vec<Label>,
}

impl LabelStacks {
    fn stack(&mut self, role: LabelRole) -> &mut Vec<Label> {
        match role {
            LabelRole::SelectionNear => &mut self.selection_near,
            LabelRole::SelectionFar => &mut self.selection_far,
            LabelRole::IterationNear => &mut self.iteration_near,
            LabelRole::IterationFar => &mut self.iteration_far,
        }
    }

    pub fn push_new_label<S: LabelSource + ?Sized>(&mut self, role: LabelRole, src: &mut S) -> Label {
        let l = src.fresh_label();
        self.stack(role).push(l);
        l
    }

    pub fn pop_label(&mut self, role: LabelRole) -> Result<Label, LabelUnderflow> {
        self.stack(role).pop().ok_or(LabelUnderflow(role))
    }

    pub fn is_balanced(&self) -> bool {
        self.selection_near.is_empty()
            && self.selection_far.is_empty()
            && self.iteration_near.is_empty()
            && self.iteration_far.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter(u32);

    impl LabelSource for Counter {
        fn fresh_label(&mut self) -> Label {
            self.0 += 1;
            Label(self.0)
        }
    }

    #[test]
    fn roles_are_independent() {
        let mut src = Counter::default();
        let mut st = LabelStacks::default();
        let a = st.push_new_label(LabelRole::SelectionNear, &mut src);
        let b = st.push_new_label(LabelRole::IterationNear, &mut src);
        assert_ne!(a, b);
        assert_eq!(st.pop_label(LabelRole::SelectionNear).unwrap(), a);
        assert_eq!(st.pop_label(LabelRole::IterationNear).unwrap(), b);
        assert!(st.is_balanced());
    }

    #[test]
    fn deep_nesting_pairs_lifo() {
        let mut src = Counter::default();
        let mut st = LabelStacks::default();
        let mut opened = vec![];
        for _ in 0..64 {
            opened.push(st.push_new_label(LabelRole::IterationFar, &mut src));
        }
        while let Some(expect) = opened.pop() {
            assert_eq!(st.pop_label(LabelRole::IterationFar).unwrap(), expect);
        }
        assert!(st.is_balanced());
        assert!(st.pop_label(LabelRole::IterationFar).is_err());
    }
}
