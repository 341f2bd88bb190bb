//! Why a computation did not succeed.
//!
//! A [`Cause`] is a tree. Leaves are typed failures, defects and
//! interruptions; `Then` records failures that happened one after another
//! (a finalizer failing after the body failed) and `Both` records failures
//! that happened concurrently (two children of a race). Nothing is ever
//! dropped: combining causes only grows the tree.
//!
//! Equality is semantic. `Then` and `Both` are associative with `Empty` as
//! identity, and `Both` is compared as a multiset, so
//! `a.then(b).then(c) == a.then(b.then(c))` holds for any `a`, `b`, `c`.

use super::id::FiberId;
use core::fmt;
use std::any::Any;
use std::collections::BTreeSet;

/// Payload of an unexpected failure (a panic or a type mismatch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefectPayload {
    message: String,
}

impl DefectPayload {
    /// Creates a payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a message from a caught panic.
    #[must_use]
    pub fn from_panic(panic: &(dyn Any + Send)) -> Self {
        let message = panic
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }

    /// The defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DefectPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message)
    }
}

/// Structured record of why a computation ended without a value.
#[derive(Debug, Clone)]
pub enum Cause<E> {
    /// No failure. Identity for [`then`](Cause::then) and [`both`](Cause::both).
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected failure.
    Defect(DefectPayload),
    /// Interruption requested by the given fiber.
    Interrupt(FiberId),
    /// Left happened, then right happened.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Left and right happened concurrently.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<E> Cause<E> {
    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect with the given message.
    #[must_use]
    pub fn defect(message: impl Into<String>) -> Self {
        Self::Defect(DefectPayload::new(message))
    }

    /// An interruption attributed to `by`.
    #[must_use]
    pub const fn interrupt(by: FiberId) -> Self {
        Self::Interrupt(by)
    }

    /// Sequential composition. `Empty` operands are dropped.
    #[must_use]
    pub fn then(self, next: Self) -> Self {
        match (self.is_empty(), next.is_empty()) {
            (true, _) => next,
            (_, true) => self,
            _ => Self::Then(Box::new(self), Box::new(next)),
        }
    }

    /// Parallel composition. `Empty` operands are dropped.
    #[must_use]
    pub fn both(self, other: Self) -> Self {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other,
            (_, true) => self,
            _ => Self::Both(Box::new(self), Box::new(other)),
        }
    }

    /// True when the tree has no leaves other than `Empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves().next().is_none()
    }

    /// Every typed failure, left to right.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Fail(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// The leftmost typed failure, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&E> {
        self.leaves().find_map(|leaf| match leaf {
            Self::Fail(e) => Some(e),
            _ => None,
        })
    }

    /// Every defect, left to right.
    #[must_use]
    pub fn defects(&self) -> Vec<&DefectPayload> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Defect(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// True if any leaf is a defect.
    #[must_use]
    pub fn contains_defect(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Defect(_)))
    }

    /// The fibers that requested interruption.
    #[must_use]
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Interrupt(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// True if any leaf is an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Interrupt(_)))
    }

    /// True if the cause is non-empty and every leaf is an interruption.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        let mut any = false;
        for leaf in self.leaves() {
            if !matches!(leaf, Self::Interrupt(_)) {
                return false;
            }
            any = true;
        }
        any
    }

    /// Maps every typed failure, preserving the tree shape.
    #[must_use]
    pub fn map<F, E2>(self, f: F) -> Cause<E2>
    where
        F: Fn(E) -> E2,
    {
        self.map_ref(&f)
    }

    fn map_ref<F, E2>(self, f: &F) -> Cause<E2>
    where
        F: Fn(E) -> E2,
    {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Defect(d) => Cause::Defect(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(l, r) => Cause::Then(Box::new(l.map_ref(f)), Box::new(r.map_ref(f))),
            Self::Both(l, r) => Cause::Both(Box::new(l.map_ref(f)), Box::new(r.map_ref(f))),
        }
    }

    /// Non-empty leaves in left-to-right order.
    fn leaves(&self) -> Leaves<'_, E> {
        Leaves { stack: vec![self] }
    }

    fn shape(&self) -> Shape<'_, E> {
        match self {
            Self::Empty => Shape::Empty,
            Self::Fail(_) | Self::Defect(_) | Self::Interrupt(_) => Shape::Leaf(self),
            Self::Then(..) => {
                let mut parts = Vec::new();
                self.flatten(&mut parts, |c| matches!(c, Self::Then(..)));
                Shape::collect(parts, Shape::Seq)
            }
            Self::Both(..) => {
                let mut parts = Vec::new();
                self.flatten(&mut parts, |c| matches!(c, Self::Both(..)));
                Shape::collect(parts, Shape::Par)
            }
        }
    }

    fn flatten<'a>(&'a self, out: &mut Vec<Shape<'a, E>>, same: fn(&Self) -> bool) {
        match self {
            Self::Then(l, r) | Self::Both(l, r) if same(self) => {
                l.flatten(out, same);
                r.flatten(out, same);
            }
            other => match other.shape() {
                Shape::Empty => {}
                shape => out.push(shape),
            },
        }
    }
}

struct Leaves<'a, E> {
    stack: Vec<&'a Cause<E>>,
}

impl<'a, E> Iterator for Leaves<'a, E> {
    type Item = &'a Cause<E>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                Cause::Empty => {}
                Cause::Then(l, r) | Cause::Both(l, r) => {
                    self.stack.push(r);
                    self.stack.push(l);
                }
                leaf => return Some(leaf),
            }
        }
        None
    }
}

/// Canonical form used for equality: `Empty` removed, nested sequences and
/// nested parallel groups flattened, singletons unwrapped.
enum Shape<'a, E> {
    Empty,
    Leaf(&'a Cause<E>),
    Seq(Vec<Shape<'a, E>>),
    Par(Vec<Shape<'a, E>>),
}

impl<'a, E> Shape<'a, E> {
    fn collect(mut parts: Vec<Self>, group: fn(Vec<Self>) -> Self) -> Self {
        match parts.len() {
            0 => Self::Empty,
            1 => parts.pop().unwrap_or(Self::Empty),
            _ => group(parts),
        }
    }
}

impl<E: PartialEq> PartialEq for Shape<'_, E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Leaf(a), Self::Leaf(b)) => match (a, b) {
                (Cause::Fail(x), Cause::Fail(y)) => x == y,
                (Cause::Defect(x), Cause::Defect(y)) => x == y,
                (Cause::Interrupt(x), Cause::Interrupt(y)) => x == y,
                _ => false,
            },
            (Self::Seq(a), Self::Seq(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y),
            (Self::Par(a), Self::Par(b)) => {
                if a.len() != b.len() {
                    return false;
                }
                let mut used = vec![false; b.len()];
                a.iter().all(|x| {
                    let hit = b
                        .iter()
                        .enumerate()
                        .find(|(i, y)| !used[*i] && x == *y)
                        .map(|(i, _)| i);
                    hit.map(|i| used[i] = true).is_some()
                })
            }
            _ => false,
        }
    }
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        self.shape() == other.shape()
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::Fail(e) => write!(f, "fail({e})"),
            Self::Defect(d) => write!(f, "{d}"),
            Self::Interrupt(id) => write!(f, "interrupted by {id}"),
            Self::Then(l, r) => write!(f, "({l} then {r})"),
            Self::Both(l, r) => write!(f, "({l} and {r})"),
        }
    }
}
