//! The pipeline walk as an explicit state machine.
//!
//! A chain is a list of plugins visited through five phases. The forward
//! group (`start`, `beforeNetwork`, `network`) is scanned in increasing
//! plugin order, the backward group (`afterNetwork`, `end`) in decreasing
//! order. Everything here is pure: the engine feeds an [`Event`] for the
//! current [`Position`] into [`Position::advance`] and asks [`seek`] where the
//! next handler lives.

use std::fmt;
use std::ops::BitOr;

/// A lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// First forward phase.
    Start,
    /// Forward phase right before the network.
    BeforeNetwork,
    /// Last forward phase, where data is produced.
    Network,
    /// First backward phase.
    AfterNetwork,
    /// Last backward phase.
    End,
}

impl Phase {
    /// Forward phases in order.
    pub const FORWARD: [Self; 3] = [Self::Start, Self::BeforeNetwork, Self::Network];

    /// Backward phases in order.
    pub const BACKWARD: [Self; 2] = [Self::AfterNetwork, Self::End];

    /// Returns true for phases walked in increasing plugin order.
    #[must_use]
    pub fn is_forward(self) -> bool {
        matches!(self, Self::Start | Self::BeforeNetwork | Self::Network)
    }

    /// Returns the following phase in the same group.
    #[must_use]
    pub fn following(self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::BeforeNetwork),
            Self::BeforeNetwork => Some(Self::Network),
            Self::AfterNetwork => Some(Self::End),
            Self::Network | Self::End => None,
        }
    }

    /// Returns the handler name of the phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::BeforeNetwork => "beforeNetwork",
            Self::Network => "network",
            Self::AfterNetwork => "afterNetwork",
            Self::End => "end",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way the walk is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Enter handlers, increasing index.
    Forward,
    /// Exit handlers, decreasing index.
    Backward,
    /// Throw hooks, decreasing index.
    Error,
}

/// The handlers a plugin implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct HookSet(u8);

impl HookSet {
    /// No handlers.
    pub const NONE: Self = Self(0);
    /// `start` handler.
    pub const START: Self = Self(1);
    /// `beforeNetwork` handler.
    pub const BEFORE_NETWORK: Self = Self(1 << 1);
    /// `network` handler.
    pub const NETWORK: Self = Self(1 << 2);
    /// `afterNetwork` handler.
    pub const AFTER_NETWORK: Self = Self(1 << 3);
    /// `end` handler.
    pub const END: Self = Self(1 << 4);
    /// `throw` hook.
    pub const THROW: Self = Self(1 << 5);
    /// Every handler and the throw hook.
    pub const ALL: Self = Self(0b11_1111);

    /// Returns the flag of a phase.
    #[must_use]
    pub const fn of(phase: Phase) -> Self {
        match phase {
            Phase::Start => Self::START,
            Phase::BeforeNetwork => Self::BEFORE_NETWORK,
            Phase::Network => Self::NETWORK,
            Phase::AfterNetwork => Self::AFTER_NETWORK,
            Phase::End => Self::END,
        }
    }

    /// Returns the union of two sets.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if the plugin handles `phase`.
    #[must_use]
    pub const fn handles(self, phase: Phase) -> bool {
        self.contains(Self::of(phase))
    }

    /// Returns true if the plugin has a throw hook.
    #[must_use]
    pub const fn catches(self) -> bool {
        self.contains(Self::THROW)
    }
}

impl BitOr for HookSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

/// The hook sets of every plugin of a chain, in chain order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseTable {
    hooks: Vec<HookSet>,
}

impl PhaseTable {
    /// Creates a table.
    #[must_use]
    pub fn new(hooks: Vec<HookSet>) -> Self {
        Self { hooks }
    }

    /// Returns the number of plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn handles(&self, index: usize, phase: Phase) -> bool {
        self.hooks.get(index).is_some_and(|h| h.handles(phase))
    }

    fn catches(&self, index: usize) -> bool {
        self.hooks.get(index).is_some_and(|h| h.catches())
    }
}

/// Where a handler is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// Current phase. For throw hooks, the phase that failed.
    pub phase: Phase,
    /// Walk direction.
    pub direction: Direction,
    /// Plugin index.
    pub index: usize,
}

impl Position {
    /// Creates a position.
    #[must_use]
    pub fn new(phase: Phase, direction: Direction, index: usize) -> Self {
        Self {
            phase,
            direction,
            index,
        }
    }

    /// Computes where scanning resumes after a handler at this position
    /// signals `event`.
    ///
    /// A forward `resolve` flips to the first backward phase, starting one
    /// plugin before the resolver. A throw hook's `next` retries forward
    /// right after the catcher, in the failing phase when it was a forward
    /// phase and in `network` otherwise. A throw hook's `resolve` resumes
    /// backward from the plugin after the catcher.
    #[must_use]
    pub fn advance(self, event: Event, len: usize) -> Cursor {
        match (self.direction, event) {
            (Direction::Forward, Event::Next | Event::ThrowNext) => Cursor::Forward {
                phase: self.phase,
                from: self.index + 1,
            },
            (Direction::Forward, Event::Resolve | Event::ThrowResolve) => Cursor::Backward {
                phase: Phase::AfterNetwork,
                until: self.index,
            },
            (Direction::Backward, _) => Cursor::Backward {
                phase: self.phase,
                until: self.index,
            },
            (Direction::Error, Event::Next | Event::ThrowNext) => Cursor::Forward {
                phase: if self.phase.is_forward() {
                    self.phase
                } else {
                    Phase::Network
                },
                from: self.index + 1,
            },
            (Direction::Error, Event::Resolve | Event::ThrowResolve) => Cursor::Backward {
                phase: Phase::AfterNetwork,
                until: (self.index + 2).min(len),
            },
        }
    }

    /// Returns the cursor of the error walk for a failure at this position.
    ///
    /// The failing plugin's own throw hook is considered first.
    #[must_use]
    pub fn fail(self) -> Cursor {
        Cursor::Error {
            phase: self.phase,
            until: self.index + 1,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.phase, self.index)
    }
}

/// A signal from a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Continue forward.
    Next,
    /// Hand a value backward.
    Resolve,
    /// Retry forward from a throw hook.
    ThrowNext,
    /// Recover with a value from a throw hook.
    ThrowResolve,
}

/// Where to start looking for the next handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cursor {
    /// Scan `phase` upward from `from`, then the later forward phases from 0.
    Forward {
        /// Phase to scan first.
        phase: Phase,
        /// First index to consider.
        from: usize,
    },
    /// Scan `phase` downward below `until`, then the later backward phases
    /// from the end of the chain.
    Backward {
        /// Phase to scan first.
        phase: Phase,
        /// Exclusive upper bound.
        until: usize,
    },
    /// Scan throw hooks downward below `until`.
    Error {
        /// Phase that failed.
        phase: Phase,
        /// Exclusive upper bound.
        until: usize,
    },
}

impl Cursor {
    /// Cursor of a fresh `send()`.
    #[must_use]
    pub fn start() -> Self {
        Self::Forward {
            phase: Phase::Start,
            from: 0,
        }
    }

    /// Cursor that enters the backward walk at the end of the chain.
    #[must_use]
    pub fn backward_from_end(len: usize) -> Self {
        Self::Backward {
            phase: Phase::AfterNetwork,
            until: len,
        }
    }
}

/// Outcome of [`seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Invoke the handler at this position.
    Invoke(Position),
    /// Every forward phase ran out without a resolve.
    Exhausted,
    /// Every backward phase ran out: the chain is complete.
    Complete,
    /// No throw hook intercepted the error.
    Unhandled,
}

/// Finds the next handler to invoke.
#[must_use]
pub fn seek(table: &PhaseTable, cursor: Cursor) -> Step {
    let len = table.len();
    match cursor {
        Cursor::Forward { phase, from } => {
            let mut current = Some(phase);
            let mut start = from;
            while let Some(phase) = current {
                if let Some(index) = (start..len).find(|&i| table.handles(i, phase)) {
                    return Step::Invoke(Position::new(phase, Direction::Forward, index));
                }
                current = phase.following();
                start = 0;
            }
            Step::Exhausted
        }
        Cursor::Backward { phase, until } => {
            let mut current = Some(phase);
            let mut end = until.min(len);
            while let Some(phase) = current {
                if let Some(index) = (0..end).rev().find(|&i| table.handles(i, phase)) {
                    return Step::Invoke(Position::new(phase, Direction::Backward, index));
                }
                current = phase.following();
                end = len;
            }
            Step::Complete
        }
        Cursor::Error { phase, until } => (0..until.min(len))
            .rev()
            .find(|&i| table.catches(i))
            .map_or(Step::Unhandled, |index| {
                Step::Invoke(Position::new(phase, Direction::Error, index))
            }),
    }
}
