//! The two-page spread state machine.
//!
//! The reader sees the story as an open book: the scene at `index` on the left
//! page and the scene at `index + 1` on the right. A spread opens with only
//! the left page (`Phase::LeftOnly`); advancing reveals the right page
//! (`Phase::FullSpread`) and advancing again turns to the next spread.
//!
//! Reveal timing is explicit. Every intent takes the current [`Instant`] and
//! schedules reveals relative to it; [`Navigator::tick`] applies the reveals
//! that are due and drops expired advisories. Policy violations never fail:
//! they leave the state untouched, raise an [`Advisory`] and report
//! [`Transition::Blocked`].

use crate::flags::FlagStore;
use crate::resolver::{apply_effects, resolve};
use crate::session::VisitedSet;
use crate::story::{Choice, Scene, Story};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Timing for reveals and advisories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigatorConfig {
    pub left_reveal_delay: Duration,
    pub right_reveal_delay: Duration,
    /// Lifetime of "select an option" advisories.
    pub choice_advisory_ttl: Duration,
    /// Lifetime of every other advisory.
    pub advisory_ttl: Duration,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            left_reveal_delay: Duration::from_millis(10),
            right_reveal_delay: Duration::from_millis(80),
            choice_advisory_ttl: Duration::from_millis(1200),
            advisory_ttl: Duration::from_millis(2000),
        }
    }
}

impl NavigatorConfig {
    pub fn with_reveal_delays(mut self, left: Duration, right: Duration) -> Self {
        self.left_reveal_delay = left;
        self.right_reveal_delay = right;
        self
    }

    pub fn with_advisory_ttls(mut self, choice: Duration, other: Duration) -> Self {
        self.choice_advisory_ttl = choice;
        self.advisory_ttl = other;
        self
    }
}

/// How much of the spread is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    LeftOnly,
    FullSpread,
}

/// A page of the spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Page {
    Left,
    Right,
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Page::Left => write!(f, "left"),
            Page::Right => write!(f, "right"),
        }
    }
}

/// Position and visibility of the current spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadState {
    pub index: usize,
    pub phase: Phase,
    pub left_revealed: bool,
    pub right_revealed: bool,
}

/// Why a navigation intent was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// A terminal scene is on screen.
    StoryEnded,
    /// The page offers several choices; one must be picked.
    ChoiceRequired { page: Page },
    /// The target cannot be reached from the scene offering it.
    PathLocked { target: String },
    /// A mutually exclusive sibling of the target was already visited.
    PathExcluded { target: String, visited: String },
    /// No visible page offers a choice leading to the target.
    ChoiceUnavailable { target: String },
    /// Already on the last spread.
    NoMorePages,
    /// Already on the first spread.
    FirstPage,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::StoryEnded => write!(f, "The story has ended. Restart to play again"),
            BlockReason::ChoiceRequired { page: Page::Left } => {
                write!(f, "Please select an option to continue")
            }
            BlockReason::ChoiceRequired { page: Page::Right } => {
                write!(f, "Please select an option on the right page to continue")
            }
            BlockReason::PathLocked { target } => {
                write!(f, "You cannot reach {target} from this path")
            }
            BlockReason::PathExcluded { .. } => {
                write!(f, "You cannot visit this path after choosing the other option")
            }
            BlockReason::ChoiceUnavailable { target } => {
                write!(f, "No choice here leads to {target}")
            }
            BlockReason::NoMorePages => write!(f, "There are no more pages"),
            BlockReason::FirstPage => write!(f, "This is the first page"),
        }
    }
}

/// A short-lived message for the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub reason: BlockReason,
    pub message: String,
    pub expires_at: Instant,
}

impl Advisory {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// The outcome of a navigation intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The right page of the current spread is being revealed.
    RevealedRight,
    /// Turned forward to the next spread.
    NextSpread,
    /// The right page was hidden again.
    HidRight,
    /// Turned back to the previous spread.
    PreviousSpread,
    /// Followed a choice to a scene.
    Entered { scene_id: String },
    /// Back at the start spread.
    Restarted,
    Blocked(BlockReason),
}

impl Transition {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Transition::Blocked(_))
    }
}

/// What the UI needs to draw one frame.
#[derive(Debug, Clone)]
pub struct SpreadFrame<'a> {
    pub index: usize,
    pub phase: Phase,
    pub left: Option<&'a Scene>,
    pub right: Option<&'a Scene>,
    pub left_revealed: bool,
    pub right_revealed: bool,
    /// Choices offered on the left page. Empty on a terminal spread.
    pub left_choices: Vec<&'a Choice>,
    /// Choices offered on the right page once it is shown.
    pub right_choices: Vec<&'a Choice>,
    pub advisory: Option<Advisory>,
    /// The reader has reached the end: a terminal spread or the last one.
    pub at_end: bool,
}

/// Spread navigation for one reading session.
#[derive(Debug, Clone)]
pub struct Navigator {
    config: NavigatorConfig,
    start_index: usize,
    state: SpreadState,
    left_reveal_at: Option<Instant>,
    right_reveal_at: Option<Instant>,
    advisory: Option<Advisory>,
}

impl Navigator {
    /// Open the book at the story's start scene.
    pub fn new(story: &Story, config: NavigatorConfig, now: Instant) -> Self {
        let start_index = story.start_index();
        let mut navigator = Self {
            config,
            start_index,
            state: SpreadState {
                index: start_index,
                phase: Phase::LeftOnly,
                left_revealed: false,
                right_revealed: false,
            },
            left_reveal_at: None,
            right_reveal_at: None,
            advisory: None,
        };
        navigator.enter_spread(story, start_index, now);
        navigator
    }

    /// Open the book at an arbitrary spread, e.g. a saved bookmark.
    ///
    /// A `FullSpread` phase shows both pages at once, with no reveal delay.
    pub fn open_at(
        story: &Story,
        config: NavigatorConfig,
        index: usize,
        phase: Phase,
        now: Instant,
    ) -> Self {
        let mut navigator = Self::new(story, config, now);
        navigator.enter_spread(story, index, now);
        if phase == Phase::FullSpread {
            navigator.show_full_spread(index);
        }
        navigator
    }

    pub fn state(&self) -> &SpreadState {
        &self.state
    }

    pub fn config(&self) -> &NavigatorConfig {
        &self.config
    }

    /// The current advisory, if it has not expired by `now`.
    pub fn advisory(&self, now: Instant) -> Option<&Advisory> {
        self.advisory.as_ref().filter(|a| !a.is_expired(now))
    }

    /// Scenes on the left and right page.
    pub fn spread<'a>(&self, story: &'a Story) -> (Option<&'a Scene>, Option<&'a Scene>) {
        (
            story.scene_at(self.state.index),
            story.scene_at(self.state.index + 1),
        )
    }

    /// Whether either page of the current spread is terminal.
    pub fn is_terminal_spread(&self, story: &Story) -> bool {
        let (left, right) = self.spread(story);
        left.is_some_and(|s| s.terminal) || right.is_some_and(|s| s.terminal)
    }

    /// Apply reveals that are due and drop an expired advisory.
    pub fn tick(&mut self, now: Instant) {
        if self.left_reveal_at.is_some_and(|at| at <= now) {
            self.state.left_revealed = true;
            self.left_reveal_at = None;
        }
        if self.right_reveal_at.is_some_and(|at| at <= now) {
            self.state.right_revealed = true;
            self.right_reveal_at = None;
        }
        if self.advisory.as_ref().is_some_and(|a| a.is_expired(now)) {
            self.advisory = None;
        }
    }

    /// Reveal the right page, or turn to the next spread.
    pub fn advance(&mut self, story: &Story, flags: &FlagStore, now: Instant) -> Transition {
        if self.is_terminal_spread(story) {
            return self.block(BlockReason::StoryEnded, now);
        }

        let (left, right) = self.spread(story);
        match self.state.phase {
            Phase::LeftOnly => {
                if left.is_some_and(|scene| resolve(scene, flags).len() > 1) {
                    return self.block(BlockReason::ChoiceRequired { page: Page::Left }, now);
                }
                self.state.phase = Phase::FullSpread;
                self.state.right_revealed = false;
                self.right_reveal_at = Some(now + self.config.right_reveal_delay);
                Transition::RevealedRight
            }
            Phase::FullSpread => {
                if right.is_some_and(|scene| resolve(scene, flags).len() > 1) {
                    return self.block(BlockReason::ChoiceRequired { page: Page::Right }, now);
                }
                let next = self.state.index + 2;
                if next >= story.len() {
                    return self.block(BlockReason::NoMorePages, now);
                }
                self.enter_spread(story, next, now);
                Transition::NextSpread
            }
        }
    }

    /// Hide the right page, or turn back to the previous spread.
    pub fn retreat(&mut self, story: &Story, now: Instant) -> Transition {
        if self.state.phase == Phase::FullSpread && !self.is_terminal_spread(story) {
            self.state.phase = Phase::LeftOnly;
            self.state.right_revealed = false;
            self.right_reveal_at = None;
            return Transition::HidRight;
        }

        if self.state.index == 0 {
            return self.block(BlockReason::FirstPage, now);
        }
        let previous = self.state.index.saturating_sub(2);
        self.enter_spread(story, previous, now);
        Transition::PreviousSpread
    }

    /// Follow a visible choice that leads to `target`.
    ///
    /// On success the choice's effects are applied to `flags` and `target`
    /// joins `visited`. On refusal neither is touched.
    pub fn choose_target(
        &mut self,
        story: &Story,
        flags: &mut FlagStore,
        visited: &mut VisitedSet,
        target: &str,
        now: Instant,
    ) -> Transition {
        if self.is_terminal_spread(story) {
            return self.block(BlockReason::StoryEnded, now);
        }

        let (left, right) = self.spread(story);
        let right = right.filter(|_| self.state.phase == Phase::FullSpread);
        let offered = left.into_iter().chain(right).find_map(|scene| {
            resolve(scene, flags)
                .into_iter()
                .find(|choice| choice.target == target)
                .map(|choice| (scene, choice))
        });
        let (source, choice) = match offered {
            Some(found) => found,
            None => {
                return self.block(
                    BlockReason::ChoiceUnavailable {
                        target: target.to_string(),
                    },
                    now,
                )
            }
        };

        let rules = story.rules();
        if rules.is_blocked(source, target) {
            return self.block(
                BlockReason::PathLocked {
                    target: target.to_string(),
                },
                now,
            );
        }
        if let Some(sibling) = rules.excluding_sibling(target, visited) {
            let reason = BlockReason::PathExcluded {
                target: target.to_string(),
                visited: sibling.to_string(),
            };
            return self.block(reason, now);
        }

        let Some(target_index) = story.index_of(target) else {
            return self.block(
                BlockReason::ChoiceUnavailable {
                    target: target.to_string(),
                },
                now,
            );
        };

        *flags = apply_effects(flags, &choice.effects);
        visited.insert(target);

        if rules.partner_of(target).is_some() {
            self.show_full_spread(target_index);
        } else {
            let spread_index = target_index / 2 * 2;
            if spread_index != self.state.index {
                self.enter_spread(story, spread_index, now);
            } else if target_index != spread_index && self.state.phase == Phase::LeftOnly {
                self.state.phase = Phase::FullSpread;
                self.right_reveal_at = Some(now + self.config.right_reveal_delay);
            }
        }

        Transition::Entered {
            scene_id: target.to_string(),
        }
    }

    /// Return to the start spread with reveals reset.
    pub fn restart(&mut self, story: &Story, now: Instant) -> Transition {
        self.advisory = None;
        self.enter_spread(story, self.start_index, now);
        Transition::Restarted
    }

    /// Everything the UI needs for the current spread at `now`.
    pub fn frame<'a>(&self, story: &'a Story, flags: &FlagStore, now: Instant) -> SpreadFrame<'a> {
        let (left, right) = self.spread(story);
        let terminal = self.is_terminal_spread(story);
        let full = self.state.phase == Phase::FullSpread;

        let choices_on = |scene: Option<&'a Scene>, shown: bool| match scene {
            Some(scene) if shown && !terminal => resolve(scene, flags),
            _ => Vec::new(),
        };

        SpreadFrame {
            index: self.state.index,
            phase: self.state.phase,
            left,
            right,
            left_revealed: self.state.left_revealed
                || self.left_reveal_at.is_some_and(|at| at <= now),
            right_revealed: full
                && (self.state.right_revealed || self.right_reveal_at.is_some_and(|at| at <= now)),
            left_choices: choices_on(left, true),
            right_choices: choices_on(right, full),
            advisory: self.advisory(now).cloned(),
            at_end: terminal || self.state.index + 2 >= story.len(),
        }
    }

    /// Land on the spread starting at `index`.
    fn enter_spread(&mut self, story: &Story, index: usize, now: Instant) {
        self.state.index = index;
        let paired = story
            .scene_at(index)
            .is_some_and(|left| story.rules().partner_of(&left.id).is_some());

        if paired || self.is_terminal_spread(story) {
            self.show_full_spread(index);
        } else {
            self.state.phase = Phase::LeftOnly;
            self.state.left_revealed = false;
            self.state.right_revealed = false;
            self.left_reveal_at = Some(now + self.config.left_reveal_delay);
            self.right_reveal_at = None;
        }
    }

    fn show_full_spread(&mut self, index: usize) {
        self.state = SpreadState {
            index,
            phase: Phase::FullSpread,
            left_revealed: true,
            right_revealed: true,
        };
        self.left_reveal_at = None;
        self.right_reveal_at = None;
    }

    fn block(&mut self, reason: BlockReason, now: Instant) -> Transition {
        let ttl = match reason {
            BlockReason::ChoiceRequired { .. } => self.config.choice_advisory_ttl,
            _ => self.config.advisory_ttl,
        };
        self.advisory = Some(Advisory {
            message: reason.to_string(),
            reason: reason.clone(),
            expires_at: now + ttl,
        });
        Transition::Blocked(reason)
    }
}
