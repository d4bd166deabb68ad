//! Mid-session persuasion of the losing side.
//!
//! The loser's personality is rewritten twice as the remaining-message
//! counter crosses the configured marks: once to start wavering, once to
//! concede outright. The winner is predetermined in configuration; nothing
//! is computed from the debate content.

/// How far persuasion has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersuasionStage {
    /// Acknowledging the other side's arguments, keeping reservations.
    Wavering,
    /// Fully convinced; announces the change of mind.
    Convinced,
}

/// Two one-shot thresholds against the remaining-message counter.
///
/// Each mark uses a range check plus a fired flag rather than an exact
/// equality, so an asymmetric decrement cannot skip a mark.
#[derive(Debug, Clone)]
pub struct PersuasionSchedule {
    convince_time: u32,
    convince_time_definitive: u32,
    fired_wavering: bool,
    fired_convinced: bool,
}

impl PersuasionSchedule {
    /// A `convince_time` of zero disables the schedule entirely.
    pub fn new(convince_time: u32, convince_time_definitive: u32) -> Self {
        Self {
            convince_time,
            convince_time_definitive,
            fired_wavering: false,
            fired_convinced: false,
        }
    }

    /// Stage to apply at this counter value, if any. At most one stage is
    /// returned per call and each stage fires at most once per session.
    pub fn check(&mut self, remaining: u32) -> Option<PersuasionStage> {
        if self.convince_time == 0 {
            return None;
        }
        if remaining <= self.convince_time_definitive && !self.fired_convinced {
            self.fired_convinced = true;
            self.fired_wavering = true;
            return Some(PersuasionStage::Convinced);
        }
        if remaining <= self.convince_time && !self.fired_wavering {
            self.fired_wavering = true;
            return Some(PersuasionStage::Wavering);
        }
        None
    }
}

/// Personality rewrite for the losing side at the given stage.
pub fn persuaded_personality(
    stage: PersuasionStage,
    original_personality: &str,
    winning_opinion: &str,
) -> String {
    match stage {
        PersuasionStage::Wavering => format!(
            "Your original point of view was: {original_personality}. \
             However, the arguments presented have begun to persuade you, and you are \
             starting to shift your perspective toward this view: {winning_opinion}. \
             Show subtle signs of being convinced and adjust your stance gradually. \
             Acknowledge the strength of the other speaker's arguments, but keep some \
             reservations. Keep your explanations brief and to the point. Communicate \
             your change of stance clearly and explain briefly why you have started to \
             change your mind."
        ),
        PersuasionStage::Convinced => format!(
            "Your original point of view was: {original_personality}. \
             However, after hearing the arguments presented, you are now completely \
             convinced of this point of view: {winning_opinion}. Inform the other \
             speaker that you have changed your mind, state your agreement with their \
             perspective clearly, and explain briefly why their arguments convinced \
             you. Keep your explanation concise and to the point. Communicate your \
             change of stance clearly and explain briefly why you changed your mind."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_each_stage_exactly_once() {
        let mut schedule = PersuasionSchedule::new(2, 1);
        assert_eq!(schedule.check(4), None);
        assert_eq!(schedule.check(3), None);
        assert_eq!(schedule.check(2), Some(PersuasionStage::Wavering));
        assert_eq!(schedule.check(2), None);
        assert_eq!(schedule.check(1), Some(PersuasionStage::Convinced));
        assert_eq!(schedule.check(1), None);
        assert_eq!(schedule.check(0), None);
    }

    #[test]
    fn skipped_counter_value_still_fires() {
        // The original exact-equality trigger silently missed a mark the
        // counter jumped over; the range check must not.
        let mut schedule = PersuasionSchedule::new(3, 1);
        assert_eq!(schedule.check(2), Some(PersuasionStage::Wavering));
        assert_eq!(schedule.check(0), Some(PersuasionStage::Convinced));
    }

    #[test]
    fn definitive_mark_wins_when_both_are_crossed_at_once() {
        let mut schedule = PersuasionSchedule::new(5, 3);
        assert_eq!(schedule.check(2), Some(PersuasionStage::Convinced));
        assert_eq!(schedule.check(1), None);
    }

    #[test]
    fn zero_convince_time_disables_the_schedule() {
        let mut schedule = PersuasionSchedule::new(0, 0);
        for remaining in (0..6).rev() {
            assert_eq!(schedule.check(remaining), None);
        }
    }

    #[test]
    fn templates_embed_stance_and_opinion() {
        let wavering = persuaded_personality(
            PersuasionStage::Wavering,
            "dogs are loyal",
            "cats are independent",
        );
        assert!(wavering.contains("dogs are loyal"));
        assert!(wavering.contains("cats are independent"));
        assert!(wavering.contains("reservations"));

        let convinced = persuaded_personality(
            PersuasionStage::Convinced,
            "dogs are loyal",
            "cats are independent",
        );
        assert!(convinced.contains("completely convinced"));
        assert!(convinced.contains("cats are independent"));
    }
}
