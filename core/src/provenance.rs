//! Origin tracking for timeline events and mission steps.
//!
//! Two stored flags collapse into three effective states. The single rule
//! everything downstream enforces: only `AiGenerated` content may be revised
//! or removed by automated adaptation. A user edit transitions an item out of
//! that state before any adaptation request is dispatched, so the edited item
//! can never be a candidate in its own adaptation pass.

use serde::{Deserialize, Serialize};

/// Effective origin state of a content item (event or step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Typed by the user; never AI-touched.
    UserAuthored,
    /// Inserted by a generation flow and untouched since.
    AiGenerated,
    /// AI origin, but the user has since modified it. Terminal state.
    AiGeneratedEdited,
}

impl Provenance {
    /// Collapse the two stored flags into an effective state.
    /// For events `ai_origin` is `is_prediction`; for steps it is
    /// `is_ai_generated`.
    pub fn from_flags(ai_origin: bool, user_edited: bool) -> Self {
        match (ai_origin, user_edited) {
            (false, _) => Provenance::UserAuthored,
            (true, false) => Provenance::AiGenerated,
            (true, true) => Provenance::AiGeneratedEdited,
        }
    }

    /// Whether automated adaptation may rewrite or delete this item.
    /// The strict rule: AI origin AND never user-edited.
    pub fn is_adaptable(self) -> bool {
        matches!(self, Provenance::AiGenerated)
    }

    /// State after a direct user edit to the item. `AiGenerated` moves to
    /// `AiGeneratedEdited` and never reverts; everything else is (or stays)
    /// user-authored.
    pub fn after_user_edit(self) -> Self {
        match self {
            Provenance::AiGenerated | Provenance::AiGeneratedEdited => {
                Provenance::AiGeneratedEdited
            }
            Provenance::UserAuthored => Provenance::UserAuthored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Provenance;

    #[test]
    fn flags_collapse_to_three_states() {
        assert_eq!(
            Provenance::from_flags(false, false),
            Provenance::UserAuthored
        );
        // A user-authored item that was edited is still just user-authored.
        assert_eq!(
            Provenance::from_flags(false, true),
            Provenance::UserAuthored
        );
        assert_eq!(Provenance::from_flags(true, false), Provenance::AiGenerated);
        assert_eq!(
            Provenance::from_flags(true, true),
            Provenance::AiGeneratedEdited
        );
    }

    #[test]
    fn only_untouched_ai_content_is_adaptable() {
        assert!(Provenance::AiGenerated.is_adaptable());
        assert!(!Provenance::UserAuthored.is_adaptable());
        assert!(!Provenance::AiGeneratedEdited.is_adaptable());
    }

    #[test]
    fn user_edit_transition_is_terminal() {
        let edited = Provenance::AiGenerated.after_user_edit();
        assert_eq!(edited, Provenance::AiGeneratedEdited);
        // Editing again does not revert anything.
        assert_eq!(edited.after_user_edit(), Provenance::AiGeneratedEdited);
        assert_eq!(
            Provenance::UserAuthored.after_user_edit(),
            Provenance::UserAuthored
        );
    }
}
