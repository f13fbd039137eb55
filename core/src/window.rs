//! Context window construction for adaptation prompts.
//!
//! Given the full ordered sequence of sibling items and the item the user
//! just edited, select the bounded neighborhood of *other* items that
//! automated adaptation may touch, and serialize the whole sequence as a
//! labeled transcript. The oracle sees full continuity but is instructed to
//! revise only unmarked (AI-generated) items inside the window.
//!
//! Window radii: timeline events use 3 years before / 5 years after the
//! edited year; mission steps use 2 positions before / 3 positions after the
//! edited step in flattened display order.

use std::collections::HashSet;

use thiserror::Error;
use uuid::Uuid;

use crate::provenance::Provenance;

/// Years before/after the edited event considered for revision.
pub const EVENT_YEARS_BEFORE: i32 = 3;
pub const EVENT_YEARS_AFTER: i32 = 5;

/// Flattened positions before/after the edited step considered for revision.
pub const STEP_POSITIONS_BEFORE: usize = 2;
pub const STEP_POSITIONS_AFTER: usize = 3;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("edited item not found in sequence")]
    EditedItemNotFound,
}

/// A timeline event as seen by the window builder.
#[derive(Debug, Clone)]
pub struct EventItem {
    pub id: Uuid,
    pub year: i32,
    pub text: String,
    pub provenance: Provenance,
}

/// A mission step as seen by the window builder.
#[derive(Debug, Clone)]
pub struct StepItem {
    pub id: Uuid,
    pub parent_step_id: Option<Uuid>,
    pub display_order: i32,
    pub text: String,
    pub provenance: Provenance,
}

/// Bounded revision window around an edited timeline event.
#[derive(Debug)]
pub struct EventWindow {
    /// Full branch sequence, one labeled line per event, ordered by year.
    pub transcript: String,
    /// Row ids the merger may update. Empty means "skip the oracle call".
    pub eligible_ids: HashSet<Uuid>,
    pub edited_year: i32,
    /// Inclusive year bounds of the window (edited year excluded).
    pub min_year: i32,
    pub max_year: i32,
}

/// Bounded revision window around an edited mission step.
#[derive(Debug)]
pub struct StepWindow {
    /// Full step tree, one labeled line per step, in display order.
    pub transcript: String,
    /// Step ids the merger may update or delete.
    pub eligible_ids: HashSet<Uuid>,
    /// 1-based position of the edited step in the flattened sequence.
    pub edited_position: usize,
}

/// Build the revision window for a branch's events after one was edited.
///
/// `events` is every event visible on the branch (shared past history plus
/// branch entries and predictions); order does not matter, the builder sorts
/// by year. The edited event must be present.
pub fn event_window(events: &[EventItem], edited_id: Uuid) -> Result<EventWindow, WindowError> {
    let mut ordered: Vec<&EventItem> = events.iter().collect();
    ordered.sort_by_key(|e| (e.year, e.id));

    let edited = ordered
        .iter()
        .find(|e| e.id == edited_id)
        .ok_or(WindowError::EditedItemNotFound)?;
    let edited_year = edited.year;

    let min_year = edited_year - EVENT_YEARS_BEFORE;
    let max_year = edited_year + EVENT_YEARS_AFTER;

    let eligible_ids: HashSet<Uuid> = ordered
        .iter()
        .filter(|e| {
            e.id != edited_id
                && e.provenance.is_adaptable()
                && e.year >= min_year
                && e.year <= max_year
        })
        .map(|e| e.id)
        .collect();

    let transcript = ordered
        .iter()
        .map(|e| {
            format!(
                "Year {} (id: {}): {}{}",
                e.year,
                e.id,
                e.text,
                label(e.id == edited_id, e.provenance)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(EventWindow {
        transcript,
        eligible_ids,
        edited_year,
        min_year,
        max_year,
    })
}

/// Build the revision window for a mission's steps after one was edited.
///
/// Steps are flattened parent-first: parents by display order, each followed
/// by its substeps by display order. The window is counted in flattened
/// positions across that sequence.
pub fn step_window(steps: &[StepItem], edited_id: Uuid) -> Result<StepWindow, WindowError> {
    let ordered = flatten_steps(steps);

    let position = ordered
        .iter()
        .position(|s| s.id == edited_id)
        .ok_or(WindowError::EditedItemNotFound)?;

    // Window is [p - before, p + after) excluding p itself.
    let lower = position.saturating_sub(STEP_POSITIONS_BEFORE);
    let upper = position + STEP_POSITIONS_AFTER;

    let eligible_ids: HashSet<Uuid> = ordered
        .iter()
        .enumerate()
        .filter(|(i, s)| *i != position && s.provenance.is_adaptable() && *i >= lower && *i < upper)
        .map(|(_, s)| s.id)
        .collect();

    let mut lines = Vec::with_capacity(ordered.len());
    let mut parent_ordinal = 0usize;
    for step in &ordered {
        let prefix = if step.parent_step_id.is_some() {
            "  - ".to_string()
        } else {
            parent_ordinal += 1;
            format!("{parent_ordinal}. ")
        };
        lines.push(format!(
            "{}(id: {}) {}{}",
            prefix,
            step.id,
            step.text,
            label(step.id == edited_id, step.provenance)
        ));
    }

    Ok(StepWindow {
        transcript: lines.join("\n"),
        eligible_ids,
        edited_position: position + 1,
    })
}

/// Flatten a step tree into display order: parents by `display_order`, each
/// immediately followed by its substeps by `display_order`. Orphaned substeps
/// (parent missing from the slice) sort to the end so nothing is lost.
pub fn flatten_steps(steps: &[StepItem]) -> Vec<StepItem> {
    let mut parents: Vec<&StepItem> = steps.iter().filter(|s| s.parent_step_id.is_none()).collect();
    parents.sort_by_key(|s| (s.display_order, s.id));

    let mut flat = Vec::with_capacity(steps.len());
    for parent in &parents {
        flat.push((*parent).clone());
        let mut children: Vec<&StepItem> = steps
            .iter()
            .filter(|s| s.parent_step_id == Some(parent.id))
            .collect();
        children.sort_by_key(|s| (s.display_order, s.id));
        flat.extend(children.into_iter().cloned());
    }

    let placed: HashSet<Uuid> = flat.iter().map(|s| s.id).collect();
    let mut orphans: Vec<&StepItem> = steps.iter().filter(|s| !placed.contains(&s.id)).collect();
    orphans.sort_by_key(|s| (s.display_order, s.id));
    flat.extend(orphans.into_iter().cloned());

    flat
}

fn label(is_edited: bool, provenance: Provenance) -> &'static str {
    if is_edited {
        " [EDITED]"
    } else if provenance.is_adaptable() {
        ""
    } else {
        " [USER]"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u128, year: i32, provenance: Provenance) -> EventItem {
        EventItem {
            id: Uuid::from_u128(id),
            year,
            text: format!("event at {year}"),
            provenance,
        }
    }

    fn step(id: u128, parent: Option<u128>, order: i32, provenance: Provenance) -> StepItem {
        StepItem {
            id: Uuid::from_u128(id),
            parent_step_id: parent.map(Uuid::from_u128),
            display_order: order,
            text: format!("step {id}"),
            provenance,
        }
    }

    #[test]
    fn event_window_bounds_three_before_five_after() {
        // Edit at year 40: AI predictions at 35 and 50 fall outside the
        // window; 37..=39 and 41..=45 are in.
        let events = vec![
            event(1, 35, Provenance::AiGenerated),
            event(2, 37, Provenance::AiGenerated),
            event(3, 40, Provenance::UserAuthored),
            event(4, 43, Provenance::AiGenerated),
            event(5, 45, Provenance::AiGenerated),
            event(6, 50, Provenance::AiGenerated),
        ];
        let window = event_window(&events, Uuid::from_u128(3)).unwrap();
        assert_eq!(window.edited_year, 40);
        assert_eq!(window.min_year, 37);
        assert_eq!(window.max_year, 45);
        let expected: HashSet<Uuid> = [2u128, 4, 5].into_iter().map(Uuid::from_u128).collect();
        assert_eq!(window.eligible_ids, expected);
    }

    #[test]
    fn event_window_excludes_user_content_inside_radius() {
        let events = vec![
            event(1, 39, Provenance::UserAuthored),
            event(2, 40, Provenance::AiGenerated),
            event(3, 41, Provenance::AiGeneratedEdited),
            event(4, 42, Provenance::AiGenerated),
        ];
        let window = event_window(&events, Uuid::from_u128(2)).unwrap();
        assert_eq!(window.eligible_ids.len(), 1);
        assert!(window.eligible_ids.contains(&Uuid::from_u128(4)));
    }

    #[test]
    fn event_window_never_includes_the_edited_item() {
        // Even when the edited row is itself an untouched AI prediction
        // (the provenance transition is persisted separately).
        let events = vec![
            event(1, 40, Provenance::AiGenerated),
            event(2, 41, Provenance::AiGenerated),
        ];
        let window = event_window(&events, Uuid::from_u128(1)).unwrap();
        assert!(!window.eligible_ids.contains(&Uuid::from_u128(1)));
    }

    #[test]
    fn event_window_missing_edit_is_an_error() {
        let events = vec![event(1, 40, Provenance::AiGenerated)];
        assert!(matches!(
            event_window(&events, Uuid::from_u128(99)),
            Err(WindowError::EditedItemNotFound)
        ));
    }

    #[test]
    fn event_transcript_labels_every_line() {
        let events = vec![
            event(1, 39, Provenance::UserAuthored),
            event(2, 40, Provenance::AiGenerated),
            event(3, 41, Provenance::AiGenerated),
        ];
        let window = event_window(&events, Uuid::from_u128(2)).unwrap();
        let lines: Vec<&str> = window.transcript.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("[USER]"));
        assert!(lines[1].ends_with("[EDITED]"));
        assert!(lines[2].contains("Year 41"));
        assert!(!lines[2].ends_with("[USER]"));
    }

    #[test]
    fn step_window_two_before_three_after_by_position() {
        // Ten AI steps, edit at flattened position 5 (0-based): positions
        // 3,4 and 6,7 are eligible; 0..=2 and 8..=9 are not.
        let steps: Vec<StepItem> = (0..10)
            .map(|i| step(i as u128 + 1, None, i, Provenance::AiGenerated))
            .collect();
        let window = step_window(&steps, Uuid::from_u128(6)).unwrap();
        assert_eq!(window.edited_position, 6);
        let expected: HashSet<Uuid> = [4u128, 5, 7, 8].into_iter().map(Uuid::from_u128).collect();
        assert_eq!(window.eligible_ids, expected);
    }

    #[test]
    fn step_window_counts_substeps_as_positions() {
        // parent(1) -> sub(2), sub(3); parent(4) -> sub(5). Flat order is
        // 1,2,3,4,5. Editing step 4 puts subs 2,3 in the before-window.
        let steps = vec![
            step(1, None, 0, Provenance::UserAuthored),
            step(2, Some(1), 0, Provenance::AiGenerated),
            step(3, Some(1), 1, Provenance::AiGenerated),
            step(4, None, 1, Provenance::AiGenerated),
            step(5, Some(4), 0, Provenance::AiGenerated),
        ];
        let window = step_window(&steps, Uuid::from_u128(4)).unwrap();
        let expected: HashSet<Uuid> = [2u128, 3, 5].into_iter().map(Uuid::from_u128).collect();
        assert_eq!(window.eligible_ids, expected);
    }

    #[test]
    fn step_window_zero_eligible_when_everything_is_user_owned() {
        let steps = vec![
            step(1, None, 0, Provenance::UserAuthored),
            step(2, None, 1, Provenance::AiGeneratedEdited),
            step(3, None, 2, Provenance::UserAuthored),
        ];
        let window = step_window(&steps, Uuid::from_u128(2)).unwrap();
        assert!(window.eligible_ids.is_empty());
    }

    #[test]
    fn step_transcript_nests_substeps_and_numbers_parents() {
        let steps = vec![
            step(1, None, 0, Provenance::AiGenerated),
            step(2, Some(1), 0, Provenance::AiGenerated),
            step(3, None, 1, Provenance::UserAuthored),
        ];
        let window = step_window(&steps, Uuid::from_u128(1)).unwrap();
        let lines: Vec<&str> = window.transcript.lines().collect();
        assert!(lines[0].starts_with("1. "));
        assert!(lines[0].ends_with("[EDITED]"));
        assert!(lines[1].starts_with("  - "));
        assert!(lines[2].starts_with("2. "));
        assert!(lines[2].ends_with("[USER]"));
    }

    #[test]
    fn flatten_keeps_orphaned_substeps() {
        let steps = vec![
            step(1, None, 0, Provenance::AiGenerated),
            step(2, Some(99), 0, Provenance::AiGenerated),
        ];
        let flat = flatten_steps(&steps);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[1].id, Uuid::from_u128(2));
    }
}
