// Qualibot Engine — Qualification State Machine (C5)
// A pure function of (lead, applied effects) -> next stage. Never persists
// anything itself; never regresses a stage automatically; never advances
// purely on assistant turns without a corresponding data effect.

use crate::atoms::constants::{ABANDON_AFTER, MAX_CONSENT_REFUSALS};
use crate::atoms::types::{BantData, LeadQualification, Requirements, Stage};
use chrono::{DateTime, Utc};

/// Effects the orchestrator already applied for this turn, gathered from
/// the tool invocations C4 returned. Each field reflects post-apply state,
/// not the raw tool call.
#[derive(Debug, Clone, Default)]
pub struct AppliedEffects {
    pub consent_given: Option<bool>,
    pub has_full_name: bool,
    pub has_contact: bool,
    pub bant: Option<BantData>,
    pub requirements: Option<Requirements>,
    pub feature_count: usize,
    pub meeting_scheduled: bool,
    pub explicit_end_reason: Option<String>,
    pub last_user_message_at: Option<DateTime<Utc>>,
}

/// Compute the next stage for a lead given the effects applied this turn.
/// Returns `lead.current_step` unchanged when no transition condition is met.
pub fn next_stage(lead: &LeadQualification, effects: &AppliedEffects) -> Stage {
    if lead.current_step.is_terminal() {
        return lead.current_step;
    }

    if let Some(reason) = &effects.explicit_end_reason {
        log::info!("[qualification] lead {} ending conversation: {reason}", lead.id);
        return Stage::Abandoned;
    }

    if let Some(last) = effects.last_user_message_at {
        let elapsed = Utc::now() - last;
        if elapsed.to_std().map(|d| d >= ABANDON_AFTER).unwrap_or(true) {
            return Stage::Abandoned;
        }
    }

    match lead.current_step {
        Stage::Start => Stage::Consent,

        Stage::Consent => match effects.consent_given {
            Some(true) => Stage::PersonalData,
            Some(false) if lead.consent_refusals + 1 >= MAX_CONSENT_REFUSALS => Stage::Abandoned,
            Some(false) => Stage::Consent,
            None if lead.consent_refusals >= MAX_CONSENT_REFUSALS => Stage::Abandoned,
            None => Stage::Consent,
        },

        Stage::PersonalData => {
            if effects.has_full_name && effects.has_contact {
                Stage::Bant
            } else {
                Stage::PersonalData
            }
        }

        Stage::Bant => match &effects.bant {
            Some(bant) if bant.is_complete() => Stage::Requirements,
            _ => Stage::Bant,
        },

        Stage::Requirements => match &effects.requirements {
            Some(req) if req.app_type.is_some() && effects.feature_count > 0 => Stage::Meeting,
            _ => Stage::Requirements,
        },

        Stage::Meeting => {
            if effects.meeting_scheduled {
                Stage::Completed
            } else {
                Stage::Meeting
            }
        }

        Stage::Completed | Stage::Abandoned => lead.current_step,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn lead_at(stage: Stage) -> LeadQualification {
        LeadQualification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            consent: false,
            current_step: stage,
            consent_refusals: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn start_always_advances_to_consent() {
        let lead = lead_at(Stage::Start);
        assert_eq!(next_stage(&lead, &AppliedEffects::default()), Stage::Consent);
    }

    #[test]
    fn first_consent_refusal_holds_at_consent() {
        let lead = lead_at(Stage::Consent);
        let effects = AppliedEffects { consent_given: Some(false), ..Default::default() };
        assert_eq!(next_stage(&lead, &effects), Stage::Consent);
    }

    #[test]
    fn second_consecutive_consent_refusal_abandons() {
        let mut lead = lead_at(Stage::Consent);
        lead.consent_refusals = 1;
        let effects = AppliedEffects { consent_given: Some(false), ..Default::default() };
        assert_eq!(next_stage(&lead, &effects), Stage::Abandoned);
    }

    #[test]
    fn consent_unanswered_holds_until_max_refusals() {
        let mut lead = lead_at(Stage::Consent);
        lead.consent_refusals = 1;
        assert_eq!(next_stage(&lead, &AppliedEffects::default()), Stage::Consent);
        lead.consent_refusals = 2;
        assert_eq!(next_stage(&lead, &AppliedEffects::default()), Stage::Abandoned);
    }

    #[test]
    fn bant_incomplete_holds_stage() {
        let lead = lead_at(Stage::Bant);
        let incomplete = BantData { budget: Some("10k".into()), ..Default::default() };
        let effects = AppliedEffects { bant: Some(incomplete), ..Default::default() };
        assert_eq!(next_stage(&lead, &effects), Stage::Bant);
    }

    #[test]
    fn bant_complete_advances_to_requirements() {
        let lead = lead_at(Stage::Bant);
        let complete = BantData {
            budget: Some("10k".into()),
            authority: Some("owner".into()),
            need: Some("crm".into()),
            timeline: Some("q3".into()),
            ..Default::default()
        };
        let effects = AppliedEffects { bant: Some(complete), ..Default::default() };
        assert_eq!(next_stage(&lead, &effects), Stage::Requirements);
    }

    #[test]
    fn terminal_stages_never_change() {
        let lead = lead_at(Stage::Completed);
        let effects = AppliedEffects { consent_given: Some(false), ..Default::default() };
        assert_eq!(next_stage(&lead, &effects), Stage::Completed);
    }

    #[test]
    fn stale_conversation_abandons() {
        let lead = lead_at(Stage::Bant);
        let effects = AppliedEffects { last_user_message_at: Some(Utc::now() - Duration::days(8)), ..Default::default() };
        assert_eq!(next_stage(&lead, &effects), Stage::Abandoned);
    }

    #[test]
    fn explicit_end_reason_abandons_from_any_stage() {
        let lead = lead_at(Stage::Requirements);
        let effects = AppliedEffects { explicit_end_reason: Some("user_declined".into()), ..Default::default() };
        assert_eq!(next_stage(&lead, &effects), Stage::Abandoned);
    }
}
