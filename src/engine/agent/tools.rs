// Tool catalogue the agent may invoke, gated by qualification stage.
// C6 is the only caller that actually applies a tool's effects; this module
// just describes the catalogue and which stage unlocks which tool.

use crate::atoms::types::Stage;
use serde_json::{json, Value};

pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

pub fn record_consent() -> ToolDefinition {
    ToolDefinition {
        name: "record_consent",
        description: "Record whether the lead consents to proceeding with qualification.",
        parameters: json!({
            "type": "object",
            "properties": { "consent": { "type": "boolean" } },
            "required": ["consent"],
        }),
    }
}

pub fn record_personal_data() -> ToolDefinition {
    ToolDefinition {
        name: "record_personal_data",
        description: "Record the lead's name and contact details.",
        parameters: json!({
            "type": "object",
            "properties": {
                "full_name": { "type": "string" },
                "email": { "type": "string" },
                "phone": { "type": "string" },
                "company": { "type": "string" },
            },
        }),
    }
}

pub fn record_bant() -> ToolDefinition {
    ToolDefinition {
        name: "record_bant",
        description: "Record any of budget, authority, need, timeline disclosed so far.",
        parameters: json!({
            "type": "object",
            "properties": {
                "budget": { "type": "string" },
                "authority": { "type": "string" },
                "need": { "type": "string" },
                "timeline": { "type": "string" },
            },
        }),
    }
}

pub fn record_requirements() -> ToolDefinition {
    ToolDefinition {
        name: "record_requirements",
        description: "Record the application type, deadline, and requested features/integrations.",
        parameters: json!({
            "type": "object",
            "properties": {
                "app_type": { "type": "string" },
                "deadline": { "type": "string" },
                "features": { "type": "array", "items": { "type": "object" } },
                "integrations": { "type": "array", "items": { "type": "object" } },
            },
        }),
    }
}

pub fn get_available_slots() -> ToolDefinition {
    ToolDefinition {
        name: "get_available_slots",
        description: "List open meeting slots on a given date for a given duration in minutes.",
        parameters: json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "description": "ISO-8601 date" },
                "duration_minutes": { "type": "integer" },
            },
            "required": ["date", "duration_minutes"],
        }),
    }
}

pub fn schedule_meeting() -> ToolDefinition {
    ToolDefinition {
        name: "schedule_meeting",
        description: "Schedule a meeting with the lead at a confirmed slot.",
        parameters: json!({
            "type": "object",
            "properties": {
                "start": { "type": "string" },
                "end": { "type": "string" },
                "subject": { "type": "string" },
                "attendee_email": { "type": "string" },
            },
            "required": ["start", "end", "subject", "attendee_email"],
        }),
    }
}

pub fn cancel_meeting() -> ToolDefinition {
    ToolDefinition {
        name: "cancel_meeting",
        description: "Cancel a previously scheduled meeting.",
        parameters: json!({
            "type": "object",
            "properties": { "meeting_id": { "type": "string" } },
            "required": ["meeting_id"],
        }),
    }
}

pub fn end_conversation() -> ToolDefinition {
    ToolDefinition {
        name: "end_conversation",
        description: "End the conversation, e.g. because the lead declined to continue.",
        parameters: json!({
            "type": "object",
            "properties": { "reason": { "type": "string" } },
            "required": ["reason"],
        }),
    }
}

/// Tools available to the model at a given stage. `end_conversation` is
/// always available; everything else is gated to the stage(s) it moves the
/// lead out of.
pub fn available_for_stage(stage: Stage) -> Vec<ToolDefinition> {
    let mut tools = match stage {
        Stage::Start | Stage::Consent => vec![record_consent()],
        Stage::PersonalData => vec![record_personal_data()],
        Stage::Bant => vec![record_bant()],
        Stage::Requirements => vec![record_requirements()],
        Stage::Meeting => vec![get_available_slots(), schedule_meeting(), cancel_meeting()],
        Stage::Completed | Stage::Abandoned => vec![],
    };
    tools.push(end_conversation());
    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consent_stage_only_exposes_consent_and_end() {
        let tools = available_for_stage(Stage::Consent);
        let names: Vec<_> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["record_consent", "end_conversation"]);
    }

    #[test]
    fn terminal_stages_expose_only_end_conversation() {
        let tools = available_for_stage(Stage::Completed);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "end_conversation");
    }

    #[test]
    fn meeting_stage_exposes_scheduling_tools() {
        let tools = available_for_stage(Stage::Meeting);
        let names: Vec<_> = tools.iter().map(|t| t.name).collect();
        assert!(names.contains(&"get_available_slots"));
        assert!(names.contains(&"schedule_meeting"));
        assert!(names.contains(&"cancel_meeting"));
    }
}
