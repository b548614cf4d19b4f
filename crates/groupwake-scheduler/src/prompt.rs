//! Prompt composition for outreach messages.

use groupwake_core::types::{TierContext, TimeOfDay};

const CONTEXT_REQUIREMENT: &str =
    "Make sure the reply fits the current group conversation and keeps a friendly, lively tone.";

/// Extra context describing where in the escalation this message sits.
pub fn extra_context(tier: &TierContext, time_of_day: TimeOfDay) -> String {
    let mut context = format!(
        "It is currently {label}. This is proactive group message number {count} \
         (do not mention this number or say which attempt it is). \
         Adjust the content to the time of day ({label}). \
         Remember you are speaking in a group chat, so a lively tone is welcome.",
        label = time_of_day.label(),
        count = tier.count,
    );
    if tier.is_final {
        context.push_str(
            " This is the last proactive message for now; let the group know you will speak up less often.",
        );
    }
    context
}

/// Full prompt handed to generation. The marker always comes first.
pub fn compose(
    marker: &str,
    template: &str,
    time_of_day: Option<TimeOfDay>,
    extra: Option<&str>,
) -> String {
    let mut prompt = format!("{marker} {template}");
    if let Some(tod) = time_of_day {
        prompt.push_str(&format!(" It is currently {}.", tod.label()));
    }
    prompt.push_str(" Keep the style consistent with your persona.");
    if let Some(extra) = extra {
        prompt.push(' ');
        prompt.push_str(extra);
    }
    prompt.push(' ');
    prompt.push_str(CONTEXT_REQUIREMENT);
    prompt
}
