use llm_core::ChatMessage;

pub const DEFAULT_SYSTEM_PROMPT: &str = "Create a guided meditation that begins by clearly stating \
the intent and purpose of the session, personalized to the user's specific situation. Open by naming \
the stressor and what the session will help the listener do with it. Help the listener reflect on the \
stressor and notice where its emotions show up in the body. Gently reframe the situation as an \
opportunity for growth or understanding. Invite them to picture approaching it with calm, focus and \
clarity, and close with visualization and gratitude. Keep a soothing, supportive tone and write in \
plain flowing sentences meant to be spoken aloud.";

/// Message list for one meditation request
pub fn meditation_messages(system_prompt: &str, input: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!("Create a meditation script based on: {}", input.trim())),
    ]
}
