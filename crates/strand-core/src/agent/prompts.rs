//! Fixed instructions sent to helper threads

/// Instruction for replacing a long conversation with a working summary
pub const COMPACT_PROMPT: &str = r#"You are condensing a long coding session so the work can continue in a fresh context.
Write a summary that another engineer could pick up from without reading the original conversation.

Use these sections, in this order:

1. Goal: what the user is ultimately trying to achieve, in their own terms.
2. Key decisions: technical choices made so far and the constraints behind them.
3. Files touched: each file read, created or modified, with one line on its role.
4. Code state: what is implemented, what compiles or passes, what is known to be broken.
5. Errors and fixes: problems hit along the way and how each was resolved.
6. Open threads: questions asked but not answered, and anything the user asked to revisit.
7. Current step: exactly what was in progress when the conversation stopped.
8. Next step: the single most useful action to take next, if one is clear.

Quote identifiers, paths and commands exactly. Keep user instructions verbatim where wording matters.
Leave out greetings, tool chatter and anything already superseded. Do not invent progress."#;

/// Instruction for the one-line label stored with a conversation
pub const SHORT_SUMMARY_PROMPT: &str = r#"Give this conversation a title.
Reply with one sentence of at most 12 words describing the user's main task.
No quotes, no trailing period, no preamble."#;

/// Header placed between `COMPACT_PROMPT` and the transcript
pub const COMPACT_TRANSCRIPT_HEADER: &str = "\n\nConversation to compact:";

/// Header placed between `SHORT_SUMMARY_PROMPT` and the transcript
pub const SUMMARY_TRANSCRIPT_HEADER: &str = "\n\nConversation to summarize:";
