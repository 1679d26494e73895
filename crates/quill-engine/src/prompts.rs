use crate::llm::ChatMessage;
use crate::session::Turn;
use quill_core::util::tail_chars;
use quill_core::{GatheredContext, RegionMode, TargetRegion};

/// Assembled output re-sent as assistant context on continuation rounds.
pub const CONTINUATION_TAIL_CHARS: usize = 2_000;

pub const EDIT_SYSTEM: &str = r#"You are Quill, a precise code editor embedded in the user's editor.

You receive one TARGET block and an instruction. Reply with the complete new
content for the TARGET block and nothing else.

RULES:
- Output raw code only: no explanations, no markdown fences, no line numbers.
- Rewrite only the TARGET. Text marked read-only is context; never repeat it.
- Keep indentation, naming and style consistent with the surrounding code.
- Never use placeholders or ellipses for unchanged code; write it out.
- If the instruction does not apply, return the TARGET unchanged."#;

pub const CONTINUE_INSTRUCTION: &str = "Your previous reply was cut off. Continue exactly where you stopped. \
Do not repeat any text you already wrote, do not restart, and do not add commentary or fences.";

/// Inputs for one edit prompt.
pub struct PromptInput<'a> {
    pub instruction: &'a str,
    pub file_label: &'a str,
    pub document_text: &'a str,
    pub region: &'a TargetRegion,
    pub context: Option<&'a GatheredContext>,
    pub history: &'a [Turn],
}

pub fn build_edit_messages(input: &PromptInput<'_>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(EDIT_SYSTEM)];
    for turn in input.history {
        messages.push(ChatMessage::user(turn.instruction.clone()));
        messages.push(ChatMessage::assistant(turn.outcome.clone()));
    }
    messages.push(ChatMessage::user(edit_user_prompt(input)));
    messages
}

fn edit_user_prompt(input: &PromptInput<'_>) -> String {
    let region = input.region;
    let target = region.original_text(input.document_text);
    let mut prompt = format!(
        "FILE: {}\nEDIT MODE: {}\n",
        input.file_label,
        region.mode.label()
    );

    match region.mode {
        RegionMode::WholeFile => {
            prompt.push_str("\nTARGET (the entire file):\n");
            push_block(&mut prompt, target);
        }
        RegionMode::Selection | RegionMode::AutoSection => {
            prompt.push_str(&format!(
                "TARGET LINES: {}-{}\n",
                region.lines.start + 1,
                region.lines.end
            ));
            if !region.context_before.is_empty() {
                prompt.push_str("\nCONTEXT BEFORE (read-only):\n");
                push_block(&mut prompt, &region.context_before);
            }
            prompt.push_str("\nTARGET:\n");
            push_block(&mut prompt, target);
            if !region.context_after.is_empty() {
                prompt.push_str("\nCONTEXT AFTER (read-only):\n");
                push_block(&mut prompt, &region.context_after);
            }
        }
    }

    if let Some(context) = input.context.filter(|c| !c.text.trim().is_empty()) {
        prompt.push_str(&format!(
            "\nRELATED FILES (read-only, {} files):\n{}\n",
            context.file_count, context.text
        ));
    }

    prompt.push_str(&format!("\nINSTRUCTION:\n{}\n", input.instruction.trim()));
    prompt.push_str("\nReply with the new TARGET content only.");
    prompt
}

fn push_block(prompt: &mut String, text: &str) {
    prompt.push_str("<<<\n");
    prompt.push_str(text);
    if !text.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str(">>>\n");
}

/// Messages for a follow-up round: the original conversation, the tail of
/// what was produced so far as the assistant's turn, and a continue request.
pub fn continuation_messages(base: &[ChatMessage], assembled: &str) -> Vec<ChatMessage> {
    let mut messages = base.to_vec();
    messages.push(ChatMessage::assistant(tail_chars(
        assembled,
        CONTINUATION_TAIL_CHARS,
    )));
    messages.push(ChatMessage::user(CONTINUE_INSTRUCTION));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use quill_core::{select_region, LineIndex, TextRange};

    fn numbered(lines: usize) -> String {
        (0..lines).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn test_selection_prompt_marks_context_read_only() {
        let text = numbered(60);
        let index = LineIndex::new(&text);
        let selection = TextRange::new(index.line_start(30), index.line_start(32));
        let region = select_region(&text, Some(selection), "rename");

        let messages = build_edit_messages(&PromptInput {
            instruction: "rename",
            file_label: "src/app.txt",
            document_text: &text,
            region: &region,
            context: None,
            history: &[],
        });

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        let user = &messages[1].content;
        assert!(user.contains("TARGET LINES: 31-32"));
        assert!(user.contains("TARGET:\n<<<\nline 30\nline 31\n>>>"));
        assert!(user.contains("CONTEXT BEFORE (read-only):\n<<<\nline 10\n"));
        assert!(user.contains("line 51\n>>>"));
        assert!(!user.contains("line 52\n"));
    }

    #[test]
    fn test_whole_file_prompt_and_related_files() {
        let text = numbered(3);
        let region = select_region(&text, None, "sort");
        let context = GatheredContext {
            text: "--- lib/util.txt ---\nhelper\n".to_string(),
            file_count: 1,
        };
        let messages = build_edit_messages(&PromptInput {
            instruction: "sort",
            file_label: "a.txt",
            document_text: &text,
            region: &region,
            context: Some(&context),
            history: &[],
        });
        let user = &messages[1].content;
        assert!(user.contains("TARGET (the entire file)"));
        assert!(user.contains("RELATED FILES (read-only, 1 files)"));
        assert!(!user.contains("CONTEXT BEFORE"));
    }

    #[test]
    fn test_history_precedes_current_turn() {
        let text = numbered(3);
        let region = select_region(&text, None, "again");
        let history = vec![Turn {
            instruction: "first".to_string(),
            outcome: "Edited whole file (+1 -0 lines)".to_string(),
        }];
        let messages = build_edit_messages(&PromptInput {
            instruction: "again",
            file_label: "a.txt",
            document_text: &text,
            region: &region,
            context: None,
            history: &history,
        });
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[2].role, Role::Assistant);
    }

    #[test]
    fn test_continuation_sends_bounded_tail() {
        let base = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let assembled = "x".repeat(5_000);
        let messages = continuation_messages(&base, &assembled);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content.len(), CONTINUATION_TAIL_CHARS);
        assert_eq!(messages[3].content, CONTINUE_INSTRUCTION);
    }
}
