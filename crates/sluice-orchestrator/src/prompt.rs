//! Prompt builders for ticket analysis, file proposals and follow-ups
//!
//! Every prompt is built fresh per request from explicit inputs.

use sluice_agent::{FileContent, DIRECTIVE_MARKER};
use sluice_core::{Project, Ticket};

/// System prompt for the main ticket analysis call
pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are an expert software engineer analysing a \
separate project on behalf of a controller. You never have direct filesystem access: the \
controller supplies the relevant file contents and applies any change only after human review. \
Be specific, reference files by the paths you were given, and follow the requested output format.";

/// System prompt for single-file proposals
pub const PROPOSAL_SYSTEM_PROMPT: &str =
    "You are a code assistant. Return only the modified file content, nothing else.";

/// System prompt for free-form ticket discussion
pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant that helps users manage files \
and content in their project. Be concise and helpful.";

/// System prompt for follow-up questions on a ticket
pub const PROBE_SYSTEM_PROMPT: &str = "You are a helpful assistant continuing the analysis of a \
ticket. Answer the follow-up question concisely using the ticket context and the previous \
suggestion.";

/// Task description for resolving a ticket, ending with the directive block
/// format the parser understands.
pub fn build_ticket_task(ticket: &Ticket, project: Option<&Project>) -> String {
    let mut task = String::from("Analyze and resolve this ticket:\n");

    if let Some(project) = project {
        task.push_str(&format!("\nProject: {}\n", project.title));
        task.push_str(&format!(
            "Frontend URL: {}\n",
            project.frontend_url.as_deref().unwrap_or("N/A")
        ));
        task.push_str(&format!(
            "Backend URL: {}\n",
            project.backend_url.as_deref().unwrap_or("N/A")
        ));
    }

    task.push_str(&format!("\nTitle: {}\n", ticket.title));
    task.push_str(&format!("Category: {}\n", ticket.category.as_str()));
    task.push_str(&format!("Priority: {}\n", ticket.priority.as_str()));
    task.push_str(&format!(
        "Description: {}\n\n",
        ticket
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("No description provided")
    ));

    task.push_str("Please:\n");
    task.push_str("1. Identify the relevant files in the codebase\n");
    task.push_str("2. Analyze the issue (use the API blueprint info if relevant)\n");
    task.push_str("3. Provide a detailed resolution or implementation plan\n");
    task.push_str("4. If it's a bug, explain the root cause and fix\n");
    task.push_str("5. If it's a feature/task, provide implementation steps\n");
    task.push_str("6. Reference specific API endpoints if the issue involves the API\n");
    task.push_str(&format!(
        "7. IMPORTANT: At the end, list the files that need to be modified in this format:\n   \
         {}\n   \
         - path/to/file1.py: description of changes needed\n   \
         - path/to/file2.js: description of changes needed",
        DIRECTIVE_MARKER
    ));

    task
}

/// Focused analysis prompt: task, upstream context, then each file's content
pub fn build_analysis_prompt(task: &str, api_context: &str, files: &[FileContent]) -> String {
    let content_block = files
        .iter()
        .map(|file| format!("=== {} ===\n{}", file.path, file.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Task: {}\n\n{}\n\nRelevant files:\n\n{}",
        task, api_context, content_block
    )
}

/// Ask for the complete modified content of one file
pub fn build_proposal_prompt(instruction: &str, original_content: &str) -> String {
    format!(
        "Please modify this file according to the instruction.\n\
         Return ONLY the complete modified file content, no explanations or markdown code blocks.\n\n\
         Instruction: {}\n\n\
         Current file content:\n{}",
        instruction, original_content
    )
}

/// Follow-up question seeded with the ticket and its previous suggestion
pub fn build_probe_prompt(ticket: &Ticket, message: &str) -> String {
    format!(
        "Continuing analysis of ticket #{}:\n\
         Title: {}\n\
         Category: {}\n\
         Previous AI suggestion: {}\n\n\
         User's follow-up question: {}",
        ticket.id,
        ticket.title,
        ticket.category.as_str(),
        ticket.ai_suggestion.as_deref().unwrap_or("None"),
        message
    )
}

/// Discussion message seeded with the full ticket context
pub fn build_chat_prompt(ticket: &Ticket, message: &str) -> String {
    format!(
        "Discussing ticket #{}:\n\
         Title: {}\n\
         Category: {}\n\
         Priority: {}\n\
         Status: {}\n\
         Description: {}\n\
         AI Suggestion: {}\n\n\
         User message: {}",
        ticket.id,
        ticket.title,
        ticket.category.as_str(),
        ticket.priority.as_str(),
        ticket.status.as_str(),
        ticket.description.as_deref().unwrap_or("None"),
        ticket.ai_suggestion.as_deref().unwrap_or("None"),
        message
    )
}

/// Instruction passed to the proposal step for one directive
pub fn directive_instruction(ticket_title: &str, instruction: &str) -> String {
    if instruction.trim().is_empty() {
        format!("Apply fix for: {}", ticket_title)
    } else {
        format!("{}: {}", ticket_title, instruction.trim())
    }
}

/// Remove one enclosing markdown code fence, if the model added one anyway.
///
/// Left untouched when the original file is itself a fenced block. The
/// unwrapped body ends with a newline only if the original did.
pub fn strip_code_fence(response: &str, original: &str) -> String {
    if original.trim_start().starts_with("```") {
        return response.to_string();
    }

    let trimmed = response.trim();
    if !trimmed.starts_with("```") || !trimmed.ends_with("```") || trimmed.len() < 6 {
        return response.to_string();
    }

    let inner = &trimmed[3..trimmed.len() - 3];
    // Drop the info string (```python) along with the opening line
    let Some((_, body)) = inner.split_once('\n') else {
        return response.to_string();
    };
    let body = body.strip_suffix('\n').unwrap_or(body);
    let body = body.strip_suffix('\r').unwrap_or(body);

    if original.ends_with('\n') {
        format!("{}\n", body)
    } else {
        body.to_string()
    }
}
