//! Parses the model's ReAct-formatted replies.

const FINAL_ANSWER: &str = "Final Answer:";
const ACTION: &str = "Action:";
const ACTION_INPUT: &str = "Action Input:";

pub const MISSING_ACTION: &str = "Invalid Format: Missing 'Action:' after 'Thought:'";
pub const MISSING_ACTION_INPUT: &str = "Invalid Format: Missing 'Action Input:' after 'Action:'";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Action {
        thought: String,
        tool: String,
        input: String,
    },
    Finish {
        answer: String,
    },
    /// Unusable output; the message is fed back to the model as the observation.
    Invalid(&'static str),
}

pub fn parse(output: &str) -> Parsed {
    let action_at = output.find(ACTION);
    let answer_at = output.find(FINAL_ANSWER);

    // Whatever comes first wins; text after it is the model running ahead.
    match (action_at, answer_at) {
        (Some(action), Some(answer)) if answer < action => finish(output, answer),
        (None, Some(answer)) => finish(output, answer),
        (Some(action), _) => parse_action(output, action),
        (None, None) => Parsed::Invalid(MISSING_ACTION),
    }
}

fn finish(output: &str, at: usize) -> Parsed {
    Parsed::Finish {
        answer: output[at + FINAL_ANSWER.len()..].trim().to_string(),
    }
}

fn parse_action(output: &str, at: usize) -> Parsed {
    let thought = output[..at]
        .trim()
        .trim_start_matches("Thought:")
        .trim()
        .to_string();
    let rest = &output[at + ACTION.len()..];
    let Some(input_at) = rest.find(ACTION_INPUT) else {
        return Parsed::Invalid(MISSING_ACTION_INPUT);
    };

    let tool = rest[..input_at].trim().trim_matches('`').trim().to_string();
    if tool.is_empty() {
        return Parsed::Invalid(MISSING_ACTION);
    }
    let mut input = &rest[input_at + ACTION_INPUT.len()..];
    // Drop anything after a hallucinated observation.
    if let Some(cut) = input.find("\nObservation") {
        input = &input[..cut];
    }

    Parsed::Action {
        thought,
        tool,
        input: clean_input(input),
    }
}

/// Strip code fences and wrapping quotes the model likes to add.
fn clean_input(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(inner) = text.strip_prefix("```") {
        let inner = inner.strip_suffix("```").unwrap_or(inner);
        // Skip a language tag such as ```sql
        text = match inner.split_once('\n') {
            Some((tag, body)) if !tag.trim().contains(' ') => body,
            _ => inner,
        };
        text = text.trim();
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text = &text[1..text.len() - 1];
    }
    text.trim().to_string()
}
