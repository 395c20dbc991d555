//! Human-readable renderings of question and plan tool inputs

use serde_json::Value;
use std::collections::BTreeMap;

/// Summarise an `AskUserQuestion` input
///
/// Each question renders as `[header] question` followed by its numbered
/// options. Inputs without a `questions` list fall back to a single
/// `question` string, then to pretty-printed JSON.
pub fn format_question(input: &Value) -> String {
    let Some(questions) = input.get("questions").and_then(Value::as_array) else {
        return input
            .get("question")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| pretty(input));
    };

    let mut blocks = Vec::with_capacity(questions.len());
    for question in questions {
        let mut lines = Vec::new();
        let text = question.get("question").and_then(Value::as_str).unwrap_or("");
        match question.get("header").and_then(Value::as_str) {
            Some(header) if !header.is_empty() => lines.push(format!("[{}] {}", header, text)),
            _ => lines.push(text.to_string()),
        }

        let options = question
            .get("options")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (index, option) in options.iter().enumerate() {
            let label = option.get("label").and_then(Value::as_str).unwrap_or("");
            match option.get("description").and_then(Value::as_str) {
                Some(description) if !description.is_empty() => {
                    lines.push(format!("  {}. {} - {}", index + 1, label, description))
                }
                _ => lines.push(format!("  {}. {}", index + 1, label)),
            }
        }

        if question.get("multiSelect").and_then(Value::as_bool) == Some(true) {
            lines.push("  (multiple choice)".to_string());
        }
        blocks.push(lines.join("\n"));
    }

    if blocks.is_empty() {
        pretty(input)
    } else {
        blocks.join("\n\n")
    }
}

/// Extract the plan body from an `ExitPlanMode` input
pub fn format_plan(input: &Value) -> String {
    input
        .get("plan")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| pretty(input))
}

/// One `question: answer` line per answer
pub fn summarize_answers(answers: &BTreeMap<String, String>) -> String {
    answers
        .iter()
        .map(|(question, answer)| format!("{}: {}", question, answer))
        .collect::<Vec<_>>()
        .join("\n")
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
