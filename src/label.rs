//! Human-readable status lines for agent tool activity.

use serde_json::Value;

const MAX_SNIPPET: usize = 60;

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let mut short: String = text.chars().take(max_chars).collect();
        short.push('\u{2026}');
        short
    } else {
        text.to_string()
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn str_field<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}

/// Format a status line for an active tool invocation.
pub fn tool_label(name: &str, input: &Value) -> String {
    match name {
        "Read" => {
            let path = str_field(input, "file_path").unwrap_or("file");
            format!("\u{1f4c4} Reading {}...", file_name(path))
        }
        "Glob" => {
            let pattern = str_field(input, "pattern").unwrap_or("");
            format!("\u{1f50d} Searching {pattern}...")
        }
        "Grep" => {
            let pattern = str_field(input, "pattern").unwrap_or("");
            format!("\u{1f50d} Searching for \"{pattern}\"...")
        }
        "Bash" => {
            if let Some(cmd) = str_field(input, "command").filter(|c| !c.is_empty()) {
                format!("\u{2699}\u{fe0f} `{}`", truncate(cmd, MAX_SNIPPET))
            } else if let Some(desc) = str_field(input, "description").filter(|d| !d.is_empty()) {
                format!("\u{2699}\u{fe0f} {desc}")
            } else {
                "\u{2699}\u{fe0f} Running command...".to_string()
            }
        }
        "Write" | "Edit" => {
            let path = str_field(input, "file_path").unwrap_or("file");
            format!("\u{270f}\u{fe0f} Editing {}...", file_name(path))
        }
        "WebSearch" => "\u{1f310} Searching web...".to_string(),
        "WebFetch" => {
            let url = str_field(input, "url").unwrap_or("");
            format!("\u{1f310} Fetching {}...", truncate(url, MAX_SNIPPET))
        }
        "Task" => "\u{1f916} Delegating to sub-agent...".to_string(),
        other => format!("\u{1f527} Using {other}..."),
    }
}

/// Convert an active tool status line to its finished (checkmark) form.
pub fn finished_label(active: &str) -> String {
    let rest = match active.split_once(' ') {
        Some((_, rest)) => rest,
        None => active,
    };
    format!("\u{2713} {}", rest.trim_end_matches('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_shows_file_name_only() {
        let label = tool_label("Read", &json!({"file_path": "/srv/app/notes/today.md"}));
        assert_eq!(label, "\u{1f4c4} Reading today.md...");
    }

    #[test]
    fn grep_quotes_pattern() {
        let label = tool_label("Grep", &json!({"pattern": "fn main"}));
        assert_eq!(label, "\u{1f50d} Searching for \"fn main\"...");
    }

    #[test]
    fn bash_truncates_long_commands() {
        let cmd = "x".repeat(80);
        let label = tool_label("Bash", &json!({ "command": cmd }));
        assert!(label.ends_with("\u{2026}`"));
        assert!(label.chars().count() < 70);
    }

    #[test]
    fn bash_falls_back_to_description() {
        let label = tool_label("Bash", &json!({"description": "List files"}));
        assert_eq!(label, "\u{2699}\u{fe0f} List files");
    }

    #[test]
    fn bash_without_input_is_generic() {
        let label = tool_label("Bash", &json!({}));
        assert_eq!(label, "\u{2699}\u{fe0f} Running command...");
    }

    #[test]
    fn unknown_tool_uses_fallback() {
        let label = tool_label("NotebookEdit", &json!({}));
        assert_eq!(label, "\u{1f527} Using NotebookEdit...");
    }

    #[test]
    fn finished_drops_emoji_and_ellipsis() {
        assert_eq!(
            finished_label("\u{1f4c4} Reading today.md..."),
            "\u{2713} Reading today.md"
        );
    }

    #[test]
    fn finished_keeps_command_backticks() {
        assert_eq!(
            finished_label("\u{2699}\u{fe0f} `ls -la`"),
            "\u{2713} `ls -la`"
        );
    }
}
