use std::path::Path;

/// Hooks for surfacing agent activity. The CLI uses the colored console
/// observer; the A2A server logs through tracing instead.
pub trait AgentObserver: Send + Sync {
    fn on_log_file(&self, _path: &Path) {}
    fn on_thinking(&self, _text: &str) {}
    fn on_assistant_text(&self, _text: &str) {}
    fn on_tool_call(&self, _name: &str, _args_preview: &str) {}
    fn on_tool_result(&self, _name: &str, _success: bool, _preview: &str) {}
    fn on_compact_start(&self, _before: usize, _threshold: usize) {}
    fn on_compact_done(&self, _after: usize) {}
}

pub struct ConsoleObserver;

impl ConsoleObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentObserver for ConsoleObserver {
    fn on_log_file(&self, path: &Path) {
        use colored::*;
        println!("{} {}", "Transcript:".dimmed(), path.display());
    }
    fn on_thinking(&self, text: &str) {
        use colored::*;
        println!("\n{}\n{}", "Thinking:".magenta().bold(), text.dimmed());
    }
    fn on_assistant_text(&self, text: &str) {
        use colored::*;
        println!("\n{}\n{}", "Assistant:".bright_blue().bold(), text);
    }
    fn on_tool_call(&self, name: &str, args_preview: &str) {
        use colored::*;
        println!("\n{} {}", "Tool Call:".yellow().bold(), name.cyan().bold());
        for line in args_preview.lines() {
            println!("   {}", line.dimmed());
        }
    }
    fn on_tool_result(&self, _name: &str, success: bool, preview: &str) {
        use colored::*;
        if success {
            println!("{} {}", "Result:".green(), preview);
        } else {
            println!("{} {}", "Error:".red().bold(), preview.red());
        }
    }
    fn on_compact_start(&self, before: usize, threshold: usize) {
        use colored::*;
        println!(
            "\n{} Token estimate {}/{}; compacting history...",
            "*".yellow().bold(),
            before,
            threshold
        );
    }
    fn on_compact_done(&self, after: usize) {
        use colored::*;
        println!("{} History compacted, estimate now {}", "✓".green(), after);
    }
}

/// Observer that forwards to tracing; used by the A2A server where stdout
/// belongs to the structured logs.
pub struct TracingObserver;

impl AgentObserver for TracingObserver {
    fn on_log_file(&self, path: &Path) {
        tracing::debug!(transcript = %path.display(), "turn transcript started");
    }
    fn on_thinking(&self, text: &str) {
        tracing::debug!(reasoning = %text, "model reasoning");
    }
    fn on_assistant_text(&self, text: &str) {
        tracing::debug!(chars = text.len(), "assistant text");
    }
    fn on_tool_call(&self, name: &str, args_preview: &str) {
        tracing::info!(tool = %name, args = %args_preview, "tool call");
    }
    fn on_tool_result(&self, name: &str, success: bool, preview: &str) {
        if success {
            tracing::info!(tool = %name, "tool result ok");
        } else {
            tracing::warn!(tool = %name, error = %preview, "tool result error");
        }
    }
    fn on_compact_start(&self, before: usize, threshold: usize) {
        tracing::info!(before, threshold, "compacting history");
    }
    fn on_compact_done(&self, after: usize) {
        tracing::info!(after, "history compacted");
    }
}
