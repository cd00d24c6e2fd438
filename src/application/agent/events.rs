use super::models::AgentStep;

/// Events emitted by the streaming agent run, in arrival order.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// An incremental piece of the assistant's answer.
    Token(String),
    /// A tool call completed; carries the full step record.
    ToolResult(AgentStep),
}

/// Decides whether model output may be forwarded to the user as it streams.
///
/// Tool calls arrive as JSON directives, which must not be echoed token by
/// token. The gate buffers fragments until the start of the reply is known:
/// plain prose flows through live, anything that opens like a JSON object or
/// a code fence is withheld. If a withheld reply turns out to be a `final`
/// directive, the runner replays its extracted text instead.
#[derive(Debug, Default)]
pub struct StreamGate {
    buffered: String,
    decision: Option<Decision>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Forward,
    Hold,
}

impl StreamGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns text that may be printed now, if any.
    pub fn accept(&mut self, fragment: &str) -> Option<String> {
        match self.decision {
            Some(Decision::Forward) => Some(fragment.to_string()),
            Some(Decision::Hold) => None,
            None => {
                self.buffered.push_str(fragment);
                let head = self.buffered.trim_start();
                if head.is_empty() {
                    return None;
                }
                if head.starts_with('{') || head.starts_with("```") {
                    self.decision = Some(Decision::Hold);
                    return None;
                }
                if "```".starts_with(head) {
                    // Could still become a code fence; keep buffering.
                    return None;
                }
                self.decision = Some(Decision::Forward);
                Some(std::mem::take(&mut self.buffered))
            }
        }
    }

    /// Whether any text was forwarded live.
    pub fn forwarded(&self) -> bool {
        self.decision == Some(Decision::Forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_prose_flows_through_from_first_fragment() {
        let mut gate = StreamGate::new();
        assert_eq!(gate.accept("Sure, ").as_deref(), Some("Sure, "));
        assert_eq!(gate.accept("done.").as_deref(), Some("done."));
        assert!(gate.forwarded());
    }

    #[test]
    fn json_directive_is_withheld() {
        let mut gate = StreamGate::new();
        assert!(gate.accept("{\"action\":").is_none());
        assert!(gate.accept("\"call_tool\"}").is_none());
        assert!(!gate.forwarded());
    }

    #[test]
    fn leading_whitespace_does_not_decide() {
        let mut gate = StreamGate::new();
        assert!(gate.accept("\n  ").is_none());
        assert_eq!(
            gate.accept("here you go").as_deref(),
            Some("\n  here you go")
        );
    }

    #[test]
    fn partial_code_fence_stays_buffered_until_resolved() {
        let mut gate = StreamGate::new();
        assert!(gate.accept("`").is_none());
        assert!(gate.accept("`").is_none());
        assert!(gate.accept("`json").is_none());
        assert!(!gate.forwarded());
    }

    #[test]
    fn inline_code_at_start_is_still_prose() {
        let mut gate = StreamGate::new();
        assert_eq!(gate.accept("`ls -la` lists files").as_deref(), Some("`ls -la` lists files"));
        assert!(gate.forwarded());
    }
}
