//! 请求状态机
//!
//! RECEIVED → CLASSIFIED → {DIRECT_ANSWER | CLARIFYING | DECOMPOSED} → ROUTED → EXECUTING
//! → {COMPLETED | PARTIALLY_FAILED | FAILED}。拆解降级时 DECOMPOSED 可回落到 CLARIFYING。

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestPhase {
    Received,
    Classified,
    DirectAnswer,
    Clarifying,
    Decomposed,
    Routed,
    Executing,
    Completed,
    PartiallyFailed,
    Failed,
}

impl RequestPhase {
    pub fn can_transition_to(&self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Received, Classified)
                | (Classified, DirectAnswer)
                | (Classified, Clarifying)
                | (Classified, Decomposed)
                | (Decomposed, Clarifying)
                | (Decomposed, Routed)
                | (Routed, Executing)
                | (Executing, Completed)
                | (Executing, PartiallyFailed)
                | (Executing, Failed)
        )
    }

    /// 终态：之后不再有转换
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestPhase::DirectAnswer
                | RequestPhase::Clarifying
                | RequestPhase::Completed
                | RequestPhase::PartiallyFailed
                | RequestPhase::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPhase::Received => "RECEIVED",
            RequestPhase::Classified => "CLASSIFIED",
            RequestPhase::DirectAnswer => "DIRECT_ANSWER",
            RequestPhase::Clarifying => "CLARIFYING",
            RequestPhase::Decomposed => "DECOMPOSED",
            RequestPhase::Routed => "ROUTED",
            RequestPhase::Executing => "EXECUTING",
            RequestPhase::Completed => "COMPLETED",
            RequestPhase::PartiallyFailed => "PARTIALLY_FAILED",
            RequestPhase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 记录一次请求经过的阶段；非法转换被拒绝并记日志
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTrail {
    current: RequestPhase,
    visited: Vec<RequestPhase>,
}

impl PhaseTrail {
    pub fn new() -> Self {
        Self {
            current: RequestPhase::Received,
            visited: vec![RequestPhase::Received],
        }
    }

    pub fn current(&self) -> RequestPhase {
        self.current
    }

    pub fn visited(&self) -> &[RequestPhase] {
        &self.visited
    }

    /// 合法时前进并返回 true
    pub fn advance(&mut self, next: RequestPhase) -> bool {
        if !self.current.can_transition_to(next) {
            tracing::warn!(from = %self.current, to = %next, "illegal phase transition ignored");
            return false;
        }
        tracing::debug!(from = %self.current, to = %next, "phase transition");
        self.current = next;
        self.visited.push(next);
        true
    }
}

impl Default for PhaseTrail {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegated_path_is_legal() {
        let mut trail = PhaseTrail::new();
        for phase in [
            RequestPhase::Classified,
            RequestPhase::Decomposed,
            RequestPhase::Routed,
            RequestPhase::Executing,
            RequestPhase::PartiallyFailed,
        ] {
            assert!(trail.advance(phase));
        }
        assert!(trail.current().is_terminal());
        assert_eq!(trail.visited().len(), 6);
    }

    #[test]
    fn test_cannot_skip_classification_or_leave_terminal_states() {
        assert!(!RequestPhase::Received.can_transition_to(RequestPhase::Executing));
        assert!(!RequestPhase::Clarifying.can_transition_to(RequestPhase::Decomposed));
        assert!(!RequestPhase::Completed.can_transition_to(RequestPhase::Executing));
        assert!(RequestPhase::Decomposed.can_transition_to(RequestPhase::Clarifying));

        let mut trail = PhaseTrail::new();
        assert!(!trail.advance(RequestPhase::Routed));
        assert_eq!(trail.current(), RequestPhase::Received);
    }

    #[test]
    fn test_serializes_in_screaming_case() {
        assert_eq!(
            serde_json::to_string(&RequestPhase::PartiallyFailed).unwrap(),
            "\"PARTIALLY_FAILED\""
        );
    }
}
