/// Hierarchy scope the remote tool is currently displaying.
///
/// Re-scoping the tool is disruptive, so once a scope has been sent further
/// selections inside it use `selectCurObject` instead. One instance exists per
/// link and is never shared between links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeState {
    current_scope: String,
}

impl ScopeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed scope; empty until the first scope change is sent.
    pub fn current(&self) -> &str {
        &self.current_scope
    }

    pub fn should_rescope(&self, candidate: &str) -> bool {
        candidate != self.current_scope
    }

    /// Record a scope change the tool has been sent.
    pub fn commit(&mut self, scope: impl Into<String>) {
        self.current_scope = scope.into();
    }

    /// Forget the scope, e.g. when a new tool peer attaches.
    pub fn reset(&mut self) {
        self.current_scope.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_rescopes_any_path() {
        let scope = ScopeState::new();
        assert_eq!(scope.current(), "");
        assert!(scope.should_rescope("top.sub"));
        assert!(!scope.should_rescope(""));
    }

    #[test]
    fn commit_then_same_path_stays() {
        let mut scope = ScopeState::new();
        scope.commit("top.sub");
        assert!(!scope.should_rescope("top.sub"));
        assert!(scope.should_rescope("top"));
    }

    #[test]
    fn reset_clears_scope() {
        let mut scope = ScopeState::new();
        scope.commit("top");
        scope.reset();
        assert_eq!(scope, ScopeState::new());
    }
}
