use maki_common::ProviderKind;

/// Static model → provider routing. An explicit `<provider>:` namespace
/// (as surfaced by `/api/tags`) always wins; otherwise the first matching
/// prefix rule applies, then the configured default.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    rules: Vec<(String, ProviderKind)>,
    default: ProviderKind,
}

impl ModelRouter {
    pub fn new(default: ProviderKind) -> Self {
        let rules = [
            ("claude-", ProviderKind::Kiro),
            ("gpt-", ProviderKind::Codex),
            ("codex-", ProviderKind::Codex),
            ("o3", ProviderKind::Codex),
            ("gemini-", ProviderKind::GeminiCli),
            ("qwen", ProviderKind::Qwen),
            ("letta-", ProviderKind::Letta),
        ]
        .into_iter()
        .map(|(prefix, kind)| (prefix.to_string(), kind))
        .collect();
        Self { rules, default }
    }

    pub fn with_rule(mut self, prefix: impl Into<String>, kind: ProviderKind) -> Self {
        self.rules.insert(0, (prefix.into(), kind));
        self
    }

    /// Resolve to `(provider, upstream model id)` with any namespace prefix
    /// stripped.
    pub fn resolve(&self, model: &str) -> (ProviderKind, String) {
        if let Some((namespace, rest)) = model.split_once(':')
            && let Some(kind) = ProviderKind::parse(namespace)
        {
            return (kind, rest.to_string());
        }
        let lowered = model.to_ascii_lowercase();
        for (prefix, kind) in &self.rules {
            if lowered.starts_with(prefix.as_str()) {
                return (*kind, model.to_string());
            }
        }
        (self.default, model.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_rules_route_families() {
        let router = ModelRouter::new(ProviderKind::Custom);
        assert_eq!(router.resolve("claude-sonnet-4").0, ProviderKind::Kiro);
        assert_eq!(router.resolve("gpt-5").0, ProviderKind::Codex);
        assert_eq!(router.resolve("gemini-2.5-pro").0, ProviderKind::GeminiCli);
        assert_eq!(router.resolve("qwen3-coder-plus").0, ProviderKind::Qwen);
        assert_eq!(router.resolve("mystery-model").0, ProviderKind::Custom);
    }

    #[test]
    fn namespace_prefix_wins_and_is_stripped() {
        let router = ModelRouter::new(ProviderKind::Custom);
        let (kind, model) = router.resolve("kiro:claude-sonnet-4");
        assert_eq!(kind, ProviderKind::Kiro);
        assert_eq!(model, "claude-sonnet-4");

        let (kind, model) = router.resolve("letta:assistant");
        assert_eq!(kind, ProviderKind::Letta);
        assert_eq!(model, "assistant");
    }
}
