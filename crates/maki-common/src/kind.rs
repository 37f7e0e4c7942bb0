use serde::{Deserialize, Serialize};

/// Upstream provider family. One credential pool exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Kiro,
    Codex,
    GeminiCli,
    Qwen,
    Letta,
    Custom,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Kiro,
        ProviderKind::Codex,
        ProviderKind::GeminiCli,
        ProviderKind::Qwen,
        ProviderKind::Letta,
        ProviderKind::Custom,
    ];

    /// Stable slug used in URLs, config keys and the credential directory layout.
    pub fn slug(&self) -> &'static str {
        match self {
            ProviderKind::Kiro => "kiro",
            ProviderKind::Codex => "codex",
            ProviderKind::GeminiCli => "gemini-cli",
            ProviderKind::Qwen => "qwen",
            ProviderKind::Letta => "letta",
            ProviderKind::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.slug().eq_ignore_ascii_case(raw))
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::ProviderKind;

    #[test]
    fn slug_round_trip() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::parse(kind.slug()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("GEMINI-CLI"), Some(ProviderKind::GeminiCli));
        assert_eq!(ProviderKind::parse("bedrock"), None);
    }
}
