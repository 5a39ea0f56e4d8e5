use serde::Deserialize;

/// Tunables for response truncation and caching. Immutable after load.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ProxySettings {
    /// Character threshold above which a response is truncated and cached.
    pub max_response_size: usize,
    /// Whether oversized responses are truncated at all.
    pub enable_auto_truncation: bool,
    /// Maximum number of cache entries per agent pool.
    pub cache_max_entries: usize,
    /// Time-to-live in seconds for each cache entry.
    #[serde(rename = "cacheTTLSeconds")]
    pub cache_ttl_seconds: u64,
    /// Whether cached entries are isolated per agent.
    pub enable_agent_isolation: bool,
    /// Maximum number of cache entries in a single agent's pool.
    pub max_entries_per_agent: usize,
    /// Maximum total bytes of cached text per agent pool.
    pub max_memory_per_agent: usize,
    /// Maximum number of agent pools kept alive at once.
    pub max_total_agents: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            max_response_size: 8000,
            enable_auto_truncation: true,
            cache_max_entries: 50,
            cache_ttl_seconds: 300,
            enable_agent_isolation: true,
            max_entries_per_agent: 50,
            max_memory_per_agent: 50 * 1024 * 1024,
            max_total_agents: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::ProxySettings;

    #[test]
    fn camel_case_keys() {
        let settings: ProxySettings = serde_json::from_str(indoc! {r#"
            {
                "maxResponseSize": 4000,
                "cacheTTLSeconds": 60,
                "enableAutoTruncation": false
            }
        "#})
        .unwrap();

        assert_eq!(settings.max_response_size, 4000);
        assert_eq!(settings.cache_ttl_seconds, 60);
        assert!(!settings.enable_auto_truncation);
        // Untouched fields keep their defaults.
        assert_eq!(settings.cache_max_entries, 50);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let result = serde_json::from_str::<ProxySettings>(r#"{"maxResponseSiez": 4000}"#);
        assert!(result.is_err());
    }
}
