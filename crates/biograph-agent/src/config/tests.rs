#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use biograph_resilience::RateLimitConfig;

    use super::super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert_eq!(config.storage.runs_dir(), PathBuf::from("./data").join("runs"));
        assert_eq!(config.orchestrator.max_concurrency, 4);
        assert_eq!(config.rate_limits.literature, RateLimitConfig::ncbi());
        assert_eq!(config.rate_limits.embeddings, RateLimitConfig::embeddings());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::parse(
            r#"
            [pubmed]
            email = "lab@example.org"

            [embedding]
            base_url = "http://localhost:11434"
            model = "nomic-embed-text"
            dim = 768

            [storage]
            data_dir = "/var/lib/biograph"

            [orchestrator]
            max_concurrency = 2
            max_results = 25
            search_terms = ["KRAS G12D"]

            [rate_limits.literature]
            requests_per_second = 10.0
            requests_per_minute = 600
            burst_size = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.pubmed.email, "lab@example.org");
        assert_eq!(config.pubmed.tool, "biograph");
        assert_eq!(config.embedding.dim, 768);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/biograph"));
        assert_eq!(config.orchestrator.max_results, Some(25));
        assert_eq!(config.orchestrator.search_terms, vec!["KRAS G12D".to_string()]);
        assert_eq!(config.rate_limits.literature.requests_per_minute, 600);
        assert_eq!(config.rate_limits.genes, RateLimitConfig::ncbi());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(Config::parse("[orchestrator]\nmax_concurrency = \"many\"").is_err());
    }

    #[test]
    fn test_env_fills_only_blank_keys() {
        let env: HashMap<&str, &str> =
            [(PUBMED_KEY_ENV, "ncbi-key"), (EMBEDDING_KEY_ENV, "embed-key")].into();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        let mut config = Config::default();
        config.genes.api_key = Some("from-file".into());
        config.apply_env(lookup);

        assert_eq!(config.pubmed.api_key.as_deref(), Some("ncbi-key"));
        assert_eq!(config.genes.api_key.as_deref(), Some("from-file"));
        assert_eq!(config.embedding.api_key.as_deref(), Some("embed-key"));

        let mut untouched = Config::default();
        untouched.apply_env(|_| None);
        assert_eq!(untouched.pubmed.api_key, None);
    }

    #[test]
    fn test_checks_report_missing_email_and_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");

        let checks = config.checks();
        let by_name: HashMap<&str, bool> = checks.iter().map(|c| (c.name.as_str(), c.ok)).collect();
        assert_eq!(by_name["contact-email"], false);
        assert_eq!(by_name["embedding-endpoint"], true);
        assert_eq!(by_name["data-dir-writable"], true);
        assert!(config.storage.data_dir.is_dir());

        config.pubmed.email = "lab@example.org".into();
        assert!(config.checks().iter().all(|c| c.ok));
    }

    #[test]
    fn test_unwritable_data_dir_fails_check() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let mut config = Config::default();
        config.pubmed.email = "lab@example.org".into();
        config.storage.data_dir = file;

        let failed: Vec<_> = config.checks().into_iter().filter(|c| !c.ok).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "data-dir-writable");
    }
}
