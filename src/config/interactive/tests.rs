use super::load_existing_config as load_existing_config_impl;
use super::parse_namespace_list;
use tempfile::TempDir;

#[test]
fn load_existing_config() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let config = load_existing_config_impl(temp_dir.path()).expect("config loaded successfully");

    assert!(!config.ollama.host.is_empty());
    assert!(config.ollama.port > 0);
    assert!(!config.ollama.model.is_empty());
    assert!(config.ollama.batch_size > 0);
    assert_eq!(config.get_base_dir(), temp_dir.path());
}

#[test]
fn namespace_list_parsing() {
    assert_eq!(
        parse_namespace_list(" mosdac , mosdac-pdf,,"),
        vec!["mosdac", "mosdac-pdf"]
    );
    assert!(parse_namespace_list(" , ").is_empty());
}
