use std::env;
use std::fs;
use tempfile::TempDir;

/// Test loading configuration from a YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
profiles:
  test:
    access_key: AKIATEST
    secret_key: secrettest
    region: us-west-2
    endpoint: http://127.0.0.1:9000
    bucket: test-bucket

proxy:
  listen: "127.0.0.1:9000"
  default_profile: test
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = s3cap::config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.profiles.len(), 1);
    assert!(config.profiles.contains_key("test"));

    let profile = config.profiles.get("test").unwrap();
    assert_eq!(profile.access_key, "AKIATEST");
    assert_eq!(profile.secret_key, "secrettest");
    assert_eq!(profile.region, "us-west-2");
    assert_eq!(profile.endpoint, Some("http://127.0.0.1:9000".to_string()));
    assert_eq!(profile.bucket, Some("test-bucket".to_string()));

    assert_eq!(config.proxy.listen, "127.0.0.1:9000");
    assert_eq!(config.proxy.default_profile, Some("test".to_string()));
}

/// Test loading configuration from environment variables (AWS standard format)
#[test]
fn test_load_env_config_aws_format() {
    // Save original env vars
    let orig_key = env::var("AWS_ACCESS_KEY_ID").ok();
    let orig_secret = env::var("AWS_SECRET_ACCESS_KEY").ok();
    let orig_token = env::var("AWS_SESSION_TOKEN").ok();
    let orig_region = env::var("AWS_REGION").ok();
    let orig_endpoint = env::var("S3_ENDPOINT").ok();

    env::set_var("AWS_ACCESS_KEY_ID", "test_key");
    env::set_var("AWS_SECRET_ACCESS_KEY", "test_secret");
    env::set_var("AWS_SESSION_TOKEN", "test_token");
    env::set_var("AWS_REGION", "eu-west-1");
    env::set_var("S3_ENDPOINT", "http://127.0.0.1:9000");

    let config = s3cap::config::load_from_env().unwrap();

    let profile = config.profiles.get("default").unwrap();
    assert_eq!(profile.access_key, "test_key");
    assert_eq!(profile.secret_key, "test_secret");
    assert_eq!(profile.session_token, Some("test_token".to_string()));
    assert_eq!(profile.region, "eu-west-1");
    assert_eq!(profile.endpoint, Some("http://127.0.0.1:9000".to_string()));

    assert_eq!(config.proxy.default_profile, Some("default".to_string()));

    // Restore original env vars
    cleanup_env("AWS_ACCESS_KEY_ID", orig_key);
    cleanup_env("AWS_SECRET_ACCESS_KEY", orig_secret);
    cleanup_env("AWS_SESSION_TOKEN", orig_token);
    cleanup_env("AWS_REGION", orig_region);
    cleanup_env("S3_ENDPOINT", orig_endpoint);
}

/// Test default values
#[test]
fn test_default_values() {
    let yaml = r#"
profiles:
  minimal:
    access_key: key
    secret_key: secret
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = s3cap::config::load_from_yaml(&config_path).unwrap();

    let profile = config.profiles.get("minimal").unwrap();
    // Should default to us-east-1
    assert_eq!(profile.region, "us-east-1");
    assert_eq!(profile.session_token, None);
    assert_eq!(profile.endpoint, None);
    assert_eq!(profile.bucket, None);

    // Should use default proxy settings
    assert_eq!(config.proxy.listen, "0.0.0.0:8000");
}

/// Test get_profile method
#[test]
fn test_get_profile() {
    let yaml = r#"
profiles:
  prod:
    access_key: prod_key
    secret_key: prod_secret
  dev:
    access_key: dev_key
    secret_key: dev_secret

proxy:
  default_profile: prod
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = s3cap::config::load_from_yaml(&config_path).unwrap();

    // Get specific profile
    let dev_profile = config.get_profile(Some("dev")).unwrap();
    assert_eq!(dev_profile.access_key, "dev_key");

    // Get default profile (None specified, should use proxy.default_profile)
    let default_profile = config.get_profile(None).unwrap();
    assert_eq!(default_profile.access_key, "prod_key");

    // Get non-existent profile
    assert!(config.get_profile(Some("nonexistent")).is_none());
}

/// Helper function to cleanup environment variables
fn cleanup_env(key: &str, orig_val: Option<String>) {
    match orig_val {
        Some(val) => env::set_var(key, val),
        None => env::remove_var(key),
    }
}
