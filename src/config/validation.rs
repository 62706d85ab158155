use crate::config::types::{
    Config, CrawlConfig, JobsConfig, OutputConfig, SchedulerConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_jobs_config(&config.jobs)?;
    validate_scheduler_config(&config.scheduler)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawl limits
pub fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    let rate = config.requests_per_second;
    if rate.is_nan() || rate <= 0.0 || rate.is_infinite() {
        return Err(ConfigError::Validation(format!(
            "requests_per_second must be a positive number, got {}",
            config.requests_per_second
        )));
    }

    if config.burst < 1 {
        return Err(ConfigError::Validation(format!(
            "burst must be >= 1, got {}",
            config.burst
        )));
    }

    if config.acquire_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "acquire_timeout_secs must be >= 1; blocking acquires are always bounded".to_string(),
        ));
    }

    if config.checkpoint_page_interval < 1 {
        return Err(ConfigError::Validation(format!(
            "checkpoint_page_interval must be >= 1, got {}",
            config.checkpoint_page_interval
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates job lifecycle timing
fn validate_jobs_config(config: &JobsConfig) -> Result<(), ConfigError> {
    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be > 0".to_string(),
        ));
    }

    if config.stale_after_secs >= config.timeout_secs {
        return Err(ConfigError::Validation(format!(
            "stale_after_secs ({}) must be smaller than timeout_secs ({})",
            config.stale_after_secs, config.timeout_secs
        )));
    }

    if config.lock_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "lock_ttl_secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates scheduler limits
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.global_concurrency < 1 || config.global_concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "global_concurrency must be between 1 and 256, got {}",
            config.global_concurrency
        )));
    }

    if config.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "poll_interval_secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
