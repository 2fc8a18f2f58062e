use bedrock_core::{BedrockError, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::env;

// Supports both ${VAR} and ${VAR:-default}
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex pattern")
});

/// Substitute environment variables in raw YAML text before it is parsed, so
/// substituted numbers and booleans keep their YAML types. Comment lines are
/// left alone.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing_vars = Vec::new();
    let mut lines = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let substituted = ENV_VAR_REGEX.replace_all(line, |cap: &Captures| {
            let var_name = &cap[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => match cap.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => {
                        missing_vars.push(var_name.to_string());
                        String::new()
                    }
                },
            }
        });
        lines.push(substituted.into_owned());
    }

    if !missing_vars.is_empty() {
        return Err(BedrockError::ConfigError(format!(
            "Missing required environment variables: {}. Please set these variables before loading the configuration.",
            missing_vars.join(", ")
        )));
    }

    Ok(lines.join("\n"))
}
