//! Request validation that runs before anything touches the store.
//!
//! Hard failures return `DaemonError::Validation`. Suspicious but legal input
//! (a name with a path separator, an `rm -rf /`) only adds a warning that is
//! returned to the client alongside the result.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::core::error::{DaemonError, DaemonResult};
use crate::core::executor::Language;
use crate::core::scheduler::parse_cron;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_CODE_LEN: usize = 100_000;
pub const MAX_ENV_VALUE_LEN: usize = 32_768;
pub const MAX_TIMEOUT_SECS: i64 = 86_400;
pub const MAX_RETRIES: i64 = 10;
pub const MAX_RETRY_DELAY_SECS: i64 = 3_600;
const LOG_PREVIEW_CHARS: usize = 200;

fn compile(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    patterns
        .iter()
        .filter_map(|(p, what)| Regex::new(p).ok().map(|re| (re, *what)))
        .collect()
}

static SHELL_HAZARDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile(&[
        (r"\brm\s+-rf\s+[/~]", "recursive delete on root or home directory"),
        (r"\bdd\s+.*of=/dev/", "direct disk write"),
        (r"\bmkfs\b", "filesystem formatting"),
        (r">\s*/dev/sd[a-z]", "direct write to block device"),
        (r"\bchmod\s+-R\s+777\b", "overly permissive chmod -R 777"),
        (r"\bchown\s+-R\s+.*\s+/\s*$", "recursive chown on root"),
        (r":\(\)\s*\{.*\}", "fork bomb pattern"),
        (r"\beval\s+", "use of eval"),
        (r"\b(curl|wget)\b[^|\n]*\|\s*(ba|z)?sh\b", "remote script piped to shell"),
        (r"\$\(.*\).*\|.*\bsh\b", "command substitution piped to shell"),
    ])
});

static PYTHON_HAZARDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile(&[
        (r"\bos\.system\s*\(", "os.system() call"),
        (r"\beval\s*\(", "eval() call"),
        (r"\bexec\s*\(", "exec() call"),
        (r"\b__import__\s*\(", "dynamic __import__()"),
    ])
});

static ENV_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

static SECRETS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i)\b(password|passwd|pwd|secret|token|api_key|key)\s*=\s*\S+",
            "${1}=****",
        ),
        (r"(?i)\b(Bearer|Basic)\s+\S+", "${1} ****"),
    ]
    .iter()
    .filter_map(|(p, with)| Regex::new(p).ok().map(|re| (re, *with)))
    .collect()
});

/// Trimmed name, or a validation error. `kind` names the entity in messages.
pub fn validate_name(kind: &str, name: &str, warnings: &mut Vec<String>) -> DaemonResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DaemonError::Validation(format!("{} name cannot be empty", kind)));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DaemonError::Validation(format!(
            "{} name exceeds {} characters",
            kind, MAX_NAME_LEN
        )));
    }
    if name.contains('\0') {
        return Err(DaemonError::Validation(format!(
            "{} name contains a NUL byte",
            kind
        )));
    }
    if name.starts_with('.') {
        warnings.push(format!("{} name '{}' starts with '.'", kind, name));
    }
    if name.contains(['/', '\\', ':']) {
        warnings.push(format!(
            "{} name '{}' contains a path separator",
            kind, name
        ));
    }
    Ok(name.to_string())
}

/// Size and content checks for code, plus hazard warnings for the language.
pub fn validate_code(code: &str, language: Language, warnings: &mut Vec<String>) -> DaemonResult<()> {
    if code.trim().is_empty() {
        return Err(DaemonError::Validation("code cannot be empty".into()));
    }
    if code.chars().count() > MAX_CODE_LEN {
        return Err(DaemonError::Validation(format!(
            "code exceeds {} characters",
            MAX_CODE_LEN
        )));
    }
    if code.contains('\0') {
        return Err(DaemonError::Validation("code contains a NUL byte".into()));
    }

    let hazards = if language == Language::Python {
        PYTHON_HAZARDS.as_slice()
    } else {
        SHELL_HAZARDS.as_slice()
    };
    for (re, what) in hazards {
        if re.is_match(code) {
            warnings.push(format!("dangerous pattern detected: {}", what));
        }
    }
    Ok(())
}

pub fn validate_env(env: &BTreeMap<String, String>) -> DaemonResult<()> {
    for (key, value) in env {
        let key_ok = ENV_KEY.as_ref().is_some_and(|re| re.is_match(key));
        if !key_ok {
            return Err(DaemonError::Validation(format!(
                "invalid environment variable name '{}'",
                key
            )));
        }
        if value.chars().count() > MAX_ENV_VALUE_LEN {
            return Err(DaemonError::Validation(format!(
                "environment variable '{}' exceeds {} characters",
                key, MAX_ENV_VALUE_LEN
            )));
        }
        if value.contains('\0') {
            return Err(DaemonError::Validation(format!(
                "environment variable '{}' contains a NUL byte",
                key
            )));
        }
    }
    Ok(())
}

pub fn validate_cron(expr: &str) -> DaemonResult<()> {
    parse_cron(expr).map(|_| ()).map_err(DaemonError::Validation)
}

/// Tags are trimmed, empties dropped, duplicates removed keeping first
/// occurrence order.
pub fn normalize_tags(tags: &[String]) -> DaemonResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || out.iter().any(|t| t == tag) {
            continue;
        }
        if tag.chars().count() > MAX_NAME_LEN || tag.contains('\0') {
            return Err(DaemonError::Validation(format!("invalid tag '{}'", tag)));
        }
        out.push(tag.to_string());
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
pub struct JobLimits {
    pub timeout_seconds: i64,
    pub max_retries: i64,
    pub retry_delay_seconds: i64,
    pub interval_seconds: Option<i64>,
    pub max_memory_mb: Option<i64>,
    pub max_cpu_percent: Option<f64>,
}

pub fn validate_job_limits(limits: &JobLimits) -> DaemonResult<()> {
    let range = |field: &str, value: i64, min: i64, max: i64| {
        if value < min || value > max {
            Err(DaemonError::Validation(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )))
        } else {
            Ok(())
        }
    };
    range("timeout_seconds", limits.timeout_seconds, 1, MAX_TIMEOUT_SECS)?;
    range("max_retries", limits.max_retries, 0, MAX_RETRIES)?;
    range(
        "retry_delay_seconds",
        limits.retry_delay_seconds,
        1,
        MAX_RETRY_DELAY_SECS,
    )?;
    if let Some(interval) = limits.interval_seconds
        && interval <= 0
    {
        return Err(DaemonError::Validation(
            "interval_seconds must be positive".into(),
        ));
    }
    if let Some(mb) = limits.max_memory_mb
        && mb <= 0
    {
        return Err(DaemonError::Validation("max_memory_mb must be positive".into()));
    }
    if let Some(cpu) = limits.max_cpu_percent
        && !(cpu > 0.0 && cpu.is_finite())
    {
        return Err(DaemonError::Validation(
            "max_cpu_percent must be positive".into(),
        ));
    }
    Ok(())
}

/// An existing non-directory is an error; a missing directory only warns,
/// since it may appear before the job runs.
pub fn validate_working_directory(dir: &str, warnings: &mut Vec<String>) -> DaemonResult<()> {
    let path = Path::new(dir);
    if !path.is_absolute() {
        warnings.push(format!("working directory '{}' is relative", dir));
    }
    if path.exists() {
        if !path.is_dir() {
            return Err(DaemonError::Validation(format!(
                "working directory '{}' is not a directory",
                dir
            )));
        }
    } else {
        warnings.push(format!("working directory '{}' does not exist", dir));
    }
    Ok(())
}

/// Mask obvious secrets and cut to a short preview for log lines.
pub fn sanitize_for_log(text: &str) -> String {
    let mut clean = text.replace('\n', " ");
    for (re, with) in SECRETS.iter() {
        clean = re.replace_all(&clean, *with).into_owned();
    }
    if clean.chars().count() > LOG_PREVIEW_CHARS {
        let cut: String = clean.chars().take(LOG_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        clean
    }
}
