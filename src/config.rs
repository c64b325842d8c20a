use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};

pub(crate) const ENV_URL: &str = "SLIPO_URL";
pub(crate) const ENV_KEY: &str = "SLIPO_API_KEY";
pub(crate) const ENV_RC: &str = "SLIPO_RC";
const RC_FILE: &str = ".slipoapirc";

#[derive(Debug, Default, PartialEq)]
struct RcConfig {
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
    requires_ssl: Option<bool>,
    timeout: Option<Duration>,
}

pub(crate) fn load_config(url: Option<String>, key: Option<String>) -> Result<ClientConfig> {
    let env = |name: &str| std::env::var(name).ok();
    let candidates = rc_candidates(&env);
    load_config_with(url, key, &env, &candidates)
}

fn load_config_with(
    url: Option<String>,
    key: Option<String>,
    env: &dyn Fn(&str) -> Option<String>,
    rc_candidates: &[PathBuf],
) -> Result<ClientConfig> {
    let mut url = url.or_else(|| env(ENV_URL));
    let mut key = key.or_else(|| env(ENV_KEY));

    let mut rc = RcConfig::default();
    if let Some(rc_path) = rc_candidates.iter().find(|p| p.is_file()) {
        rc = read_rc(rc_path)?;
        tracing::debug!(path = %rc_path.display(), "loaded configuration file");
    }

    if url.is_none() {
        url = rc.url.take();
    }
    if key.is_none() {
        key = rc.key.take();
    }

    let key = match key.map(|k| k.trim().to_string()) {
        Some(k) if !k.is_empty() => k,
        _ => {
            let searched = if rc_candidates.is_empty() {
                format!("create {}", RC_FILE)
            } else {
                format!(
                    "put `key:` in one of: {}",
                    rc_candidates
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            return Err(Error::config(format!(
                "missing API key (set {} or {})",
                ENV_KEY, searched
            )));
        }
    };

    Ok(ClientConfig {
        url: url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        key,
        verify: rc.verify.unwrap_or(true),
        requires_ssl: rc.requires_ssl.unwrap_or(true),
        timeout: rc.timeout.unwrap_or(DEFAULT_TIMEOUT),
    })
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_rc(&text).map_err(|message| Error::config(format!("{}: {}", path.display(), message)))
}

fn parse_rc(text: &str) -> std::result::Result<RcConfig, String> {
    let mut cfg = RcConfig::default();

    // `key:` may be followed by the value on the next line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') || line.contains("://") {
                let v = strip_quotes(line);
                match pk {
                    "url" => cfg.url = Some(v.to_string()),
                    "key" => cfg.key = Some(v.to_string()),
                    _ => {}
                }
                continue;
            }
        }

        // URLs contain ':' themselves, so only split on the first one.
        let Some((k, v)) = line.split_once(':') else {
            return Err(format!("malformed line `{}`", line));
        };
        let k = k.trim();
        let v = strip_quotes(v.trim());
        match k {
            "url" | "key" if v.is_empty() => pending_key = Some(k),
            "url" => cfg.url = Some(v.to_string()),
            "key" => cfg.key = Some(v.to_string()),
            "verify" => cfg.verify = Some(parse_flag(k, v)?),
            "requires_ssl" => cfg.requires_ssl = Some(parse_flag(k, v)?),
            "timeout" => {
                let secs: u64 = v
                    .parse()
                    .map_err(|_| format!("timeout must be a number of seconds, got `{}`", v))?;
                cfg.timeout = Some(Duration::from_secs(secs));
            }
            other => return Err(format!("unknown option `{}`", other)),
        }
    }

    Ok(cfg)
}

fn parse_flag(name: &str, v: &str) -> std::result::Result<bool, String> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(format!("{} must be a boolean, got `{}`", name, v)),
    }
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates(env: &dyn Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    // 1) SLIPO_RC (explicit)
    // 2) ./.slipoapirc
    // 3) ~/.slipoapirc
    if let Some(p) = env(ENV_RC) {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(RC_FILE));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(RC_FILE));
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn explicit_arguments_win_over_environment() {
        let env = env_of(&[(ENV_URL, "https://env.example/"), (ENV_KEY, "env-key")]);
        let cfg = load_config_with(
            Some("https://arg.example/".into()),
            Some("arg-key".into()),
            &env,
            &[],
        )
        .unwrap();
        assert_eq!(cfg.url, "https://arg.example/");
        assert_eq!(cfg.key, "arg-key");
        assert!(cfg.verify);
        assert!(cfg.requires_ssl);
    }

    #[test]
    fn environment_fills_missing_values_and_url_defaults() {
        let env = env_of(&[(ENV_KEY, "env-key")]);
        let cfg = load_config_with(None, None, &env, &[]).unwrap();
        assert_eq!(cfg.key, "env-key");
        assert_eq!(cfg.url, DEFAULT_BASE_URL);
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let env = env_of(&[]);
        let err = load_config_with(None, None, &env, &[]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "{err}");
    }

    #[test]
    fn reads_rc_file() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join(".slipoapirc");
        std::fs::write(
            &rc,
            "# local workbench\nurl: http://localhost:8080/\nkey:\n  'abc-123'\nverify: 0\nrequires_ssl: false\ntimeout: 15\n",
        )
        .unwrap();

        let env = env_of(&[]);
        let cfg = load_config_with(None, None, &env, &[dir.path().join("absent"), rc]).unwrap();
        assert_eq!(cfg.url, "http://localhost:8080/");
        assert_eq!(cfg.key, "abc-123");
        assert!(!cfg.verify);
        assert!(!cfg.requires_ssl);
        assert_eq!(cfg.timeout, Duration::from_secs(15));
    }

    #[test]
    fn unknown_rc_option_is_rejected() {
        let err = parse_rc("key: x\nproxy: http://p/\n").unwrap_err();
        assert!(err.contains("proxy"), "{err}");
    }

    #[test]
    fn rc_env_variable_overrides_search_path() {
        let env = env_of(&[(ENV_RC, "/etc/slipo/rc")]);
        assert_eq!(rc_candidates(&env), vec![PathBuf::from("/etc/slipo/rc")]);
    }
}
