use crate::{Error, Result};
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Runtime parameters passed to a test definition.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    /// Create empty params.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Get a parameter value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse from CLI args like "key=value".
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut params = Self::new();
        for arg in args {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                Error::Config(format!("invalid param '{}', expected key=value", arg))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::Config(format!("invalid param '{}', empty key", arg)));
            }
            params.values.insert(key.to_string(), value.to_string());
        }
        Ok(params)
    }
}

/// Parameter definition declared in a test file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParamDef {
    /// Whether this parameter is required.
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided.
    pub default: Option<String>,

    /// Description for documentation.
    pub description: Option<String>,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{(env:)?([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("placeholder regex")
    })
}

/// Substitute `${name}` and `${env:NAME}` placeholders in a string.
///
/// Lookup order for `${name}`: explicit params, then the declared default.
/// A required param with neither is an error; an undeclared one is left as-is.
/// `${env:NAME}` reads the process environment and falls back to params.
pub fn substitute(
    template: &str,
    params: &Params,
    defs: &HashMap<String, ParamDef>,
) -> Result<String> {
    let mut missing: Option<String> = None;

    let out = placeholder_re().replace_all(template, |caps: &Captures<'_>| {
        let whole = caps[0].to_string();
        let name = &caps[2];

        if caps.get(1).is_some() {
            return std::env::var(name)
                .ok()
                .or_else(|| params.get(name).map(str::to_string))
                .unwrap_or_else(|| {
                    missing.get_or_insert_with(|| format!("env:{}", name));
                    whole
                });
        }

        if let Some(v) = params.get(name) {
            return v.to_string();
        }
        match defs.get(name) {
            Some(def) => match (&def.default, def.required) {
                (Some(default), _) => default.clone(),
                (None, true) => {
                    missing.get_or_insert_with(|| name.to_string());
                    whole
                }
                (None, false) => String::new(),
            },
            None => whole,
        }
    });

    if let Some(name) = missing {
        return Err(Error::Config(format!("missing required parameter: {}", name)));
    }
    Ok(out.into_owned())
}

/// Recursively substitute params in every string of a YAML document.
pub fn substitute_value(
    value: &mut serde_yaml::Value,
    params: &Params,
    defs: &HashMap<String, ParamDef>,
) -> Result<()> {
    match value {
        serde_yaml::Value::String(s) => {
            *s = substitute(s, params, defs)?;
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, params, defs)?;
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_value(v, params, defs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(required: bool, default: Option<&str>) -> ParamDef {
        ParamDef {
            required,
            default: default.map(str::to_string),
            description: None,
        }
    }

    #[test]
    fn substitutes_explicit_param() {
        let params = Params::new().set("host", "staging.example.test");
        let out = substitute("https://${host}/login", &params, &HashMap::new()).unwrap();
        assert_eq!(out, "https://staging.example.test/login");
    }

    #[test]
    fn falls_back_to_default() {
        let mut defs = HashMap::new();
        defs.insert("tenant".to_string(), def(false, Some("acme")));
        let out = substitute("switch to ${tenant}", &Params::new(), &defs).unwrap();
        assert_eq!(out, "switch to acme");
    }

    #[test]
    fn required_param_missing_is_error() {
        let mut defs = HashMap::new();
        defs.insert("password".to_string(), def(true, None));
        let err = substitute("${password}", &Params::new(), &defs).unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn optional_param_without_default_is_empty() {
        let mut defs = HashMap::new();
        defs.insert("suffix".to_string(), def(false, None));
        let out = substitute("name${suffix}", &Params::new(), &defs).unwrap();
        assert_eq!(out, "name");
    }

    #[test]
    fn undeclared_placeholder_is_kept() {
        let out = substitute("${unknown} stays", &Params::new(), &HashMap::new()).unwrap();
        assert_eq!(out, "${unknown} stays");
    }

    #[test]
    fn env_placeholder_reads_environment() {
        std::env::set_var("EOKA_QA_PARAMS_TEST_HOST", "ci.example.test");
        let out = substitute(
            "https://${env:EOKA_QA_PARAMS_TEST_HOST}",
            &Params::new(),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(out, "https://ci.example.test");
    }

    #[test]
    fn env_placeholder_missing_is_error() {
        let err = substitute(
            "${env:EOKA_QA_PARAMS_TEST_SURELY_UNSET}",
            &Params::new(),
            &HashMap::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("EOKA_QA_PARAMS_TEST_SURELY_UNSET"));
    }

    #[test]
    fn params_from_args() {
        let args = vec!["email=qa@example.test".to_string(), "pass=a=b".to_string()];
        let params = Params::from_args(&args).unwrap();
        assert_eq!(params.get("email"), Some("qa@example.test"));
        assert_eq!(params.get("pass"), Some("a=b"));
        assert!(Params::from_args(&["novalue".to_string()]).is_err());
        assert!(Params::from_args(&["=x".to_string()]).is_err());
    }
}
