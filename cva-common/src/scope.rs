//! `{{env.NAME}}` placeholder substitution for scope strings.
//!
//! Scope strings are sent verbatim to the analysis service as log and metric
//! filters, so an unset variable is an error rather than an empty match.

use crate::error::{AnalysisError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Read-only key/value lookup standing in for the process environment.
pub trait EnvLookup {
    /// Value of `name`, or `None` when unset.
    fn get(&self, name: &str) -> Option<String>;
}

/// [`EnvLookup`] backed by the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

impl<T: EnvLookup + ?Sized> EnvLookup for &T {
    fn get(&self, name: &str) -> Option<String> {
        (**self).get(name)
    }
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{env\.([^{}]*)\}\}").expect("placeholder pattern is valid"));

/// Replace every `{{env.X}}` in `scope` with the value of `X`.
///
/// Fails on the first unset variable, in left-to-right order.
pub fn resolve_scope(scope: &str, env: &dyn EnvLookup) -> Result<String> {
    let mut resolved = String::with_capacity(scope.len());
    let mut last = 0;

    for captures in PLACEHOLDER.captures_iter(scope) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = env
            .get(name.as_str())
            .ok_or_else(|| AnalysisError::MissingEnvironmentVariable(name.as_str().to_string()))?;
        resolved.push_str(&scope[last..whole.start()]);
        resolved.push_str(&value);
        last = whole.end();
    }
    resolved.push_str(&scope[last..]);

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitutes_every_placeholder() {
        let env = env(&[("STABLE_POD_HASH", "abc123"), ("APP", "issuegen")]);
        let resolved =
            resolve_scope("argocd,{{env.STABLE_POD_HASH}},demoapp-{{env.APP}}", &env).unwrap();
        assert_eq!(resolved, "argocd,abc123,demoapp-issuegen");
    }

    #[test]
    fn test_repeated_placeholder_in_one_element() {
        let env = env(&[("H", "x")]);
        assert_eq!(resolve_scope(".*{{env.H}}-{{env.H}}.*", &env).unwrap(), ".*x-x.*");
    }

    #[test]
    fn test_plain_scope_unchanged() {
        let env = env(&[]);
        assert_eq!(
            resolve_scope("oes-datascience-br", &env).unwrap(),
            "oes-datascience-br"
        );
    }

    #[test]
    fn test_unset_variable_is_an_error() {
        let env = env(&[("LATEST_POD_HASH", "canary")]);
        let err = resolve_scope(".*{{env.STABLE_POD_HASH}}.*", &env).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::MissingEnvironmentVariable("STABLE_POD_HASH".into())
        );
    }

    #[test]
    fn test_empty_value_is_allowed_when_set() {
        let env = env(&[("EMPTY", "")]);
        assert_eq!(resolve_scope("a{{env.EMPTY}}b", &env).unwrap(), "ab");
    }

    #[test]
    fn test_unterminated_placeholder_left_alone() {
        let env = env(&[]);
        assert_eq!(resolve_scope("{{env.OPEN", &env).unwrap(), "{{env.OPEN");
    }
}
