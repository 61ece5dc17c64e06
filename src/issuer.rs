use crate::error::{AuthError, AuthResult};

/// A single issuer acceptance rule.
///
/// Rules are explicit: a suffix rule is never inferred from the shape of the
/// string, so a hostile issuer cannot accidentally widen an exact entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuerRule {
    Exact(String),
    Suffix(String),
}

impl IssuerRule {
    fn matches(&self, issuer: &str) -> bool {
        match self {
            IssuerRule::Exact(expected) => issuer == expected,
            IssuerRule::Suffix(suffix) => issuer.ends_with(suffix.as_str()),
        }
    }

    fn pattern(&self) -> &str {
        match self {
            IssuerRule::Exact(pattern) | IssuerRule::Suffix(pattern) => pattern,
        }
    }
}

/// Decides whether a claimed issuer is trusted.
///
/// Validated once at construction; `is_acceptable` is a pure membership test
/// with no side effects.
#[derive(Debug, Clone)]
pub struct IssuerPolicy {
    rules: Vec<IssuerRule>,
    required: Option<String>,
}

impl IssuerPolicy {
    pub fn new(rules: Vec<IssuerRule>, required: Option<String>) -> AuthResult<IssuerPolicy> {
        let policy = IssuerPolicy { rules, required };
        policy.validate()?;
        Ok(policy)
    }

    /// Convenience constructor for the common exact-match-only case.
    pub fn exact<I, S>(issuers: I) -> AuthResult<IssuerPolicy>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IssuerPolicy::new(
            issuers
                .into_iter()
                .map(|issuer| IssuerRule::Exact(issuer.into()))
                .collect(),
            None,
        )
    }

    fn validate(&self) -> AuthResult<()> {
        if self.rules.is_empty() {
            return Err(AuthError::ConfigurationError(
                "issuer policy has no acceptable issuers".to_string(),
            ));
        }
        if let Some(rule) = self.rules.iter().find(|rule| rule.pattern().trim().is_empty()) {
            return Err(AuthError::ConfigurationError(format!(
                "issuer policy contains a blank {} rule",
                match rule {
                    IssuerRule::Exact(_) => "exact",
                    IssuerRule::Suffix(_) => "suffix",
                }
            )));
        }
        if let Some(required) = &self.required {
            if !self.rules.iter().any(|rule| rule.matches(required)) {
                return Err(AuthError::ConfigurationError(format!(
                    "required issuer '{required}' is not accepted by any rule"
                )));
            }
        }
        Ok(())
    }

    pub fn is_acceptable(&self, issuer: &str) -> bool {
        if issuer.trim().is_empty() {
            return false;
        }
        if let Some(required) = &self.required {
            if issuer != required {
                return false;
            }
        }
        self.rules.iter().any(|rule| rule.matches(issuer))
    }

    pub fn required_issuer(&self) -> Option<&str> {
        self.required.as_deref()
    }
}
