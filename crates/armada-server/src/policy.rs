//! Role-based access rules for the API routes.
//!
//! A policy file maps rule names to expressions:
//!
//! ```toml
//! admin_required = "role:admin or role:armada_admin"
//! "armada:create_endpoints" = "rule:admin_required"
//! "armada:get_release" = "@"
//! ```
//!
//! An expression is a list of `or` alternatives, each a list of `and`ed
//! checks. A check is `@` (always), `!` (never), `role:NAME` or `rule:OTHER`.
//! Unknown rules deny.

use crate::ServerError;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Nesting limit for `rule:` references, so a cycle denies instead of looping.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Check {
    Always,
    Never,
    Role(String),
    Rule(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyEnforcer {
    /// Alternatives of conjunctions, per rule.
    rules: BTreeMap<String, Vec<Vec<Check>>>,
}

impl PolicyEnforcer {
    pub fn parse(content: &str) -> Result<Self, ServerError> {
        let raw: BTreeMap<String, String> =
            toml::from_str(content).map_err(|e| ServerError::Policy(e.to_string()))?;
        let mut rules = BTreeMap::new();
        for (name, expr) in raw {
            let parsed = parse_expression(&expr)
                .map_err(|e| ServerError::Policy(format!("rule {name}: {e}")))?;
            rules.insert(name, parsed);
        }
        Ok(Self { rules })
    }

    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Policy(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Every route open to every caller.
    pub fn allow_all(rules: &[&str]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|r| ((*r).to_owned(), vec![vec![Check::Always]]))
                .collect(),
        }
    }

    pub fn enforce(&self, rule: &str, roles: &[String]) -> bool {
        let allowed = self.check_rule(rule, roles, 0);
        debug!("policy {rule} for roles {roles:?}: {}", if allowed { "allow" } else { "deny" });
        allowed
    }

    fn check_rule(&self, rule: &str, roles: &[String], depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return false;
        }
        let Some(alternatives) = self.rules.get(rule) else {
            return false;
        };
        alternatives.iter().any(|conj| {
            conj.iter().all(|check| match check {
                Check::Always => true,
                Check::Never => false,
                Check::Role(role) => roles.iter().any(|r| r.eq_ignore_ascii_case(role)),
                Check::Rule(other) => self.check_rule(other, roles, depth + 1),
            })
        })
    }
}

fn parse_expression(expr: &str) -> Result<Vec<Vec<Check>>, String> {
    let expr = expr.trim();
    // An empty expression allows everyone.
    if expr.is_empty() {
        return Ok(vec![vec![Check::Always]]);
    }
    expr.split(" or ")
        .map(|alt| alt.split(" and ").map(parse_check).collect::<Result<Vec<_>, _>>())
        .collect()
}

fn parse_check(token: &str) -> Result<Check, String> {
    let token = token.trim();
    match token {
        "@" => return Ok(Check::Always),
        "!" => return Ok(Check::Never),
        _ => {}
    }
    match token.split_once(':') {
        Some(("role", name)) if !name.is_empty() => Ok(Check::Role(name.to_owned())),
        Some(("rule", name)) if !name.is_empty() => Ok(Check::Rule(name.to_owned())),
        _ => Err(format!("unsupported check '{token}'")),
    }
}

/// Roles from a comma-separated `X-Roles` header value.
pub fn split_roles(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
admin_required = "role:admin or role:armada_admin"
service_or_admin = "rule:admin_required or role:service"
"armada:create_endpoints" = "rule:admin_required"
"armada:validate_manifest" = "rule:service_or_admin"
"armada:get_release" = "@"
"armada:delete_release" = "!"
"armada:both" = "role:a and role:b"
loop = "rule:loop"
"#;

    fn roles(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn rules_resolve_roles_and_references() {
        let policy = PolicyEnforcer::parse(POLICY).unwrap();
        assert!(policy.enforce("armada:create_endpoints", &roles(&["admin"])));
        assert!(!policy.enforce("armada:create_endpoints", &roles(&["service"])));
        assert!(policy.enforce("armada:validate_manifest", &roles(&["service"])));
        assert!(policy.enforce("armada:get_release", &[]));
        assert!(!policy.enforce("armada:delete_release", &roles(&["admin"])));
    }

    #[test]
    fn conjunction_needs_every_role() {
        let policy = PolicyEnforcer::parse(POLICY).unwrap();
        assert!(!policy.enforce("armada:both", &roles(&["a"])));
        assert!(policy.enforce("armada:both", &roles(&["b", "a"])));
    }

    #[test]
    fn unknown_and_cyclic_rules_deny() {
        let policy = PolicyEnforcer::parse(POLICY).unwrap();
        assert!(!policy.enforce("armada:missing", &roles(&["admin"])));
        assert!(!policy.enforce("loop", &roles(&["admin"])));
    }

    #[test]
    fn bad_checks_are_rejected() {
        let err = PolicyEnforcer::parse("x = \"group:ops\"\n").unwrap_err();
        assert!(err.to_string().contains("unsupported check"));
    }

    #[test]
    fn roles_header_is_split_and_trimmed() {
        assert_eq!(split_roles("admin, member,,"), vec!["admin", "member"]);
        assert!(split_roles("").is_empty());
    }
}
