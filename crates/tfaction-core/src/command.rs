//! Comment grammar.
//!
//! Turns the first line of a pull-request comment such as
//! `terraform plan -project=prod,staging -var="region=eu west"` into a
//! [`ParsedCommand`]. Comments that do not start with the trigger word and a
//! known verb are ordinary discussion and parse to `None`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Marker word a comment must start with unless configured otherwise.
pub const DEFAULT_TRIGGER: &str = "terraform";

const PROJECT_FLAG: &str = "-project=";
const SHORT_SELECTORS: [&str; 2] = ["-p", "-d"];

/// Infrastructure operation requested by a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Plan,
    Apply,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Plan => "plan",
            Operation::Apply => "apply",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a verb is not one of the supported operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Operation::Plan),
            "apply" => Ok(Operation::Apply),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

/// Structured form of a triggering comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub operation: Operation,

    /// Requested project names or directories, in comment order.
    /// Empty means every configured project.
    pub requested_projects: Vec<String>,

    /// Arguments forwarded verbatim to the tool.
    pub passthrough_args: Vec<String>,
}

/// Parser for `<trigger> <plan|apply> [-project=<csv>] [args...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentGrammar {
    trigger: String,
}

impl Default for CommentGrammar {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER)
    }
}

impl CommentGrammar {
    pub fn new(trigger: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
        }
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// Parse a raw comment. Only the first non-blank line is considered.
    pub fn parse(&self, raw: &str) -> Option<ParsedCommand> {
        let first_line = raw.trim().lines().next()?.trim();

        let tokens = match shell_words::split(first_line) {
            Ok(tokens) => tokens,
            Err(err) => {
                debug!(error = %err, "comment is not a command: unbalanced quoting");
                return None;
            }
        };

        let mut tokens = tokens.into_iter();
        if tokens.next()? != self.trigger {
            return None;
        }
        let operation: Operation = tokens.next()?.parse().ok()?;

        let rest: Vec<String> = tokens.collect();
        let mut requested_projects = Vec::new();
        let mut passthrough_args = Vec::new();

        let mut i = 0;
        while i < rest.len() {
            let token = &rest[i];
            if let Some(csv) = token.strip_prefix(PROJECT_FLAG) {
                requested_projects.extend(split_project_list(csv));
            } else if SHORT_SELECTORS.contains(&token.as_str()) && i + 1 < rest.len() {
                requested_projects.extend(split_project_list(&rest[i + 1]));
                i += 1;
            } else {
                passthrough_args.push(token.clone());
            }
            i += 1;
        }

        Some(ParsedCommand {
            operation,
            requested_projects,
            passthrough_args,
        })
    }
}

/// Parse with the default `terraform` trigger.
pub fn parse_comment(raw: &str) -> Option<ParsedCommand> {
    CommentGrammar::default().parse(raw)
}

fn split_project_list(csv: &str) -> impl Iterator<Item = String> + '_ {
    csv.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_with_project_list() {
        let cmd = parse_comment("terraform plan -project=production,staging").unwrap();
        assert_eq!(cmd.operation, Operation::Plan);
        assert_eq!(cmd.requested_projects, strings(&["production", "staging"]));
        assert!(cmd.passthrough_args.is_empty());
    }

    #[test]
    fn test_empty_project_elements_dropped() {
        let cmd = parse_comment("terraform plan -project=prod,,staging,").unwrap();
        assert_eq!(cmd.requested_projects, strings(&["prod", "staging"]));
    }

    #[test]
    fn test_empty_project_flag_means_all() {
        let cmd = parse_comment("terraform apply -project=").unwrap();
        assert_eq!(cmd.operation, Operation::Apply);
        assert!(cmd.requested_projects.is_empty());
        assert!(cmd.passthrough_args.is_empty());
    }

    #[test]
    fn test_quoted_argument_is_one_token() {
        let cmd = parse_comment(r#"terraform plan -var="foo=bar baz""#).unwrap();
        assert_eq!(cmd.passthrough_args, strings(&["-var=foo=bar baz"]));
    }

    #[test]
    fn test_single_quotes() {
        let cmd = parse_comment("terraform plan -var='a b' -refresh=false").unwrap();
        assert_eq!(cmd.passthrough_args, strings(&["-var=a b", "-refresh=false"]));
    }

    #[test]
    fn test_plain_comment_is_none() {
        assert!(parse_comment("just a comment").is_none());
        assert!(parse_comment("").is_none());
        assert!(parse_comment("   \n  ").is_none());
    }

    #[test]
    fn test_unknown_verb_is_none() {
        assert!(parse_comment("terraform destroy").is_none());
        assert!(parse_comment("terraform").is_none());
    }

    #[test]
    fn test_trigger_is_case_sensitive() {
        assert!(parse_comment("Terraform plan").is_none());
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        let cmd = parse_comment("\n\n   terraform plan   \n").unwrap();
        assert_eq!(cmd.operation, Operation::Plan);
    }

    #[test]
    fn test_only_first_line_considered() {
        let cmd = parse_comment("terraform plan -target=a\nplease also -target=b").unwrap();
        assert_eq!(cmd.passthrough_args, strings(&["-target=a"]));
    }

    #[test]
    fn test_short_selectors() {
        let cmd =
            parse_comment("terraform plan -p network -d infra/dns,infra/cdn -lock=false").unwrap();
        assert_eq!(
            cmd.requested_projects,
            strings(&["network", "infra/dns", "infra/cdn"])
        );
        assert_eq!(cmd.passthrough_args, strings(&["-lock=false"]));
    }

    #[test]
    fn test_trailing_selector_without_value_passes_through() {
        let cmd = parse_comment("terraform plan -p").unwrap();
        assert!(cmd.requested_projects.is_empty());
        assert_eq!(cmd.passthrough_args, strings(&["-p"]));
    }

    #[test]
    fn test_passthrough_order_preserved() {
        let cmd =
            parse_comment("terraform plan -target=a -project=x -target=b -parallelism=2").unwrap();
        assert_eq!(cmd.requested_projects, strings(&["x"]));
        assert_eq!(
            cmd.passthrough_args,
            strings(&["-target=a", "-target=b", "-parallelism=2"])
        );
    }

    #[test]
    fn test_unbalanced_quote_is_none() {
        assert!(parse_comment(r#"terraform plan -var="oops"#).is_none());
    }

    #[test]
    fn test_custom_trigger() {
        let grammar = CommentGrammar::new("atlantis");
        assert!(grammar.parse("atlantis plan").is_some());
        assert!(grammar.parse("terraform plan").is_none());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let input = "terraform apply -project=a,b -var='x=1 2'";
        assert_eq!(parse_comment(input), parse_comment(input));
    }

    #[test]
    fn test_operation_from_str() {
        assert_eq!("plan".parse::<Operation>().unwrap(), Operation::Plan);
        assert_eq!("apply".parse::<Operation>().unwrap(), Operation::Apply);
        assert!("import".parse::<Operation>().is_err());
        assert_eq!(Operation::Apply.to_string(), "apply");
    }
}
