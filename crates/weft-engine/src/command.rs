use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;

use weft_core::context::ExecutionContext;
use weft_core::error::{Result, WeftError};

/// Body of a declarative command spec: named flags plus positionals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandBody {
    #[serde(default)]
    pub flags: serde_yaml::Mapping,
    #[serde(default)]
    pub args: Vec<serde_yaml::Value>,
}

/// A parsed declarative command spec.
///
/// The YAML source must contain exactly one top-level key (the command
/// name) mapping to its `flags`/`args` body.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub body: CommandBody,
}

impl CommandSpec {
    pub fn parse(yaml: &str) -> Result<CommandSpec> {
        let doc: serde_yaml::Mapping = serde_yaml::from_str(yaml)
            .map_err(|e| WeftError::Workflow(format!("command spec parse error: {}", e)))?;
        if doc.len() != 1 {
            return Err(WeftError::Workflow(
                "command spec must contain exactly one top-level command".into(),
            ));
        }
        let (key, value) = doc
            .into_iter()
            .next()
            .ok_or_else(|| WeftError::Workflow("empty command spec".into()))?;
        let name = key
            .as_str()
            .ok_or_else(|| WeftError::Workflow("command name must be a string".into()))?
            .to_string();
        let body = if value.is_null() {
            CommandBody::default()
        } else {
            serde_yaml::from_value(value)?
        };
        Ok(CommandSpec { name, body })
    }

    /// Render the argv for this spec against a context.
    ///
    /// Single-character flag keys render as `-x`, longer ones as `--name`;
    /// a list value repeats the flag per item; a null value emits the flag
    /// alone. Every value undergoes `${NAME}` substitution.
    pub fn render(&self, ctx: &ExecutionContext) -> Result<Vec<String>> {
        let mut argv = Vec::new();

        for (key, value) in &self.body.flags {
            let name = key
                .as_str()
                .ok_or_else(|| WeftError::Workflow("flag names must be strings".into()))?;
            let flag = flag_token(name);
            match value {
                serde_yaml::Value::Sequence(items) => {
                    for item in items {
                        argv.push(flag.clone());
                        argv.push(substitute(&scalar_to_string(item), ctx));
                    }
                }
                serde_yaml::Value::Null => argv.push(flag),
                other => {
                    argv.push(flag);
                    argv.push(substitute(&scalar_to_string(other), ctx));
                }
            }
        }

        for item in &self.body.args {
            argv.push(substitute(&scalar_to_string(item), ctx));
        }

        Ok(argv)
    }
}

fn flag_token(name: &str) -> String {
    if name.chars().count() == 1 {
        format!("-{}", name)
    } else {
        format!("--{}", name)
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{(\w+)\}").expect("valid pattern"))
}

/// Replace `${NAME}` tokens with context values.
///
/// Missing keys become the empty string; objects and arrays are
/// JSON-stringified; other values are stringified bare.
pub fn substitute(input: &str, ctx: &ExecutionContext) -> String {
    var_pattern()
        .replace_all(input, |caps: &Captures| match ctx.get(&caps[1]) {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
        })
        .into_owned()
}
