//! Module kinds and their parameter schemas

use rigging_core::{Value, ValueMap};
use rigging_core::value::type_name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What an action does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Run a program without a shell
    Command,
    /// Run a shell snippet
    Shell,
    /// Install or remove an OS package
    Package,
    /// Manage a path: directory, touched file, absence, permissions
    File,
    /// Write literal content to a file
    Copy,
    /// Start, stop or restart a system service
    Service,
    /// Print a message into the run report
    Debug,
    /// Bind host variables for the rest of the run
    SetFact,
    /// Fail the host unless every expression holds
    Assert,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 9] = [
        ModuleKind::Command,
        ModuleKind::Shell,
        ModuleKind::Package,
        ModuleKind::File,
        ModuleKind::Copy,
        ModuleKind::Service,
        ModuleKind::Debug,
        ModuleKind::SetFact,
        ModuleKind::Assert,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Command => "command",
            ModuleKind::Shell => "shell",
            ModuleKind::Package => "package",
            ModuleKind::File => "file",
            ModuleKind::Copy => "copy",
            ModuleKind::Service => "service",
            ModuleKind::Debug => "debug",
            ModuleKind::SetFact => "set_fact",
            ModuleKind::Assert => "assert",
        }
    }

    /// Local modules are evaluated by the engine and never reach the executor
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ModuleKind::Debug | ModuleKind::SetFact | ModuleKind::Assert
        )
    }

    pub fn schema(&self) -> ModuleSchema {
        let params = match self {
            ModuleKind::Command | ModuleKind::Shell => COMMAND_PARAMS,
            ModuleKind::Package => PACKAGE_PARAMS,
            ModuleKind::File => FILE_PARAMS,
            ModuleKind::Copy => COPY_PARAMS,
            ModuleKind::Service => SERVICE_PARAMS,
            ModuleKind::Debug => DEBUG_PARAMS,
            ModuleKind::SetFact => NO_PARAMS,
            ModuleKind::Assert => ASSERT_PARAMS,
        };
        ModuleSchema {
            params,
            open: matches!(self, ModuleKind::SetFact),
        }
    }
}

const NO_PARAMS: &[ParamSpec] = &[];

const COMMAND_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("cmd", ParamKind::String),
    ParamSpec::optional("creates", ParamKind::String),
    ParamSpec::optional("chdir", ParamKind::String),
];

const PACKAGE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("name", ParamKind::String),
    ParamSpec::optional("state", ParamKind::OneOf(&["present", "absent"])),
];

const FILE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("path", ParamKind::String),
    ParamSpec::optional(
        "state",
        ParamKind::OneOf(&["directory", "touch", "absent", "file"]),
    ),
    ParamSpec::optional("mode", ParamKind::Mode),
];

const COPY_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("dest", ParamKind::String),
    ParamSpec::required("content", ParamKind::String),
    ParamSpec::optional("mode", ParamKind::Mode),
];

const SERVICE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("name", ParamKind::String),
    ParamSpec::optional(
        "state",
        ParamKind::OneOf(&["started", "stopped", "restarted"]),
    ),
    ParamSpec::optional("enabled", ParamKind::Bool),
];

const DEBUG_PARAMS: &[ParamSpec] = &[
    ParamSpec::optional("msg", ParamKind::Any),
    ParamSpec::optional("var", ParamKind::String),
];

const ASSERT_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("that", ParamKind::StringOrList),
    ParamSpec::optional("fail_msg", ParamKind::String),
];

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown module '{s}'"))
    }
}

/// Accepted shape of a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Bool,
    /// Four octal digits such as "0644"
    Mode,
    /// A string or a list of strings
    StringOrList,
    OneOf(&'static [&'static str]),
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Declared parameters of a module
#[derive(Debug, Clone, Copy)]
pub struct ModuleSchema {
    pub params: &'static [ParamSpec],
    /// Accepts arbitrary keys (`set_fact`)
    pub open: bool,
}

impl ModuleSchema {
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Check parameter names only. Used on documents whose values may still
    /// be templates.
    pub fn check_keys(&self, params: &ValueMap) -> Result<(), String> {
        if !self.open {
            if let Some(key) = params.keys().find(|k| self.get(k).is_none()) {
                return Err(format!("unsupported parameter '{key}'"));
            }
        }
        match self.params.iter().find(|p| p.required && !params.contains_key(p.name)) {
            Some(missing) => Err(format!("missing required parameter '{}'", missing.name)),
            None => Ok(()),
        }
    }

    /// Full check of rendered parameters
    pub fn validate(&self, params: &ValueMap) -> Result<(), String> {
        self.check_keys(params)?;
        for spec in self.params {
            let Some(value) = params.get(spec.name) else {
                continue;
            };
            check_kind(spec, value)?;
        }
        Ok(())
    }
}

fn check_kind(spec: &ParamSpec, value: &Value) -> Result<(), String> {
    let expected = match spec.kind {
        ParamKind::Any => None,
        ParamKind::String => (!value.is_string()).then(|| "a string".to_string()),
        ParamKind::Bool => (!value.is_boolean()).then(|| "a boolean".to_string()),
        ParamKind::Mode => {
            let ok = value
                .as_str()
                .is_some_and(|s| s.len() == 4 && s.chars().all(|c| ('0'..='7').contains(&c)));
            (!ok).then(|| "four octal digits like \"0644\"".to_string())
        }
        ParamKind::StringOrList => {
            let ok = match value {
                Value::String(_) => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            };
            (!ok).then(|| "a string or a list of strings".to_string())
        }
        ParamKind::OneOf(choices) => {
            let ok = value.as_str().is_some_and(|s| choices.contains(&s));
            (!ok).then(|| format!("one of {}", choices.join(", ")))
        }
    };
    match expected {
        None => Ok(()),
        Some(expected) => Err(format!(
            "parameter '{}' must be {expected}, got {} {value}",
            spec.name,
            type_name(value)
        )),
    }
}
