//! Plays, actions and handlers

use crate::error::{ConvergeError, Result};
use crate::module::ModuleKind;
use rigging_core::{Expression, Value, ValueMap};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Variable names the engine binds itself
const RESERVED_VARS: &[&str] = &["host"];

/// An idempotent unit of configuration intent
///
/// Handlers use the same shape; they only run when notified.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub name: String,
    pub module: ModuleKind,
    pub params: ValueMap,
    /// Skip the action on a host when this evaluates false
    pub when: Option<Expression>,
    /// Bind the result under this name for later actions on the same host
    pub register: Option<String>,
    /// Handlers to notify when the action reports a change
    pub notify: Vec<String>,
    /// Record a failure but keep going on this host
    pub ignore_errors: bool,
}

impl Action {
    pub fn new(name: impl Into<String>, module: ModuleKind) -> Self {
        Self {
            name: name.into(),
            module,
            params: ValueMap::new(),
            when: None,
            register: None,
            notify: Vec::new(),
            ignore_errors: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_when(mut self, condition: Expression) -> Self {
        self.when = Some(condition);
        self
    }

    pub fn with_register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    pub fn with_notify(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }

    fn validate(&self, handlers: &BTreeSet<&str>) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("action without a name".to_string());
        }
        self.module
            .schema()
            .check_keys(&self.params)
            .map_err(|e| format!("{}: {e}", self.module))?;
        if let Some(register) = &self.register {
            if !is_identifier(register) || RESERVED_VARS.contains(&register.as_str()) {
                return Err(format!("cannot register a result as '{register}'"));
            }
        }
        if let Some(missing) = self.notify.iter().find(|h| !handlers.contains(h.as_str())) {
            return Err(format!("notifies unknown handler '{missing}'"));
        }
        Ok(())
    }
}

/// Hosts plus the actions to run on them
#[derive(Debug, Clone, PartialEq)]
pub struct Play {
    pub name: String,
    /// Host pattern, see [`Inventory::select`](crate::Inventory::select)
    pub hosts: String,
    pub vars: ValueMap,
    pub actions: Vec<Action>,
    pub handlers: Vec<Action>,
}

impl Play {
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            vars: ValueMap::new(),
            actions: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_handler(mut self, handler: Action) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn handler(&self, name: &str) -> Option<&Action> {
        self.handlers.iter().find(|h| h.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut handlers = BTreeSet::new();
        for handler in &self.handlers {
            if !handlers.insert(handler.name.as_str()) {
                return Err(ConvergeError::validation(format!(
                    "play '{}': duplicate handler '{}'",
                    self.name, handler.name
                )));
            }
        }
        for action in self.actions.iter().chain(&self.handlers) {
            action.validate(&handlers).map_err(|e| {
                ConvergeError::validation(format!(
                    "play '{}', action '{}': {e}",
                    self.name, action.name
                ))
            })?;
        }
        Ok(())
    }
}

/// Ordered list of plays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playbook {
    plays: Vec<Play>,
}

impl Playbook {
    pub fn new(plays: Vec<Play>) -> Result<Self> {
        for play in &plays {
            play.validate()?;
        }
        Ok(Self { plays })
    }

    pub fn plays(&self) -> &[Play] {
        &self.plays
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let doc: PlaybookDocument = serde_yaml::from_str(content)?;
        let plays = doc
            .plays
            .into_iter()
            .map(PlayDocument::into_play)
            .collect::<Result<Vec<_>>>()?;
        Self::new(plays)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        tracing::debug!(path = %path.display(), "Loaded playbook");
        Self::from_yaml_str(&content)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlaybookDocument {
    #[serde(default)]
    plays: Vec<PlayDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlayDocument {
    name: String,
    hosts: String,
    #[serde(default)]
    vars: ValueMap,
    #[serde(default)]
    actions: Vec<ActionDocument>,
    #[serde(default)]
    handlers: Vec<ActionDocument>,
}

impl PlayDocument {
    fn into_play(self) -> Result<Play> {
        let name = self.name;
        let convert = |docs: Vec<ActionDocument>| -> Result<Vec<Action>> {
            docs.into_iter()
                .map(|d| {
                    d.into_action().map_err(|e| {
                        ConvergeError::validation(format!("play '{name}': {e}"))
                    })
                })
                .collect()
        };
        let actions = convert(self.actions)?;
        let handlers = convert(self.handlers)?;
        Ok(Play {
            name: name.clone(),
            hosts: self.hosts,
            vars: self.vars,
            actions,
            handlers,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

/// `name` plus exactly one module key, e.g.
/// `{ name: install nginx, package: { name: nginx } }`
#[derive(Debug, Deserialize)]
struct ActionDocument {
    name: String,
    #[serde(default)]
    when: Option<Expression>,
    #[serde(default)]
    register: Option<String>,
    #[serde(default)]
    notify: OneOrMany,
    #[serde(default)]
    ignore_errors: bool,
    #[serde(flatten)]
    module: BTreeMap<String, Value>,
}

impl ActionDocument {
    fn into_action(self) -> std::result::Result<Action, String> {
        let mut modules = self.module.into_iter();
        let (key, value) = match (modules.next(), modules.next()) {
            (Some(only), None) => only,
            (None, _) => return Err(format!("action '{}' names no module", self.name)),
            (Some((a, _)), Some((b, _))) => {
                return Err(format!(
                    "action '{}' has more than one module key ('{a}', '{b}')",
                    self.name
                ));
            }
        };
        let module: ModuleKind = key
            .parse()
            .map_err(|e| format!("action '{}': {e}", self.name))?;

        let params = match value {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => ValueMap::new(),
            // `shell: echo hi` shorthand
            Value::String(cmd) if matches!(module, ModuleKind::Command | ModuleKind::Shell) => {
                ValueMap::from([("cmd".to_string(), Value::String(cmd))])
            }
            other => {
                return Err(format!(
                    "action '{}': parameters of '{module}' must be a mapping, got {other}",
                    self.name
                ));
            }
        };

        let notify = match self.notify {
            OneOrMany::One(h) => vec![h],
            OneOrMany::Many(hs) => hs,
        };
        Ok(Action {
            name: self.name,
            module,
            params,
            when: self.when,
            register: self.register,
            notify,
            ignore_errors: self.ignore_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WEB: &str = r#"
plays:
  - name: web
    hosts: web
    vars:
      port: 8080
    actions:
      - name: install nginx
        package: { name: nginx }
        notify: restart nginx
      - name: write config
        copy:
          dest: /etc/nginx/conf.d/app.conf
          content: "listen ${port};"
        register: conf
        notify: [restart nginx]
      - name: show
        debug: { msg: "${conf.changed}" }
        when: conf.changed
      - name: uptime
        shell: uptime
    handlers:
      - name: restart nginx
        service: { name: nginx, state: restarted }
"#;

    #[test]
    fn test_parse_playbook() {
        let book = Playbook::from_yaml_str(WEB).unwrap();
        let play = &book.plays()[0];
        assert_eq!(play.hosts, "web");
        assert_eq!(play.vars["port"], json!(8080));
        assert_eq!(play.actions.len(), 4);

        let install = &play.actions[0];
        assert_eq!(install.module, ModuleKind::Package);
        assert_eq!(install.notify, vec!["restart nginx"]);

        let conf = &play.actions[1];
        assert_eq!(conf.register.as_deref(), Some("conf"));
        assert_eq!(play.actions[2].when.as_ref().unwrap().source(), "conf.changed");
        assert_eq!(play.actions[3].params["cmd"], json!("uptime"));
        assert!(play.handler("restart nginx").is_some());
    }

    #[test]
    fn test_unknown_handler() {
        let doc = WEB.replace("notify: restart nginx", "notify: reload nginx");
        let err = Playbook::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("unknown handler 'reload nginx'"), "{err}");
    }

    #[test]
    fn test_module_key_errors() {
        let two = WEB.replace(
            "package: { name: nginx }",
            "package: { name: nginx }\n        service: { name: nginx }",
        );
        assert!(
            Playbook::from_yaml_str(&two)
                .unwrap_err()
                .to_string()
                .contains("more than one module key")
        );

        let unknown = WEB.replace("package: { name: nginx }", "apt: { name: nginx }");
        assert!(
            Playbook::from_yaml_str(&unknown)
                .unwrap_err()
                .to_string()
                .contains("unknown module 'apt'")
        );
    }

    #[test]
    fn test_schema_checked_at_load() {
        let doc = WEB.replace("package: { name: nginx }", "package: { version: 1 }");
        let err = Playbook::from_yaml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'name'"));
    }

    #[test]
    fn test_bad_condition_is_rejected() {
        let doc = WEB.replace("when: conf.changed", "when: conf.changed ==");
        assert!(Playbook::from_yaml_str(&doc).is_err());
    }

    #[test]
    fn test_register_name() {
        let action = Action::new("a", ModuleKind::Debug).with_register("host");
        let play = Play::new("p", "all").with_action(action);
        assert!(Playbook::new(vec![play]).is_err());
    }
}
