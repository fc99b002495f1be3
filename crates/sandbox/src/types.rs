use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SandboxError};

/// Global under which a [`CodeModule`]'s full input map is injected.
pub const INPUTS_GLOBAL: &str = "inputs";

/// Flat key → value map injected into the sandbox before a script runs.
pub type ScriptContext = Map<String, Value>;

/// A single generated callable plus the names of its declared inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeModule {
    /// Expression evaluating to the callable, e.g. `function (x) { return x + 1 }`.
    pub source: String,
    /// Input names passed positionally, in order. When empty the callable
    /// receives the whole input map as its only argument.
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl CodeModule {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    /// Check the declared parameters against the supplied inputs.
    pub fn validate(&self, inputs: &Map<String, Value>) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(SandboxError::InvalidInput("code module source is empty".into()));
        }
        if self.parameters.is_empty() && inputs.contains_key(INPUTS_GLOBAL) {
            return Err(SandboxError::InvalidInput(format!(
                "input {INPUTS_GLOBAL:?} is reserved for the input map when no parameters are declared"
            )));
        }
        for name in &self.parameters {
            if !is_identifier(name) {
                return Err(SandboxError::InvalidInput(format!(
                    "parameter {name:?} is not a valid identifier"
                )));
            }
            if !inputs.contains_key(name) {
                return Err(SandboxError::InvalidInput(format!(
                    "missing input for parameter {name:?}"
                )));
            }
        }
        Ok(())
    }

    /// Render the module as program text: bind the callable, then call it.
    ///
    /// The call is the program's completion value, so the sandbox returns
    /// whatever the callable returns (awaited if it is a promise).
    pub fn to_program(&self) -> Program {
        let callable = self.source.trim().trim_end_matches(';').trim_end();
        let arguments = if self.parameters.is_empty() {
            INPUTS_GLOBAL.to_string()
        } else {
            self.parameters.join(", ")
        };
        Program {
            kind: ProgramKind::CodeModule,
            source: format!("const code = (\n{callable}\n);\ncode({arguments});"),
        }
    }
}

/// Raw script source. Its completion value is the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub source: String,
}

impl Script {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn to_program(&self) -> Program {
        Program {
            kind: ProgramKind::Script,
            source: self.source.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    CodeModule,
    Script,
}

impl std::fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CodeModule => f.write_str("code-module"),
            Self::Script => f.write_str("script"),
        }
    }
}

/// Source text handed to a sandbox for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub kind: ProgramKind,
    pub source: String,
}

/// ASCII JavaScript identifier check (letters, digits, `_`, `$`).
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn module_with_parameters_calls_positionally() {
        let module = CodeModule::new("function (x, y) { return x + y }").with_parameters(["x", "y"]);
        let program = module.to_program();
        assert_eq!(program.kind, ProgramKind::CodeModule);
        assert_eq!(
            program.source,
            "const code = (\nfunction (x, y) { return x + y }\n);\ncode(x, y);"
        );
    }

    #[test]
    fn module_without_parameters_receives_input_map() {
        let program = CodeModule::new("async (input) => input.n * 2;").to_program();
        assert!(program.source.contains("async (input) => input.n * 2\n);"));
        assert!(program.source.ends_with("code(inputs);"));
    }

    #[test]
    fn validate_rejects_missing_input() {
        let module = CodeModule::new("function (x) { return x }").with_parameters(["x"]);
        let err = module.validate(&inputs(json!({"y": 1}))).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
        assert!(err.to_string().contains("\"x\""), "got: {err}");
    }

    #[test]
    fn validate_rejects_non_identifier_parameter() {
        let module = CodeModule::new("function (x) { return x }").with_parameters(["a-b"]);
        let err = module.validate(&inputs(json!({"a-b": 1}))).unwrap_err();
        assert!(err.to_string().contains("not a valid identifier"), "got: {err}");
    }

    #[test]
    fn validate_rejects_inputs_key_without_parameters() {
        let module = CodeModule::new("(i) => i");
        let err = module.validate(&inputs(json!({"inputs": 1}))).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(ref m) if m.contains("reserved")), "got: {err:?}");

        let declared = CodeModule::new("(inputs) => inputs").with_parameters(["inputs"]);
        declared.validate(&inputs(json!({"inputs": 1}))).unwrap();
    }

    #[test]
    fn validate_rejects_empty_source() {
        let err = CodeModule::new("  ").validate(&Map::new()).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
    }

    #[test]
    fn script_program_is_verbatim() {
        let program = Script::new("let a = 1;\na + b").to_program();
        assert_eq!(program.kind, ProgramKind::Script);
        assert_eq!(program.source, "let a = 1;\na + b");
    }

    #[test]
    fn identifier_rules() {
        assert!(is_identifier("x"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("$el2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier("a.b"));
    }

    #[test]
    fn code_module_deserializes_camel_case() {
        let module: CodeModule =
            serde_json::from_value(json!({"source": "x => x", "parameters": ["x"]})).unwrap();
        assert_eq!(module.parameters, vec!["x".to_string()]);
        let bare: CodeModule = serde_json::from_value(json!({"source": "x => x"})).unwrap();
        assert!(bare.parameters.is_empty());
    }
}
