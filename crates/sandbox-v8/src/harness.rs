//! JavaScript glue evaluated inside every isolate.
//!
//! The bootstrap captures `eval`, `JSON.stringify` and the report
//! op before any tenant code runs, then exposes them through a frozen,
//! non-configurable `__sandbox` global. Tenant source is only ever passed to
//! it as a JSON string literal, so it cannot splice itself into the glue.

use serde::Deserialize;
use serde_json::Value;

use sandbox::SandboxError;

pub(crate) const RESERVED_GLOBAL: &str = "__sandbox";

pub(crate) const BOOTSTRAP: &str = r#"
((ops) => {
  const evaluate = globalThis.eval;
  const stringify = JSON.stringify;
  const describe = (e) => ({
    name: e && e.name ? String(e.name) : "Error",
    message: e && e.message !== undefined ? String(e.message) : String(e),
  });
  const failure = (e) => stringify({ status: "error", error: describe(e) });

  Object.defineProperty(globalThis, "__sandbox", {
    value: Object.freeze({
      async run(source) {
        let envelope;
        try {
          const value = await evaluate(source);
          envelope = stringify({ status: "ok", value: value === undefined ? null : value });
        } catch (e) {
          envelope = failure(e);
        }
        ops.op_sandbox_report(envelope);
      },
    }),
    enumerable: false,
    writable: false,
    configurable: false,
  });

  delete globalThis.Deno;
})(Deno.core.ops);
"#;

/// `globalThis["name"] = <json>;`
///
/// The value is rebuilt from a literal inside the isolate: a deep copy
/// with no link back to the host value.
pub(crate) fn assign_global(name: &str, value: &Value) -> Result<String, SandboxError> {
    if name == RESERVED_GLOBAL {
        return Err(SandboxError::InvalidInput(format!(
            "{RESERVED_GLOBAL} is reserved by the sandbox"
        )));
    }
    if name.is_empty() {
        return Err(SandboxError::InvalidInput("global name is empty".into()));
    }
    let key = serde_json::to_string(name)?;
    let literal = serde_json::to_string(value)?;
    Ok(format!("globalThis[{key}] = {literal};"))
}

pub(crate) fn run(source: &str) -> Result<String, SandboxError> {
    Ok(format!("__sandbox.run({});", serde_json::to_string(source)?))
}

/// Envelope posted through `op_sandbox_report`.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum Report {
    Ok {
        // Absent when the result was a function or symbol.
        #[serde(default)]
        value: Value,
    },
    Error {
        error: Thrown,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct Thrown {
    pub(crate) name: String,
    pub(crate) message: String,
}

impl std::fmt::Display for Thrown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assign_global_quotes_key_and_value() {
        let script = assign_global("odd \"key\"", &json!({"a": [1, "two"]})).unwrap();
        assert_eq!(script, r#"globalThis["odd \"key\""] = {"a":[1,"two"]};"#);
    }

    #[test]
    fn assign_global_rejects_reserved_name() {
        let err = assign_global(RESERVED_GLOBAL, &json!(1)).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
    }

    #[test]
    fn tenant_source_is_embedded_as_string_literal() {
        let script = run("}); evil(); ({").unwrap();
        assert_eq!(script, r#"__sandbox.run("}); evil(); ({");"#);
        let multiline = run("a\nb").unwrap();
        assert_eq!(multiline, r#"__sandbox.run("a\nb");"#);
    }

    #[test]
    fn report_parses_ok_and_error() {
        let ok: Report = serde_json::from_str(r#"{"status":"ok","value":42}"#).unwrap();
        assert!(matches!(ok, Report::Ok { value } if value == json!(42)));

        let missing: Report = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(matches!(missing, Report::Ok { value } if value.is_null()));

        let err: Report = serde_json::from_str(
            r#"{"status":"error","error":{"name":"TypeError","message":"x is not a function"}}"#,
        )
        .unwrap();
        match err {
            Report::Error { error } => assert_eq!(error.to_string(), "TypeError: x is not a function"),
            other => panic!("unexpected report: {other:?}"),
        }
    }
}
