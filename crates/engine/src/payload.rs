//! Turns an executor request into a [`CodeModule`].
//!
//! The generated callable is an expression that evaluates the request's code
//! as a CommonJS-style module body, with the utility files available through
//! a bundled `require`, and yields the function named by `functionName`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use sandbox::{CodeModule, SandboxError, is_identifier};

const NODE_MODULES: &str = "node_modules/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub function_name: String,
    /// Array: positional arguments. Any other value: the single argument.
    #[serde(default)]
    pub function_args: Value,
    pub code: String,
    #[serde(default)]
    pub utilities: Vec<UtilityFile>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilityFile {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Module specifier → utility file path, covering every name a file can be
/// required by: its path, its path without `.js` or `/index.js`, and for
/// files under `node_modules/` the package name.
fn module_table(utilities: &[UtilityFile]) -> Result<BTreeMap<String, String>, SandboxError> {
    let mut table = BTreeMap::new();
    for file in utilities {
        let path = normalize(&file.file_path);
        if path.is_empty() {
            return Err(SandboxError::InvalidInput("utility filePath is empty".into()));
        }
        let mut names = vec![path.to_string()];
        if let Some(stem) = path.strip_suffix("/index.js") {
            names.push(stem.to_string());
        } else if let Some(stem) = path.strip_suffix(".js") {
            names.push(stem.to_string());
        }
        let packages: Vec<String> = names
            .iter()
            .filter_map(|n| n.strip_prefix(NODE_MODULES).map(str::to_string))
            .collect();
        names.extend(packages);

        for name in names {
            // Exact paths win over derived aliases.
            table.entry(name).or_insert_with(|| path.to_string());
        }
    }
    Ok(table)
}

fn normalize(specifier: &str) -> &str {
    specifier.trim().trim_start_matches("./").trim_start_matches('/')
}

fn positional(function_args: &Value) -> (Vec<String>, Map<String, Value>) {
    match function_args {
        Value::Null => (Vec::new(), Map::new()),
        Value::Array(items) => {
            let names: Vec<String> = (0..items.len()).map(|i| format!("arg{i}")).collect();
            let inputs = names.iter().cloned().zip(items.iter().cloned()).collect();
            (names, inputs)
        }
        other => {
            let mut inputs = Map::new();
            inputs.insert("args".to_string(), other.clone());
            (vec!["args".to_string()], inputs)
        }
    }
}

/// Build the code module and its inputs, rejecting requests whose function
/// name is unusable or whose dependencies are not bundled.
pub fn assemble(request: &ExecuteRequest) -> Result<(CodeModule, Map<String, Value>), SandboxError> {
    if !is_identifier(&request.function_name) {
        return Err(SandboxError::InvalidInput(format!(
            "functionName {:?} is not a valid identifier",
            request.function_name
        )));
    }
    if request.code.trim().is_empty() {
        return Err(SandboxError::InvalidInput("code is empty".into()));
    }

    let table = module_table(&request.utilities)?;
    for dependency in &request.dependencies {
        if !table.contains_key(normalize(&dependency.name)) {
            return Err(SandboxError::InvalidInput(format!(
                "dependency {:?} is not provided by any utility file",
                dependency.name
            )));
        }
        debug!(name = %dependency.name, version = ?dependency.version, "dependency resolved");
    }

    let mut files = String::new();
    for file in &request.utilities {
        let path = serde_json::to_string(normalize(&file.file_path))?;
        files.push_str(&format!(
            "    {path}: function (module, exports, require) {{\n{}\n    }},\n",
            file.content
        ));
    }
    let aliases = serde_json::to_string(&table)?;
    let name = &request.function_name;
    let quoted_name = serde_json::to_string(name)?;

    let source = format!(
        r#"(() => {{
  const files = {{
{files}  }};
  const aliases = {aliases};
  const loaded = Object.create(null);
  const require = (specifier) => {{
    const key = String(specifier).trim().replace(/^(\.\/|\/)+/, "");
    if (!Object.hasOwn(aliases, key)) {{
      throw new Error(`Cannot find module '${{specifier}}'`);
    }}
    const path = aliases[key];
    if (!(path in loaded)) {{
      const module = {{ exports: {{}} }};
      loaded[path] = module;
      files[path](module, module.exports, require);
    }}
    return loaded[path].exports;
  }};
  const module = {{ exports: {{}} }};
  const exports = module.exports;
{code}
  ;
  const target = typeof {name} === "function" ? {name} : module.exports[{quoted_name}];
  if (typeof target !== "function") {{
    throw new TypeError({quoted_name} + " is not a function");
  }}
  return target;
}})()"#,
        code = request.code,
    );

    let (parameters, inputs) = positional(&request.function_args);
    Ok((CodeModule::new(source).with_parameters(parameters), inputs))
}
