//! Python source extraction
//!
//! Walks the tree-sitter parse tree of one file and lifts function, class
//! and module records out of it. Only the surface syntax is consulted; no
//! name resolution happens here.

use super::{
    FunctionCategory, Param, ParsedClass, ParsedFunction, ParsedModule,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tree_sitter::{Node, Parser};

/// Per-file parse failures; all of them cause the file to be skipped.
#[derive(Error, Debug)]
pub enum PythonParseError {
    #[error("grammar version mismatch: {0}")]
    Language(String),

    #[error("parse timed out or was cancelled")]
    TimedOut,

    #[error("file contains syntax errors")]
    SyntaxError,
}

/// Everything extracted from one file
#[derive(Debug, Default)]
pub struct FileEntities {
    pub functions: Vec<ParsedFunction>,
    pub classes: Vec<ParsedClass>,
    pub module: Option<ParsedModule>,
}

/// Dotted module path from a checkout-relative file path.
///
/// `acme/lib/core.py` becomes `acme.lib.core`; a package `__init__.py`
/// takes its directory's path.
pub fn module_path_of(relative: &Path) -> String {
    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => s.to_str().map(str::to_string),
            _ => None,
        })
        .collect();
    if let Some(last) = parts.last_mut() {
        if let Some(stem) = last.strip_suffix(".py") {
            *last = stem.to_string();
        }
        if last == "__init__" {
            parts.pop();
        }
    }
    if parts.is_empty() {
        String::from("__root__")
    } else {
        parts.join(".")
    }
}

/// Parse one Python file into its entity records.
pub fn parse_python_file(
    relative: &Path,
    source: &str,
    timeout: Duration,
) -> Result<FileEntities, PythonParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::language())
        .map_err(|e| PythonParseError::Language(e.to_string()))?;
    parser.set_timeout_micros(timeout.as_micros() as u64);

    let tree = parser
        .parse(source, None)
        .ok_or(PythonParseError::TimedOut)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(PythonParseError::SyntaxError);
    }

    let module_path = module_path_of(relative);
    let mut out = FileEntities::default();
    let mut top_level: BTreeSet<String> = BTreeSet::new();

    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        collect_top_level(
            child,
            source,
            relative,
            &module_path,
            &mut out,
            &mut top_level,
        );
    }

    let function_count = out.functions.len() as u32;
    let class_count = out.classes.len() as u32;
    out.module = Some(ParsedModule {
        dotted_path: module_path,
        file: relative.to_path_buf(),
        top_level_names: top_level,
        function_count,
        class_count,
    });
    Ok(out)
}

fn collect_top_level(
    node: Node<'_>,
    source: &str,
    relative: &Path,
    module_path: &str,
    out: &mut FileEntities,
    top_level: &mut BTreeSet<String>,
) {
    match node.kind() {
        "function_definition" => {
            if let Some(function) =
                extract_function(node, source, relative, module_path, None)
            {
                top_level.insert(function.name.clone());
                out.functions.push(function);
            }
        }
        "class_definition" => {
            if let Some((class, mut methods)) =
                extract_class(node, source, relative, module_path)
            {
                top_level.insert(class.name.clone());
                out.classes.push(class);
                out.functions.append(&mut methods);
            }
        }
        "decorated_definition" => {
            if let Some(inner) = node.child_by_field_name("definition") {
                collect_top_level(inner, source, relative, module_path, out, top_level);
            }
        }
        _ => {}
    }
}

fn extract_function(
    node: Node<'_>,
    source: &str,
    relative: &Path,
    module_path: &str,
    enclosing_class: Option<&str>,
) -> Option<ParsedFunction> {
    let name = text_of(node.child_by_field_name("name")?, source).to_string();
    let qualified_name = match enclosing_class {
        Some(class) => format!("{}.{}.{}", module_path, class, name),
        None => format!("{}.{}", module_path, name),
    };

    let params_node = node.child_by_field_name("parameters");
    let params = params_node.map(|p| extract_params(p, source)).unwrap_or_default();
    let params_text = params_node.map(|p| text_of(p, source)).unwrap_or("()");
    let return_type = node
        .child_by_field_name("return_type")
        .map(|n| text_of(n, source).to_string());

    let signature = match &return_type {
        Some(ret) => format!("def {}{} -> {}", name, params_text, ret),
        None => format!("def {}{}", name, params_text),
    };

    let body = node.child_by_field_name("body")?;
    let body_text = text_of(body, source);
    let body_lines =
        body.end_position().row as u32 - body.start_position().row as u32 + 1;

    let mut calls = BTreeSet::new();
    collect_calls(body, source, &mut calls);

    Some(ParsedFunction {
        name: name.clone(),
        qualified_name,
        module_path: module_path.to_string(),
        params,
        return_type,
        docstring: docstring_of(body, source),
        file: relative.to_path_buf(),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        body_lines,
        calls,
        category: categorize(&name, module_path, enclosing_class),
        signature,
        body_hash: hash_text(body_text),
    })
}

fn extract_class(
    node: Node<'_>,
    source: &str,
    relative: &Path,
    module_path: &str,
) -> Option<(ParsedClass, Vec<ParsedFunction>)> {
    let name = text_of(node.child_by_field_name("name")?, source).to_string();
    let qualified_name = format!("{}.{}", module_path, name);

    let parents: Vec<String> = node
        .child_by_field_name("superclasses")
        .map(|args| {
            let mut cursor = args.walk();
            args.named_children(&mut cursor)
                .filter(|c| matches!(c.kind(), "identifier" | "attribute"))
                .map(|c| text_of(c, source).to_string())
                .collect()
        })
        .unwrap_or_default();

    let parents_text = if parents.is_empty() {
        String::new()
    } else {
        format!("({})", parents.join(", "))
    };
    let signature = format!("class {}{}", name, parents_text);

    let body = node.child_by_field_name("body")?;
    let body_text = text_of(body, source);

    let mut methods = Vec::new();
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        let def = match child.kind() {
            "function_definition" => Some(child),
            "decorated_definition" => child
                .child_by_field_name("definition")
                .filter(|d| d.kind() == "function_definition"),
            _ => None,
        };
        if let Some(def) = def {
            if let Some(method) =
                extract_function(def, source, relative, module_path, Some(&name))
            {
                methods.push(method);
            }
        }
    }

    let class = ParsedClass {
        name,
        qualified_name,
        module_path: module_path.to_string(),
        parents,
        methods: methods.iter().map(|m| m.qualified_name.clone()).collect(),
        docstring: docstring_of(body, source),
        file: relative.to_path_buf(),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        signature,
        body_hash: hash_text(body_text),
    };
    Some((class, methods))
}

fn extract_params(node: Node<'_>, source: &str) -> Vec<Param> {
    let mut params = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let param = match child.kind() {
            "identifier" => Some(Param {
                name: text_of(child, source).to_string(),
                type_text: None,
                default_text: None,
            }),
            "typed_parameter" => {
                let name = child
                    .named_child(0)
                    .map(|n| text_of(n, source).to_string())
                    .unwrap_or_default();
                Some(Param {
                    name,
                    type_text: child
                        .child_by_field_name("type")
                        .map(|t| text_of(t, source).to_string()),
                    default_text: None,
                })
            }
            "default_parameter" => Some(Param {
                name: child
                    .child_by_field_name("name")
                    .map(|n| text_of(n, source).to_string())
                    .unwrap_or_default(),
                type_text: None,
                default_text: child
                    .child_by_field_name("value")
                    .map(|v| text_of(v, source).to_string()),
            }),
            "typed_default_parameter" => Some(Param {
                name: child
                    .child_by_field_name("name")
                    .map(|n| text_of(n, source).to_string())
                    .unwrap_or_default(),
                type_text: child
                    .child_by_field_name("type")
                    .map(|t| text_of(t, source).to_string()),
                default_text: child
                    .child_by_field_name("value")
                    .map(|v| text_of(v, source).to_string()),
            }),
            "list_splat_pattern" | "dictionary_splat_pattern" => Some(Param {
                name: text_of(child, source).to_string(),
                type_text: None,
                default_text: None,
            }),
            _ => None,
        };
        if let Some(param) = param {
            if !param.name.is_empty() {
                params.push(param);
            }
        }
    }
    params
}

/// Names syntactically called within a body. Attribute calls keep their
/// dotted text with any leading `self.`/`cls.` stripped.
fn collect_calls(node: Node<'_>, source: &str, calls: &mut BTreeSet<String>) {
    if node.kind() == "call" {
        if let Some(callee) = node.child_by_field_name("function") {
            match callee.kind() {
                "identifier" => {
                    calls.insert(text_of(callee, source).to_string());
                }
                "attribute" => {
                    let text = text_of(callee, source);
                    let trimmed = text
                        .strip_prefix("self.")
                        .or_else(|| text.strip_prefix("cls."))
                        .unwrap_or(text);
                    calls.insert(trimmed.to_string());
                }
                _ => {}
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_calls(child, source, calls);
    }
}

/// First statement of a body when it is a bare string expression.
fn docstring_of(body: Node<'_>, source: &str) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    Some(strip_string_quotes(text_of(expr, source)))
}

fn strip_string_quotes(raw: &str) -> String {
    let raw = raw
        .trim_start_matches(|c| c == 'r' || c == 'b' || c == 'u' || c == 'f')
        .trim();
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if raw.len() >= 2 * quote.len()
            && raw.starts_with(quote)
            && raw.ends_with(quote)
        {
            return raw[quote.len()..raw.len() - quote.len()].trim().to_string();
        }
    }
    raw.to_string()
}

fn categorize(
    name: &str,
    module_path: &str,
    enclosing_class: Option<&str>,
) -> FunctionCategory {
    if name == "__init__" {
        return FunctionCategory::Constructor;
    }
    if name.starts_with("__") && name.ends_with("__") {
        return FunctionCategory::Dunder;
    }
    if name.starts_with("test_") || module_path.split('.').any(|p| p == "tests") {
        return FunctionCategory::Test;
    }
    if name.starts_with('_') {
        return FunctionCategory::Private;
    }
    if name.starts_with("get_") {
        return FunctionCategory::Getter;
    }
    if name.starts_with("set_") {
        return FunctionCategory::Setter;
    }
    if enclosing_class.is_some() {
        FunctionCategory::Method
    } else {
        FunctionCategory::Function
    }
}

fn text_of<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or_default()
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn parse(source: &str) -> FileEntities {
        parse_python_file(&PathBuf::from("acme/lib/core.py"), source, TIMEOUT).unwrap()
    }

    #[test]
    fn test_module_path_derivation() {
        assert_eq!(
            module_path_of(&PathBuf::from("acme/lib/core.py")),
            "acme.lib.core"
        );
        assert_eq!(
            module_path_of(&PathBuf::from("acme/lib/__init__.py")),
            "acme.lib"
        );
        assert_eq!(module_path_of(&PathBuf::from("top.py")), "top");
    }

    #[test]
    fn test_function_extraction() {
        let entities = parse(
            r#"
def create(name, size=10, *args, **kwargs):
    """Create a thing.

    Longer description.
    """
    helper(name)
    return size
"#,
        );
        assert_eq!(entities.functions.len(), 1);
        let f = &entities.functions[0];
        assert_eq!(f.qualified_name, "acme.lib.core.create");
        assert_eq!(f.module_path, "acme.lib.core");
        assert_eq!(f.params.len(), 4);
        assert_eq!(f.params[1].default_text.as_deref(), Some("10"));
        assert_eq!(f.params[2].name, "*args");
        assert!(f.docstring.as_deref().unwrap().starts_with("Create a thing."));
        assert!(f.calls.contains("helper"));
        assert_eq!(f.category, FunctionCategory::Function);
        assert_eq!(f.start_line, 2);
    }

    #[test]
    fn test_typed_signature() {
        let entities = parse("def size_of(item: str, pad: int = 0) -> int:\n    return 1\n");
        let f = &entities.functions[0];
        assert_eq!(
            f.signature,
            "def size_of(item: str, pad: int = 0) -> int"
        );
        assert_eq!(f.params[0].type_text.as_deref(), Some("str"));
        assert_eq!(f.return_type.as_deref(), Some("int"));
    }

    #[test]
    fn test_class_extraction() {
        let entities = parse(
            r#"
class Widget(Base, mixins.Sized):
    """A widget."""

    def __init__(self, name):
        self.name = name

    def render(self):
        return self.draw()
"#,
        );
        assert_eq!(entities.classes.len(), 1);
        let class = &entities.classes[0];
        assert_eq!(class.qualified_name, "acme.lib.core.Widget");
        assert_eq!(class.parents, ["Base", "mixins.Sized"]);
        assert_eq!(class.methods.len(), 2);
        assert_eq!(class.signature, "class Widget(Base, mixins.Sized)");

        let ctor = entities
            .functions
            .iter()
            .find(|f| f.name == "__init__")
            .unwrap();
        assert_eq!(ctor.category, FunctionCategory::Constructor);
        assert_eq!(ctor.qualified_name, "acme.lib.core.Widget.__init__");

        let render = entities.functions.iter().find(|f| f.name == "render").unwrap();
        assert_eq!(render.category, FunctionCategory::Method);
        assert!(render.calls.contains("draw"));
    }

    #[test]
    fn test_decorated_definitions() {
        let entities = parse(
            r#"
@cached
def get_value():
    return 1
"#,
        );
        assert_eq!(entities.functions.len(), 1);
        assert_eq!(entities.functions[0].category, FunctionCategory::Getter);
    }

    #[test]
    fn test_syntax_error_is_skipped() {
        let result = parse_python_file(
            &PathBuf::from("bad.py"),
            "def broken(:\n  pass\n",
            TIMEOUT,
        );
        assert!(matches!(result, Err(PythonParseError::SyntaxError)));
    }

    #[test]
    fn test_module_record() {
        let entities = parse("def a():\n    pass\n\nclass B:\n    def m(self):\n        pass\n");
        let module = entities.module.unwrap();
        assert_eq!(module.dotted_path, "acme.lib.core");
        assert_eq!(module.function_count, 2);
        assert_eq!(module.class_count, 1);
        assert!(module.top_level_names.contains("a"));
        assert!(module.top_level_names.contains("B"));
    }

    #[test]
    fn test_body_hash_ignores_position() {
        let a = parse("def f():\n    return 1\n");
        let b = parse("\n\ndef f():\n    return 1\n");
        assert_eq!(
            a.functions[0].body_hash,
            b.functions[0].body_hash
        );
        let c = parse("def f():\n    return 2\n");
        assert_ne!(a.functions[0].body_hash, c.functions[0].body_hash);
    }
}
