//! Python source scanning with tree-sitter.
//!
//! Builds an index of modules, classes, functions and methods keyed by
//! their dotted identifier (`pkg.module.Class.method`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use tree_sitter::{Node, Parser, Tree};
use walkdir::WalkDir;

use super::PluginError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Module,
    Class,
    Function,
    Method,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyObject {
    pub id: String,
    pub kind: ObjectKind,
    /// `def name(params) -> ret` or `class Name(bases)`, decorators included.
    pub signature: Option<String>,
    pub docstring: Option<String>,
    /// Definition source text, absent for modules.
    pub source: Option<String>,
    /// Source file relative to its scan root.
    pub file: PathBuf,
    pub line: usize,
}

impl PyObject {
    /// Last segment of the dotted identifier.
    pub fn name(&self) -> &str {
        self.id.rsplit('.').next().unwrap_or(&self.id)
    }
}

#[derive(Debug, Default)]
pub struct ModuleIndex {
    objects: BTreeMap<String, PyObject>,
    /// Member ids per parent id, in source order.
    members: BTreeMap<String, Vec<String>>,
}

impl ModuleIndex {
    /// Index every `.py` file under the given roots.
    pub fn scan(roots: &[PathBuf], include_private: bool) -> Result<Self, PluginError> {
        let mut parser = python_parser()?;
        let mut index = Self::default();

        for root in roots {
            if !root.is_dir() {
                return Err(PluginError::Message(format!(
                    "python source path {} is not a directory",
                    root.display()
                )));
            }
            for entry in WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e.file_name()))
            {
                let entry = entry.map_err(|err| {
                    PluginError::Io(
                        err.into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("directory loop")),
                    )
                })?;
                let path = entry.path();
                if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "py") {
                    continue;
                }
                let rel_path = path.strip_prefix(root).unwrap_or(path);
                let source = std::fs::read_to_string(path)?;
                index.add_source(&mut parser, rel_path, &source, include_private)?;
            }
        }

        debug!(objects = index.objects.len(), "indexed python sources");
        Ok(index)
    }

    fn add_source(
        &mut self,
        parser: &mut Parser,
        rel_path: &Path,
        source: &str,
        include_private: bool,
    ) -> Result<(), PluginError> {
        let module_path = derive_module_path(rel_path);
        if module_path.is_empty() {
            return Ok(());
        }
        let module_id = module_path.join(".");
        if self.objects.contains_key(&module_id) {
            warn!(module = %module_id, file = %rel_path.display(), "module indexed twice, keeping the first");
            return Ok(());
        }

        let tree = parse(parser, source, rel_path)?;
        let root = tree.root_node();
        let bytes = source.as_bytes();

        self.insert(
            None,
            PyObject {
                id: module_id.clone(),
                kind: ObjectKind::Module,
                signature: None,
                docstring: block_docstring(root, bytes),
                source: None,
                file: rel_path.to_path_buf(),
                line: 1,
            },
        );

        let mut walker = Walker {
            index: self,
            source: bytes,
            file: rel_path,
            include_private,
        };
        walker.walk(root, &module_id, false);
        Ok(())
    }

    fn insert(&mut self, parent: Option<&str>, object: PyObject) {
        if let Some(parent) = parent {
            self.members
                .entry(parent.to_string())
                .or_default()
                .push(object.id.clone());
        }
        self.objects.insert(object.id.clone(), object);
    }

    pub fn get(&self, id: &str) -> Option<&PyObject> {
        self.objects.get(id)
    }

    /// Direct members of a module or class, in source order.
    pub fn members(&self, id: &str) -> impl Iterator<Item = &PyObject> {
        self.members
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|member| self.objects.get(member))
    }

    /// Modules sorted by dotted name.
    pub fn modules(&self) -> impl Iterator<Item = &PyObject> {
        self.objects
            .values()
            .filter(|object| object.kind == ObjectKind::Module)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

struct Walker<'a> {
    index: &'a mut ModuleIndex,
    source: &'a [u8],
    file: &'a Path,
    include_private: bool,
}

impl Walker<'_> {
    fn walk(&mut self, block: Node, parent: &str, in_class: bool) {
        let mut cursor = block.walk();
        for child in block.named_children(&mut cursor) {
            let (definition, decorators) = match child.kind() {
                "decorated_definition" => match child.child_by_field_name("definition") {
                    Some(definition) => (definition, decorators(child, self.source)),
                    None => continue,
                },
                "function_definition" | "class_definition" => (child, Vec::new()),
                _ => continue,
            };
            match definition.kind() {
                "function_definition" => self.function(child, definition, &decorators, parent, in_class),
                "class_definition" => self.class(child, definition, &decorators, parent),
                _ => {}
            }
        }
    }

    fn function(&mut self, outer: Node, node: Node, decorators: &[String], parent: &str, in_class: bool) {
        let Some(name) = field_text(node, "name", self.source) else {
            return;
        };
        if !self.wanted(&name, in_class) {
            return;
        }
        let Some(signature) = function_signature(node, self.source) else {
            return;
        };
        let object = PyObject {
            id: format!("{parent}.{name}"),
            kind: if in_class {
                ObjectKind::Method
            } else {
                ObjectKind::Function
            },
            signature: Some(with_decorators(decorators, signature)),
            docstring: definition_docstring(node, self.source),
            source: node_text(outer, self.source),
            file: self.file.to_path_buf(),
            line: outer.start_position().row + 1,
        };
        self.index.insert(Some(parent), object);
    }

    fn class(&mut self, outer: Node, node: Node, decorators: &[String], parent: &str) {
        let Some(name) = field_text(node, "name", self.source) else {
            return;
        };
        if name.starts_with('_') && !self.include_private {
            return;
        }
        let Some(signature) = class_signature(node, self.source) else {
            return;
        };
        let id = format!("{parent}.{name}");
        let object = PyObject {
            id: id.clone(),
            kind: ObjectKind::Class,
            signature: Some(with_decorators(decorators, signature)),
            docstring: definition_docstring(node, self.source),
            source: node_text(outer, self.source),
            file: self.file.to_path_buf(),
            line: outer.start_position().row + 1,
        };
        self.index.insert(Some(parent), object);

        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body, &id, true);
        }
    }

    /// Private names are skipped unless asked for. Dunder methods other
    /// than `__init__` are always skipped.
    fn wanted(&self, name: &str, in_class: bool) -> bool {
        let dunder = name.starts_with("__") && name.ends_with("__");
        if dunder {
            return in_class && name == "__init__";
        }
        !name.starts_with('_') || self.include_private
    }
}

fn python_parser() -> Result<Parser, PluginError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|err| PluginError::Message(format!("failed to load the python grammar: {err}")))?;
    Ok(parser)
}

fn parse(parser: &mut Parser, source: &str, path: &Path) -> Result<Tree, PluginError> {
    parser.parse(source, None).ok_or_else(|| PluginError::Parse {
        path: path.to_path_buf(),
        message: "parser returned no tree".to_string(),
    })
}

fn is_ignored_dir(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name == "__pycache__" || name == "venv" || name == "node_modules"
}

/// `ecco/output.py` -> `["ecco", "output"]`, `ecco/__init__.py` -> `["ecco"]`.
fn derive_module_path(rel_path: &Path) -> Vec<String> {
    let mut parts: Vec<String> = rel_path
        .with_extension("")
        .components()
        .filter_map(|c| c.as_os_str().to_str().map(String::from))
        .collect();
    if parts.last().map(String::as_str) == Some("__init__") {
        parts.pop();
    }
    parts
}

fn node_text(node: Node, source: &[u8]) -> Option<String> {
    std::str::from_utf8(&source[node.byte_range()])
        .ok()
        .map(str::to_string)
}

fn field_text(node: Node, field: &str, source: &[u8]) -> Option<String> {
    node_text(node.child_by_field_name(field)?, source)
}

fn decorators(node: Node, source: &[u8]) -> Vec<String> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() == "decorator")
        .filter_map(|child| node_text(child, source))
        .collect()
}

fn with_decorators(decorators: &[String], signature: String) -> String {
    if decorators.is_empty() {
        return signature;
    }
    let mut out = decorators.join("\n");
    out.push('\n');
    out.push_str(&signature);
    out
}

fn function_signature(node: Node, source: &[u8]) -> Option<String> {
    let is_async = node
        .child(0)
        .is_some_and(|first| first.kind() == "async");
    let mut sig = String::from(if is_async { "async def " } else { "def " });
    sig.push_str(&field_text(node, "name", source)?);
    sig.push_str(&field_text(node, "parameters", source)?);
    if let Some(return_type) = field_text(node, "return_type", source) {
        sig.push_str(" -> ");
        sig.push_str(&return_type);
    }
    Some(sig)
}

fn class_signature(node: Node, source: &[u8]) -> Option<String> {
    let mut sig = String::from("class ");
    sig.push_str(&field_text(node, "name", source)?);
    if let Some(bases) = field_text(node, "superclasses", source) {
        sig.push_str(&bases);
    }
    Some(sig)
}

fn definition_docstring(node: Node, source: &[u8]) -> Option<String> {
    block_docstring(node.child_by_field_name("body")?, source)
}

/// The docstring of a module or block: a string literal as its first statement.
fn block_docstring(block: Node, source: &[u8]) -> Option<String> {
    let mut cursor = block.walk();
    let first = block
        .named_children(&mut cursor)
        .find(|child| child.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let literal = first.named_child(0)?;
    if literal.kind() != "string" {
        return None;
    }
    let doc = cleandoc(strip_quotes(&node_text(literal, source)?));
    (!doc.is_empty()).then_some(doc)
}

fn strip_quotes(literal: &str) -> &str {
    let body = literal.trim_start_matches(['r', 'R', 'u', 'U', 'b', 'B', 'f', 'F']);
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = body
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    body
}

/// Normalize docstring indentation: the first line is stripped, the
/// common indent of the remaining lines is removed, and blank lines at
/// either end are dropped.
pub fn cleandoc(doc: &str) -> String {
    let expanded = doc.replace('\t', "        ");
    let lines: Vec<&str> = expanded.lines().collect();
    let margin = lines
        .iter()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                line.trim().to_string()
            } else if line.trim().is_empty() {
                String::new()
            } else {
                line[margin..].trim_end().to_string()
            }
        })
        .collect();

    while cleaned.first().is_some_and(|line| line.is_empty()) {
        cleaned.remove(0);
    }
    while cleaned.last().is_some_and(|line| line.is_empty()) {
        cleaned.pop();
    }
    cleaned.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OUTPUT_PY: &str = r#""""Output objects returned by the model."""
import json


class OutputSeq:
    """The result of running a model on some input.

    It also collects data from the generation process.
    """

    def __init__(self, tokens=None):
        """

        Args:
            tokens: A list of token text.
        """
        self.tokens = tokens

    @property
    def size(self) -> int:
        """Number of tokens."""
        return len(self.tokens)

    def _helper(self):
        pass

    def __repr__(self):
        return "OutputSeq"


def load(path: str, *, strict: bool = False) -> OutputSeq:
    '''Load a saved sequence.'''
    return OutputSeq()


def _private():
    """Hidden."""
"#;

    fn index(include_private: bool) -> ModuleIndex {
        let mut parser = python_parser().unwrap();
        let mut index = ModuleIndex::default();
        index
            .add_source(&mut parser, Path::new("ecco/output.py"), OUTPUT_PY, include_private)
            .unwrap();
        index
    }

    #[test]
    fn indexes_module_classes_functions_and_methods() {
        let index = index(false);

        let module = index.get("ecco.output").unwrap();
        assert_eq!(module.kind, ObjectKind::Module);
        assert_eq!(module.docstring.as_deref(), Some("Output objects returned by the model."));

        let ids: Vec<&str> = index.members("ecco.output").map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["ecco.output.OutputSeq", "ecco.output.load"]);

        let methods: Vec<&str> = index
            .members("ecco.output.OutputSeq")
            .map(PyObject::name)
            .collect();
        assert_eq!(methods, vec!["__init__", "size"]);
    }

    #[test]
    fn signatures_keep_annotations_and_decorators() {
        let index = index(false);
        assert_eq!(
            index.get("ecco.output.load").unwrap().signature.as_deref(),
            Some("def load(path: str, *, strict: bool = False) -> OutputSeq")
        );
        assert_eq!(
            index.get("ecco.output.OutputSeq.size").unwrap().signature.as_deref(),
            Some("@property\ndef size(self) -> int")
        );
        assert_eq!(
            index.get("ecco.output.OutputSeq").unwrap().signature.as_deref(),
            Some("class OutputSeq")
        );
    }

    #[test]
    fn docstrings_are_dedented() {
        let index = index(false);
        assert_eq!(
            index.get("ecco.output.OutputSeq").unwrap().docstring.as_deref(),
            Some("The result of running a model on some input.\n\nIt also collects data from the generation process.")
        );
        assert_eq!(
            index.get("ecco.output.OutputSeq.__init__").unwrap().docstring.as_deref(),
            Some("Args:\n    tokens: A list of token text.")
        );
        assert_eq!(
            index.get("ecco.output.load").unwrap().docstring.as_deref(),
            Some("Load a saved sequence.")
        );
    }

    #[test]
    fn private_names_need_opting_in() {
        assert!(index(false).get("ecco.output._private").is_none());
        let index = index(true);
        assert!(index.get("ecco.output._private").is_some());
        assert!(index.get("ecco.output.OutputSeq._helper").is_some());
        assert!(index.get("ecco.output.OutputSeq.__repr__").is_none());
    }

    #[test]
    fn package_init_names_the_package() {
        assert_eq!(derive_module_path(Path::new("ecco/__init__.py")), vec!["ecco"]);
        assert_eq!(derive_module_path(Path::new("ecco/output.py")), vec!["ecco", "output"]);
        assert!(derive_module_path(Path::new("__init__.py")).is_empty());
    }

    #[test]
    fn scan_walks_roots_and_skips_caches() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("ecco");
        std::fs::create_dir_all(pkg.join("__pycache__")).unwrap();
        std::fs::write(pkg.join("__init__.py"), "\"\"\"Ecco.\"\"\"\n").unwrap();
        std::fs::write(pkg.join("output.py"), OUTPUT_PY).unwrap();
        std::fs::write(pkg.join("__pycache__/stale.py"), "def stale(): pass\n").unwrap();

        let index = ModuleIndex::scan(&[dir.path().to_path_buf()], false).unwrap();
        let modules: Vec<&str> = index.modules().map(|m| m.id.as_str()).collect();
        assert_eq!(modules, vec!["ecco", "ecco.output"]);
        assert!(index.get("ecco.__pycache__.stale").is_none());
    }

    #[test]
    fn scan_rejects_missing_roots() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModuleIndex::scan(&[dir.path().join("nope")], false).unwrap_err();
        assert!(err.to_string().contains("not a directory"), "{err}");
    }

    #[test]
    fn cleandoc_handles_flush_left_bodies() {
        assert_eq!(cleandoc("\nExplorable.\n\nExamples:\n"), "Explorable.\n\nExamples:");
        assert_eq!(cleandoc("One line."), "One line.");
    }
}
