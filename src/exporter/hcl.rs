//! HCL rendering of an [`ArtifactSet`]
//!
//! Blocks are grouped into one `<service>.tf` file per service tag, keeping
//! the dependency order within each file. Input variables go to `vars.tf`
//! and side files are written verbatim under `files/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_json::Value;

use crate::traits::FileSystem;

use super::emission::{ArtifactSet, Block, BlockBody, Expr, InputVariable};
use super::entity::Mode;
use super::error::{ExportError, ExportResult};

const HEADER: &str = "# Generated by wsexport from a live workspace\n";
const INDENT: &str = "  ";

/// Escape a string for a quoted HCL literal, including template sequences
pub fn escape_hcl_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
        .replace("${", "$${")
        .replace("%{", "%%{")
}

/// Whether `name` can stand bare as an attribute or block name
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn format_literal(value: &Value, depth: usize) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", escape_hcl_string(s)),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(|v| format_literal(v, depth)).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            if map.is_empty() {
                return "{}".to_string();
            }
            let pad = INDENT.repeat(depth + 1);
            let mut out = String::from("{\n");
            for (k, v) in map {
                out.push_str(&format!(
                    "{}\"{}\" = {}\n",
                    pad,
                    escape_hcl_string(k),
                    format_literal(v, depth + 1)
                ));
            }
            out.push_str(&format!("{}}}", INDENT.repeat(depth)));
            out
        }
    }
}

fn format_expr(expr: &Expr, depth: usize) -> String {
    match expr {
        Expr::Literal(value) => format_literal(value, depth),
        Expr::Reference { reference, .. } if reference.is_embedded() => format!(
            "\"{}${{{}}}{}\"",
            escape_hcl_string(&reference.prefix),
            reference.expression(),
            escape_hcl_string(&reference.suffix)
        ),
        Expr::Reference { reference, .. } => reference.expression(),
        Expr::Variable(name) => format!("var.{}", name),
        Expr::FilePath(name) => format!("\"${{path.module}}/files/{}\"", name),
        Expr::List(items) => {
            let items: Vec<String> = items.iter().map(|e| format_expr(e, depth)).collect();
            format!("[{}]", items.join(", "))
        }
        Expr::Object(entries) => {
            if entries.is_empty() {
                return "{}".to_string();
            }
            let pad = INDENT.repeat(depth + 1);
            let mut out = String::from("{\n");
            for (k, e) in entries {
                out.push_str(&format!(
                    "{}\"{}\" = {}\n",
                    pad,
                    escape_hcl_string(k),
                    format_expr(e, depth + 1)
                ));
            }
            out.push_str(&format!("{}}}", INDENT.repeat(depth)));
            out
        }
        // Only reachable inside a list; nested blocks are rendered by write_body.
        Expr::Blocks(bodies) => {
            let items: Vec<String> = bodies
                .iter()
                .map(|body| {
                    let entries = body
                        .iter()
                        .map(|(k, e)| (k.clone(), e.clone()))
                        .collect();
                    format_expr(&Expr::Object(entries), depth)
                })
                .collect();
            format!("[{}]", items.join(", "))
        }
    }
}

fn write_body(out: &mut String, body: &BlockBody, depth: usize) {
    let pad = INDENT.repeat(depth);
    let (attributes, nested): (Vec<_>, Vec<_>) = body
        .iter()
        .partition(|(_, e)| !matches!(e, Expr::Blocks(_)));

    for (name, expr) in attributes {
        out.push_str(&format!("{}{} = {}\n", pad, name, format_expr(expr, depth)));
    }
    for (name, expr) in nested {
        let Expr::Blocks(bodies) = expr else {
            continue;
        };
        for inner in bodies {
            out.push_str(&format!("\n{}{} {{\n", pad, name));
            write_body(out, inner, depth + 1);
            out.push_str(&format!("{}}}\n", pad));
        }
    }
}

/// One `resource` or `data` block
pub fn render_block(block: &Block) -> String {
    let mut out = format!(
        "{} \"{}\" \"{}\" {{\n",
        block.mode.as_str(),
        block.kind(),
        block.name
    );
    write_body(&mut out, &block.body, 1);
    out.push_str("}\n");
    out
}

pub fn render_variable(variable: &InputVariable) -> String {
    format!(
        "variable \"{}\" {{\n{}description = \"{}\"\n}}\n",
        variable.name,
        INDENT,
        escape_hcl_string(&variable.description)
    )
}

/// Writes artifacts below one output directory
pub struct HclWriter<'a> {
    fs: &'a dyn FileSystem,
    dir: PathBuf,
}

impl<'a> HclWriter<'a> {
    pub fn new(fs: &'a dyn FileSystem, dir: impl AsRef<Path>) -> Self {
        Self {
            fs,
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Write every artifact, returning the paths written
    pub fn write(&self, artifacts: &ArtifactSet) -> ExportResult<Vec<PathBuf>> {
        self.fs
            .create_dir_all(&self.dir)
            .map_err(|e| ExportError::Io(std::io::Error::other(format!("{:#}", e))))?;

        let mut by_service: BTreeMap<&str, String> = BTreeMap::new();
        for block in &artifacts.blocks {
            let content = by_service
                .entry(block.service)
                .or_insert_with(|| HEADER.to_string());
            content.push('\n');
            if block.mode == Mode::Data {
                debug!("Rendering {} {} as data", block.kind(), block.name);
            }
            content.push_str(&render_block(block));
        }

        let mut written = Vec::new();
        for (service, content) in &by_service {
            written.push(self.put(&format!("{}.tf", service), content.as_bytes())?);
        }

        if !artifacts.variables.is_empty() {
            let mut content = HEADER.to_string();
            for variable in &artifacts.variables {
                content.push('\n');
                content.push_str(&render_variable(variable));
            }
            written.push(self.put("vars.tf", content.as_bytes())?);
        }

        for file in &artifacts.files {
            written.push(self.put(&file.path, &file.content)?);
        }

        info!("Wrote {} files to {}", written.len(), self.dir.display());
        Ok(written)
    }

    fn put(&self, relative: &str, content: &[u8]) -> ExportResult<PathBuf> {
        let path = self.dir.join(relative);
        self.fs
            .write_bytes(&path, content)
            .map_err(|e| ExportError::Io(std::io::Error::other(format!("{:#}", e))))?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }
}
