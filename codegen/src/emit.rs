//! Renders a merged model as grouped TypeScript declaration files.

use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};

use soapts_wsdl::types::{Field, PrimitiveKind, QualifiedName, TypeGraph, TypeNode};

use crate::{merge::MergedTypedWsdl, naming, Error};

/// One file to be published: a relative path without extension plus the
/// declaration fragments it contains, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    pub file: String,
    pub data: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Grouping {
    #[default]
    ByNamespace,
    BySource,
}

impl FromStr for Grouping {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "namespace" => Ok(Grouping::ByNamespace),
            "source" => Ok(Grouping::BySource),
            other => Err(format!(
                "unknown grouping '{}', expected 'namespace' or 'source'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Quote every property name instead of only the ones that are not
    /// valid bare identifiers.
    pub quote_properties: bool,
    pub grouping: Grouping,
}

#[derive(Default)]
struct Group {
    members: Vec<QualifiedName>,
    used: IndexSet<String>,
    operations: Vec<(String, QualifiedName, QualifiedName)>,
    imports: IndexMap<String, Vec<(String, String)>>,
    aliases: IndexMap<QualifiedName, String>,
}

/// Walk the merged graph and produce one `OutputFile` per group, each
/// holding imports, type declarations in dependency order, and operation
/// declarations.
pub fn emit(merged: &MergedTypedWsdl, options: &EmitOptions) -> Result<Vec<OutputFile>, Error> {
    let mut groups: IndexMap<String, Group> = IndexMap::new();
    let mut declared: IndexMap<QualifiedName, (String, String)> = IndexMap::new();

    for (qname, _) in merged.graph.iter() {
        let file = declaration_file(merged, qname, options.grouping);
        let group = groups.entry(file.clone()).or_default();
        let name = unique_name(&mut group.used, &naming::sanitize_identifier(&qname.local));
        group.members.push(qname.clone());
        declared.insert(qname.clone(), (file, name));
    }

    for (source, source_operations) in &merged.operations_by_source {
        let file = match options.grouping {
            Grouping::BySource => source_file(source),
            Grouping::ByNamespace => namespace_file(&source_operations.primary_namespace),
        };
        let group = groups.entry(file).or_default();
        for operation in &source_operations.operations {
            let name = unique_name(
                &mut group.used,
                &naming::sanitize_identifier(&operation.name),
            );
            group
                .operations
                .push((name, operation.input.clone(), operation.output.clone()));
        }
    }

    // Names referenced from another group are pulled in through imports,
    // aliased when they would clash with a local declaration.
    for (file, group) in groups.iter_mut() {
        let mut referenced: Vec<QualifiedName> = Vec::new();
        for member in &group.members {
            if let Some(node) = merged.graph.get(member) {
                node.for_each_reference(&mut |target| referenced.push(target.clone()));
            }
        }
        for (_, input, output) in &group.operations {
            referenced.push(input.clone());
            referenced.push(output.clone());
        }

        for target in referenced {
            if group.aliases.contains_key(&target) {
                continue;
            }
            let (target_file, target_name) = declared
                .get(&target)
                .ok_or_else(|| Error::UnknownReference(target.clone()))?;
            if target_file == file {
                continue;
            }
            let alias = unique_name(&mut group.used, target_name);
            group
                .imports
                .entry(target_file.clone())
                .or_default()
                .push((target_name.clone(), alias.clone()));
            group.aliases.insert(target, alias);
        }
    }

    let mut output = Vec::with_capacity(groups.len());
    for (file, group) in &groups {
        let renderer = GroupRenderer {
            file: file.as_str(),
            declared: &declared,
            aliases: &group.aliases,
            quote_properties: options.quote_properties,
        };

        let mut data = Vec::new();

        if !group.imports.is_empty() {
            let mut lines = Vec::with_capacity(group.imports.len());
            for (target_file, items) in &group.imports {
                let names = items
                    .iter()
                    .map(|(name, alias)| {
                        if name == alias {
                            name.clone()
                        } else {
                            format!("{} as {}", name, alias)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!(
                    "import {{ {} }} from \"{}\";",
                    names,
                    relative_import(file, target_file)
                ));
            }
            data.push(lines.join("\n"));
        }

        for member in topological(&group.members, &merged.graph) {
            let Some((_, name)) = declared.get(&member) else {
                continue;
            };
            let Some(node) = merged.graph.get(&member) else {
                continue;
            };
            data.push(renderer.declaration(name, node)?);
        }

        for (name, input, output_type) in &group.operations {
            data.push(format!(
                "export type {} = (input: {}) => Promise<{}>;",
                name,
                renderer.resolve(input)?,
                renderer.resolve(output_type)?
            ));
        }

        output.push(OutputFile {
            file: file.clone(),
            data,
        });
    }

    Ok(output)
}

fn declaration_file(merged: &MergedTypedWsdl, name: &QualifiedName, grouping: Grouping) -> String {
    match grouping {
        Grouping::ByNamespace => namespace_file(&name.namespace),
        Grouping::BySource => merged
            .provenance
            .get(name)
            .map(|source| source_file(source))
            .unwrap_or_else(|| namespace_file(&name.namespace)),
    }
}

/// Derive a relative file path from a namespace URI:
/// `http://example.com/users` becomes `example-com/users`.
fn namespace_file(namespace: &str) -> String {
    let trimmed = namespace
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("urn:");

    let cleaned: String = trimmed
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '/' => c,
            _ => '-',
        })
        .collect();

    let parts: Vec<&str> = cleaned.split('/').filter(|part| !part.is_empty()).collect();
    if parts.is_empty() {
        "types".to_owned()
    } else {
        parts.join("/")
    }
}

/// Derive a file path from a source identifier's basename.
fn source_file(source: &str) -> String {
    let base = source
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(source);
    let stem = base.split('.').next().unwrap_or(base);

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "types".to_owned()
    } else {
        cleaned
    }
}

fn unique_name(used: &mut IndexSet<String>, base: &str) -> String {
    if used.insert(base.to_owned()) {
        return base.to_owned();
    }
    let mut counter = 2;
    loop {
        let candidate = format!("{}{}", base, counter);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Relative module specifier from one output file to another.
fn relative_import(from: &str, to: &str) -> String {
    let mut from_dir: Vec<&str> = from.split('/').collect();
    from_dir.pop();
    let to_parts: Vec<&str> = to.split('/').collect();

    let mut common = from_dir
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();
    common = common.min(to_parts.len().saturating_sub(1));

    let ups = from_dir.len() - common;
    let mut result = if ups == 0 {
        "./".to_owned()
    } else {
        "../".repeat(ups)
    };
    result.push_str(&to_parts[common..].join("/"));
    result
}

/// References reachable without passing through an object field. These are
/// the ones that force declaration order; object fields only need a name
/// and legitimately close recursion cycles.
fn ordering_refs(node: &TypeNode, out: &mut Vec<QualifiedName>) {
    match node {
        TypeNode::Reference(name) => out.push(name.clone()),
        TypeNode::Array(element) => ordering_refs(element, out),
        TypeNode::Union(variants) => {
            for variant in variants {
                ordering_refs(variant, out);
            }
        }
        TypeNode::Primitive(_) | TypeNode::Object(_) | TypeNode::Enum(_) => {}
    }
}

/// Stable topological order over one group: a declaration follows the
/// alias/union/array targets it names. Falls back to declaration order if
/// no progress can be made.
fn topological(members: &[QualifiedName], graph: &TypeGraph) -> Vec<QualifiedName> {
    let member_set: IndexSet<&QualifiedName> = members.iter().collect();
    let mut remaining = members.to_vec();
    let mut done: IndexSet<QualifiedName> = IndexSet::new();
    let mut order = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut progressed = false;
        let mut index = 0;

        while index < remaining.len() {
            let ready = {
                let name = &remaining[index];
                let mut deps = Vec::new();
                if let Some(node) = graph.get(name) {
                    ordering_refs(node, &mut deps);
                }
                deps.iter()
                    .all(|dep| dep == name || !member_set.contains(dep) || done.contains(dep))
            };

            if ready {
                let name = remaining.remove(index);
                done.insert(name.clone());
                order.push(name);
                progressed = true;
            } else {
                index += 1;
            }
        }

        if !progressed {
            order.extend(remaining.drain(..));
            break;
        }
    }

    order
}

fn primitive_ts(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::String => "string",
        PrimitiveKind::Boolean => "boolean",
        PrimitiveKind::Integer | PrimitiveKind::Decimal => "number",
        PrimitiveKind::DateTime | PrimitiveKind::Date | PrimitiveKind::Time => "Date",
        PrimitiveKind::Base64Binary | PrimitiveKind::HexBinary => "string",
    }
}

fn array_of(expr: &str) -> String {
    if expr.contains(' ') {
        format!("({})[]", expr)
    } else {
        format!("{}[]", expr)
    }
}

struct GroupRenderer<'a> {
    file: &'a str,
    declared: &'a IndexMap<QualifiedName, (String, String)>,
    aliases: &'a IndexMap<QualifiedName, String>,
    quote_properties: bool,
}

impl GroupRenderer<'_> {
    fn resolve(&self, name: &QualifiedName) -> Result<String, Error> {
        if let Some(alias) = self.aliases.get(name) {
            return Ok(alias.clone());
        }
        match self.declared.get(name) {
            Some((file, declared)) if file == self.file => Ok(declared.clone()),
            _ => Err(Error::UnknownReference(name.clone())),
        }
    }

    fn property(&self, name: &str) -> String {
        if self.quote_properties || !naming::is_valid_identifier(name) {
            format!("{:?}", name)
        } else {
            name.to_owned()
        }
    }

    fn field_member(&self, field: &Field) -> Result<String, Error> {
        let mut ty = self.type_expr(&field.ty)?;
        if field.repeated {
            ty = array_of(&ty);
        }
        Ok(format!(
            "{}{}: {};",
            self.property(&field.name),
            if field.optional { "?" } else { "" },
            ty
        ))
    }

    fn type_expr(&self, node: &TypeNode) -> Result<String, Error> {
        Ok(match node {
            TypeNode::Primitive(kind) => primitive_ts(*kind).to_owned(),

            TypeNode::Reference(name) => self.resolve(name)?,

            TypeNode::Array(element) => array_of(&self.type_expr(element)?),

            TypeNode::Union(variants) => {
                if variants.is_empty() {
                    "never".to_owned()
                } else {
                    variants
                        .iter()
                        .map(|variant| self.type_expr(variant))
                        .collect::<Result<Vec<_>, _>>()?
                        .join(" | ")
                }
            }

            TypeNode::Enum(literals) => {
                if literals.is_empty() {
                    "never".to_owned()
                } else {
                    literals
                        .iter()
                        .map(|literal| format!("{:?}", literal))
                        .collect::<Vec<_>>()
                        .join(" | ")
                }
            }

            TypeNode::Object(fields) => {
                if fields.is_empty() {
                    "{}".to_owned()
                } else {
                    let members = fields
                        .iter()
                        .map(|field| self.field_member(field))
                        .collect::<Result<Vec<_>, _>>()?
                        .join(" ");
                    format!("{{ {} }}", members)
                }
            }
        })
    }

    fn declaration(&self, name: &str, node: &TypeNode) -> Result<String, Error> {
        Ok(match node {
            TypeNode::Object(fields) => {
                let mut lines = Vec::with_capacity(fields.len() + 2);
                lines.push(format!("export interface {} {{", name));
                for field in fields {
                    lines.push(format!("  {}", self.field_member(field)?));
                }
                lines.push("}".to_owned());
                lines.join("\n")
            }

            node => format!("export type {} = {};", name, self.type_expr(node)?),
        })
    }
}
