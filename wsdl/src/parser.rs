use std::{
    collections::HashMap,
    io::{BufRead, BufReader},
};

use indexmap::IndexMap;
use quick_xml::{
    events::{attributes::Attributes, BytesStart, Event},
    Reader,
};
use url::Url;

use super::{
    error::Error,
    types::{
        Field, OperationSignature, PrimitiveKind, QualifiedName, TypeGraph, TypeNode, TypedWsdl,
    },
    RetrievalOptions,
};

pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

fn get_attributes<B: BufRead, const N: usize>(
    reader: &Reader<B>,
    attributes: Attributes<'_>,
    names: [&'static str; N],
) -> Result<[Option<String>; N], Error> {
    const INIT: Option<String> = None;
    let mut result = [INIT; N];

    for attribute in attributes {
        let attribute = attribute?;
        let key = reader.decode(attribute.key)?;

        for (index, name) in names.iter().enumerate() {
            if key == *name {
                result[index] = Some(reader.decode(attribute.value.as_ref())?.to_owned());
                break;
            }
        }
    }

    Ok(result)
}

fn split_prefixed(prefixed_name: &str) -> (Option<&str>, &str) {
    match prefixed_name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, prefixed_name),
    }
}

fn parse_occurs(min: Option<&str>, max: Option<&str>) -> (bool, bool) {
    let optional = matches!(min, Some("0"));
    let repeated = match max {
        Some("unbounded") => true,
        Some(value) => value.parse::<u64>().map(|n| n > 1).unwrap_or(false),
        None => false,
    };
    (optional, repeated)
}

/// Target-namespace stack plus the prefix bindings currently in scope.
#[derive(Clone, Default)]
struct Scope {
    targets: Vec<String>,
    prefixes: HashMap<Option<String>, String>,
}

impl Scope {
    fn push_target(&mut self, namespace: String) {
        self.targets.push(namespace);
    }

    fn pop_target(&mut self) {
        self.targets.pop();
    }

    fn target(&self) -> Option<&String> {
        self.targets.last()
    }

    fn bind(&mut self, prefix: Option<String>, namespace: &str) {
        self.prefixes.insert(prefix, namespace.to_owned());
    }
}

/// A declaration waiting for the post-walk passes: extension bases are
/// flattened only once every global declaration has been seen.
struct PendingType {
    node: TypeNode,
    extends: Option<QualifiedName>,
}

#[derive(Debug)]
enum ParseState {
    Definitions,

    Types,
    Schema,
    Element {
        name: String,
        node: Option<TypeNode>,
        extends: Option<QualifiedName>,
    },
    ComplexType {
        name: Option<String>,
        node: Option<TypeNode>,
        extends: Option<QualifiedName>,
    },
    ComplexContent {
        node: Option<TypeNode>,
        extends: Option<QualifiedName>,
    },
    Extension {
        base: QualifiedName,
        node: Option<TypeNode>,
    },
    SimpleContent {
        base: Option<TypeNode>,
    },
    Sequence(Vec<Field>),
    Choice(Vec<TypeNode>),
    SequenceElement {
        name: String,
        ty: Option<TypeNode>,
        optional: bool,
        repeated: bool,
    },
    SimpleType {
        name: Option<String>,
        node: Option<TypeNode>,
    },
    Restriction {
        base: TypeNode,
        literals: Vec<String>,
    },

    Message {
        name: String,
        parts: Vec<Field>,
    },
    PortType,
    Operation {
        name: String,
        input: Option<QualifiedName>,
        output: Option<QualifiedName>,
    },

    Import,

    Other(String),
}

struct Parser {
    document: String,
    options: RetrievalOptions,

    scope: Scope,
    name_context: Vec<String>,

    types: IndexMap<QualifiedName, PendingType>,
    messages: IndexMap<QualifiedName, Vec<Field>>,
    raw_operations: Vec<(String, QualifiedName, QualifiedName)>,
    primary_namespace: Option<String>,
}

impl Parser {
    fn new(options: RetrievalOptions) -> Self {
        Self {
            document: String::new(),
            options,

            scope: Scope::default(),
            name_context: Vec::new(),

            types: IndexMap::new(),
            messages: IndexMap::new(),
            raw_operations: Vec::new(),
            primary_namespace: None,
        }
    }

    fn missing(&self, element: &str, attribute: &str) -> Error {
        Error::MissingAttribute {
            document: self.document.clone(),
            element: element.to_owned(),
            attribute: attribute.to_owned(),
        }
    }

    fn unsupported(&self, construct: String) -> Error {
        Error::UnsupportedConstruct {
            document: self.document.clone(),
            construct,
        }
    }

    fn resolve_name(&self, prefixed: &str) -> Result<QualifiedName, Error> {
        let (prefix, local) = split_prefixed(prefixed);
        let key = prefix.map(ToOwned::to_owned);

        if let Some(namespace) = self.scope.prefixes.get(&key) {
            return Ok(QualifiedName::new(namespace.clone(), local));
        }

        match prefix {
            Some("tns") | None => {
                let target = self.scope.target().cloned().unwrap_or_default();
                Ok(QualifiedName::new(target, local))
            }
            Some(other) => Err(Error::UnknownPrefix {
                document: self.document.clone(),
                prefix: other.to_owned(),
            }),
        }
    }

    /// Resolve a type reference. XSD built-ins become primitives on the
    /// spot; everything else stays a by-name reference validated after the
    /// full walk.
    fn resolve_type(&self, prefixed: &str) -> Result<TypeNode, Error> {
        let name = self.resolve_name(prefixed)?;
        if name.namespace == XSD_NAMESPACE {
            PrimitiveKind::from_xsd_local(&name.local)
                .map(TypeNode::Primitive)
                .ok_or(Error::UnsupportedType { name })
        } else {
            Ok(TypeNode::Reference(name))
        }
    }

    fn target_qname(&self, local: String) -> Result<QualifiedName, Error> {
        match self.scope.target() {
            Some(namespace) => Ok(QualifiedName::new(namespace.clone(), local)),
            None => Err(self.unsupported(format!(
                "declaration of '{}' outside any targetNamespace",
                local
            ))),
        }
    }

    fn register_type(&mut self, name: QualifiedName, node: TypeNode, extends: Option<QualifiedName>) {
        let node = if extends.is_none() && name.local.starts_with("ArrayOf") {
            collapse_wrapper(node)
        } else {
            node
        };

        if self
            .types
            .insert(name.clone(), PendingType { node, extends })
            .is_some()
        {
            tracing::debug!(name = %name, "replacing earlier declaration");
        }
    }

    /// Global elements never shadow a named type of the same name.
    fn register_element(
        &mut self,
        name: QualifiedName,
        node: TypeNode,
        extends: Option<QualifiedName>,
    ) {
        if self.types.contains_key(&name) {
            tracing::debug!(name = %name, "keeping existing declaration over element alias");
            return;
        }
        self.types.insert(name, PendingType { node, extends });
    }

    /// Give an anonymous inline type a stable home. Single-repeated-element
    /// wrappers collapse to a plain array; everything else is registered
    /// under a name derived from the enclosing declarations.
    fn intern_inline(
        &mut self,
        node: TypeNode,
        extends: Option<QualifiedName>,
    ) -> Result<TypeNode, Error> {
        let node = if extends.is_none() {
            let collapsed = collapse_wrapper(node);
            if let TypeNode::Array(_) = collapsed {
                return Ok(collapsed);
            }
            collapsed
        } else {
            node
        };

        let local = self.name_context.join("_");
        let name = self.target_qname(local)?;
        if self
            .types
            .insert(name.clone(), PendingType { node, extends })
            .is_some()
        {
            tracing::debug!(name = %name, "replacing earlier declaration");
        }
        Ok(TypeNode::Reference(name))
    }

    fn parse(mut self, source: &str, url: Url) -> Result<TypedWsdl, Error> {
        self.parse_url(url)?;
        self.finish(source.to_owned())
    }

    fn parse_url(&mut self, url: Url) -> Result<(), Error> {
        tracing::debug!(url = %url, "retrieving document");

        let saved_prefixes = self.scope.prefixes.clone();
        let saved_document = std::mem::replace(&mut self.document, url.to_string());

        let result = match url.scheme() {
            "file" => {
                let reader = Reader::from_file(
                    url.to_file_path()
                        .map_err(|()| Error::PathConversion(None))?,
                )
                .map_err(Error::FileOpen)?;
                self.parse_xml(Some(&url), reader)
            }

            "http" | "https" => {
                let mut builder = reqwest::blocking::Client::builder();
                if let Some(der) = &self.options.pkcs12_der {
                    let passphrase = self.options.passphrase.as_deref().unwrap_or("");
                    let identity = reqwest::Identity::from_pkcs12_der(der, passphrase)
                        .map_err(Error::Certificate)?;
                    builder = builder.identity(identity);
                }
                let response = builder.build()?.get(url.clone()).send()?;
                self.parse_xml(Some(&url), Reader::from_reader(BufReader::new(response)))
            }

            other => Err(Error::UnsupportedScheme(other.into())),
        };

        self.scope.prefixes = saved_prefixes;
        self.document = saved_document;
        result
    }

    fn parse_xml<B: BufRead>(
        &mut self,
        url: Option<&Url>,
        mut reader: Reader<B>,
    ) -> Result<(), Error> {
        reader.trim_text(true);

        let mut stack = Vec::new();
        let mut buffer = Vec::new();
        let mut namespace_buffer = Vec::new();

        loop {
            let (_, event) = reader.read_namespaced_event(&mut buffer, &mut namespace_buffer)?;

            match event {
                Event::Start(start) => self.handle_start(&mut stack, &reader, start, url)?,
                Event::End(..) => self.handle_end(&mut stack)?,

                Event::Empty(start) => {
                    self.handle_start(&mut stack, &reader, start, url)?;
                    self.handle_end(&mut stack)?;
                }

                Event::Eof => break,

                _ => (),
            }

            buffer.clear();
        }

        Ok(())
    }

    fn handle_start<B: BufRead>(
        &mut self,
        stack: &mut Vec<ParseState>,
        reader: &Reader<B>,
        start: BytesStart<'_>,
        url: Option<&Url>,
    ) -> Result<(), Error> {
        let (_, local_name) = split_prefixed(reader.decode(start.name())?);

        for attribute in start.attributes() {
            let attribute = attribute?;
            let key = reader.decode(attribute.key)?;
            let (key_prefix, key_local) = split_prefixed(key);

            if key_prefix == Some("xmlns") {
                self.scope.bind(
                    Some(key_local.to_owned()),
                    reader.decode(attribute.value.as_ref())?,
                );
            } else if key_prefix.is_none() && key_local == "xmlns" {
                self.scope
                    .bind(None, reader.decode(attribute.value.as_ref())?);
            }
        }

        let mut state = stack.pop();
        let mut new_state = ParseState::Other(local_name.to_owned());

        match state {
            None => match local_name {
                "definitions" => {
                    let [namespace] =
                        get_attributes(reader, start.attributes(), ["targetNamespace"])?;
                    let namespace =
                        namespace.ok_or_else(|| self.missing("definitions", "targetNamespace"))?;

                    if self.primary_namespace.is_none() {
                        self.primary_namespace = Some(namespace.clone());
                    }

                    self.scope.push_target(namespace);
                    new_state = ParseState::Definitions;
                }

                // Standalone schema document, reached through an import.
                "schema" => {
                    let [namespace] =
                        get_attributes(reader, start.attributes(), ["targetNamespace"])?;
                    let namespace = namespace
                        .or_else(|| self.scope.target().cloned())
                        .unwrap_or_default();

                    if self.primary_namespace.is_none() {
                        self.primary_namespace = Some(namespace.clone());
                    }

                    self.scope.push_target(namespace);
                    new_state = ParseState::Schema;
                }

                other => tracing::debug!(element = %other, "skipping unknown document root"),
            },

            Some(ParseState::Definitions) => match local_name {
                "import" => {
                    let [location] = get_attributes(reader, start.attributes(), ["location"])?;
                    if let Some(location) = location {
                        self.parse_import(url, &location)?;
                    }
                    new_state = ParseState::Import;
                }

                "types" => new_state = ParseState::Types,

                "message" => {
                    let [name] = get_attributes(reader, start.attributes(), ["name"])?;
                    let name = name.ok_or_else(|| self.missing("message", "name"))?;

                    new_state = ParseState::Message {
                        name,
                        parts: Vec::new(),
                    };
                }

                "portType" => new_state = ParseState::PortType,

                other => tracing::debug!(element = %other, "skipping definitions child"),
            },

            Some(ParseState::Types) => match local_name {
                "schema" => {
                    let [namespace] =
                        get_attributes(reader, start.attributes(), ["targetNamespace"])?;
                    let namespace = namespace
                        .or_else(|| self.scope.target().cloned())
                        .unwrap_or_default();

                    self.scope.push_target(namespace);
                    new_state = ParseState::Schema;
                }

                other => tracing::debug!(element = %other, "skipping types child"),
            },

            Some(ParseState::Schema) => match local_name {
                "element" => {
                    let [name, ty] = get_attributes(reader, start.attributes(), ["name", "type"])?;
                    let name = name.ok_or_else(|| self.missing("element", "name"))?;

                    let node = match ty {
                        Some(ty) => Some(self.resolve_type(&ty)?),
                        None => None,
                    };

                    self.name_context.push(name.clone());
                    new_state = ParseState::Element {
                        name,
                        node,
                        extends: None,
                    };
                }

                "complexType" => {
                    let [name] = get_attributes(reader, start.attributes(), ["name"])?;
                    let name = name.ok_or_else(|| self.missing("complexType", "name"))?;

                    self.name_context.push(name.clone());
                    new_state = ParseState::ComplexType {
                        name: Some(name),
                        node: None,
                        extends: None,
                    };
                }

                "simpleType" => {
                    let [name] = get_attributes(reader, start.attributes(), ["name"])?;
                    let name = name.ok_or_else(|| self.missing("simpleType", "name"))?;

                    self.name_context.push(name.clone());
                    new_state = ParseState::SimpleType {
                        name: Some(name),
                        node: None,
                    };
                }

                "import" | "include" => {
                    let [location] =
                        get_attributes(reader, start.attributes(), ["schemaLocation"])?;
                    if let Some(location) = location {
                        self.parse_import(url, &location)?;
                    }
                    new_state = ParseState::Import;
                }

                other => tracing::debug!(element = %other, "skipping schema child"),
            },

            Some(ParseState::Element { .. }) => match local_name {
                "complexType" => {
                    new_state = ParseState::ComplexType {
                        name: None,
                        node: None,
                        extends: None,
                    }
                }

                "simpleType" => {
                    new_state = ParseState::SimpleType {
                        name: None,
                        node: None,
                    }
                }

                other => tracing::debug!(element = %other, "skipping element child"),
            },

            Some(ParseState::ComplexType { .. }) => match local_name {
                "sequence" | "all" => new_state = ParseState::Sequence(Vec::new()),

                "choice" => new_state = ParseState::Choice(Vec::new()),

                "complexContent" => {
                    new_state = ParseState::ComplexContent {
                        node: None,
                        extends: None,
                    }
                }

                "simpleContent" => new_state = ParseState::SimpleContent { base: None },

                other => tracing::debug!(element = %other, "skipping complexType child"),
            },

            Some(ParseState::ComplexContent {
                ref mut node,
                ref mut extends,
            }) => match local_name {
                "extension" => {
                    let [base] = get_attributes(reader, start.attributes(), ["base"])?;
                    let base = base.ok_or_else(|| self.missing("extension", "base"))?;

                    new_state = ParseState::Extension {
                        base: self.resolve_name(&base)?,
                        node: None,
                    };
                }

                // A restriction narrows facets; the shape is the base's.
                "restriction" => {
                    let [base] = get_attributes(reader, start.attributes(), ["base"])?;
                    let base = base.ok_or_else(|| self.missing("restriction", "base"))?;

                    *node = Some(self.resolve_type(&base)?);
                    *extends = None;
                }

                other => tracing::debug!(element = %other, "skipping complexContent child"),
            },

            Some(ParseState::Extension { .. }) => match local_name {
                "sequence" | "all" => new_state = ParseState::Sequence(Vec::new()),

                "choice" => new_state = ParseState::Choice(Vec::new()),

                other => tracing::debug!(element = %other, "skipping extension child"),
            },

            Some(ParseState::SimpleContent { ref mut base }) => match local_name {
                "extension" | "restriction" => {
                    let [base_name] = get_attributes(reader, start.attributes(), ["base"])?;
                    let base_name =
                        base_name.ok_or_else(|| self.missing(local_name, "base"))?;

                    *base = Some(self.resolve_type(&base_name)?);
                }

                other => tracing::debug!(element = %other, "skipping simpleContent child"),
            },

            Some(ParseState::Sequence(_) | ParseState::Choice(_)) => match local_name {
                "element" => {
                    let [name, reference, ty, min, max] = get_attributes(
                        reader,
                        start.attributes(),
                        ["name", "ref", "type", "minOccurs", "maxOccurs"],
                    )?;

                    let (optional, repeated) = parse_occurs(min.as_deref(), max.as_deref());

                    let (name, ty) = if let Some(reference) = reference {
                        let target = self.resolve_name(&reference)?;
                        (target.local.clone(), Some(TypeNode::Reference(target)))
                    } else {
                        let name = name.ok_or_else(|| self.missing("element", "name"))?;
                        let ty = match ty {
                            Some(ty) => Some(self.resolve_type(&ty)?),
                            None => None,
                        };
                        (name, ty)
                    };

                    self.name_context.push(name.clone());
                    new_state = ParseState::SequenceElement {
                        name,
                        ty,
                        optional,
                        repeated,
                    };
                }

                "sequence" | "all" => new_state = ParseState::Sequence(Vec::new()),

                "choice" => new_state = ParseState::Choice(Vec::new()),

                other => tracing::debug!(element = %other, "skipping group child"),
            },

            Some(ParseState::SequenceElement { .. }) => match local_name {
                "complexType" => {
                    new_state = ParseState::ComplexType {
                        name: None,
                        node: None,
                        extends: None,
                    }
                }

                "simpleType" => {
                    new_state = ParseState::SimpleType {
                        name: None,
                        node: None,
                    }
                }

                other => tracing::debug!(element = %other, "skipping field child"),
            },

            Some(ParseState::SimpleType { ref mut node, .. }) => match local_name {
                "restriction" => {
                    let [base] = get_attributes(reader, start.attributes(), ["base"])?;
                    let base = base.ok_or_else(|| self.missing("restriction", "base"))?;

                    new_state = ParseState::Restriction {
                        base: self.resolve_type(&base)?,
                        literals: Vec::new(),
                    };
                }

                "union" => {
                    let [members] = get_attributes(reader, start.attributes(), ["memberTypes"])?;
                    let members =
                        members.ok_or_else(|| self.missing("union", "memberTypes"))?;

                    let variants = members
                        .split_whitespace()
                        .map(|member| self.resolve_type(member))
                        .collect::<Result<Vec<_>, _>>()?;
                    *node = Some(TypeNode::Union(variants));
                }

                other => tracing::debug!(element = %other, "skipping simpleType child"),
            },

            Some(ParseState::Restriction {
                ref mut literals, ..
            }) => match local_name {
                "enumeration" => {
                    let [value] = get_attributes(reader, start.attributes(), ["value"])?;
                    let value = value.ok_or_else(|| self.missing("enumeration", "value"))?;
                    literals.push(value);
                }

                // Any other facet narrows the base without changing its shape.
                other => tracing::debug!(facet = %other, "ignoring restriction facet"),
            },

            Some(ParseState::Message { ref mut parts, .. }) => match local_name {
                "part" => {
                    let [name, element, ty] =
                        get_attributes(reader, start.attributes(), ["name", "element", "type"])?;
                    let name = name.ok_or_else(|| self.missing("part", "name"))?;

                    let ty = if let Some(element) = element {
                        self.resolve_type(&element)?
                    } else if let Some(ty) = ty {
                        self.resolve_type(&ty)?
                    } else {
                        return Err(self.missing("part", "element"));
                    };

                    parts.push(Field {
                        name,
                        ty,
                        optional: false,
                        repeated: false,
                    });
                }

                other => tracing::debug!(element = %other, "skipping message child"),
            },

            Some(ParseState::PortType) => match local_name {
                "operation" => {
                    let [name] = get_attributes(reader, start.attributes(), ["name"])?;
                    let name = name.ok_or_else(|| self.missing("operation", "name"))?;

                    new_state = ParseState::Operation {
                        name,
                        input: None,
                        output: None,
                    };
                }

                other => tracing::debug!(element = %other, "skipping portType child"),
            },

            Some(ParseState::Operation {
                ref mut input,
                ref mut output,
                ..
            }) => match local_name {
                "input" | "output" => {
                    let [message] = get_attributes(reader, start.attributes(), ["message"])?;
                    let message = message.ok_or_else(|| self.missing(local_name, "message"))?;
                    let message = self.resolve_name(&message)?;

                    if local_name == "input" {
                        *input = Some(message);
                    } else {
                        *output = Some(message);
                    }
                }

                other => tracing::debug!(element = %other, "skipping operation child"),
            },

            Some(ParseState::Import) => {
                tracing::debug!(element = %local_name, "skipping import child")
            }

            Some(ParseState::Other(ref parent)) => {
                tracing::debug!(parent = %parent, element = %local_name, "skipping element")
            }
        }

        stack.extend(state);
        stack.push(new_state);

        Ok(())
    }

    fn handle_end(&mut self, stack: &mut Vec<ParseState>) -> Result<(), Error> {
        let finished = stack.pop();
        let mut parent = stack.pop();

        match finished {
            Some(ParseState::Definitions | ParseState::Schema) => self.scope.pop_target(),

            Some(ParseState::Element {
                name,
                node,
                extends,
            }) => {
                self.name_context.pop();

                let qname = self.target_qname(name)?;
                let node = match node {
                    Some(node) => node,
                    None => return Err(self.missing("element", "type")),
                };

                // An element aliasing the like-named type adds nothing.
                let self_alias = matches!(&node, TypeNode::Reference(target) if *target == qname);
                if !self_alias {
                    self.register_element(qname, node, extends);
                }
            }

            Some(ParseState::ComplexType {
                name,
                node,
                extends,
            }) => {
                let node = node.unwrap_or_else(|| TypeNode::Object(Vec::new()));

                match parent {
                    Some(ParseState::SequenceElement { ref mut ty, .. }) => {
                        *ty = Some(self.intern_inline(node, extends)?);
                    }

                    Some(ParseState::Element {
                        node: ref mut element_node,
                        extends: ref mut element_extends,
                        ..
                    }) => {
                        *element_node = Some(node);
                        *element_extends = extends;
                    }

                    _ => {
                        self.name_context.pop();
                        let name = name
                            .ok_or_else(|| self.unsupported("anonymous global type".to_owned()))?;
                        let qname = self.target_qname(name)?;
                        self.register_type(qname, node, extends);
                    }
                }
            }

            Some(ParseState::ComplexContent { node, extends }) => {
                if let Some(ParseState::ComplexType {
                    node: ref mut ct_node,
                    extends: ref mut ct_extends,
                    ..
                }) = parent
                {
                    *ct_node = node;
                    *ct_extends = extends;
                }
            }

            Some(ParseState::Extension { base, node }) => {
                if let Some(ParseState::ComplexContent {
                    node: ref mut cc_node,
                    extends: ref mut cc_extends,
                }) = parent
                {
                    *cc_node = Some(node.unwrap_or_else(|| TypeNode::Object(Vec::new())));
                    *cc_extends = Some(base);
                }
            }

            Some(ParseState::SimpleContent { base }) => {
                if let Some(ParseState::ComplexType { ref mut node, .. }) = parent {
                    *node = base;
                }
            }

            Some(ParseState::Sequence(fields)) => match parent {
                Some(ParseState::ComplexType { ref mut node, .. }) if node.is_none() => {
                    *node = Some(TypeNode::Object(fields))
                }

                Some(ParseState::Extension { ref mut node, .. }) if node.is_none() => {
                    *node = Some(TypeNode::Object(fields))
                }

                Some(ParseState::Sequence(ref mut outer)) => outer.extend(fields),

                Some(ParseState::Choice(ref mut variants)) => {
                    variants.push(TypeNode::Object(fields))
                }

                _ => (),
            },

            Some(ParseState::Choice(variants)) => match parent {
                Some(ParseState::ComplexType { ref mut node, .. }) if node.is_none() => {
                    *node = Some(TypeNode::Union(variants))
                }

                Some(ParseState::Extension { ref mut node, .. }) if node.is_none() => {
                    *node = Some(TypeNode::Union(variants))
                }

                // A choice inside a sequence contributes each alternative as
                // an optional field: exactly one of them will be present.
                Some(ParseState::Sequence(ref mut fields)) => {
                    for variant in variants {
                        if let TypeNode::Object(variant_fields) = variant {
                            for mut field in variant_fields {
                                field.optional = true;
                                fields.push(field);
                            }
                        }
                    }
                }

                Some(ParseState::Choice(ref mut outer)) => outer.extend(variants),

                _ => (),
            },

            Some(ParseState::SequenceElement {
                name,
                ty,
                optional,
                repeated,
            }) => {
                self.name_context.pop();

                let ty = match ty {
                    Some(ty) => ty,
                    None => return Err(self.missing("element", "type")),
                };
                let field = Field {
                    name,
                    ty,
                    optional,
                    repeated,
                };

                match parent {
                    Some(ParseState::Sequence(ref mut fields)) => fields.push(field),
                    Some(ParseState::Choice(ref mut variants)) => {
                        variants.push(TypeNode::Object(vec![field]))
                    }
                    _ => (),
                }
            }

            Some(ParseState::SimpleType { name, node }) => match parent {
                Some(ParseState::SequenceElement { ref mut ty, .. }) => {
                    let node = node.ok_or_else(|| {
                        self.unsupported("simpleType without a supported restriction".to_owned())
                    })?;
                    *ty = Some(self.intern_inline(node, None)?);
                }

                Some(ParseState::Element {
                    node: ref mut element_node,
                    ..
                }) => {
                    *element_node = node;
                }

                _ => {
                    self.name_context.pop();
                    let name = name
                        .ok_or_else(|| self.unsupported("anonymous global type".to_owned()))?;
                    let node = node.ok_or_else(|| {
                        self.unsupported(format!(
                            "simpleType '{}' without a supported restriction",
                            name
                        ))
                    })?;
                    let qname = self.target_qname(name)?;
                    self.register_type(qname, node, None);
                }
            },

            Some(ParseState::Restriction { base, literals }) => {
                if let Some(ParseState::SimpleType { ref mut node, .. }) = parent {
                    *node = Some(if literals.is_empty() {
                        base
                    } else {
                        TypeNode::Enum(literals)
                    });
                }
            }

            Some(ParseState::Message { name, parts }) => {
                let qname = self.target_qname(name)?;
                self.messages.insert(qname, parts);
            }

            Some(ParseState::Operation {
                name,
                input,
                output,
            }) => match (input, output) {
                (Some(input), Some(output)) => self.raw_operations.push((name, input, output)),
                _ => tracing::warn!(operation = %name, "skipping one-way operation"),
            },

            _ => (),
        }

        stack.extend(parent);
        Ok(())
    }

    fn parse_import(&mut self, url: Option<&Url>, location: &str) -> Result<(), Error> {
        let base = url.ok_or_else(|| {
            self.unsupported("import from an in-memory document".to_owned())
        })?;
        self.parse_url(base.join(location)?)
    }

    fn finish(self, source: String) -> Result<TypedWsdl, Error> {
        let Parser {
            document,
            types,
            messages,
            raw_operations,
            primary_namespace,
            ..
        } = self;

        // Flatten extension chains into plain objects, base fields first.
        let mut graph = TypeGraph::new();
        for name in types.keys() {
            let node = flatten_type(&document, &types, name, &mut Vec::new())?;
            graph.insert(name.clone(), node);
        }

        // A message with a single referenced part stands for that part's
        // type; anything else becomes an object entry of its own.
        let mut message_targets: HashMap<QualifiedName, QualifiedName> = HashMap::new();
        for (qname, parts) in messages {
            if parts.len() == 1 {
                if let TypeNode::Reference(target) = &parts[0].ty {
                    message_targets.insert(qname, target.clone());
                    continue;
                }
            }

            let mut key = qname.clone();
            while graph.contains(&key) {
                key.local.push_str("Message");
            }
            graph.insert(key.clone(), TypeNode::Object(parts));
            message_targets.insert(qname, key);
        }

        let mut operations = Vec::new();
        for (name, input, output) in raw_operations {
            let input = resolve_message(&graph, &message_targets, input)?;
            let output = resolve_message(&graph, &message_targets, output)?;
            operations.push(OperationSignature {
                name,
                input,
                output,
            });
        }

        // The graph is only valid once every reference lands on a key.
        let mut missing = None;
        for (_, node) in graph.iter() {
            node.for_each_reference(&mut |target| {
                if missing.is_none() && !graph.contains(target) {
                    missing = Some(target.clone());
                }
            });
        }
        if let Some(name) = missing {
            return Err(Error::UnresolvedReference { name });
        }

        // Alias chains must bottom out; a cycle of bare references can
        // never be declared.
        for (name, _) in graph.iter() {
            let mut seen = vec![name.clone()];
            let mut current = name;
            while let Some(TypeNode::Reference(next)) = graph.get(current) {
                if seen.contains(next) {
                    return Err(Error::UnsupportedConstruct {
                        document: document.clone(),
                        construct: format!("cyclic type alias at {}", name),
                    });
                }
                seen.push(next.clone());
                current = next;
            }
        }

        let primary_namespace = primary_namespace.ok_or_else(|| Error::UnsupportedConstruct {
            document: document.clone(),
            construct: "document contains no WSDL definitions or schema".to_owned(),
        })?;

        Ok(TypedWsdl {
            source,
            primary_namespace,
            graph,
            operations,
        })
    }
}

/// The SOAP array idiom: an object holding nothing but one repeated
/// element is the array of that element.
fn collapse_wrapper(node: TypeNode) -> TypeNode {
    match &node {
        TypeNode::Object(fields)
            if fields.len() == 1 && fields[0].repeated && !fields[0].optional =>
        {
            TypeNode::Array(Box::new(fields[0].ty.clone()))
        }
        _ => node,
    }
}

fn flatten_type(
    document: &str,
    types: &IndexMap<QualifiedName, PendingType>,
    name: &QualifiedName,
    visiting: &mut Vec<QualifiedName>,
) -> Result<TypeNode, Error> {
    let pending = types
        .get(name)
        .ok_or_else(|| Error::UnresolvedReference { name: name.clone() })?;

    let base = match &pending.extends {
        None => return Ok(pending.node.clone()),
        Some(base) => base,
    };

    if visiting.contains(name) {
        return Err(Error::UnsupportedConstruct {
            document: document.to_owned(),
            construct: format!("cyclic extension chain at {}", name),
        });
    }
    visiting.push(name.clone());
    let base_node = flatten_type(document, types, base, visiting)?;
    visiting.pop();

    let mut fields = match base_node {
        TypeNode::Object(fields) => fields,
        _ => {
            return Err(Error::UnsupportedConstruct {
                document: document.to_owned(),
                construct: format!("extension of non-object base {}", base),
            })
        }
    };

    match &pending.node {
        TypeNode::Object(own) => fields.extend(own.iter().cloned()),
        _ => {
            return Err(Error::UnsupportedConstruct {
                document: document.to_owned(),
                construct: format!("extension with non-object content at {}", name),
            })
        }
    }

    Ok(TypeNode::Object(fields))
}

fn resolve_message(
    graph: &TypeGraph,
    message_targets: &HashMap<QualifiedName, QualifiedName>,
    message: QualifiedName,
) -> Result<QualifiedName, Error> {
    if let Some(target) = message_targets.get(&message) {
        return Ok(target.clone());
    }
    if graph.contains(&message) {
        return Ok(message);
    }
    Err(Error::UnresolvedReference { name: message })
}

pub fn parse(source: &str, url: Url, options: RetrievalOptions) -> Result<TypedWsdl, Error> {
    Parser::new(options).parse(source, url)
}

pub fn parse_str(name: &str, content: &str) -> Result<TypedWsdl, Error> {
    let mut parser = Parser::new(RetrievalOptions::default());
    parser.document = name.to_owned();
    parser.parse_xml(None, Reader::from_str(content))?;
    parser.finish(name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://example.com/users";

    fn qn(local: &str) -> QualifiedName {
        QualifiedName::new(NS, local)
    }

    fn wsdl_with_schema(body: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<definitions xmlns="http://schemas.xmlsoap.org/wsdl/"
             xmlns:tns="http://example.com/users"
             xmlns:xs="http://www.w3.org/2001/XMLSchema"
             targetNamespace="http://example.com/users">
  <types>
    <xs:schema targetNamespace="http://example.com/users">{}</xs:schema>
  </types>
</definitions>"#,
            body
        )
    }

    const USERS_WSDL: &str = r#"<?xml version="1.0"?>
<definitions xmlns="http://schemas.xmlsoap.org/wsdl/"
             xmlns:tns="http://example.com/users"
             xmlns:xs="http://www.w3.org/2001/XMLSchema"
             targetNamespace="http://example.com/users">
  <types>
    <xs:schema targetNamespace="http://example.com/users">
      <xs:complexType name="GetUserRequest">
        <xs:sequence>
          <xs:element name="id" type="xs:string"/>
        </xs:sequence>
      </xs:complexType>
      <xs:complexType name="GetUserResponse">
        <xs:sequence>
          <xs:element name="name" type="xs:string"/>
          <xs:element name="roles" type="xs:string" maxOccurs="unbounded"/>
        </xs:sequence>
      </xs:complexType>
    </xs:schema>
  </types>
  <message name="GetUserSoapIn">
    <part name="parameters" type="tns:GetUserRequest"/>
  </message>
  <message name="GetUserSoapOut">
    <part name="parameters" type="tns:GetUserResponse"/>
  </message>
  <portType name="UserPort">
    <operation name="GetUser">
      <input message="tns:GetUserSoapIn"/>
      <output message="tns:GetUserSoapOut"/>
    </operation>
  </portType>
</definitions>"#;

    #[test]
    fn builds_scenario_graph_and_operation() {
        let parsed = parse_str("users.wsdl", USERS_WSDL).unwrap();

        assert_eq!(parsed.primary_namespace, NS);
        assert_eq!(parsed.operations.len(), 1);

        let operation = &parsed.operations[0];
        assert_eq!(operation.name, "GetUser");
        assert_eq!(operation.input, qn("GetUserRequest"));
        assert_eq!(operation.output, qn("GetUserResponse"));

        let response = parsed.graph.get(&qn("GetUserResponse")).unwrap();
        let fields = match response {
            TypeNode::Object(fields) => fields,
            other => panic!("expected object, got {:?}", other),
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "name");
        assert!(!fields[0].repeated);
        assert_eq!(fields[1].name, "roles");
        assert!(fields[1].repeated);
        assert!(!fields[1].optional);
    }

    #[test]
    fn maps_cardinality_to_flags() {
        let source = wsdl_with_schema(
            r#"
      <xs:complexType name="Cardinalities">
        <xs:sequence>
          <xs:element name="maybe" type="xs:string" minOccurs="0"/>
          <xs:element name="several" type="xs:string" maxOccurs="5"/>
          <xs:element name="exactly_one" type="xs:string" minOccurs="1" maxOccurs="1"/>
        </xs:sequence>
      </xs:complexType>"#,
        );

        let parsed = parse_str("cardinalities.wsdl", &source).unwrap();
        let fields = match parsed.graph.get(&qn("Cardinalities")).unwrap() {
            TypeNode::Object(fields) => fields,
            other => panic!("expected object, got {:?}", other),
        };

        assert!(fields[0].optional && !fields[0].repeated);
        assert!(!fields[1].optional && fields[1].repeated);
        assert!(!fields[2].optional && !fields[2].repeated);
    }

    #[test]
    fn enumeration_restriction_becomes_enum() {
        let source = wsdl_with_schema(
            r#"
      <xs:simpleType name="Color">
        <xs:restriction base="xs:string">
          <xs:enumeration value="red"/>
          <xs:enumeration value="green"/>
          <xs:enumeration value="blue"/>
        </xs:restriction>
      </xs:simpleType>"#,
        );

        let parsed = parse_str("color.wsdl", &source).unwrap();
        assert_eq!(
            parsed.graph.get(&qn("Color")),
            Some(&TypeNode::Enum(vec![
                "red".to_owned(),
                "green".to_owned(),
                "blue".to_owned()
            ]))
        );
    }

    #[test]
    fn plain_restriction_is_the_base_type() {
        let source = wsdl_with_schema(
            r#"
      <xs:simpleType name="ZipCode">
        <xs:restriction base="xs:string">
          <xs:maxLength value="10"/>
        </xs:restriction>
      </xs:simpleType>"#,
        );

        let parsed = parse_str("zip.wsdl", &source).unwrap();
        assert_eq!(
            parsed.graph.get(&qn("ZipCode")),
            Some(&TypeNode::Primitive(PrimitiveKind::String))
        );
    }

    #[test]
    fn extension_copies_base_fields_first() {
        let source = wsdl_with_schema(
            r#"
      <xs:complexType name="Base">
        <xs:sequence>
          <xs:element name="id" type="xs:string"/>
        </xs:sequence>
      </xs:complexType>
      <xs:complexType name="Derived">
        <xs:complexContent>
          <xs:extension base="tns:Base">
            <xs:sequence>
              <xs:element name="extra" type="xs:int"/>
            </xs:sequence>
          </xs:extension>
        </xs:complexContent>
      </xs:complexType>"#,
        );

        let parsed = parse_str("derived.wsdl", &source).unwrap();
        let fields = match parsed.graph.get(&qn("Derived")).unwrap() {
            TypeNode::Object(fields) => fields,
            other => panic!("expected object, got {:?}", other),
        };

        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "id");
        assert_eq!(fields[0].ty, TypeNode::Primitive(PrimitiveKind::String));
        assert_eq!(fields[1].name, "extra");
        assert_eq!(fields[1].ty, TypeNode::Primitive(PrimitiveKind::Integer));
    }

    #[test]
    fn dangling_reference_fails_the_build() {
        let source = wsdl_with_schema(
            r#"
      <xs:complexType name="Broken">
        <xs:sequence>
          <xs:element name="oops" type="tns:Missing"/>
        </xs:sequence>
      </xs:complexType>"#,
        );

        match parse_str("broken.wsdl", &source) {
            Err(Error::UnresolvedReference { name }) => assert_eq!(name, qn("Missing")),
            other => panic!("expected unresolved reference, got {:?}", other),
        }
    }

    #[test]
    fn anonymous_inline_type_gets_a_stable_name() {
        let source = wsdl_with_schema(
            r#"
      <xs:complexType name="Order">
        <xs:sequence>
          <xs:element name="customer">
            <xs:complexType>
              <xs:sequence>
                <xs:element name="name" type="xs:string"/>
                <xs:element name="email" type="xs:string" minOccurs="0"/>
              </xs:sequence>
            </xs:complexType>
          </xs:element>
        </xs:sequence>
      </xs:complexType>"#,
        );

        let parsed = parse_str("order.wsdl", &source).unwrap();
        let fields = match parsed.graph.get(&qn("Order")).unwrap() {
            TypeNode::Object(fields) => fields,
            other => panic!("expected object, got {:?}", other),
        };
        assert_eq!(fields[0].ty, TypeNode::Reference(qn("Order_customer")));

        let inner = parsed.graph.get(&qn("Order_customer")).unwrap();
        let inner_fields = match inner {
            TypeNode::Object(fields) => fields,
            other => panic!("expected object, got {:?}", other),
        };
        assert_eq!(inner_fields.len(), 2);
        assert!(inner_fields[1].optional);
    }

    #[test]
    fn single_repeated_element_wrapper_collapses_to_array() {
        let source = wsdl_with_schema(
            r#"
      <xs:complexType name="Invoice">
        <xs:sequence>
          <xs:element name="lines">
            <xs:complexType>
              <xs:sequence>
                <xs:element name="line" type="xs:string" maxOccurs="unbounded"/>
              </xs:sequence>
            </xs:complexType>
          </xs:element>
        </xs:sequence>
      </xs:complexType>"#,
        );

        let parsed = parse_str("invoice.wsdl", &source).unwrap();
        let fields = match parsed.graph.get(&qn("Invoice")).unwrap() {
            TypeNode::Object(fields) => fields,
            other => panic!("expected object, got {:?}", other),
        };
        assert_eq!(
            fields[0].ty,
            TypeNode::Array(Box::new(TypeNode::Primitive(PrimitiveKind::String)))
        );
        assert!(!fields[0].repeated);
    }

    #[test]
    fn array_of_idiom_collapses_to_array() {
        let source = wsdl_with_schema(
            r#"
      <xs:complexType name="ArrayOfString">
        <xs:sequence>
          <xs:element name="string" type="xs:string" maxOccurs="unbounded"/>
        </xs:sequence>
      </xs:complexType>"#,
        );

        let parsed = parse_str("arrays.wsdl", &source).unwrap();
        assert_eq!(
            parsed.graph.get(&qn("ArrayOfString")),
            Some(&TypeNode::Array(Box::new(TypeNode::Primitive(
                PrimitiveKind::String
            ))))
        );
    }

    #[test]
    fn choice_becomes_a_union_of_alternatives() {
        let source = wsdl_with_schema(
            r#"
      <xs:complexType name="Contact">
        <xs:choice>
          <xs:element name="email" type="xs:string"/>
          <xs:element name="phone" type="xs:string"/>
        </xs:choice>
      </xs:complexType>"#,
        );

        let parsed = parse_str("contact.wsdl", &source).unwrap();
        let variants = match parsed.graph.get(&qn("Contact")).unwrap() {
            TypeNode::Union(variants) => variants,
            other => panic!("expected union, got {:?}", other),
        };

        assert_eq!(variants.len(), 2);
        match &variants[0] {
            TypeNode::Object(fields) => assert_eq!(fields[0].name, "email"),
            other => panic!("expected object variant, got {:?}", other),
        }
    }

    #[test]
    fn recursive_type_builds_through_references() {
        let source = wsdl_with_schema(
            r#"
      <xs:complexType name="TreeNode">
        <xs:sequence>
          <xs:element name="label" type="xs:string"/>
          <xs:element name="children" type="tns:TreeNode" minOccurs="0" maxOccurs="unbounded"/>
        </xs:sequence>
      </xs:complexType>"#,
        );

        let parsed = parse_str("tree.wsdl", &source).unwrap();
        let fields = match parsed.graph.get(&qn("TreeNode")).unwrap() {
            TypeNode::Object(fields) => fields,
            other => panic!("expected object, got {:?}", other),
        };
        assert_eq!(fields[1].ty, TypeNode::Reference(qn("TreeNode")));
        assert!(fields[1].repeated && fields[1].optional);
    }

    #[test]
    fn one_way_operation_is_skipped() {
        let source = r#"<?xml version="1.0"?>
<definitions xmlns="http://schemas.xmlsoap.org/wsdl/"
             xmlns:tns="http://example.com/users"
             xmlns:xs="http://www.w3.org/2001/XMLSchema"
             targetNamespace="http://example.com/users">
  <types>
    <xs:schema targetNamespace="http://example.com/users">
      <xs:complexType name="Ping">
        <xs:sequence>
          <xs:element name="token" type="xs:string"/>
        </xs:sequence>
      </xs:complexType>
    </xs:schema>
  </types>
  <message name="PingIn">
    <part name="parameters" type="tns:Ping"/>
  </message>
  <portType name="PingPort">
    <operation name="Ping">
      <input message="tns:PingIn"/>
    </operation>
  </portType>
</definitions>"#;

        let parsed = parse_str("ping.wsdl", source).unwrap();
        assert!(parsed.operations.is_empty());
        assert!(parsed.graph.contains(&qn("Ping")));
    }

    #[test]
    fn multi_part_message_becomes_an_object() {
        let source = r#"<?xml version="1.0"?>
<definitions xmlns="http://schemas.xmlsoap.org/wsdl/"
             xmlns:tns="http://example.com/users"
             xmlns:xs="http://www.w3.org/2001/XMLSchema"
             targetNamespace="http://example.com/users">
  <types>
    <xs:schema targetNamespace="http://example.com/users">
      <xs:complexType name="User">
        <xs:sequence>
          <xs:element name="name" type="xs:string"/>
        </xs:sequence>
      </xs:complexType>
    </xs:schema>
  </types>
  <message name="UpdateIn">
    <part name="user" type="tns:User"/>
    <part name="comment" type="xs:string"/>
  </message>
  <message name="UpdateOut">
    <part name="ok" type="xs:boolean"/>
  </message>
  <portType name="UserPort">
    <operation name="Update">
      <input message="tns:UpdateIn"/>
      <output message="tns:UpdateOut"/>
    </operation>
  </portType>
</definitions>"#;

        let parsed = parse_str("update.wsdl", source).unwrap();
        let operation = &parsed.operations[0];

        let input = parsed.graph.get(&operation.input).unwrap();
        match input {
            TypeNode::Object(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].name, "user");
                assert_eq!(fields[1].name, "comment");
            }
            other => panic!("expected object, got {:?}", other),
        }

        // A single primitive part still needs a graph entry of its own.
        let output = parsed.graph.get(&operation.output).unwrap();
        match output {
            TypeNode::Object(fields) => {
                assert_eq!(fields[0].ty, TypeNode::Primitive(PrimitiveKind::Boolean));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn unsupported_xsd_builtin_is_an_error() {
        let source = wsdl_with_schema(
            r#"
      <xs:complexType name="Odd">
        <xs:sequence>
          <xs:element name="weird" type="xs:NOTATION"/>
        </xs:sequence>
      </xs:complexType>"#,
        );

        match parse_str("odd.wsdl", &source) {
            Err(Error::UnsupportedType { name }) => assert_eq!(name.local, "NOTATION"),
            other => panic!("expected unsupported type, got {:?}", other),
        }
    }
}
