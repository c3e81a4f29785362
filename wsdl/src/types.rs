use std::fmt;

use indexmap::IndexMap;

/// Namespace + local name pair identifying a schema type or element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: String,
    pub local: String,
}

impl QualifiedName {
    pub fn new<N: Into<String>, L: Into<String>>(namespace: N, local: L) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.local)
    }
}

/// The XSD built-ins a schema type can bottom out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    String,
    Boolean,
    Integer,
    Decimal,
    DateTime,
    Date,
    Time,
    Base64Binary,
    HexBinary,
}

impl PrimitiveKind {
    pub fn from_xsd_local(local: &str) -> Option<Self> {
        match local {
            "string" | "normalizedString" | "token" | "language" | "Name" | "NCName"
            | "NMTOKEN" | "anyURI" | "QName" | "ID" | "IDREF" | "ENTITY" | "duration"
            | "gYear" | "gMonth" | "gDay" | "gYearMonth" | "gMonthDay" | "anyType"
            | "anySimpleType" => Some(Self::String),
            "boolean" => Some(Self::Boolean),
            "int" | "integer" | "long" | "short" | "byte" | "unsignedInt" | "unsignedLong"
            | "unsignedShort" | "unsignedByte" | "nonNegativeInteger" | "nonPositiveInteger"
            | "positiveInteger" | "negativeInteger" => Some(Self::Integer),
            "decimal" | "float" | "double" => Some(Self::Decimal),
            "dateTime" => Some(Self::DateTime),
            "date" => Some(Self::Date),
            "time" => Some(Self::Time),
            "base64Binary" => Some(Self::Base64Binary),
            "hexBinary" => Some(Self::HexBinary),
            _ => None,
        }
    }
}

/// One member of an object type. `optional` records minOccurs = 0,
/// `repeated` records maxOccurs > 1 or "unbounded".
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeNode,
    pub optional: bool,
    pub repeated: bool,
}

/// The shape of one schema type. References name their target instead of
/// inlining it, which keeps recursive schemas finite.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeNode {
    Primitive(PrimitiveKind),
    Object(Vec<Field>),
    Enum(Vec<String>),
    Union(Vec<TypeNode>),
    Reference(QualifiedName),
    Array(Box<TypeNode>),
}

impl TypeNode {
    /// Visit every reference reachable from this node without following
    /// the references themselves.
    pub fn for_each_reference<F: FnMut(&QualifiedName)>(&self, f: &mut F) {
        match self {
            TypeNode::Primitive(_) | TypeNode::Enum(_) => {}
            TypeNode::Reference(name) => f(name),
            TypeNode::Array(element) => element.for_each_reference(f),
            TypeNode::Union(variants) => {
                for variant in variants {
                    variant.for_each_reference(f);
                }
            }
            TypeNode::Object(fields) => {
                for field in fields {
                    field.ty.for_each_reference(f);
                }
            }
        }
    }
}

/// Insertion-ordered mapping from qualified name to type shape. Every
/// reference inside a node of a built graph resolves to a key of that graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeGraph {
    nodes: IndexMap<QualifiedName, TypeNode>,
}

impl TypeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: QualifiedName, node: TypeNode) -> Option<TypeNode> {
        self.nodes.insert(name, node)
    }

    pub fn get(&self, name: &QualifiedName) -> Option<&TypeNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &QualifiedName) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QualifiedName, &TypeNode)> {
        self.nodes.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &QualifiedName> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationSignature {
    pub name: String,
    pub input: QualifiedName,
    pub output: QualifiedName,
}

/// Everything extracted from one WSDL source.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedWsdl {
    pub source: String,
    pub primary_namespace: String,
    pub graph: TypeGraph,
    pub operations: Vec<OperationSignature>,
}
