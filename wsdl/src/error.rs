use thiserror::Error;

use crate::types::QualifiedName;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unable to parse provided URL")]
    UrlParse(#[from] url::ParseError),

    #[error("Unable to convert provided path")]
    PathConversion(Option<std::io::Error>),

    #[error("Unable to open file")]
    FileOpen(quick_xml::Error),

    #[error("Unable to retrieve document from server")]
    Retrieval(#[from] reqwest::Error),

    #[error("Unable to load client certificate")]
    Certificate(reqwest::Error),

    #[error("Unsupported URL scheme {0}")]
    UnsupportedScheme(String),

    #[error("Error parsing XML input")]
    Xml(#[from] quick_xml::Error),

    #[error("{document}: <{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        document: String,
        element: String,
        attribute: String,
    },

    #[error("{document}: no namespace bound to prefix '{prefix}'")]
    UnknownPrefix { document: String, prefix: String },

    #[error("{document}: unsupported construct: {construct}")]
    UnsupportedConstruct { document: String, construct: String },

    #[error("Unsupported schema type {name}")]
    UnsupportedType { name: QualifiedName },

    #[error("Unresolved type reference {name}")]
    UnresolvedReference { name: QualifiedName },
}
