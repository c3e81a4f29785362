use std::path::Path;
use url::Url;

mod parser;

pub mod error;
pub mod types;

/// Connection configuration for authenticated document retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    pub pkcs12_der: Option<Vec<u8>>,
    pub passphrase: Option<String>,
}

/// Parse one WSDL source, given as a URL or a filesystem path, into a
/// self-contained type graph plus the operations it declares.
pub fn parse<S: AsRef<str>>(
    source: S,
    options: &RetrievalOptions,
) -> Result<types::TypedWsdl, error::Error> {
    let url = {
        match Url::parse(source.as_ref()) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::from_file_path(
                Path::new(source.as_ref())
                    .canonicalize()
                    .map_err(|err| error::Error::PathConversion(Some(err)))?,
            )
            .map_err(|()| error::Error::PathConversion(None))?,
            Err(err) => return Err(err.into()),
        }
    };

    parser::parse(source.as_ref(), url, options.clone())
}

/// Parse an in-memory WSDL document. Imports are not available here since
/// there is no base URL to resolve them against.
pub fn parse_str(name: &str, content: &str) -> Result<types::TypedWsdl, error::Error> {
    parser::parse_str(name, content)
}
