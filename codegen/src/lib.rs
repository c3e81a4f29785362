use thiserror::Error;

use soapts_wsdl::types::{QualifiedName, TypedWsdl};

pub mod emit;
pub mod merge;
mod naming;

pub use emit::{EmitOptions, Grouping, OutputFile};
pub use merge::{ConflictPolicy, ConflictRecord, MergeOptions, MergedTypedWsdl};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Reference to undeclared type {0} reached the emitter")]
    UnknownReference(QualifiedName),
}

/// Merge the parsed sources into one model and emit it as TypeScript
/// declaration files.
pub fn generate(
    sources: &[TypedWsdl],
    merge_options: &MergeOptions,
    emit_options: &EmitOptions,
) -> Result<(Vec<OutputFile>, MergedTypedWsdl), Error> {
    let merged = merge::merge(sources, merge_options);
    let files = emit::emit(&merged, emit_options)?;
    Ok((files, merged))
}
