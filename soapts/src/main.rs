use std::{
    fs,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use structopt::StructOpt;
use thiserror::Error;

use soapts_codegen as codegen;
use soapts_wsdl as wsdl;

#[derive(Debug, Error)]
enum Error {
    #[error("Error parsing WSDL")]
    Parse(#[from] wsdl::error::Error),

    #[error("Error emitting declarations")]
    Emit(#[from] codegen::Error),

    #[error("Error")]
    Io(#[from] std::io::Error),
}

#[derive(StructOpt)]
#[structopt(
    name = "soapts",
    about = "Generate TypeScript typings from WSDL documents"
)]
struct Args {
    /// Directory the generated files are published into
    #[structopt(short, long, default_value = "./wsdl", parse(from_os_str))]
    outdir: PathBuf,

    /// Quote every property name in the generated interfaces
    #[structopt(long)]
    quote: bool,

    /// Group declarations into files by "namespace" or "source"
    #[structopt(long = "group-by", default_value = "namespace")]
    group_by: codegen::Grouping,

    /// Resolve conflicting definitions with "first-wins" or "last-wins"
    #[structopt(long = "on-conflict", default_value = "first-wins")]
    on_conflict: codegen::ConflictPolicy,

    /// eslint rules disabled in a banner comment, comma separated
    #[structopt(
        long = "eslint-disable",
        default_value = "max-line-length,no-empty-interface",
        use_delimiter = true
    )]
    eslint_disable: Vec<String>,

    /// eslint rules enabled in a banner comment, comma separated
    #[structopt(long = "eslint-enable", use_delimiter = true)]
    eslint_enable: Vec<String>,

    /// PKCS#12 client certificate used when retrieving the documents
    #[structopt(long, parse(from_os_str))]
    cert: Option<PathBuf>,

    /// Passphrase for the client certificate
    #[structopt(long = "cert-password")]
    cert_password: Option<String>,

    /// WSDL documents to convert, as file paths or URLs
    #[structopt(required = true)]
    inputs: Vec<String>,
}

#[paw::main]
fn main(args: Args) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(args) {
        eprintln!("{}", err);
        std::process::exit(3);
    }
}

fn run(args: Args) -> Result<(), Error> {
    let options = retrieval_options(&args)?;

    // Every source parses independently; the merge waits for all of them.
    let parsed = args
        .inputs
        .par_iter()
        .map(|input| wsdl::parse(input, &options))
        .collect::<Result<Vec<_>, _>>()?;

    let merge_options = codegen::MergeOptions {
        policy: args.on_conflict,
    };
    let emit_options = codegen::EmitOptions {
        quote_properties: args.quote,
        grouping: args.group_by,
    };
    let (files, merged) = codegen::generate(&parsed, &merge_options, &emit_options)?;

    for conflict in &merged.conflicts {
        tracing::warn!(
            name = %conflict.name,
            kept = %conflict.kept_source,
            rejected = %conflict.rejected_source,
            "conflicting definitions"
        );
    }

    let banners = banners(&args);
    for file in &files {
        println!("-- {} --", file.file);
        println!("{}", file.data.join("\n\n"));
        publish(&args.outdir, file, &banners)?;
    }

    Ok(())
}

fn retrieval_options(args: &Args) -> Result<wsdl::RetrievalOptions, Error> {
    let pkcs12_der = match &args.cert {
        Some(path) => Some(fs::read(path)?),
        None => None,
    };

    Ok(wsdl::RetrievalOptions {
        pkcs12_der,
        passphrase: args.cert_password.clone(),
    })
}

fn banners(args: &Args) -> Vec<String> {
    let mut lines = Vec::new();
    if !args.eslint_disable.is_empty() {
        lines.push(format!(
            "/* eslint disable {} */",
            args.eslint_disable.join(" ")
        ));
    }
    if !args.eslint_enable.is_empty() {
        lines.push(format!(
            "/* eslint enable {} */",
            args.eslint_enable.join(" ")
        ));
    }
    lines
}

/// Write the file under a temporary name, then rename it into place so a
/// partially written file is never visible under its final name.
fn publish(outdir: &Path, file: &codegen::OutputFile, banners: &[String]) -> Result<(), Error> {
    let target = outdir.join(format!("{}.ts", file.file));
    let temporary = outdir.join(format!("{}.ts.tmp", file.file));

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut text = banners.to_vec();
    text.push(file.data.join("\n\n"));
    text.push(String::new());
    fs::write(&temporary, text.join("\n"))?;
    fs::rename(&temporary, &target)?;

    Ok(())
}
