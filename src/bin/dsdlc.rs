//! Build every DSDL definition under one or more root namespaces and report diagnostics.
//!
//! Usage:
//!   dsdlc [OPTIONS] ROOT...
//!
//! Options:
//!   --lookup DIR, -I DIR     Root namespace used only to resolve references (repeatable)
//!   --allow-unregulated      Accept fixed port IDs outside the regulated ranges
//!   --strict                 Deprecated-type usage is an error
//!   --require-extent         Non-sealed definitions must declare @extent
//!   --skip-assertions        Do not fail on false @assert
//!   --human, -H              Human-readable output
//!   -v, -vv                  More logging (RUST_LOG overrides)
//!
//! Exit code 1 if any error was reported.

use dsdlc::{CompositeTable, Definition, Diagnostic, FileSystem, Options, Session, Severity};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn print_diagnostic(d: &Diagnostic, style: OutputStyle) {
    match style {
        OutputStyle::Compact => println!("{}", d),
        OutputStyle::Human => {
            let severity = match d.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            println!("  {} {}: {}", d.locator, severity, d.error);
            println!("    kind: {}", d.kind().id());
        }
    }
}

fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    match args.iter().position(|a| names.contains(&a.as_str())) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn take_values(args: &mut Vec<String>, names: &[&str]) -> anyhow::Result<Vec<String>> {
    let mut values = Vec::new();
    while let Some(pos) = args.iter().position(|a| names.contains(&a.as_str())) {
        args.remove(pos);
        if pos >= args.len() {
            anyhow::bail!("{} requires a directory", names[0]);
        }
        values.push(args.remove(pos));
    }
    Ok(values)
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let lookup = take_values(&mut args, &["--lookup", "-I"])?;
    let mut options = Options::default();
    options.allow_unregulated_fixed_port_id = take_flag(&mut args, &["--allow-unregulated"]);
    options.strict_deprecation = take_flag(&mut args, &["--strict"]);
    options.require_explicit_extent = take_flag(&mut args, &["--require-extent"]);
    options.skip_assertion_checks = take_flag(&mut args, &["--skip-assertions"]);
    let style = if take_flag(&mut args, &["--human", "-H"]) {
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };
    let level = if take_flag(&mut args, &["-vv"]) {
        "debug"
    } else if take_flag(&mut args, &["-v"]) {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(unknown) = args.iter().find(|a| a.starts_with('-')) {
        anyhow::bail!("unknown option {}", unknown);
    }
    if args.is_empty() {
        anyhow::bail!("usage: dsdlc [OPTIONS] ROOT...");
    }

    let mut session = Session::new(FileSystem, options);
    for dir in lookup {
        session.add_lookup_root(PathBuf::from(dir));
    }
    for root in &args {
        session.add_target_root(PathBuf::from(root));
    }
    let report = session.build_all();

    let mut total_errors = 0usize;
    let mut total_warnings = 0usize;
    for d in &report.diagnostics {
        match d.severity {
            Severity::Error => total_errors += 1,
            Severity::Warning => total_warnings += 1,
        }
        print_diagnostic(d, style);
    }

    for key in &report.published {
        let Some(definition) = session.definition(key) else {
            continue;
        };
        match definition {
            Definition::Message(id) => {
                let c = session.composite(*id);
                println!(
                    "{}  extent={} bits  lengths={}",
                    key,
                    c.extent,
                    c.bit_length_set()
                );
            }
            Definition::Service(service) => {
                let request = session.composite(service.request);
                let response = session.composite(service.response);
                println!(
                    "{}  request extent={} bits  response extent={} bits",
                    key, request.extent, response.extent
                );
            }
        }
    }

    eprintln!(
        "dsdlc: {} definition(s) published, {} error(s), {} warning(s)",
        report.published.len(),
        total_errors,
        total_warnings
    );
    if total_errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
