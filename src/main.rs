// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-compile - compiles a parsed JavaScript program to Spacey bytecode
//!
//! The parser runs elsewhere and hands over its result as JSON: either a
//! program or a parse error. The source text is read separately so that
//! diagnostics can quote it.

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;
use spacey_compiler::ir::dump_module;
use spacey_compiler::{CompileFlags, Compiler, ParseError, Program, Renderer, SourceFile};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "spacey-compile",
    about = "Compiles a parsed JavaScript program to Spacey bytecode",
    version,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Parser output: a JSON program or a JSON parse error
    ast: PathBuf,

    /// The JavaScript source the AST was parsed from
    source: PathBuf,

    /// Compile in non-strict mode
    #[arg(long)]
    non_strict: bool,

    /// Allow direct eval
    #[arg(long)]
    enable_eval: bool,

    /// Truncate quoted source lines to this many columns (0 = never)
    #[arg(long, default_value_t = 0)]
    max_diagnostic_width: usize,

    /// Disable the optimizer
    #[arg(short = 'O', value_name = "LEVEL", value_parser = ["0", "1"], default_value = "1")]
    opt_level: String,

    /// Emit debug information
    #[arg(short = 'g')]
    debug_info: bool,

    /// Emit only the global function; others are compiled on demand
    #[arg(long)]
    lazy: bool,

    /// Print the IR after optimization
    #[arg(long)]
    dump_ir: bool,

    /// Print the disassembled bytecode
    #[arg(long)]
    dump_bytecode: bool,

    /// Write the bytecode module as JSON to this file ("-" for stdout)
    #[arg(long, value_name = "PATH")]
    emit_json: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn flags(&self, color: bool) -> CompileFlags {
        CompileFlags {
            strict: !self.non_strict,
            allow_eval: self.enable_eval,
            max_diagnostic_width: self.max_diagnostic_width,
            optimize: self.opt_level != "0",
            debug_info: self.debug_info,
            lazy: self.lazy,
            color,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_compiler=debug,spacey_compile=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_compiler=warn")
            .with_writer(std::io::stderr)
            .init();
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Reads the parser output, which is either a program or a parse error.
fn read_parsed(path: &Path) -> anyhow::Result<Result<Program, ParseError>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read AST '{}'", path.display()))?;
    match serde_json::from_str::<Program>(&text) {
        Ok(program) => Ok(Ok(program)),
        Err(program_error) => match serde_json::from_str::<ParseError>(&text) {
            Ok(error) => Ok(Err(error)),
            Err(_) => Err(program_error)
                .with_context(|| format!("'{}' is not a program or a parse error", path.display())),
        },
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let color = atty::is(atty::Stream::Stderr);
    let flags = cli.flags(color);

    let parsed = read_parsed(&cli.ast)?;
    let text = fs::read_to_string(&cli.source)
        .with_context(|| format!("failed to read source '{}'", cli.source.display()))?;
    let file = SourceFile::new(cli.source.display().to_string(), text);

    let outcome = Compiler::new(flags.clone()).compile_parsed(parsed, file.clone())?;

    let renderer = Renderer::new(flags.max_diagnostic_width).with_color(color);
    for rendered in outcome.render(&file, &renderer) {
        eprintln!("{rendered}");
    }

    if let Some(compiled) = outcome.value() {
        if cli.dump_ir {
            print!("{}", dump_module(compiled.ir()));
        }
        if cli.dump_bytecode {
            print!("{}", compiled.module().disassemble());
        }
        if let Some(path) = &cli.emit_json {
            let json = serde_json::to_string_pretty(compiled.module())?;
            if path.as_os_str() == "-" {
                println!("{json}");
            } else {
                fs::write(path, json)
                    .with_context(|| format!("failed to write '{}'", path.display()))?;
            }
        }
    }

    let (errors, warnings) = (outcome.error_count(), outcome.warning_count());
    if errors + warnings > 0 {
        let summary = format!("{errors} error(s), {warnings} warning(s)");
        if color {
            eprintln!("{}", summary.bold());
        } else {
            eprintln!("{summary}");
        }
    }
    tracing::debug!(errors, warnings, "done");

    Ok(if outcome.exit_code() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
