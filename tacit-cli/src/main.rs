//! Command-line driver and REPL (spec.md section 6), grounded on
//! `Vector35-idb-rs/src/tools/tools.rs`'s `clap::Parser` derive struct
//! for argument parsing and `navicore-cem3/crates/repl`'s line-editing
//! loop for the REPL shape.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use tacit_types::error::{VmError, VmResult};
use tacit_types::value::{Decoded, TaggedValue};
use tacit_vm::config::VmConfig;
use tacit_vm::interpreter::Interpreter;
use tacit_vm::parser::Parser as TacitParser;
use tacit_vm::printer::Printer;

/// Tacit: a concatenative, stack-based bytecode VM.
#[derive(Debug, Parser)]
#[command(name = "tacit", version, about)]
struct Args {
    /// Load these files, then exit instead of entering the REPL.
    #[arg(long)]
    no_interactive: bool,

    /// Stop after the first file that fails to load.
    #[arg(long)]
    exit_on_error: bool,

    /// Required alignment, in bytes, of every code-definition entry
    /// point. Must be a power of two.
    #[arg(long)]
    code_align: Option<u32>,

    /// STACK segment size in bytes.
    #[arg(long)]
    stack_size: Option<usize>,

    /// Files to load before the REPL (or instead of it, with
    /// `--no-interactive`). `.tacit` is auto-appended when the given
    /// path has no extension.
    files: Vec<PathBuf>,
}

/// Writes printed values to stdout: strings verbatim, everything else
/// via its `Decoded` debug form (spec.md leaves console formatting to
/// the embedder; this is the CLI's rendering of that contract).
struct ConsolePrinter;

impl Printer for ConsolePrinter {
    fn print(&mut self, value: TaggedValue, text: Option<&str>) {
        match text {
            Some(s) => println!("{s}"),
            None => match value.untag() {
                Decoded::Number(n) => println!("{n}"),
                other => println!("{other:?}"),
            },
        }
    }
}

fn resolve_path(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension("tacit")
    }
}

/// Compile and run one complete chunk of source, pinning the region base
/// (`bcp`) to the current `cp` before compiling so an error only unwinds
/// *this* chunk, not anything compiled before it (spec.md section 5).
/// The caller is responsible for ensuring `source` is a whole, balanced
/// unit — a file's full contents, or a REPL buffer whose closers have
/// all been matched — since `compile_all` fails with `Unclosed` on any
/// source that ends with an open `:`/`if`/`case`/`when`/`capsule`.
fn try_compile_and_run(vm: &mut Interpreter, source: &str) -> VmResult<()> {
    vm.code.bcp = vm.code.cp;
    {
        let mut p = TacitParser::new(vm, source);
        p.compile_all()?;
    }
    vm.ip = vm.code.bcp;
    vm.run()
}

/// 0-based line number containing byte offset `pos` in `text`.
fn line_at(text: &str, pos: usize) -> usize {
    text.as_bytes()[..pos.min(text.len())].iter().filter(|&&b| b == b'\n').count()
}

/// Load a `.tacit` file and run it as a single compile unit, so that a
/// `:`/`if`/`case`/`when`/`capsule` construct may span any number of
/// physical lines. Blank lines and `\`-prefixed comment lines (spec.md
/// section 6) are blanked out rather than removed, so a reported error's
/// byte offset still maps onto the original file's line numbers.
fn load_file(vm: &mut Interpreter, path: &Path) -> Result<(), String> {
    let resolved = resolve_path(path);
    let text = std::fs::read_to_string(&resolved).map_err(|e| format!("{}: {e}", resolved.display()))?;

    let filtered: String = text
        .lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('\\') { "" } else { line }
        })
        .collect::<Vec<_>>()
        .join("\n");

    try_compile_and_run(vm, &filtered).map_err(|e| {
        vm.code.reset_on_error();
        match &e {
            VmError::Syntax { pos, .. } => {
                format!("{}:{}: {e}", resolved.display(), line_at(&filtered, *pos) + 1)
            }
            _ => format!("{}: {e}", resolved.display()),
        }
    })
}

/// `load`/`exit` honoring REPL over `rustyline`, with `preserve` set so
/// a bad statement never rolls back prior definitions (spec.md section
/// 5). Input is buffered across `readline` calls while the buffered
/// source is an incomplete (`Unclosed`) construct, so a multi-line `:`
/// or `if`/`else` typed at the prompt compiles as one unit instead of
/// failing line by line.
fn run_repl(vm: &mut Interpreter) {
    vm.code.preserve = true;
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("tacit: couldn't start the line editor: {e}");
            return;
        }
    };

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { "tacit> " } else { "...> " };
        match rl.readline(prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                let trimmed = line.trim();
                if pending.is_empty() {
                    if trimmed.is_empty() || trimmed.starts_with('\\') {
                        continue;
                    }
                    if trimmed == "exit" {
                        break;
                    }
                    if let Some(rest) = trimmed.strip_prefix("load ") {
                        if let Err(e) = load_file(vm, Path::new(rest.trim())) {
                            eprintln!("tacit: {e}");
                        }
                        continue;
                    }
                }

                pending.push_str(&line);
                pending.push('\n');

                let dict_mark = vm.dict.mark();
                match try_compile_and_run(vm, &pending) {
                    Ok(()) => pending.clear(),
                    Err(VmError::Unclosed { .. }) => {
                        // An incomplete but valid prefix: discard this
                        // attempt's partial compile and dictionary
                        // entries, then wait for the rest on the next line.
                        vm.code.cp = vm.code.bcp;
                        vm.dict.forget(dict_mark);
                    }
                    Err(e) => {
                        eprintln!("tacit: {e}");
                        vm.code.reset_on_error();
                        vm.dict.forget(dict_mark);
                        pending.clear();
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("tacit: {e}");
                break;
            }
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut cfg = VmConfig::default();
    if let Some(align) = args.code_align {
        cfg.code_align_bytes = align;
    }
    if let Some(size) = args.stack_size {
        cfg.stack_segment_size = size;
    }

    let mut vm = Interpreter::new(cfg);
    vm.printer = Box::new(ConsolePrinter);

    let mut any_file_failed = false;
    for path in &args.files {
        if let Err(e) = load_file(&mut vm, path) {
            eprintln!("tacit: {e}");
            any_file_failed = true;
            if args.exit_on_error {
                return ExitCode::FAILURE;
            }
        }
    }

    if !args.no_interactive {
        run_repl(&mut vm);
    }

    if any_file_failed && args.exit_on_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
