//! This is the compiler as a library.  See `src/bin` directory for the
//! executable program using this library.
//!
//! The pipeline is strictly linear: source text is lexed and parsed into an
//! AST (`front`), lowered to an SSA control-flow-graph IR and optimized
//! (`middle`), then lowered to a virtual-register MIPS IR, register-allocated
//! and written out as MARS-compatible assembly (`back`).

pub mod common;
pub mod front;
pub mod middle;
pub mod back;

use front::errors::Reporter;

/// Compilation options shared by the driver and the tests.
#[derive(Clone, Default, Debug)]
pub struct Options {
    /// Run the full optimization pipeline instead of the minimal
    /// cleanup passes.
    pub optimize: bool,
    /// Write `ir.txt`, `ir2.txt`, `mr.asm` and `mr2.asm` into this
    /// directory as the stages complete.
    pub dump_dir: Option<std::path::PathBuf>,
}

fn dump(opts: &Options, name: &str, text: &str) {
    if let Some(dir) = &opts.dump_dir {
        // Dumps are best-effort; a failed write must not abort compilation.
        if let Err(e) = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(dir.join(name), text))
        {
            log::warn!("cannot write dump {}: {}", name, e);
        }
    }
}

/// Compile `source` to assembly text.
///
/// On source-level errors the collected diagnostics are returned instead;
/// they are already sorted by line.
pub fn compile(source: &str, opts: &Options) -> Result<String, Reporter> {
    let tokens = front::lex::lex(source);
    let mut reporter = Reporter::default();
    let ast = front::parse::parse(&tokens, &mut reporter);
    if reporter.has_errors() {
        return Err(reporter);
    }
    let ast = ast.expect("parse returns a program when no errors were reported");

    let mut prog = middle::build::build_ir(ast);
    dump(opts, "ir.txt", &prog.to_string());
    middle::run_passes(&mut prog, opts.optimize);
    dump(opts, "ir2.txt", &prog.to_string());

    let mut mr = back::build::build_mr(&mut prog);
    dump(opts, "mr.asm", &back::emit::emit(&mr));
    back::run_mips_passes(&mut mr);
    let asm = back::emit::emit(&mr);
    dump(opts, "mr2.asm", &asm);
    Ok(asm)
}
