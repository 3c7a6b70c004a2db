//! the main compiler binary. takes a source file (or standard input), an
//! optional output path and dump stage, and optimization flags.
//!
//! run with `--help` for more info.

use std::io::Read;
use std::process::ExitCode;

use minic::front::errors::Reporter;
use minic::{back, front, middle, Options};

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file; standard input when omitted
    file: Option<String>,
    /// where to write the output; standard output when omitted
    #[arg(short)]
    output: Option<String>,
    /// the output stage
    #[arg(value_enum, short, long, default_value_t = Emit::Asm)]
    emit: Emit,
    /// turn on optimizations
    #[arg(short = 'O', default_value_t = false)]
    optimize: bool,
    /// write staged dumps (ir.txt, ir2.txt, mr.asm, mr2.asm) here
    #[arg(long)]
    dump_dir: Option<std::path::PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Emit {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// the optimized SSA IR
    Ir,
    /// the machine IR before register allocation
    Mir,
    /// the resulting assembly code
    Asm,
}

fn read_input(args: &Args) -> String {
    let bytes = match &args.file {
        Some(path) => std::fs::read(path).expect("input file should be readable"),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .expect("stdin should be readable");
            buf
        }
    };
    String::from_utf8(bytes).expect("input characters should be utf8")
}

fn write_output(args: &Args, text: &str) {
    match &args.output {
        Some(path) => std::fs::write(path, text).expect("output file should be writable"),
        None => print!("{}", text),
    }
}

fn parse_checked(input: &str) -> Result<front::ast::Program, Reporter> {
    let tokens = front::lex::lex(input);
    let mut reporter = Reporter::default();
    let ast = front::parse::parse(&tokens, &mut reporter);
    if reporter.has_errors() {
        return Err(reporter);
    }
    Ok(ast.expect("no errors means a program"))
}

fn main() -> ExitCode {
    use Emit::*;
    env_logger::init();
    let args = Args::parse();
    let input = read_input(&args);
    let opts = Options {
        optimize: args.optimize,
        dump_dir: args.dump_dir.clone(),
    };

    match args.emit {
        Tokens => {
            for token in front::lex::lex(&input) {
                println!("{token}");
            }
        }
        Ast => match parse_checked(&input) {
            Ok(ast) => println!("{:?}", ast),
            Err(errs) => {
                eprint!("{}", errs);
                return ExitCode::FAILURE;
            }
        },
        Ir => match parse_checked(&input) {
            Ok(ast) => {
                let mut prog = middle::build::build_ir(ast);
                middle::run_passes(&mut prog, args.optimize);
                write_output(&args, &prog.to_string());
            }
            Err(errs) => {
                eprint!("{}", errs);
                return ExitCode::FAILURE;
            }
        },
        Mir => match parse_checked(&input) {
            Ok(ast) => {
                let mut prog = middle::build::build_ir(ast);
                middle::run_passes(&mut prog, args.optimize);
                let mr = back::build::build_mr(&mut prog);
                write_output(&args, &back::emit::emit(&mr));
            }
            Err(errs) => {
                eprint!("{}", errs);
                return ExitCode::FAILURE;
            }
        },
        Asm => match minic::compile(&input, &opts) {
            Ok(asm) => write_output(&args, &asm),
            Err(errs) => {
                eprint!("{}", errs);
                return ExitCode::FAILURE;
            }
        },
    }
    ExitCode::SUCCESS
}
