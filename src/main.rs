use clap::Parser;
use dirs::home_dir;
use log::{debug, info};
use loxen::{
    cli::{Args, Commands},
    error::Result,
    parser::{parse, parse_expressions},
    repl::{REPLPrompt, REPLValidator, SyntaxHighlighter},
    runtime::Interpreter,
    tokenizer::tokenize,
};
use nu_ansi_term::{Color, Style};
use reedline::{DefaultHinter, FileBackedHistory, Reedline, Signal};
use std::{fs, path::PathBuf};

fn run_file(file: PathBuf) -> Result<()> {
    let source = fs::read_to_string(file)?;

    let (tokens, scan_errors) = tokenize(&source);
    let (statements, parse_errors) = parse(&tokens);

    let syntax_errors = scan_errors.len() + parse_errors.len();
    for err in scan_errors.iter().chain(parse_errors.iter()) {
        eprintln!("{}", err);
    }
    if syntax_errors > 0 {
        debug!("{} syntax errors, not executing", syntax_errors);
        return Ok(());
    }

    let mut interpreter = Interpreter::new();
    interpreter.interpret_with(&statements, |err| eprintln!("{}", err));

    Ok(())
}

fn check_file(file: PathBuf) -> Result<()> {
    let source = fs::read_to_string(file)?;

    let (tokens, scan_errors) = tokenize(&source);
    debug!("{} tokens", tokens.len());

    let (statements, parse_errors) = parse(&tokens);
    debug!("{} statements", statements.len());

    let syntax_errors = scan_errors.len() + parse_errors.len();
    for err in scan_errors.iter().chain(parse_errors.iter()) {
        eprintln!("{}", err);
    }
    if syntax_errors == 0 {
        println!("ok");
    }

    Ok(())
}

fn run_repl() -> Result<()> {
    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(
            DefaultHinter::default().with_style(Style::new().italic().fg(Color::LightGray)),
        ))
        .with_highlighter(Box::new(SyntaxHighlighter))
        .with_validator(Box::new(REPLValidator));

    // Add file-backed history if possible
    if let Some(history) = home_dir()
        .map(|home| home.join(".loxen_history"))
        .and_then(|path| FileBackedHistory::with_file(20, path).ok())
        .map(Box::new)
    {
        line_editor = line_editor.with_history(history);
    } else {
        eprintln!("NOTE: Failed to load history. Persistence is now disabled.")
    }

    let prompt = REPLPrompt;
    let mut interpreter = Interpreter::new();

    loop {
        match line_editor.read_line(&prompt)? {
            Signal::Success(buffer) => {
                let (tokens, scan_errors) = tokenize(&buffer);
                if !scan_errors.is_empty() {
                    for err in &scan_errors {
                        eprintln!("{}", err);
                    }
                    continue;
                }

                // A bare expression sequence echoes its values;
                // anything else runs as statements.
                let (expressions, expr_errors) = parse_expressions(&tokens);
                if expr_errors.is_empty() {
                    for expr in &expressions {
                        match interpreter.evaluate(expr) {
                            Ok(value) => println!("{:?}", value),
                            Err(err) => eprintln!("{}", err),
                        }
                    }
                    continue;
                }

                let (statements, parse_errors) = parse(&tokens);
                if !parse_errors.is_empty() {
                    for err in &parse_errors {
                        eprintln!("{}", err);
                    }
                    continue;
                }

                interpreter.interpret_with(&statements, |err| eprintln!("{}", err));
            }
            Signal::CtrlD | Signal::CtrlC => {
                break Ok(());
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Run { file } => {
            info!("FILE MODE");
            debug!("file: {:?}", file);

            run_file(file)
                .inspect_err(|err| {
                    eprintln!("{}", err);
                })
                .ok();
        }
        Commands::Check { file } => {
            info!("CHECK MODE");
            debug!("file: {:?}", file);

            check_file(file)
                .inspect_err(|err| {
                    eprintln!("{}", err);
                })
                .ok();
        }
        Commands::Repl => {
            info!("REPL MODE");

            run_repl()
                .inspect_err(|err| {
                    eprintln!("{}", err);
                })
                .ok();
        }
    }
    Ok(())
}
