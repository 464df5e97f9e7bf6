use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lexical error at line {line} ({lexeme}): {message}")]
    Lexical {
        line: usize,
        lexeme: String,
        message: String,
    },
    #[error("parse error at line {line} ({lexeme}): {message}")]
    Parse {
        line: usize,
        lexeme: String,
        message: String,
    },
    #[error("runtime error at line {line} ({lexeme}): {message}")]
    Runtime {
        line: usize,
        lexeme: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
