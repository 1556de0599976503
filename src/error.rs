use std::path::PathBuf;

/// Failures raised while lexing, parsing or running a snippet.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("syntax error at offset {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("{0} is not defined")]
    Reference(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("evaluation budget of {0} steps exhausted")]
    Budget(usize),

    #[error("maximum call depth of {0} exceeded")]
    Depth(usize),

    #[error("evaluation nested deeper than {0} levels")]
    Nesting(usize),
}

impl ScriptError {
    pub fn syntax(pos: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}

/// A parser snippet that could not be turned into a callable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParserCompileError {
    #[error("parser {name:?}: {source}")]
    Script {
        name: String,
        #[source]
        source: ScriptError,
    },

    #[error("parser {name:?} does not evaluate to a function (got {got})")]
    NotCallable { name: String, got: &'static str },

    #[error("parser {name:?} declares no binding named {binding:?}")]
    MissingBinding { name: String, binding: String },

    #[error("parser name must not be empty")]
    EmptyName,
}

/// A filter expression that failed to compile or evaluate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("filter {text:?}: {source}")]
pub struct FilterEvalError {
    pub text: String,
    #[source]
    pub source: ScriptError,
}

/// Input that does not look like any accepted trace payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataShapeError {
    #[error("expected an array of events or an object, got {0}")]
    UnexpectedRoot(&'static str),

    #[error("object has none of the fields `events`, `uploads` or `traces`")]
    NoEvents,
}

/// I/O or decoding failures at the boundary with trace files, the parser
/// store and export targets.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("reading {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decoding {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no trace source at position {0}")]
    MissingSource(usize),

    #[error("parser store has no entry with id {0}")]
    UnknownParserId(i64),
}
