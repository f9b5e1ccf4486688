use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("I/O error while {context}: {source}")]
    Open {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error in {file} line {line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },
    #[error("frame {frame} already evicted from the stack window (first retained frame {first_frame})")]
    ForgottenFrame { frame: u32, first_frame: u32 },
    #[error("frame {frame} beyond the stack window (last frame {last_frame})")]
    FutureFrame { frame: u32, last_frame: u32 },
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl DecoderError {
    pub fn open(context: &'static str, source: std::io::Error) -> Self {
        Self::Open { context, source }
    }

    pub fn parse(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
