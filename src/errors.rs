use std::backtrace::Backtrace;
use std::fmt;

#[derive(Debug)]
pub enum TreeError {
    Decode(String),
    TypeMismatch(String),
    InvariantViolation(String, Backtrace),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::Decode(s) => write!(f, "Failed to decode column buffer: {}", s),
            TreeError::TypeMismatch(s) => write!(f, "Type mismatch: {}", s),
            TreeError::InvariantViolation(s, _) => {
                write!(f, "Some invariant was violated. This is a bug: {}", s)
            }
        }
    }
}

impl std::error::Error for TreeError {}

#[macro_export]
macro_rules! fatal {
    ($e:expr) => {
        $crate::TreeError::InvariantViolation($e.to_owned(), std::backtrace::Backtrace::capture())
    };
    ($fmt:expr, $($arg:tt)+) => {
        $crate::TreeError::InvariantViolation(format!($fmt, $($arg)+), std::backtrace::Backtrace::capture())
    };
}

#[macro_export]
macro_rules! bail {
    ($kind:expr, $e:expr) => {
        return Err($kind($e.to_owned()))
    };
    ($kind:expr, $fmt:expr, $($arg:tt)+) => {
        return Err($kind(format!($fmt, $($arg)+).to_owned()))
    };
}

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            return Err($crate::TreeError::InvariantViolation(
                $e.to_string(),
                std::backtrace::Backtrace::capture(),
            ));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)+) => {
        if !($cond) {
            return Err($crate::TreeError::InvariantViolation(
                format!($fmt, $($arg)+),
                std::backtrace::Backtrace::capture(),
            ));
        }
    };
}
