//! Helper macros for logging (console printing).
//!
//! Every macro takes a display prefix before the `;`, normally the node's
//! `host:port` endpoint, so lines from multiple nodes sharing one process
//! (as in tests) stay tellable apart.

/// Log TRACE message with parenthesized prefix.
///
/// Example:
/// ```no_run
/// pf_trace!(me; "got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_trace {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)* $(,)?) => {
        log::trace!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log DEBUG message with parenthesized prefix.
#[macro_export]
macro_rules! pf_debug {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)* $(,)?) => {
        log::debug!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log INFO message with parenthesized prefix.
#[macro_export]
macro_rules! pf_info {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)* $(,)?) => {
        log::info!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log WARN message with parenthesized prefix.
#[macro_export]
macro_rules! pf_warn {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)* $(,)?) => {
        log::warn!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log ERROR message with parenthesized prefix.
#[macro_export]
macro_rules! pf_error {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)* $(,)?) => {
        log::error!(concat!("({}) ", $fmt_str), $prefix $(, $fmt_arg)*)
    };
}

/// Log an error string to logger and then return a `ShoalError` containing
/// the prefixed string, wrapped in `Err`.
///
/// Example:
/// ```no_run
/// return logged_err!(me; "got {} to print", msg);
/// ```
#[macro_export]
macro_rules! logged_err {
    ($prefix:expr; $fmt_str:literal $(, $fmt_arg:expr)* $(,)?) => {{
        pf_error!($prefix; $fmt_str $(, $fmt_arg)*);
        Err($crate::ShoalError(format!(
            concat!("({}) ", $fmt_str),
            $prefix $(, $fmt_arg)*
        )))
    }};
}

#[cfg(test)]
mod print_tests {
    use crate::utils::ShoalError;

    #[test]
    fn error_no_args() {
        let e: Result<(), ShoalError> = logged_err!("worth"; "a plain message");
        assert_eq!(e, Err(ShoalError("(worth) a plain message".into())));
    }

    #[test]
    fn error_with_args() {
        let e: Result<(), ShoalError> = logged_err!(7; "got {} to print", 777);
        assert_eq!(e, Err(ShoalError("(7) got 777 to print".into())));
    }
}
