//! # Logging Macros
//!
//! Crate-internal logging front end. With the `log` feature the macros forward to
//! the [`log`](https://docs.rs/log) facade, with `esp32-log` they print through
//! `esp-println`, and without either they only borrow their arguments so the
//! call sites stay warning-free.
#![allow(unused_macros)]

macro_rules! log_event {
    ($level:ident, $tag:literal, $s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "log")]
        ::log::$level!($s $(, $x)*);
        #[cfg(feature = "esp32-log")]
        ::esp_println::println!(concat!("[", $tag, "] ", $s) $(, $x)*);
        #[cfg(not(any(feature = "log", feature = "esp32-log")))]
        {
            let _ = ($(&$x,)*);
        }
    }};
}

macro_rules! trace {
    ($($arg:tt)*) => { log_event!(trace, "TRACE", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { log_event!(debug, "DEBUG", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { log_event!(info, "INFO", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { log_event!(warn, "WARN", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { log_event!(error, "ERROR", $($arg)*) };
}
