// IR LOGGING MACROS
#[macro_export]
#[cfg(feature = "show_ir")]
macro_rules! ir_log {
    ($($arg:tt)*) => {
        saying::say!($($arg)*);
    };
}

#[macro_export]
#[cfg(not(feature = "show_ir"))]
macro_rules! ir_log {
    ($($arg:tt)*) => {
        // Nothing
    };
}

// PASS PIPELINE LOGGING MACROS
#[macro_export]
#[cfg(feature = "show_passes")]
macro_rules! pass_log {
    ($($arg:tt)*) => {
        saying::say!($($arg)*);
    };
}

#[macro_export]
#[cfg(not(feature = "show_passes"))]
macro_rules! pass_log {
    ($($arg:tt)*) => {
        // Nothing
    };
}
