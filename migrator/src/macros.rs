//! Error construction macros used throughout the coordinator.
//!
//! [`migrator_error!`] builds a [`crate::error::MigrationError`] and [`bail!`] returns one from
//! the enclosing function. Both capture the callsite, which the error renders next to its kind.

/// Builds a [`crate::error::MigrationError`] from an [`crate::error::ErrorKind`] and a static
/// description.
///
/// The description names the failure, e.g. `"Cutover step timed out"`, and must stay static so
/// occurrences of the same failure hash alike. Anything specific to one occurrence, such as the
/// table or the attempt number, goes into the optional detail:
///
/// - `migrator_error!(kind, desc, detail_expr)` renders the detail with `to_string()`.
/// - `migrator_error!(kind, desc, detail = owned_string)` moves an owned [`String`] in.
/// - A trailing `source: err` keeps the underlying failure, as the cutover retry loop does
///   with the last attempt's error.
#[macro_export]
macro_rules! migrator_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::MigrationError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::MigrationError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::MigrationError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::MigrationError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::MigrationError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::MigrationError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with a [`crate::error::MigrationError`] built by [`migrator_error!`].
///
/// Accepts the same arguments. Used for guard checks such as rejecting a cutover before the row
/// copy completed or a phase change requested by a stale critical section guard.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::migrator_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::migrator_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        return ::core::result::Result::Err($crate::migrator_error!($kind, $desc, detail = $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::migrator_error!(
            $kind,
            $desc,
            detail = $detail,
            source: $source
        ))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::migrator_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::migrator_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
