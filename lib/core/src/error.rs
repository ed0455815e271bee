//! Error handling foundation for amber-loom.
//!
//! Only the shared `Result` alias lives here. Domain crates define their own
//! error enums next to the code that raises them and attach layer context with
//! rootcause's `.context()` while propagating.

use rootcause::Report;

/// Platform-wide Result alias over rootcause's `Report`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_defaults_to_unit_context() {
        let value: Result<u8> = Ok(7);
        assert_eq!(value.expect("ok"), 7);
    }
}
