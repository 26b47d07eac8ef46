//! Macro for implementing string conversions on status-like enums
//!
//! Generates `as_str`, `Display` and `FromStr` from a single variant table so
//! the persisted representation and the parser can never drift apart.
//!
//! # Example
//!
//! ```rust
//! use offsync_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum LinkState {
//!     Up,
//!     Down,
//! }
//!
//! impl_domain_status_conversions!(LinkState {
//!     Up => "up",
//!     Down => "down",
//! });
//!
//! assert_eq!(LinkState::Up.as_str(), "up");
//! assert_eq!("DOWN".parse::<LinkState>(), Ok(LinkState::Down));
//! ```

/// Implements `as_str`, `Display` and `FromStr` for status enums
///
/// - Parsing is case-insensitive and ignores surrounding whitespace
/// - Output is always the canonical lowercase string
/// - Parse errors name the enum and echo the rejected input
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Canonical string used for persistence and wire formats.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        Queued,
        Running,
        Done,
    }

    impl_domain_status_conversions!(Phase {
        Queued => "queued",
        Running => "running",
        Done => "done",
    });

    #[test]
    fn display_uses_canonical_string() {
        assert_eq!(Phase::Queued.to_string(), "queued");
        assert_eq!(Phase::Running.as_str(), "running");
    }

    #[test]
    fn parsing_ignores_case_and_whitespace() {
        assert_eq!(Phase::from_str("DONE").unwrap(), Phase::Done);
        assert_eq!(Phase::from_str("  Running ").unwrap(), Phase::Running);
    }

    #[test]
    fn parsing_rejects_unknown_values() {
        let err = Phase::from_str("paused").unwrap_err();
        assert!(err.contains("Invalid Phase: paused"));
        assert!(Phase::from_str("").is_err());
    }

    mod with_result_alias {
        use crate::errors::Result;

        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Lane {
            Fast,
            Slow,
        }

        impl_domain_status_conversions!(Lane {
            Fast => "fast",
            Slow => "slow",
        });

        pub fn parse(raw: &str) -> Result<Lane> {
            raw.parse().map_err(crate::errors::QueueError::Validation)
        }
    }

    #[test]
    fn expands_where_the_crate_result_alias_is_in_scope() {
        assert_eq!(with_result_alias::parse("slow").unwrap(), with_result_alias::Lane::Slow);
        assert!(with_result_alias::parse("medium").is_err());
    }
}
