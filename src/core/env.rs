/*!
 * Environment Flags
 * One parser for every boolean switch read from the environment
 */

/// `1`, `true`, `yes` and `on` (any case) enable a flag; anything else disables it
pub(crate) fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Whether the flag variable `key` is set to an enabling value
pub(crate) fn env_flag(key: &str) -> bool {
    std::env::var(key).map_or(false, |raw| parse_flag(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag_accepts_common_spellings() {
        for raw in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(parse_flag(raw), "{raw:?} should enable");
        }
        for raw in ["0", "false", "off", "", "maybe"] {
            assert!(!parse_flag(raw), "{raw:?} should disable");
        }
    }

    #[test]
    fn test_env_flag_unset_is_false() {
        assert!(!env_flag("FORKQ_TEST_FLAG_NEVER_SET"));
    }
}
