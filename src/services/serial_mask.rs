use regex::Regex;

use crate::errors::ServiceError;

/// Placeholder for "any single digit" in a part's serial mask
pub const DIGIT_PLACEHOLDER: char = '#';

/// Compiled serial mask. `31########` accepts exactly ten characters: the
/// literal `31` followed by eight ASCII digits.
#[derive(Debug, Clone)]
pub struct SerialMask {
    template: String,
    pattern: Regex,
}

impl SerialMask {
    pub fn compile(template: &str) -> Result<Self, ServiceError> {
        let template = template.trim();
        if template.is_empty() {
            return Err(ServiceError::ValidationError(
                "serial mask must not be empty".to_string(),
            ));
        }

        let mut source = String::with_capacity(template.len() * 5 + 2);
        source.push('^');
        for ch in template.chars() {
            if ch == DIGIT_PLACEHOLDER {
                source.push_str("[0-9]");
            } else {
                source.push_str(&regex::escape(&ch.to_string()));
            }
        }
        source.push('$');

        let pattern = Regex::new(&source).map_err(|e| {
            ServiceError::ValidationError(format!("invalid serial mask '{}': {}", template, e))
        })?;

        Ok(Self {
            template: template.to_string(),
            pattern,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn matches(&self, serial: &str) -> bool {
        self.pattern.is_match(serial)
    }

    pub fn validate(&self, serial: &str) -> Result<(), ServiceError> {
        if self.matches(serial) {
            Ok(())
        } else {
            Err(ServiceError::ValidationError(format!(
                "serial '{}' does not match mask '{}'",
                serial, self.template
            )))
        }
    }
}

/// Validates `serial` against an optional mask; absent or blank masks accept anything.
pub fn validate_serial(mask: Option<&str>, serial: &str) -> Result<(), ServiceError> {
    match mask.map(str::trim).filter(|m| !m.is_empty()) {
        Some(template) => SerialMask::compile(template)?.validate(serial),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("3112345678", true)]
    #[case("311234567", false)]
    #[case("31123456789", false)]
    #[case("3A12345678", false)]
    #[case("4112345678", false)]
    #[case("31１2345678", false)]
    fn battery_mask_cases(#[case] serial: &str, #[case] ok: bool) {
        let mask = SerialMask::compile("31########").unwrap();
        assert_eq!(mask.matches(serial), ok, "serial {serial}");
    }

    #[test]
    fn literal_regex_characters_are_escaped() {
        let mask = SerialMask::compile("BT.##-(#)").unwrap();
        assert!(mask.matches("BT.12-(3)"));
        assert!(!mask.matches("BTx12-(3)"));
    }

    #[test]
    fn blank_mask_accepts_anything() {
        assert!(validate_serial(None, "whatever").is_ok());
        assert!(validate_serial(Some("  "), "whatever").is_ok());
        assert!(matches!(
            validate_serial(Some("##"), "abc"),
            Err(ServiceError::ValidationError(_))
        ));
    }

    proptest! {
        #[test]
        fn any_eight_digits_after_prefix_match(digits in "[0-9]{8}") {
            let mask = SerialMask::compile("31########").unwrap();
            let serial = format!("31{}", digits);
            prop_assert!(mask.matches(&serial));
        }

        #[test]
        fn wrong_length_never_matches(digits in "[0-9]{0,7}|[0-9]{9,12}") {
            let mask = SerialMask::compile("31########").unwrap();
            let serial = format!("31{}", digits);
            prop_assert!(!mask.matches(&serial));
        }
    }
}
