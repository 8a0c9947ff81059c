/// Normalises dialled numbers to the `+<digits>` form used as the retained
/// secrets key.
#[derive(Debug, Clone)]
pub struct PhoneNumberFormatter {
    local_number: String,
}

impl PhoneNumberFormatter {
    pub fn new(local_number: impl Into<String>) -> Self {
        Self {
            local_number: local_number.into(),
        }
    }

    pub fn is_valid_number(number: &str) -> bool {
        number.starts_with('+')
            && !number.contains(['.', '-', ' '])
            && number.len() >= 12
    }

    /// Numbers without a `+` prefix borrow their missing leading digits
    /// (country and area code) from the local number.
    pub fn format_number(&self, number: &str) -> String {
        let number: String = number
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();

        if number.starts_with('+') {
            return number;
        }

        let local = self
            .local_number
            .strip_prefix('+')
            .unwrap_or(&self.local_number);

        if local.len() <= number.len() {
            return format!("+{number}");
        }

        match local.get(..local.len() - number.len()) {
            Some(prefix) => format!("+{prefix}{number}"),
            None => format!("+{number}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_formatter() -> PhoneNumberFormatter {
        PhoneNumberFormatter::new("+14155551234")
    }

    #[test]
    fn test_international_number_is_kept() {
        assert_eq!(make_formatter().format_number("+44 20-7946 0958"), "+442079460958");
    }

    #[test]
    fn test_local_number_borrows_prefix() {
        assert_eq!(make_formatter().format_number("555-9876"), "+14155559876");
        assert_eq!(make_formatter().format_number("(415) 555-9876"), "+14155559876");
    }

    #[test]
    fn test_full_length_number_gets_plus() {
        assert_eq!(make_formatter().format_number("14155559876"), "+14155559876");
        assert_eq!(make_formatter().format_number("0014155559876"), "+0014155559876");
    }

    #[test]
    fn test_validity() {
        assert!(PhoneNumberFormatter::is_valid_number("+14155551234"));
        assert!(!PhoneNumberFormatter::is_valid_number("14155551234"));
        assert!(!PhoneNumberFormatter::is_valid_number("+1415-555-1234"));
        assert!(!PhoneNumberFormatter::is_valid_number("+1415555"));
    }
}
