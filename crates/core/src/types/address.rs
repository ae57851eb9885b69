//! Shipping and billing addresses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::email::Email;

/// Fields of a [`ShippingAddress`], used to key field-level validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressField {
    Name,
    Email,
    Phone,
    Street,
    City,
    State,
    ZipCode,
    Country,
}

impl AddressField {
    /// Human-readable label for messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Name => "Full name",
            Self::Email => "Email",
            Self::Phone => "Phone",
            Self::Street => "Street address",
            Self::City => "City",
            Self::State => "State",
            Self::ZipCode => "ZIP code",
            Self::Country => "Country",
        }
    }
}

/// Field-level validation messages, ordered by field.
pub type FieldErrors = BTreeMap<AddressField, String>;

/// An address as entered in the checkout form.
///
/// Values are kept as typed; [`ShippingAddress::validate`] decides whether the
/// address is complete enough to leave the shipping step. A saved profile
/// address is copied in, never referenced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

impl ShippingAddress {
    /// Check that every required field is present.
    ///
    /// # Errors
    ///
    /// Returns one message per offending field. A blank ZIP code is reported
    /// on [`AddressField::ZipCode`] specifically.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        let required = [
            (AddressField::Name, &self.name),
            (AddressField::Phone, &self.phone),
            (AddressField::Street, &self.street),
            (AddressField::City, &self.city),
            (AddressField::State, &self.state),
            (AddressField::ZipCode, &self.zip_code),
            (AddressField::Country, &self.country),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.insert(field, format!("{} is required", field.label()));
            }
        }

        if let Err(e) = Email::parse(&self.email) {
            errors.insert(AddressField::Email, capitalize(&e.to_string()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// A copy with surrounding whitespace removed from every field.
    #[must_use]
    pub fn trimmed(&self) -> Self {
        Self {
            name: self.name.trim().to_owned(),
            email: self.email.trim().to_owned(),
            phone: self.phone.trim().to_owned(),
            street: self.street.trim().to_owned(),
            city: self.city.trim().to_owned(),
            state: self.state.trim().to_owned(),
            zip_code: self.zip_code.trim().to_owned(),
            country: self.country.trim().to_owned(),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn complete() -> ShippingAddress {
        ShippingAddress {
            name: "Jo Runner".to_string(),
            email: "jo@example.com".to_string(),
            phone: "555-0100".to_string(),
            street: "1 Track Ln".to_string(),
            city: "Portland".to_string(),
            state: "OR".to_string(),
            zip_code: "97201".to_string(),
            country: "US".to_string(),
        }
    }

    #[test]
    fn test_complete_address_is_valid() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn test_missing_zip_reported_on_zip_field() {
        let address = ShippingAddress {
            zip_code: "  ".to_string(),
            ..complete()
        };
        let errors = address.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[&AddressField::ZipCode], "ZIP code is required");
    }

    #[test]
    fn test_invalid_email_reported() {
        let address = ShippingAddress {
            email: "jo-at-example".to_string(),
            ..complete()
        };
        let errors = address.validate().unwrap_err();
        assert!(errors[&AddressField::Email].starts_with("Email"));
    }

    #[test]
    fn test_empty_address_reports_every_field() {
        let errors = ShippingAddress::default().validate().unwrap_err();
        assert_eq!(errors.len(), 8);
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = serde_json::to_value(complete()).unwrap();
        assert_eq!(json["zipCode"], "97201");
    }

    #[test]
    fn test_trimmed() {
        let address = ShippingAddress {
            city: "  Portland ".to_string(),
            ..complete()
        };
        assert_eq!(address.trimmed().city, "Portland");
    }
}
