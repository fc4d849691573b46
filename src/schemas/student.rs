use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StudentIdentity {
    pub(crate) name: String,
    pub(crate) phone: String,
}

#[derive(Debug, Clone, Serialize, Validate)]
pub(crate) struct LoginRequest {
    #[validate(length(min = 1, max = 120, message = "name is required"))]
    pub(crate) name: String,
    #[validate(length(min = 1, max = 32, message = "phone is required"))]
    pub(crate) phone: String,
}

impl LoginRequest {
    pub(crate) fn new(name: &str, phone: &str) -> Self {
        Self { name: name.trim().to_string(), phone: phone.trim().to_string() }
    }

    pub(crate) fn fallback_identity(&self) -> StudentIdentity {
        StudentIdentity { name: self.name.clone(), phone: self.phone.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_trims_fields() {
        let request = LoginRequest::new("  Jean Dupont ", " 699000111 ");
        assert_eq!(request.name, "Jean Dupont");
        assert_eq!(request.phone, "699000111");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn login_request_rejects_blank_fields() {
        let request = LoginRequest::new("   ", "699000111");
        let errors = request.validate().expect_err("blank name");
        assert!(errors.field_errors().contains_key("name"));

        let request = LoginRequest::new("Jean", "");
        let errors = request.validate().expect_err("blank phone");
        assert!(errors.field_errors().contains_key("phone"));
    }
}
